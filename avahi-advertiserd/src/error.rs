use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions detected before the watch loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to load config from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("Artifact location {path} is not usable: {reason}")]
    Permission { path: PathBuf, reason: String },
}

/// Watch stream failures, split by how the watcher recovers from them
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    /// The resourceVersion is gone; a fresh subscription is required
    #[error("Watch expired: {0}")]
    Stale(String),

    /// Network or API trouble; retry the same subscription after a backoff
    #[error("Transient watch error: {0}")]
    Transient(String),
}

/// I/O failure on one of the two artifact locations
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Reload command is empty")]
    EmptyCommand,

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Timeout after {secs}s while running {command}")]
    Timeout { command: String, secs: u64 },

    #[error("{command} exited with code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },
}
