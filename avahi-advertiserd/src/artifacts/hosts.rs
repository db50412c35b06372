use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use shared::protocol::MANAGED_MARKER;
use shared::types::ServiceRef;
use crate::error::{ArtifactError, StartupError};
use super::write_atomic;

/// One managed A/AAAA record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub address: IpAddr,
    /// Fully qualified, e.g. "shop.local"
    pub hostname: String,
    pub owner: ServiceRef,
}

impl HostEntry {
    /// `<address> <fqdn> <marker> (<namespace>/<name>)`
    pub fn to_line(&self) -> String {
        format!("{} {} {} ({})", self.address, self.hostname, MANAGED_MARKER, self.owner)
    }
}

/// A marker-bearing line found in the hosts file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLine {
    pub address: String,
    pub hostname: String,
    /// Absent if the owner suffix is missing or unparsable
    pub owner: Option<ServiceRef>,
}

/// Parse a line written by this daemon; `None` for anything unmanaged
pub fn parse_managed_line(line: &str) -> Option<ManagedLine> {
    let (record, trailer) = line.split_once(MANAGED_MARKER)?;

    let mut fields = record.split_whitespace();
    let address = fields.next()?.to_string();
    let hostname = fields.next()?.to_string();

    let owner = trailer
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .and_then(|s| s.parse().ok());

    Some(ManagedLine {
        address,
        hostname,
        owner,
    })
}

/// True if `line` is managed and its hostname field is exactly `hostname`
fn is_managed_for(line: &str, hostname: &str) -> bool {
    parse_managed_line(line).is_some_and(|managed| managed.hostname == hostname)
}

/// The shared avahi hosts file. Lines without the managed marker are never touched.
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file if missing and verify it can be read and written
    pub fn ensure_accessible(&self) -> Result<(), StartupError> {
        let denied = |reason: String| StartupError::Permission {
            path: self.path.clone(),
            reason,
        };

        if !self.path.exists() {
            tracing::warn!("Avahi hosts file does not exist, will create: {}", self.path.display());
        }

        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| denied(format!("not writable: {}", e)))?;

        std::fs::read_to_string(&self.path).map_err(|e| denied(format!("not readable: {}", e)))?;

        Ok(())
    }

    pub fn read(&self) -> Result<String, ArtifactError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ArtifactError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn managed_entries(&self) -> Result<Vec<ManagedLine>, ArtifactError> {
        Ok(self.read()?.lines().filter_map(parse_managed_line).collect())
    }

    /// Write the entry for `entry.hostname`, replacing any managed line for the
    /// same hostname in place. Returns whether the file changed.
    pub fn upsert(&self, entry: &HostEntry) -> Result<bool, ArtifactError> {
        let current = self.read()?;
        let new_line = entry.to_line();

        let mut lines: Vec<&str> = Vec::new();
        let mut placed = false;
        for line in current.lines() {
            if is_managed_for(line, &entry.hostname) {
                if !placed {
                    lines.push(&new_line);
                    placed = true;
                }
                continue;
            }
            lines.push(line);
        }
        if !placed {
            lines.push(&new_line);
        }

        self.replace(&current, &lines)
    }

    /// Drop managed lines for `hostname`. Returns whether the file changed.
    pub fn remove(&self, hostname: &str) -> Result<bool, ArtifactError> {
        let current = self.read()?;
        let lines: Vec<&str> = current
            .lines()
            .filter(|line| !is_managed_for(line, hostname))
            .collect();

        self.replace(&current, &lines)
    }

    fn replace(&self, current: &str, lines: &[&str]) -> Result<bool, ArtifactError> {
        if lines.iter().copied().eq(current.lines()) {
            return Ok(false);
        }

        let mut updated = String::with_capacity(current.len() + 128);
        for line in lines {
            updated.push_str(line);
            updated.push('\n');
        }

        write_atomic(&self.path, &updated)?;
        Ok(true)
    }
}
