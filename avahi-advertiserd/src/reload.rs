use std::future::Future;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use crate::config::AvahiConfig;
use crate::error::ReloadError;

/// Something that makes avahi-daemon pick up artifact changes
pub trait Reloader {
    fn reload(&self) -> impl Future<Output = Result<(), ReloadError>> + Send;
}

/// Runs an external command, `systemctl reload avahi-daemon` by default
pub struct CommandReloader {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandReloader {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &AvahiConfig) -> Self {
        Self::new(config.reload_command.clone(), config.reload_timeout())
    }

    fn display(&self) -> String {
        self.command.join(" ")
    }
}

impl Reloader for CommandReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        let (program, args) = self.command.split_first().ok_or(ReloadError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ReloadError::Timeout {
                command: self.display(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| ReloadError::Spawn {
                command: self.display(),
                source,
            })?;

        if !output.status.success() {
            return Err(ReloadError::Failed {
                command: self.display(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Coalesces artifact mutations into one reload per processing pass.
///
/// The dirty flag is cleared only by a successful reload; a failed reload
/// leaves it set for the next flush.
pub struct ReloadGate<R> {
    reloader: R,
    dirty: bool,
    last_reload: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl<R: Reloader> ReloadGate<R> {
    pub fn new(reloader: R) -> Self {
        Self {
            reloader,
            dirty: false,
            last_reload: None,
            last_error: None,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_reload(&self) -> Option<DateTime<Utc>> {
        self.last_reload
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reload if anything changed since the last successful reload.
    /// Returns whether a reload was performed.
    pub async fn flush_if_dirty(&mut self) -> Result<bool, ReloadError> {
        if !self.dirty {
            return Ok(false);
        }

        match self.reloader.reload().await {
            Ok(()) => {
                self.dirty = false;
                self.last_reload = Some(Utc::now());
                self.last_error = None;
                tracing::info!("Successfully reloaded avahi-daemon");
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Failed to reload avahi-daemon: {}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
