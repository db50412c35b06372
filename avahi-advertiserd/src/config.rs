use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::error::StartupError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/avahi-advertiser/advertiser.toml";

/// Environment variables that override file settings
pub const ENV_CONFIG_PATH: &str = "AVAHI_ADVERTISER_CONFIG";
pub const ENV_HOSTS_FILE: &str = "AVAHI_HOSTS_FILE";
pub const ENV_SERVICES_DIR: &str = "AVAHI_SERVICES_DIR";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub avahi: AvahiConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvahiConfig {
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,
    #[serde(default = "default_services_dir")]
    pub services_dir: PathBuf,
    /// Program and arguments run to make avahi-daemon pick up changes
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_secs: u64,
    /// How often a failed reload is retried while nothing else happens
    #[serde(default = "default_reload_retry")]
    pub reload_retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Sleep before retrying a watch after a transient error
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Server-side watch timeout; the watch is reopened when it elapses
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout_secs: u32,
    /// Relist every service after the watch expired, repairing missed deletes
    #[serde(default = "default_relist")]
    pub relist_on_reconnect: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/avahi/hosts")
}

fn default_services_dir() -> PathBuf {
    PathBuf::from("/etc/avahi/services")
}

fn default_reload_command() -> Vec<String> {
    vec![
        "systemctl".to_string(),
        "reload".to_string(),
        "avahi-daemon".to_string(),
    ]
}

fn default_reload_timeout() -> u64 {
    10
}

fn default_reload_retry() -> u64 {
    30
}

fn default_backoff() -> u64 {
    5
}

fn default_watch_timeout() -> u32 {
    290
}

fn default_relist() -> bool {
    true
}

fn default_api_enabled() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:9254".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AvahiConfig {
    fn default() -> Self {
        Self {
            hosts_file: default_hosts_file(),
            services_dir: default_services_dir(),
            reload_command: default_reload_command(),
            reload_timeout_secs: default_reload_timeout(),
            reload_retry_secs: default_reload_retry(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
            watch_timeout_secs: default_watch_timeout(),
            relist_on_reconnect: default_relist(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_listen(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AvahiConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn reload_retry(&self) -> Duration {
        Duration::from_secs(self.reload_retry_secs)
    }
}

impl WatchConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| StartupError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, StartupError> {
        let config: Config = toml::from_str(contents).map_err(|e| StartupError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate(path)?;
        Ok(config)
    }

    /// Resolve the config file and apply environment overrides.
    ///
    /// An explicitly named file must exist; the default location is optional.
    pub fn resolve(
        explicit: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Option<PathBuf>), StartupError> {
        let explicit = explicit.or_else(|| env(ENV_CONFIG_PATH).map(PathBuf::from));

        let (mut config, source) = match explicit {
            Some(path) => (Self::load(&path)?, Some(path)),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    (Self::load(&path)?, Some(path))
                } else {
                    (Self::default(), None)
                }
            }
        };

        config.apply_env(env);
        let origin = source.clone().unwrap_or_else(|| PathBuf::from("<environment>"));
        config.validate(&origin)?;
        Ok((config, source))
    }

    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(hosts) = env(ENV_HOSTS_FILE) {
            self.avahi.hosts_file = PathBuf::from(hosts);
        }
        if let Some(dir) = env(ENV_SERVICES_DIR) {
            self.avahi.services_dir = PathBuf::from(dir);
        }
        if let Some(level) = env(ENV_LOG_LEVEL) {
            self.log.level = level.to_lowercase();
        }
    }

    fn validate(&self, origin: &Path) -> Result<(), StartupError> {
        let invalid = |reason: &str| StartupError::ConfigLoad {
            path: origin.to_path_buf(),
            reason: reason.to_string(),
        };

        if self.avahi.reload_command.is_empty() {
            return Err(invalid("avahi.reload_command must not be empty"));
        }
        if self.avahi.reload_timeout_secs == 0 {
            return Err(invalid("avahi.reload_timeout_secs must be positive"));
        }
        if self.avahi.reload_retry_secs == 0 {
            return Err(invalid("avahi.reload_retry_secs must be positive"));
        }
        // The API server rejects watch timeouts of 295s and above
        if !(1..295).contains(&self.watch.watch_timeout_secs) {
            return Err(invalid("watch.watch_timeout_secs must be between 1 and 294"));
        }
        if !matches!(
            self.log.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(invalid("log.level must be one of trace, debug, info, warn, error"));
        }
        Ok(())
    }
}
