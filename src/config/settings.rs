use crate::config::PathSet;
use crate::error::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDRESS: &str = ":9101";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_NAMESPACE: &str = "file_size";
pub const DEFAULT_DU_COMMAND: &str = "du";
pub const DEFAULT_DU_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// Exporter settings
///
/// Every field has a default, so a TOML file only needs to name the values it
/// changes:
///
/// ```toml
/// listen_address = ":9101"
/// metrics_path = "/metrics"
/// monitor = ["/var/log", "/srv"]
/// du_timeout_seconds = 10
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Address to listen on, `host:port` or `:port`
    pub listen_address: String,
    /// HTTP path serving the metrics
    pub metrics_path: String,
    /// Paths measured on every scrape
    pub monitor: Vec<String>,
    /// Prefix for every exported metric name
    pub namespace: String,
    /// Disk usage program, invoked as `<du_command> -k -d 1 <path>`
    pub du_command: String,
    /// Deadline for a single measurement
    pub du_timeout_seconds: u64,
    /// Panics tolerated before the server gives up
    pub max_restarts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            monitor: vec![".".to_string()],
            namespace: DEFAULT_NAMESPACE.to_string(),
            du_command: DEFAULT_DU_COMMAND.to_string(),
            du_timeout_seconds: DEFAULT_DU_TIMEOUT_SECONDS,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read and
    /// `ConfigError::TomlError` if it is not valid TOML for these settings.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check every value, including the derived listen address and path set
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        self.path_set()?;

        if !self.metrics_path.starts_with('/') || self.metrics_path == "/" {
            return Err(ConfigError::ValidationError(format!(
                "metrics path must start with '/' and not be the root page: {:?}",
                self.metrics_path
            )));
        }

        if !is_literal_route(&self.metrics_path) {
            return Err(ConfigError::ValidationError(format!(
                "metrics path must be a literal route without captures or wildcards: {:?}",
                self.metrics_path
            )));
        }

        if !is_valid_namespace(&self.namespace) {
            return Err(ConfigError::ValidationError(format!(
                "namespace is not a valid metric name prefix: {:?}",
                self.namespace
            )));
        }

        if self.du_command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "du command must not be empty".to_string(),
            ));
        }

        if self.du_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "du timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse the listen address, expanding `:port` to `0.0.0.0:port`
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };

        address.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid listen address {:?}: {}",
                self.listen_address, e
            ))
        })
    }

    pub fn path_set(&self) -> Result<PathSet, ConfigError> {
        PathSet::new(self.monitor.iter().cloned())
    }

    pub fn du_timeout(&self) -> Duration {
        Duration::from_secs(self.du_timeout_seconds)
    }
}

/// Router paths treat `{..}` as a capture and reject segments led by `:` or `*`
fn is_literal_route(path: &str) -> bool {
    !path.contains(['{', '}'])
        && path
            .split('/')
            .all(|segment| !segment.starts_with([':', '*']))
}

/// Metric names match `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
