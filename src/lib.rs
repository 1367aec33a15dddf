/// Error types for the exporter
pub mod error;

/// Disk usage probes and the Prometheus collector
pub mod collectors;

/// Configuration management
pub mod config;

/// Parsed `du` output
pub mod snapshot;

/// HTTP scrape endpoint
pub mod server;

/// Restart policy for the HTTP server
pub mod supervisor;

// Re-export commonly used types
pub use error::{CollectorError, ConfigError, ServeError, SupervisorError};
