use std::net::SocketAddr;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while measuring a path
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Measurement of {path} exited with {status}: {stderr}")]
    SubprocessFailed {
        path: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Subprocess terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Measurement of {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that end the HTTP serving entry point
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Errors that stop the supervisor from restarting the server
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Server restarted {restarts} times after panics, giving up")]
    RestartLimitExceeded { restarts: u32 },

    #[error("Server task was cancelled")]
    Cancelled,

    #[error(transparent)]
    Serve(#[from] ServeError),
}
