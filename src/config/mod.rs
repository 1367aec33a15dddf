/// Immutable list of monitored paths
pub mod path_set;

/// Exporter settings loaded from TOML and the command line
pub mod settings;

pub use path_set::PathSet;
pub use settings::Settings;
