use anyhow::Context;
use clap::Parser;
use du_exporter::collectors::{DuProbe, UsageCollector};
use du_exporter::config::Settings;
use du_exporter::error::ConfigError;
use du_exporter::server;
use du_exporter::supervisor::Supervisor;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Environment fallback for `--monitor`, a comma-separated list of paths
const MONITOR_ENV: &str = "DU_EXPORTER_MONITOR";

/// Command-line arguments for the disk usage exporter
///
/// Values given here override the configuration file, which in turn
/// overrides the built-in defaults.
#[derive(Parser)]
#[command(
    name = "du-exporter",
    version,
    about = "Prometheus exporter for directory sizes measured with du",
    long_about = "Measures the configured paths with `du -k -d 1` on every scrape and exposes \
                  the sizes of each path and its immediate children as Prometheus gauges."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Address to listen on for the web interface and telemetry
    #[arg(
        long = "web.listen-address",
        env = "DU_EXPORTER_LISTEN_ADDRESS",
        value_name = "ADDRESS"
    )]
    listen_address: Option<String>,

    /// Path under which to expose metrics
    #[arg(
        long = "web.telemetry-path",
        env = "DU_EXPORTER_TELEMETRY_PATH",
        value_name = "PATH"
    )]
    metrics_path: Option<String>,

    /// Path to measure; repeat the flag for several paths
    #[arg(
        long = "monitor",
        value_name = "PATH",
        long_help = "Path to measure; repeat the flag for several paths. Each value is one path, \
                     commas included. Without the flag, DU_EXPORTER_MONITOR is read as a \
                     comma-separated list."
    )]
    monitor: Vec<String>,

    /// Prefix for exported metric names
    #[arg(long, value_name = "NAMESPACE")]
    namespace: Option<String>,

    /// Disk usage program to run
    #[arg(long = "du.command", value_name = "PROGRAM")]
    du_command: Option<String>,

    /// Seconds before a single du run is killed
    #[arg(long = "du.timeout-seconds", value_name = "SECONDS")]
    du_timeout_seconds: Option<u64>,

    /// Server panics tolerated before exiting
    #[arg(long = "supervisor.max-restarts", value_name = "COUNT")]
    max_restarts: Option<u32>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_settings
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Paths to measure from the command line or the environment
    ///
    /// # Arguments
    ///
    /// * `from_env` - Raw value of `DU_EXPORTER_MONITOR`, if set
    ///
    /// # Returns
    ///
    /// The `--monitor` values unchanged when the flag was given, otherwise the
    /// environment value split on commas. Empty when neither is present.
    fn monitor_paths(&self, from_env: Option<String>) -> Vec<String> {
        if !self.monitor.is_empty() {
            return self.monitor.clone();
        }
        from_env
            .map(|raw| {
                raw.split(',')
                    .filter(|path| !path.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Overlay the values given on the command line onto `settings`
    fn apply(&self, settings: Settings) -> Settings {
        self.apply_with_env(settings, std::env::var(MONITOR_ENV).ok())
    }

    fn apply_with_env(&self, mut settings: Settings, monitor_env: Option<String>) -> Settings {
        if let Some(ref listen_address) = self.listen_address {
            settings.listen_address = listen_address.clone();
        }
        if let Some(ref metrics_path) = self.metrics_path {
            settings.metrics_path = metrics_path.clone();
        }
        let monitor = self.monitor_paths(monitor_env);
        if !monitor.is_empty() {
            settings.monitor = monitor;
        }
        if let Some(ref namespace) = self.namespace {
            settings.namespace = namespace.clone();
        }
        if let Some(ref du_command) = self.du_command {
            settings.du_command = du_command.clone();
        }
        if let Some(timeout) = self.du_timeout_seconds {
            settings.du_timeout_seconds = timeout;
        }
        if let Some(max_restarts) = self.max_restarts {
            settings.max_restarts = max_restarts;
        }
        settings
    }
}

/// Load settings from file, or use defaults when the file is absent
fn load_settings(config_path: Option<&Path>) -> Result<Settings, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Settings::from_file(path) {
                Ok(settings) => Ok(settings),
                Err(ConfigError::ReadError(e)) => {
                    warn!("Configuration file not readable ({}), using defaults", e);
                    Ok(Settings::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Settings::default())
        }
    }
}

#[cfg(unix)]
fn spawn_hangup_listener() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(mut hangups) => {
            tokio::spawn(async move {
                while hangups.recv().await.is_some() {
                    info!("Received hangup signal (SIGHUP), nothing to reload");
                }
            });
        }
        Err(e) => warn!("Failed to install SIGHUP listener: {}", e),
    }
}

#[cfg(not(unix))]
fn spawn_hangup_listener() {}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.apply(load_settings(cli.config.as_deref())?);
    settings.validate().context("invalid configuration")?;

    let addr = settings.listen_addr()?;
    let paths = settings.path_set()?;

    info!("Starting du-exporter {}", env!("CARGO_PKG_VERSION"));

    let probe = Arc::new(DuProbe::new(&settings.du_command, settings.du_timeout()));
    info!(
        "Measuring with {} (timeout {:?})",
        settings.du_command,
        probe.timeout()
    );
    let collector = UsageCollector::new(&settings.namespace, paths, probe)?;
    info!("Monitoring {}", collector.paths());
    let registry = server::build_registry(collector, &settings.namespace)
        .context("failed to register collectors")?;
    let app = server::router(registry, &settings.metrics_path);

    // Set up signal handling for graceful shutdown (SIGINT)
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("failed to install SIGINT handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        spawn_hangup_listener();

        let supervisor = Supervisor::new(settings.max_restarts);
        supervisor
            .run(|| server::serve(addr, app.clone(), shutdown_receiver.clone()))
            .await
    })?;

    info!("du-exporter shutdown complete");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
