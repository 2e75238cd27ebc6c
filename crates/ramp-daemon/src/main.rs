//! Filter ramp daemon entry point.
//!
//! Wires configuration, the service client, the clock and the ramp driver
//! together with signal handling and logging.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ramp_client::{ConfigClient, SimulatedConfigService, TcpConfigClient};
use ramp_common::config::{ClientDriver, ClockSource, RampConfig};
use ramp_common::{Clock, MonotonicClock, ShutdownSignal, WallClock};
use ramp_driver::{RampDriver, RampSettings, RampSummary};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::signals::SignalHandler;

/// Filter ramp command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "filter-ramp",
    about = "Ramp a remote configuration field with elapsed time",
    version,
    long_about = None
)]
struct Args {
    /// Path to a ramp configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Configuration service name (overrides config file).
    #[arg(long, value_name = "NAME")]
    service: Option<String>,

    /// Remote field to ramp (overrides config file).
    #[arg(long, value_name = "NAME")]
    field: Option<String>,

    /// Warm-up delay before the first update, e.g. "4s".
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    warmup: Option<Duration>,

    /// Update rate in Hz.
    #[arg(long, value_name = "HZ")]
    rate: Option<f64>,

    /// Multiplier applied to elapsed seconds.
    #[arg(long, value_name = "FACTOR", allow_negative_numbers = true)]
    speedup: Option<f64>,

    /// Talk to a configuration service over TCP at host:port.
    #[arg(long, value_name = "ADDR", conflicts_with = "simulated")]
    connect: Option<String>,

    /// Use the in-memory simulated service.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Stop after this many updates (0 = until shutdown).
    #[arg(long, value_name = "N")]
    max_updates: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting filter ramp");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service,
        field = %config.field,
        warmup = %humantime::format_duration(config.warmup),
        rate_hz = config.rate_hz,
        speedup = config.speedup_factor,
        driver = ?config.client.driver,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let summary = run(&config, &signal_handler)?;
    info!(
        signals = signal_handler.state().signal_count(),
        last_signal = ?signal_handler.state().last_signal(),
        final_state = %summary.final_state,
        "Filter ramp shutdown complete"
    );

    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "ramp_daemon={level},ramp_driver={level},ramp_client={level},ramp_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RAMP_CONFIG_PATH` environment variable
/// 3. `/etc/filter-ramp/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RampConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RampConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("RAMP_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RAMP_CONFIG_PATH");
            return RampConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RAMP_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "RAMP_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/filter-ramp/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return RampConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {path}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(RampConfig::default())
}

/// Apply command-line flags on top of the loaded configuration.
fn apply_overrides(config: &mut RampConfig, args: &Args) {
    if let Some(service) = &args.service {
        config.service.clone_from(service);
    }
    if let Some(field) = &args.field {
        config.field.clone_from(field);
    }
    if let Some(warmup) = args.warmup {
        config.warmup = warmup;
    }
    if let Some(rate) = args.rate {
        config.rate_hz = rate;
    }
    if let Some(speedup) = args.speedup {
        config.speedup_factor = speedup;
    }
    if let Some(max_updates) = args.max_updates {
        config.max_updates = max_updates;
    }
    if let Some(address) = &args.connect {
        config.client.driver = ClientDriver::Tcp;
        config.client.tcp.address.clone_from(address);
    }
    if args.simulated {
        config.client.driver = ClientDriver::Simulated;
    }
}

/// Create the service client selected by configuration.
fn create_client(config: &RampConfig) -> Box<dyn ConfigClient> {
    match config.client.driver {
        ClientDriver::Simulated => {
            warn!(service = %config.service, "Using simulated configuration service, no remote node is updated");
            Box::new(SimulatedConfigService::new(config.service.as_str()).client())
        }
        ClientDriver::Tcp => {
            info!(address = %config.client.tcp.address, "Using TCP configuration client");
            Box::new(TcpConfigClient::with_config(
                config.service.as_str(),
                config.client.tcp.clone(),
            ))
        }
    }
}

fn create_clock(source: ClockSource) -> Box<dyn Clock> {
    match source {
        ClockSource::Monotonic => Box::new(MonotonicClock::new()),
        ClockSource::Wall => Box::new(WallClock),
    }
}

/// Run the ramp until shutdown, update limit, or a fatal error.
fn run<S: ShutdownSignal>(config: &RampConfig, shutdown: &S) -> Result<RampSummary> {
    let client = create_client(config);
    let clock = create_clock(config.clock);

    let mut driver = RampDriver::new(client, clock, RampSettings::from_config(config))
        .context("Failed to create ramp driver")?;

    let summary = driver
        .run(shutdown)
        .with_context(|| format!("Ramp of {}/{} failed", config.service, config.field))?;

    let metrics = driver.metrics();
    info!(
        updates = summary.updates_sent,
        failed = summary.updates_failed,
        missed_ticks = summary.missed_ticks,
        last_value = summary.last_value.unwrap_or_default(),
        p99_latency_us = metrics.latency_percentile(99.0).map_or(0, |d| d.as_micros()),
        max_latency_us = metrics.max_latency().map_or(0, |d| d.as_micros()),
        ramp_secs = summary.ramp_duration.as_secs_f64(),
        "Ramp finished"
    );

    Ok(summary)
}
