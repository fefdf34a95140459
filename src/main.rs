//! Relaycast - One-Way TCP Relay
//!
//! Relays an opaque byte stream from a single upstream TCP endpoint to any
//! number of downstream TCP endpoints, with either side configured to listen
//! for or dial its peer.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycast::config::{ConfigManager, RelayConfig, RelayMode};
use relaycast::relay::RelaySession;
use relaycast::ShutdownCoordinator;

/// CLI arguments for relaycast
#[derive(Parser, Debug)]
#[command(name = "relaycast")]
#[command(about = "One-way TCP byte stream relay with downstream fan-out")]
#[command(version)]
#[command(long_about = "
relaycast - One-Way TCP Relay

Relays an opaque byte stream from an upstream TCP endpoint to any number of
downstream TCP endpoints. Each side is independently configured to either
accept inbound connections or dial out, covering NAT and firewall layouts
where the producer and its consumers cannot reach each other directly.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  RELAYCAST_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
  RELAYCAST_BUFFER_SIZE      - Read buffer size in bytes
  RELAYCAST_SHUTDOWN_TIMEOUT - Shutdown timeout (e.g., 10s, 1m)
")]
pub struct CliArgs {
    /// Upstream endpoint (host:port)
    #[arg(value_name = "UPSTREAM", help = "Upstream endpoint (host:port)")]
    pub upstream: Option<String>,

    /// Downstream endpoint (host:port)
    #[arg(value_name = "DOWNSTREAM", help = "Downstream endpoint (host:port)")]
    pub downstream: Option<String>,

    /// Connection mode
    #[arg(
        short,
        long,
        default_value = "connect-listen",
        help = "Connection mode: connect-listen, listen-connect, connect-connect or listen-listen"
    )]
    pub mode: String,

    /// Dump relayed payload to the log
    #[arg(long, help = "Dump relayed payload to the log")]
    pub dump: bool,

    /// Interval between dial attempts in seconds
    #[arg(long, default_value = "5", help = "Interval between dial attempts in seconds")]
    pub retry: u64,

    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "relaycast.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Read buffer size in bytes
    #[arg(long, help = "Read buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Shutdown timeout in seconds
    #[arg(long, help = "Shutdown timeout in seconds")]
    pub shutdown_timeout: Option<u64>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!("Starting relaycast v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(args.buffer_size, args.shutdown_timeout);

    // A relay given on the command line runs alongside any file-defined ones.
    match (&args.upstream, &args.downstream) {
        (Some(upstream), Some(downstream)) => {
            let relay = RelayConfig {
                name: "cli".to_string(),
                upstream: upstream.parse().context("invalid upstream endpoint")?,
                downstream: downstream.parse().context("invalid downstream endpoint")?,
                mode: args.mode.parse::<RelayMode>()?,
                dump: args.dump,
                retry_interval: Duration::from_secs(args.retry),
            };
            config.relays.push(relay);
        }
        (None, None) => {}
        _ => bail!("both UPSTREAM and DOWNSTREAM must be given together"),
    }

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    if config.relays.is_empty() {
        bail!("no relay configured: pass UPSTREAM and DOWNSTREAM or provide a config file");
    }

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Buffer size: {} bytes", config.general.buffer_size);
        info!("  Shutdown timeout: {:?}", config.general.shutdown_timeout);
        for relay in &config.relays {
            info!(
                "  Relay '{}': {} / {} (dump: {}, retry: {:?})",
                relay.name,
                relay.upstream_role(),
                relay.downstream_role(),
                relay.dump,
                relay.retry_interval
            );
        }
        return Ok(());
    }

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new(config.general.shutdown_timeout);

    // Start one independent session per configured relay
    let mut sessions = Vec::new();
    for relay_config in &config.relays {
        let session = RelaySession::start(relay_config.clone(), &config.general)
            .await
            .with_context(|| format!("failed to start relay '{}'", relay_config.name))?;
        sessions.push(session);
    }

    info!("{} relay session(s) running", sessions.len());
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Start listening for shutdown signals
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    // Initiate graceful shutdown
    info!("Initiating graceful shutdown...");
    shutdown_coordinator.shutdown_sessions(&sessions).await?;

    info!("Shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
