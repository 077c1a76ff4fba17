//! fleetwatchd: FleetWatch monitor daemon
//!
//! Discovers cloud-platform assets, collects their metrics on a fixed
//! interval, tracks health and uptime, raises alerts and estimates cost.

use clap::{Parser, Subcommand};
use fleetwatchd::{Daemon, MonitorConfig, monitor};
use fw_proto::now_ms;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_CONFIG: &str = "/etc/fleetwatch/config.json";

#[derive(Parser)]
#[command(name = "fleetwatchd")]
#[command(about = "FleetWatch cloud fleet monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Run a single monitoring cycle and print its report as JSON
    Once {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,

        /// Platform account id
        #[arg(long, default_value = "")]
        account: String,
    },

    /// Execute a query command against persisted snapshots
    ///
    /// Examples:
    ///   fleetwatchd exec overview
    ///   fleetwatchd exec asset.health --params '{"asset_id":"shop-api"}'
    ///   fleetwatchd exec costs --params '{"timeframe":"7d"}'
    Exec {
        /// Command name (e.g. overview, asset.history, alerts)
        command: String,

        /// JSON parameters for the command (default: {})
        #[arg(long, default_value = "{}")]
        params: String,

        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Suppress tracing for exec commands to keep stdout clean JSON
    if !matches!(cli.command, Commands::Exec { .. }) {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env().add_directive("fleetwatchd=info".parse()?))
            .init();
    }

    match cli.command {
        Commands::Run { config } => run_monitor(&config).await?,
        Commands::Once { config } => run_once(&config).await?,
        Commands::InitConfig { output, account } => init_config(&output, account)?,
        Commands::Exec {
            command,
            params,
            config,
        } => exec_command(&command, &params, &config).await?,
    }

    Ok(())
}

// ─── Run ─────────────────────────────────────────────────────────────────────

async fn run_monitor(config_path: &Path) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting fleetwatchd");

    let config = MonitorConfig::load(config_path)?;
    info!(
        account = %config.account_id,
        interval_secs = config.interval_secs,
        max_concurrency = config.max_concurrency,
        retention = config.retention_per_asset,
        persisted = config.state_path.is_some(),
        "loaded config"
    );

    let daemon = Daemon::connect(&config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    daemon.monitor.run(shutdown_rx).await;
    Ok(())
}

// ─── Once ────────────────────────────────────────────────────────────────────

async fn run_once(config_path: &Path) -> anyhow::Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let daemon = Daemon::connect(&config)?;
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let tick = now_ms();
    let report = daemon.monitor.run_cycle(tick, &mut shutdown_rx).await;
    let snapshots = monitor::latest_for_tick(daemon.monitor.store(), tick);

    let out = serde_json::json!({
        "report": report,
        "snapshots": snapshots,
        "alerts": daemon.monitor.alerts().active(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

// ─── InitConfig ──────────────────────────────────────────────────────────────

fn init_config(output: &Path, account_id: String) -> anyhow::Result<()> {
    let config = MonitorConfig {
        account_id,
        state_path: Some(PathBuf::from("/var/lib/fleetwatch")),
        ..MonitorConfig::default()
    };

    config.save(output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Set FLEETWATCH_API_TOKEN (or add api_token to the file), then run:");
    println!("  fleetwatchd run --config {}", output.display());

    Ok(())
}

// ─── Exec ────────────────────────────────────────────────────────────────────

async fn exec_command(command: &str, params_str: &str, config_path: &Path) -> anyhow::Result<()> {
    use fleetwatchd::commands::{CommandRequest, handle_command};

    let params: serde_json::Value =
        serde_json::from_str(params_str).map_err(|e| anyhow::anyhow!("invalid JSON params: {e}"))?;

    let config = if config_path.exists() {
        MonitorConfig::load(config_path)?
    } else {
        MonitorConfig::default()
    };
    let service = fleetwatchd::offline_service(&config);

    let request = CommandRequest {
        command: command.to_string(),
        params,
    };

    match handle_command(&service, request).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Err(e) => {
            let err = serde_json::json!({
                "ok": false,
                "error": e.to_string(),
                "command": command,
            });
            println!("{}", serde_json::to_string_pretty(&err)?);
            std::process::exit(1);
        }
    }

    Ok(())
}
