use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use stepcam_core::important;
use stepcam_runtime::{AppConfig, Driver};

const DEFAULT_LOG_FILTER: &str = "warn,important=info";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "stepcam", version, about = "Captures pictures on process-step changes")]
struct Cli {
    /// YAML configuration file; environment variables override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the controller and capture until interrupted (default).
    Run,
    /// Validate the configuration and print the strategy table as JSON.
    CheckConfig,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let config = AppConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => check_config(&config),
        Command::Run => run(config).await,
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    let table = config.build_strategy_table()?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let driver = Driver::from_config(&config)?;
    for (step, entry) in driver.table().entries() {
        important!("Step {}: {:?} after {:?}", step, entry.kind, entry.delay);
    }
    important!(
        "Monitoring {} on {} for {}",
        config.step_variable,
        driver.endpoint(),
        config.equipment
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut running = tokio::spawn(async move { driver.run(shutdown_rx).await });

    tokio::select! {
        finished = &mut running => {
            finished.context("driver task panicked")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            important!("Interrupted, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut running).await {
        Ok(finished) => finished.context("driver task panicked")??,
        Err(_) => {
            tracing::warn!("[Shutdown] driver did not stop within {:?}", SHUTDOWN_GRACE);
            running.abort();
        }
    }
    Ok(())
}
