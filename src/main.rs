//! AXIS CLI entry point.
//!
//! Provides `run`, `monitor` and `check-config` subcommands for running the
//! agent, printing journal events as they arrive, or validating config.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use axis::config::{config_dir, AxisConfig};
use axis::event::Event;
use axis::journal::{EventSink, JournalReader};
use axis::kernel::Kernel;
use axis::logging;
use axis::skills::DockedGreeting;

/// AXIS — event-driven automation agent for Elite Dangerous.
#[derive(Parser)]
#[command(name = "axis", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the agent until interrupted.
    Run {
        /// Config file (defaults to $AXIS_CONFIG or ~/.axis/axis.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Journal directory, overriding config.
        #[arg(long)]
        journal_dir: Option<PathBuf>,
    },
    /// Print journal events as they are written.
    Monitor {
        /// Journal directory, overriding config.
        #[arg(long)]
        journal_dir: Option<PathBuf>,
    },
    /// Load and validate the config, then print the effective values.
    CheckConfig {
        /// Config file (defaults to $AXIS_CONFIG or ~/.axis/axis.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            journal_dir,
        } => handle_run(config, journal_dir).await,
        Command::Monitor { journal_dir } => handle_monitor(journal_dir).await,
        Command::CheckConfig { config } => handle_check_config(config),
    }
}

fn load(config: Option<PathBuf>, journal_dir: Option<PathBuf>) -> anyhow::Result<AxisConfig> {
    let mut config = AxisConfig::load(config.as_deref()).context("failed to load configuration")?;
    if journal_dir.is_some() {
        config.journal.dir = journal_dir;
    }
    Ok(config)
}

/// Run the kernel until ctrl-c or SIGTERM.
async fn handle_run(config: Option<PathBuf>, journal_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(config, journal_dir)?;

    let logs_dir = config_dir()?.join("logs");
    let _logging_guard = logging::init_production(&logs_dir, &config.logging.level)?;

    let kernel = Kernel::new(config).context("failed to build kernel")?;
    kernel.register_skill(Arc::new(DockedGreeting::new()));
    kernel.start().context("failed to start kernel")?;

    info!(version = env!("CARGO_PKG_VERSION"), "axis running");
    wait_for_shutdown_signal().await?;

    kernel.shutdown().await.context("failed to stop kernel")?;
    let stats = kernel.stats();
    info!(
        events = stats.events_received,
        handler_errors = stats.handler_errors,
        parse_errors = stats.parse_errors,
        watchdog_fires = stats.watchdog_fires,
        "axis stopped"
    );
    Ok(())
}

/// Tail the journal and print each event to stdout.
async fn handle_monitor(journal_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(None, journal_dir)?;
    logging::init_cli(&config.logging.level);

    let dir = config
        .journal
        .resolve_dir()
        .context("no journal directory configured and no default could be resolved")?;
    if !dir.is_dir() {
        anyhow::bail!("journal directory {} is not accessible", dir.display());
    }
    let reader = JournalReader::from_config(dir.clone(), &config.journal)?;

    println!("monitoring {} (ctrl-c to stop)", dir.display());

    let sink: Arc<dyn EventSink> = Arc::new(|event: Event| println!("{event}"));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(reader.run(sink, shutdown_rx));

    wait_for_shutdown_signal().await?;

    if shutdown_tx.send(true).is_err() {
        warn!("journal reader already exited");
    }
    task.await.context("journal reader task failed")?;
    Ok(())
}

/// Validate config and print it.
fn handle_check_config(config: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let config = load(config, None)?;

    let journal_dir = config
        .journal
        .resolve_dir()
        .map_or_else(|| "<unresolved>".to_owned(), |d| d.display().to_string());

    println!("config OK");
    println!("  journal.dir: {journal_dir}");
    println!("  journal.pattern: {}", config.journal.pattern);
    println!("  journal.poll_interval_ms: {}", config.journal.poll_interval_ms);
    println!("  watchdog.timeout_ms: {}", config.watchdog.timeout_ms);
    if let Some(state) = &config.watchdog.recovery_state {
        println!("  watchdog.recovery_state: {state}");
    }
    println!("  fsm.initial_state: {}", config.fsm.initial_state);
    for (kind, state) in &config.transitions {
        println!("  transitions.{kind}: {state}");
    }
    Ok(())
}

/// Resolve on ctrl-c or (on unix) SIGTERM.
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received ctrl-c, shutting down");
    }

    Ok(())
}
