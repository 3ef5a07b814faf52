use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use towerwatch::{Config, Engine, SimulatedFeed};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "towerwatch", version, about = "Threshold alarms for load-cell towers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the alarm engine
    Run {
        /// YAML configuration file
        config: PathBuf,
    },
    /// Validate a configuration file and exit
    Check {
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    towerwatch::init()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Check { config } => check(&config),
        Command::Run { config } => run(&config).await,
    }
}

fn check(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    println!(
        "{}: {} devices ({} active), tick {} ms, actuator {:?}",
        path.display(),
        config.devices.len(),
        config.active_devices().count(),
        config.engine.tick_ms,
        config.actuator.kind
    );
    Ok(())
}

async fn run(path: &Path) -> Result<()> {
    info!("{}", towerwatch::build_info::summary());

    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    info!(
        "Loaded {} devices ({} active)",
        config.devices.len(),
        config.active_devices().count()
    );

    let engine = Arc::new(Engine::from_config(&config)?);

    let feed = SimulatedFeed::from_config(&config, engine.reading_bus().clone()).map(SimulatedFeed::spawn);
    if feed.is_none() {
        warn!("No simulation section, waiting for readings from an external feed");
    }

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("event: {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    let runner = Arc::clone(&engine);
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            engine.stop();
        }
        res = runner.run() => {
            if let Err(e) = res {
                error!("Engine error: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(handle) = feed {
        handle.abort();
    }

    let stats = engine.stats();
    info!(
        "Final stats: {} ticks, {} watchdog re-arms, {} actuator commands ({} failed), uptime: {}s",
        stats.tick_count,
        stats.watchdog_rearms,
        stats.actuator_sent,
        stats.actuator_failures,
        stats.uptime_secs
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
