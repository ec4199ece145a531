use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use broker::SimulationBroker;
use calendar::{CalendarSource, ExchangeHours, StaticCalendarSource};
use configuration::{Config, load_config};
use control::{ControlMode, EventLoop, LoopCommand, RunParams};
use core_types::RunMode;
use domain::{DomainDef, DomainRegistry, ExchangeMapping};
use events_log::{EventsLog, NoOpEventsLog, SqliteEventsLog};
use process_manager::{
    LiveProcessManager, LocalProcessFactory, ProcessManager, RecoveryPolicy,
    SimulationProcessManager,
};

/// The main entry point for the Maestro session control plane.
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            if let Err(e) = handle_run(args).await {
                eprintln!("Error during run: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A control plane running trading-strategy sessions against exchange
/// calendars, in simulation or live mode.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sessions declared in a strategies manifest.
    Run(RunArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to the configuration file (without the .toml extension).
    #[arg(long, default_value = "config")]
    config: String,

    /// Path to the strategies manifest (JSON).
    #[arg(long)]
    manifest: PathBuf,

    /// The first calendar date of the run (format: YYYY-MM-DD).
    #[arg(long)]
    from: NaiveDate,

    /// The last calendar date of the run, inclusive (format: YYYY-MM-DD).
    #[arg(long)]
    to: NaiveDate,
}

// ==============================================================================
// Strategies Manifest
// ==============================================================================

/// One session request as declared in the manifest file.
#[derive(Deserialize)]
struct ManifestEntry {
    session_id: String,
    /// Postfix domain expression, e.g. "US:equity GB:equity |".
    domain: String,
    capital_ratio: Decimal,
    max_leverage: Decimal,
}

fn load_manifest(path: &PathBuf) -> Result<Vec<RunParams>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&contents).context("failed to parse the strategies manifest")?;
    entries
        .into_iter()
        .map(|entry| {
            let domain = DomainDef::parse(&entry.domain)
                .with_context(|| format!("invalid domain for session '{}'", entry.session_id))?;
            Ok(RunParams {
                session_id: entry.session_id,
                domain,
                capital_ratio: entry.capital_ratio,
                max_leverage: entry.max_leverage,
            })
        })
        .collect()
}

// ==============================================================================
// Run Command Logic
// ==============================================================================

fn build_calendar(config: &Config) -> Result<Arc<dyn CalendarSource>> {
    let hours: HashMap<String, ExchangeHours> = config
        .calendar
        .exchanges
        .iter()
        .map(|(exchange, h)| {
            (
                exchange.clone(),
                ExchangeHours {
                    open: h.open,
                    close: h.close,
                },
            )
        })
        .collect();
    Ok(Arc::new(StaticCalendarSource::new(hours)?))
}

fn build_mapping(config: &Config) -> ExchangeMapping {
    let to_sets = |table: &HashMap<String, Vec<String>>| {
        table
            .iter()
            .map(|(key, exchanges)| {
                (
                    key.clone(),
                    exchanges.iter().cloned().collect::<BTreeSet<String>>(),
                )
            })
            .collect()
    };
    ExchangeMapping {
        by_country: to_sets(&config.mapping.countries),
        by_asset_type: to_sets(&config.mapping.asset_types),
    }
}

async fn handle_run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.config).context("failed to load configuration")?;
    let params = load_manifest(&args.manifest)?;

    println!(
        "Starting {} run: {} session(s), {} to {}",
        match config.run_mode {
            RunMode::Simulation => "simulation",
            RunMode::Live => "live",
        },
        params.len(),
        args.from,
        args.to
    );

    let calendar = build_calendar(&config)?;
    let registry = DomainRegistry::new(build_mapping(&config));
    let broker = Arc::new(SimulationBroker::new(
        config.broker.total_capital,
        config.broker.max_leverage,
    ));
    // In-process workers; remote transports plug in behind `Controllable`.
    let factory = Arc::new(LocalProcessFactory::new());

    let (events_log, manager): (Arc<dyn EventsLog>, Arc<dyn ProcessManager>) =
        match config.run_mode {
            // Pure simulation journals nothing and treats failures as fatal.
            RunMode::Simulation => (
                Arc::new(NoOpEventsLog),
                Arc::new(SimulationProcessManager::new()),
            ),
            RunMode::Live => {
                let events_log = Arc::new(
                    SqliteEventsLog::open(&config.events_log.root)
                        .await
                        .context("failed to open the events log")?,
                );
                let manager = Arc::new(LiveProcessManager::new(
                    Arc::clone(&factory) as _,
                    Arc::clone(&events_log) as _,
                    RecoveryPolicy {
                        max_attempts: config.recovery.max_attempts,
                        backoff_ms: config.recovery.backoff_ms,
                    },
                ));
                (events_log, manager)
            }
        };

    let control = ControlMode::new(
        config.run_mode,
        args.from,
        args.to,
        registry,
        Arc::clone(&calendar),
        broker,
        manager,
        factory,
        events_log,
    );

    let clock_settings = clock::ClockSettings {
        minute_emission: config.clock.minute_emission,
        before_trading_start_offset_minutes: config.clock.before_trading_start_offset_minutes,
        window_days: config.clock.window_days,
    };
    let show_progress = config.run_mode == RunMode::Simulation;
    let (mut event_loop, commands) = EventLoop::new(
        control,
        calendar,
        clock_settings,
        args.from,
        args.to,
        show_progress,
    );

    commands
        .send(LoopCommand::Run(params))
        .await
        .context("failed to submit the run request")?;

    let ticks = event_loop.run().await.context("run failed")?;
    println!("Run complete: {} tick(s) dispatched.", ticks);
    Ok(())
}
