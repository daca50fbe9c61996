//! CLI Entry Point for rust-acq
//!
//! Loads an acquisition plan and either previews its expansion or runs it on
//! simulated hardware.
//!
//! # Usage
//!
//! ```bash
//! rust-acq preview config/demo_plan.toml --events
//! rust-acq run config/demo_plan.toml --realistic
//! rust-acq --config config/acq.toml config
//! ```
//!
//! Engine settings come from `--config` (TOML) and `RUST_ACQ_*` environment
//! variables. Ctrl-C during `run` aborts at the next event boundary.

use acq_bin::plan::{PlanFile, Session};
use acq_bin::tracing_setup::{self, parse_log_level, OutputFormat, TracingConfig};
use acq_core::config::EngineConfig;
use acq_driver_mock::{MockHardware, TimingConfig};
use acq_experiment::{expand, AcquisitionEngine, CombinedSummary, EventProgress, RunDocument};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rust-acq")]
#[command(about = "Multi-dimensional acquisition planning on simulated hardware", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand every acquisition in a plan without touching hardware
    Preview {
        /// Plan file (TOML)
        plan: PathBuf,

        /// List every event, not just the totals
        #[arg(long)]
        events: bool,
    },

    /// Run every acquisition in a plan on mock devices
    Run {
        /// Plan file (TOML)
        plan: PathBuf,

        /// Simulate device latencies instead of completing instantly
        #[arg(long)]
        realistic: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };

    let mut tracing_config = TracingConfig::from_engine_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    if let Some(level) = &cli.log_level {
        tracing_config.level = parse_log_level(level).map_err(anyhow::Error::msg)?;
    }
    tracing_setup::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Preview { plan, events } => preview(&config, &plan, events),
        Commands::Run { plan, realistic, json } => run(&config, &plan, realistic, json).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_session(config: &EngineConfig, path: &Path) -> Result<Session> {
    PlanFile::load(path)?
        .build(config.tiling)
        .with_context(|| format!("building plan {}", path.display()))
}

fn preview(config: &EngineConfig, path: &Path, show_events: bool) -> Result<()> {
    let session = load_session(config, path)?;

    for (index, entry) in session.scheduler.entries().iter().enumerate() {
        let group = entry
            .group
            .map(|g| format!(" [group {}]", g))
            .unwrap_or_default();
        let expanded = match expand(&entry.settings, &session.geometry) {
            Ok(expanded) => expanded,
            Err(e) => {
                println!("{:>2}. {}{}: {}", index + 1, entry.settings.name, group, e);
                continue;
            }
        };
        println!(
            "{:>2}. {}{}: {} time points x {} positions x {} channels = {} events ({})",
            index + 1,
            entry.settings.name,
            group,
            expanded.num_time_points,
            expanded.positions.len(),
            expanded.channels.len(),
            expanded.len(),
            entry.settings.space.label(),
        );
        if show_events {
            for event in expanded.events() {
                let xy = event
                    .position
                    .map(|(x, y)| format!("({:.1}, {:.1})", x, y))
                    .unwrap_or_else(|| "-".into());
                let z = event.z.map(|z| format!("{:.2}", z)).unwrap_or_else(|| "-".into());
                println!(
                    "      t={} p={} s={} {:<10} xy={} z={}{}",
                    event.time_index,
                    event.position_index,
                    event.slice_index,
                    event.channel,
                    xy,
                    z,
                    if event.autofocus_pending { " af" } else { "" },
                );
            }
        }
    }
    Ok(())
}

async fn run(config: &EngineConfig, path: &Path, realistic: bool, json: bool) -> Result<()> {
    let session = load_session(config, path)?;
    let timing = if realistic {
        TimingConfig::realistic()
    } else {
        TimingConfig::instant()
    };
    let mock = MockHardware::new(timing);
    let engine = AcquisitionEngine::new(
        mock.hardware_set(),
        session.geometry.clone(),
        session.pairings.clone(),
        config,
    );
    engine.set_progress_callback(Arc::new(|p: &EventProgress| {
        debug!(
            acquisition = %p.acquisition,
            t = p.time_index,
            position = p.position_index,
            slice = p.slice_index,
            channel = %p.channel,
            success = p.success,
            "Progress"
        );
    }));

    let mut docs = engine.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match docs.recv().await {
                Ok(RunDocument::Start(start)) => info!(
                    run_uid = %start.uid,
                    acquisition = %start.acquisition,
                    events = start.num_events,
                    "Run started"
                ),
                Ok(RunDocument::Stop(stop)) => info!(
                    run_uid = %stop.run_uid,
                    exit_status = ?stop.exit_status,
                    saved = stop.num_events,
                    failed = stop.num_failed,
                    "Run stopped"
                ),
                Ok(RunDocument::Event(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Document reporter lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut handle = session.scheduler.run_all(&engine)?;
    let signal = handle.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting after the current event");
            signal.abort();
        }
    });

    let summary = handle.wait().await?;
    // Last sender goes with the engine; the reporter then drains and exits.
    drop(engine);
    let _ = reporter.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &CombinedSummary) {
    println!("Combined run {}", summary.state);
    for outcome in &summary.entries {
        match &outcome.summary {
            Some(run) => {
                println!(
                    "  {:<24} {:<10} {}/{} saved",
                    outcome.name, run.state, run.completed_events, run.total_events
                );
                for failure in &run.failures {
                    println!(
                        "      missing t={} p={} s={} {}: {} ({})",
                        failure.time_index,
                        failure.position_index,
                        failure.slice_index,
                        failure.channel,
                        failure.kind,
                        failure.message
                    );
                }
                if let Some(error) = &run.error {
                    println!("      error: {}", error);
                }
            }
            None => println!(
                "  {:<24} skipped    {}",
                outcome.name,
                outcome.error.as_deref().unwrap_or("not started")
            ),
        }
    }
}
