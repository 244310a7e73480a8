mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command, SimulationArgs};
use smsrelay::config::RelayConfig;
use smsrelay::device_log::MemoryTransportLog;
use smsrelay::engine::Engine;
use smsrelay::gateway::{LoopbackGateway, event_channel};
use smsrelay::logging;
use smsrelay::seed::JobSeedFile;
use smsrelay::state_machine::JobSummary;
use smsrelay::store::MemoryJobStore;
use ui::RelayProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    logging::init(&config.log_filter, config.log_json);

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
        Command::Run { file, simulation } => {
            let seeds = JobSeedFile::load(&file)
                .with_context(|| format!("reading jobs from {}", file.display()))?;
            simulate(seeds, &config, &simulation).await?;
        }
        Command::Demo { simulation } => {
            simulate(JobSeedFile::demo(), &config, &simulation).await?;
        }
    }
    Ok(())
}

/// Seed an in-memory store, run the engine against the loopback transport
/// and wait until every job settles or the timeout expires.
async fn simulate(seeds: JobSeedFile, config: &RelayConfig, simulation: &SimulationArgs) -> Result<()> {
    let store = MemoryJobStore::new();
    let log = MemoryTransportLog::new();
    let (sink, stream) = event_channel();
    let gateway = LoopbackGateway::new(sink, log.clone(), simulation.loopback_options());

    let ids = seeds.seed(&store);
    let engine = Engine::start(
        Arc::new(store.clone()),
        Arc::new(gateway),
        stream,
        Arc::new(log),
        config,
    )
    .await
    .context("starting engine")?;

    let progress = RelayProgress::start(ids.len());
    let mut state = engine.watcher_state();
    let deadline = tokio::time::sleep(simulation.timeout());
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    let settled_count = |store: &MemoryJobStore| {
        ids.iter()
            .filter(|id| {
                store
                    .get(id)
                    .and_then(|doc| doc.status())
                    .is_some_and(|status| status.is_settled())
            })
            .count()
    };

    let mut timed_out = loop {
        let settled = settled_count(&store);
        let current = state.borrow_and_update().clone();
        progress.update(&current, settled);
        if settled == ids.len() {
            break false;
        }
        tokio::select! {
            _ = &mut deadline => break true,
            _ = state.changed() => {}
            _ = poll.tick() => {}
        }
    };

    if timed_out {
        // Delivery reports may have been lost; give reconciliation one more pass.
        match engine.sync_now().await {
            Ok(report) if report.updated > 0 => {
                progress.note(&format!("reconciliation recovered {} deliveries", report.updated));
            }
            Ok(_) => {}
            Err(e) => progress.note(&format!("reconciliation failed: {e}")),
        }
        timed_out = settled_count(&store) < ids.len();
    }

    engine.shutdown().await;
    progress.finish();

    let summaries: Vec<JobSummary> = ids
        .iter()
        .filter_map(|id| store.get(id))
        .map(|doc| {
            let messages = doc.messages().unwrap_or_default();
            JobSummary::new(&doc.id, doc.status(), &messages)
        })
        .collect();
    ui::print_summary(&summaries);

    if timed_out {
        bail!(
            "{} of {} jobs did not settle within {}s",
            ids.len() - settled_count(&store),
            ids.len(),
            simulation.timeout_secs
        );
    }
    Ok(())
}
