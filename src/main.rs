// ===============================
// src/main.rs
// ===============================
/*
 # mock feed + paper venue, rekam sesi ke JSONL
 RECORD_FILE=data/session.jsonl cargo run --release

 # putar ulang sesi dengan strategi baru (deterministik)
 cargo run --release -- --spread-bps 15 replay --file data/session.jsonl

 # konfigurasi & quote yang aktif
 curl -s localhost:9898/metrics | egrep '^(config_|quote_|inventory_qty)'
*/
/*
=============================================================================
Project : bookrunner — passive market-making prototype for crypto spot pairs
Module  : main.rs
Version : 0.1.0
Author  : bookrunner contributors
License : MIT

Summary : Polls order-book snapshots (mock/Binance), quotes a symmetric
          inventory-widened spread around the mid, tracks inventory from
          paper fills, replays recorded JSONL sessions deterministically,
          exposes Prometheus metrics.

(c) 2025 bookrunner contributors.
=============================================================================
*/
mod config;
mod domain;
mod driver;
mod feed;
mod gateway;          // paper venue (quote diparkir, fill saat book menembus)
mod metrics;
mod posttrade;
mod recorder;
mod replay;
mod research;
mod strategy;

use rand::{rngs::StdRng, SeedableRng};
use std::process::ExitCode;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Command, MarketMode};
use crate::domain::Event;
use crate::driver::LiveDriver;
use crate::feed::{BinanceRest, MarketData, MockBook};
use crate::gateway::PaperVenue;
use crate::recorder::{EventSink, NullSink};
use crate::strategy::{Strategy, StrategyParams};

/// Flags/env < research-generated < PARAMS_FILE.
fn resolve_params(args: &Args) -> Result<StrategyParams, research::ResearchError> {
    let mut params = args.strategy_params();
    if let Some(path) = &args.research_file {
        let papers = research::load_papers(path)?;
        let mut rng = match args.research_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        params = research::generate_from_papers(&papers, &params, &mut rng);
    }
    if let Some(path) = &args.params_file {
        params = research::load_params(path, &params)?;
        info!(path = %path.display(), "params file applied");
    }
    Ok(params)
}

/// Only live sessions are recorded; a replay must not append to its own input.
fn record_path(args: &Args, command: &Command) -> Option<String> {
    match command {
        Command::Live => args.record_file.clone(),
        Command::Replay { .. } => None,
    }
}

fn sink_for(rec_tx: &Option<mpsc::Sender<Event>>) -> Box<dyn EventSink> {
    match rec_tx {
        Some(tx) => Box::new(tx.clone()),
        None => Box::new(NullSink),
    }
}

async fn run_live<M: MarketData>(
    source: M,
    args: &Args,
    venue: PaperVenue,
    strategy: &mut dyn Strategy,
    sink: Box<dyn EventSink>,
    shutdown: watch::Receiver<bool>,
) {
    let mut driver = LiveDriver::new(source, args.symbol.clone(), args.depth, args.retry_policy())
        .with_venue(venue)
        .with_sink(sink)
        .with_heartbeat(args.heartbeat_every);
    let stats = driver.run(strategy, shutdown).await;
    let summary = driver.ledger().summary(strategy.inventory());
    info!(
        ticks = stats.ticks,
        fills = stats.fills,
        fill_errors = stats.fill_errors,
        failures = stats.failures,
        pnl = summary.total_pnl,
        max_drawdown = summary.max_drawdown,
        sharpe = summary.sharpe,
        inventory = ?strategy.inventory(),
        "session summary"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config ----
    let args = config::load();
    let command = args.command();

    let params = match resolve_params(&args) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "parameter source failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        command = ?command,
        feed_mode = args.feed_mode.as_str(),
        symbol = %args.symbol,
        strategy = args.strategy.as_str(),
        spread_bps = params.spread_bps,
        inventory_clip = params.inventory_clip,
        hold_time = params.hold_time,
        "startup config"
    );

    // ---- Recorder (optional) ----
    if matches!(command, Command::Replay { .. }) && args.record_file.is_some() {
        warn!("RECORD_FILE ignored during replay");
    }
    let (rec_tx, rec_handle) = match record_path(&args, &command) {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            (Some(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (None, None),
    };

    // ---- Strategy (validasi parameter: gagal = keluar) ----
    let mut strategy = match strategy::build(args.strategy, params.clone(), sink_for(&rec_tx)) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "strategy construction failed");
            return ExitCode::FAILURE;
        }
    };

    let code = match command {
        Command::Replay { file } => {
            let outcome = replay::load_jsonl(&file).and_then(|records| {
                info!(file = %file.display(), records = records.len(), "replay started");
                replay::run_recorded(strategy.as_mut(), records)
            });
            match outcome {
                Ok(report) => {
                    info!(
                        ticks = report.ticks,
                        quotes = report.quotes.len(),
                        fills = report.summary.fills,
                        pnl = report.summary.total_pnl,
                        max_drawdown = report.summary.max_drawdown,
                        sharpe = report.summary.sharpe,
                        inventory = ?report.inventory,
                        "replay finished"
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "replay halted");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Live => {
            // ---- Metrics ----
            metrics::init();
            metrics::serve_metrics(args.metrics_port);
            metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
            metrics::CONFIG_SYMBOL.with_label_values(&[&args.symbol]).set(1);
            metrics::CONFIG_STRATEGY_ACTIVE.with_label_values(&[args.strategy.as_str()]).set(1);
            metrics::CONFIG_SPREAD_BPS.set(params.spread_bps);
            metrics::CONFIG_INVENTORY_CLIP.set(params.inventory_clip);

            // ---- Shutdown (Ctrl-C -> stop di antara iterasi) ----
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("ctrl-c received, stopping after current tick"),
                    Err(e) => error!(?e, "ctrl-c handler failed, stopping"),
                }
                let _ = stop_tx.send(true);
            });

            let venue = match PaperVenue::new(args.order_qty) {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "paper venue setup failed");
                    return ExitCode::FAILURE;
                }
            };
            let sink = sink_for(&rec_tx);
            match args.feed_mode {
                MarketMode::Mock => {
                    let source = match args.mock_seed {
                        Some(seed) => MockBook::with_seed(seed),
                        None => MockBook::new(),
                    };
                    run_live(source, &args, venue, strategy.as_mut(), sink, stop_rx).await;
                    ExitCode::SUCCESS
                }
                MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => match BinanceRest::new(&args.rest_url()) {
                    Ok(source) => {
                        run_live(source, &args, venue, strategy.as_mut(), sink, stop_rx).await;
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!(error = %e, "binance feed setup failed");
                        ExitCode::FAILURE
                    }
                },
            }
        }
    };

    // ---- Flush recorder sebelum keluar ----
    drop(strategy);
    drop(rec_tx);
    if let Some(handle) = rec_handle {
        if let Err(e) = handle.await {
            error!(?e, "recorder task failed");
        }
    }
    code
}
