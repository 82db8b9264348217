// ===============================
// src/driver.rs (live loop)
// ===============================
//
// Loop live: fetch snapshot -> apply paper fills -> on_tick -> requote -> sleep.
// Tidak ada logika keputusan di sini; ini hanya shell penjadwalan di sekitar
// kontrak Strategy.
//
// Kegagalan (transport, HTTP, payload rusak, snapshot rusak) diklasifikasi,
// di-log, dihitung, lalu tunggu backoff eksponensial (dengan batas + jitter)
// dan coba lagi tanpa batas. Berhenti hanya lewat sinyal shutdown (watch),
// dicek di antara iterasi, tidak pernah di tengah tick.
//

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tracing::{error, info, warn};

use crate::domain::{Event, Quote};
use crate::feed::{FeedError, MarketData};
use crate::gateway::PaperVenue;
use crate::metrics::{
    DRIVER_FAILURES, EFFECTIVE_SPREAD_BPS, FILLS, FILL_ERRORS, INVENTORY, PNL_MARKED, QUOTES, QUOTE_ASK,
    QUOTE_BID, TICKS, TICKS_BY_SYMBOL,
};
use crate::posttrade::Ledger;
use crate::recorder::{EventSink, NullSink};
use crate::strategy::{Strategy, StrategyError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub poll_interval: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th consecutive failure (1-based): base * 2^(n-1), capped, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(6);
        let delay = self.base_backoff.saturating_mul(1u32 << shift).min(self.max_backoff);
        let jitter = if self.jitter_ms > 0 { rand::thread_rng().gen_range(0..=self.jitter_ms) } else { 0 };
        delay + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    HttpStatus,
    MalformedPayload,
    MalformedSnapshot,
    Config,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::HttpStatus => "http_status",
            FailureKind::MalformedPayload => "malformed_payload",
            FailureKind::MalformedSnapshot => "malformed_snapshot",
            FailureKind::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("feed: {0}")]
    Feed(#[from] FeedError),
    #[error("strategy: {0}")]
    Strategy(#[from] StrategyError),
}

impl StepError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::Feed(FeedError::Transport(_)) => FailureKind::Transport,
            StepError::Feed(FeedError::Status { .. }) => FailureKind::HttpStatus,
            StepError::Feed(FeedError::Malformed(_)) => FailureKind::MalformedPayload,
            StepError::Strategy(StrategyError::MalformedInput(_)) => FailureKind::MalformedSnapshot,
            StepError::Strategy(StrategyError::InvalidParam { .. }) => FailureKind::Config,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub fills: u64,
    pub fill_errors: u64,
    pub failures: u64,
}

pub struct LiveDriver<M: MarketData> {
    source: M,
    symbol: String,
    depth: usize,
    policy: RetryPolicy,
    venue: Option<PaperVenue>,
    sink: Box<dyn EventSink>,
    ledger: Ledger,
    heartbeat_every: u64,
    stats: DriverStats,
}

impl<M: MarketData> LiveDriver<M> {
    pub fn new(source: M, symbol: impl Into<String>, depth: usize, policy: RetryPolicy) -> Self {
        Self {
            source,
            symbol: symbol.into(),
            depth,
            policy,
            venue: None,
            sink: Box::new(NullSink),
            ledger: Ledger::new(),
            heartbeat_every: 60,
            stats: DriverStats::default(),
        }
    }

    pub fn with_venue(mut self, venue: PaperVenue) -> Self {
        self.venue = Some(venue);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_heartbeat(mut self, every: u64) -> Self {
        self.heartbeat_every = every;
        self
    }

    pub fn ledger(&self) -> &Ledger { &self.ledger }

    /// Runs until `shutdown` turns true (or its sender is dropped).
    pub async fn run<S>(&mut self, strategy: &mut S, mut shutdown: watch::Receiver<bool>) -> DriverStats
    where
        S: Strategy + ?Sized,
    {
        info!(symbol = %self.symbol, strategy = strategy.name(), depth = self.depth, "live loop started");
        let mut consecutive: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.step(strategy).await {
                Ok(()) => {
                    consecutive = 0;
                    self.policy.poll_interval
                }
                Err(e) => {
                    consecutive = consecutive.saturating_add(1);
                    self.stats.failures += 1;
                    let kind = e.kind();
                    DRIVER_FAILURES.with_label_values(&[kind.as_str()]).inc();
                    let delay = self.policy.backoff(consecutive);
                    warn!(
                        kind = kind.as_str(),
                        error = %e,
                        attempt = consecutive,
                        backoff_ms = delay.as_millis() as u64,
                        "live step failed, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(
            ticks = self.stats.ticks,
            fills = self.stats.fills,
            fill_errors = self.stats.fill_errors,
            failures = self.stats.failures,
            "live loop stopped"
        );
        self.stats.clone()
    }

    async fn step<S>(&mut self, strategy: &mut S) -> Result<(), StepError>
    where
        S: Strategy + ?Sized,
    {
        let snapshot = self.source.get_order_book(&self.symbol, self.depth).await?;
        // book rusak ditolak sebelum menyentuh venue atau inventory
        let (best_bid, best_ask) = snapshot.top()?;

        // fills dari snapshot ini diterapkan sebelum tick-nya
        if let Some(venue) = self.venue.as_mut() {
            for fill in venue.on_top_of_book(&self.symbol, best_bid, best_ask) {
                match strategy.on_order_fill(&fill) {
                    Ok(()) => {
                        self.stats.fills += 1;
                        self.ledger.on_fill(&fill);
                        FILLS.with_label_values(&[fill.side.as_str()]).inc();
                    }
                    Err(e) => {
                        self.stats.fill_errors += 1;
                        FILL_ERRORS.inc();
                        error!(error = %e, ?fill, "fill rejected, inventory not updated");
                    }
                }
            }
        }

        let quote = strategy.on_tick(&self.symbol, &snapshot)?;
        // hanya tick yang lolos validasi yang direkam
        self.sink.emit(Event::Tick { symbol: self.symbol.clone(), snapshot });
        self.stats.ticks += 1;
        TICKS.inc();
        TICKS_BY_SYMBOL.with_label_values(&[&self.symbol]).inc();

        if let Some(q) = quote {
            self.publish_quote(strategy.name(), &q);
            if let Some(venue) = self.venue.as_mut() {
                venue.requote(&q);
            }
        }

        for (asset, qty) in strategy.inventory().iter() {
            INVENTORY.with_label_values(&[asset]).set(qty);
        }
        let pnl = self.ledger.equity(strategy.inventory());
        PNL_MARKED.set(pnl);

        let tick = strategy.tick_count();
        if self.heartbeat_every > 0 && tick % self.heartbeat_every == 0 {
            info!(tick, inventory = ?strategy.inventory(), pnl, fills = self.stats.fills, "heartbeat");
        }
        Ok(())
    }

    fn publish_quote(&mut self, strategy: &str, q: &Quote) {
        self.ledger.on_quote(q);
        QUOTES.with_label_values(&[strategy, &q.symbol]).inc();
        QUOTE_BID.with_label_values(&[&q.symbol]).set(q.bid);
        QUOTE_ASK.with_label_values(&[&q.symbol]).set(q.ask);
        EFFECTIVE_SPREAD_BPS.with_label_values(&[&q.symbol]).set(q.effective_spread_bps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketSnapshot, Side};
    use crate::feed::MockBook;
    use crate::recorder::NullSink;
    use crate::replay;
    use tokio::sync::mpsc;
    use crate::strategy::{PassiveMaker, StrategyParams};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back scripted results, then keeps returning the last good book.
    struct Scripted {
        script: Mutex<VecDeque<Result<MarketSnapshot, FeedError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<MarketSnapshot, FeedError>>) -> Self {
            Self { script: Mutex::new(script.into()), calls: Mutex::new(0) }
        }
        fn calls(&self) -> u32 { *self.calls.lock().unwrap() }
    }

    #[async_trait]
    impl MarketData for Scripted {
        async fn get_order_book(&self, _symbol: &str, _depth: usize) -> Result<MarketSnapshot, FeedError> {
            *self.calls.lock().unwrap() += 1;
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok(book(100.0, 100.1)))
        }
    }

    fn book(bid: f64, ask: f64) -> MarketSnapshot {
        MarketSnapshot::new(vec![(bid, 1.0)], vec![(ask, 1.0)])
    }

    fn maker() -> PassiveMaker {
        PassiveMaker::new(StrategyParams::default(), Box::new(NullSink)).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            poll_interval: Duration::from_millis(100),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            jitter_ms: 0,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(4), Duration::from_secs(4));
        assert_eq!(p.backoff(50), Duration::from_secs(4));
    }

    #[test]
    fn failures_are_classified() {
        let e = StepError::from(FeedError::Status { status: 429, body: String::new() });
        assert_eq!(e.kind(), FailureKind::HttpStatus);
        let e = StepError::from(StrategyError::MalformedInput("no bids".into()));
        assert_eq!(e.kind(), FailureKind::MalformedSnapshot);
        let e = StepError::from(FeedError::Malformed("x".into()));
        assert_eq!(e.kind(), FailureKind::MalformedPayload);
    }

    #[tokio::test(start_paused = true)]
    async fn survives_errors_and_stops_on_shutdown() {
        let source = Scripted::new(vec![
            Ok(book(100.0, 100.1)),
            Err(FeedError::Malformed("truncated".into())),
            Ok(MarketSnapshot::new(vec![], vec![(100.1, 1.0)])),
            Ok(book(100.0, 100.1)),
        ]);
        let mut driver = LiveDriver::new(source, "BTC/USDT", 5, policy());
        let mut strat = maker();
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(2_050)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();

        // t=0 ok, 100 feed err (+500), 600 bad book (+1000), 1600.. ok every 100ms
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.ticks, 1 + 5);
        assert_eq!(strat.tick_count(), stats.ticks);
        assert_eq!(driver.source.calls() as u64, stats.ticks + stats.failures);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_runs_nothing() {
        let mut driver = LiveDriver::new(Scripted::new(vec![]), "BTC/USDT", 5, policy());
        let mut strat = maker();
        let (_tx, rx) = watch::channel(true);
        let stats = driver.run(&mut strat, rx).await;
        assert_eq!(stats, DriverStats::default());
        assert_eq!(driver.source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paper_fills_reach_inventory_before_next_tick() {
        let source = Scripted::new(vec![
            Ok(book(100.0, 100.1)),  // quote 99.95 / 100.15
            Ok(book(99.80, 99.90)),  // ask trades through our bid -> buy 0.05
            Ok(book(99.80, 99.90)),
        ]);
        let mut driver = LiveDriver::new(source, "BTC/USDT", 5, policy()).with_venue(PaperVenue::new(0.05).unwrap());
        let mut strat = maker();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();

        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.fills, 1);
        assert!((strat.inventory().get("BTC") - 0.05).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_book_runs_through_the_loop() {
        let mut driver = LiveDriver::new(MockBook::with_seed(42), "BTC/USDT", 10, policy())
            .with_venue(PaperVenue::new(0.01).unwrap())
            .with_heartbeat(10);
        let mut strat = maker();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(5_050)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.ticks, 51);
        assert_eq!(stats.fills, driver.ledger().summary(strat.inventory()).fills);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_book_never_fills_resting_quotes() {
        let source = Scripted::new(vec![
            Ok(book(100.0, 100.1)), // quote 99.95 / 100.15
            Ok(MarketSnapshot::new(vec![(f64::INFINITY, 1.0)], vec![(0.0, 1.0)])),
        ]);
        let mut driver = LiveDriver::new(source, "BTC/USDT", 5, policy()).with_venue(PaperVenue::new(0.05).unwrap());
        let mut strat = maker();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();

        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.fills, 0);
        assert_eq!(strat.inventory().get("BTC"), 0.0);
        assert_eq!(driver.ledger().summary(strat.inventory()).cash, 0.0);
        assert_eq!(driver.venue.as_ref().unwrap().open_orders().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_fill_is_counted_and_loop_keeps_ticking() {
        let mut venue = PaperVenue::new(0.05).unwrap();
        // zero-qty order crossed by the first book -> fill fails validation
        venue.place_order("BTC/USDT", Side::Buy, 0.0, 200.0);
        let mut driver = LiveDriver::new(Scripted::new(vec![]), "BTC/USDT", 5, policy()).with_venue(venue);
        let mut strat = maker();
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();

        assert_eq!(stats.fill_errors, 1);
        assert_eq!(stats.fills, 0);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.ticks, 3);
        assert_eq!(strat.tick_count(), 3);
        assert_eq!(strat.inventory().get("BTC"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_session_replays_to_the_same_quotes() {
        let source = Scripted::new(vec![
            Ok(book(100.0, 100.1)),
            Ok(book(99.80, 99.90)), // crosses our bid
            Ok(MarketSnapshot::new(vec![(100.0, 1.0)], vec![])),
            Ok(book(100.0, 100.1)), // crosses our ask
        ]);
        let (rec_tx, mut rec_rx) = mpsc::channel::<Event>(1024);
        let mut strat = PassiveMaker::new(StrategyParams::default(), Box::new(rec_tx.clone())).unwrap();
        let mut driver = LiveDriver::new(source, "BTC/USDT", 5, policy())
            .with_venue(PaperVenue::new(0.05).unwrap())
            .with_sink(Box::new(rec_tx));
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            // t=0, 100 ok; 200 bad book (+500); 700, 800 ok
            sleep(Duration::from_millis(850)).await;
            let _ = tx.send(true);
        });
        let stats = driver.run(&mut strat, rx).await;
        stopper.await.unwrap();
        assert_eq!((stats.ticks, stats.failures), (4, 1));
        assert!(stats.fills >= 1);

        let mut lines = Vec::new();
        let mut live_quotes = Vec::new();
        while let Ok(ev) = rec_rx.try_recv() {
            if let Event::Quote(q) = &ev {
                live_quotes.push(q.clone());
            }
            lines.push(serde_json::to_string(&ev).unwrap());
        }
        let records = replay::parse_jsonl(&lines.join("\n")).unwrap();
        let report = replay::run_recorded(&mut maker(), records).unwrap();

        assert_eq!(report.ticks, stats.ticks);
        assert_eq!(report.summary.fills, stats.fills);
        assert_eq!(report.quotes.len(), live_quotes.len());
        for (r, l) in report.quotes.iter().zip(&live_quotes) {
            assert_eq!(r.tick, l.tick);
            assert!((r.bid - l.bid).abs() < 1e-9);
            assert!((r.ask - l.ask).abs() < 1e-9);
        }
        assert!((report.inventory.get("BTC") - strat.inventory().get("BTC")).abs() < 1e-12);
    }
}
