// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Core quoting metrics --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "snapshots delivered to the strategy").expect("metric"));

pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("ticks_total_by_symbol", "snapshots per symbol"), &["symbol"]).expect("metric")
});

pub static QUOTES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("quotes_total", "quotes emitted (labels: strategy, symbol)"),
        &["strategy", "symbol"],
    )
    .expect("metric")
});

pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "fills applied to inventory"), &["side"]).expect("metric")
});

pub static FILL_ERRORS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("fill_errors_total", "fills rejected as malformed").expect("metric"));

pub static DRIVER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("driver_failures_total", "live loop failures by kind"), &["kind"])
        .expect("metric")
});

// Quote state
pub static QUOTE_BID: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("quote_bid", "last bid quote"), &["symbol"]).expect("metric")
});

pub static QUOTE_ASK: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("quote_ask", "last ask quote"), &["symbol"]).expect("metric")
});

pub static EFFECTIVE_SPREAD_BPS: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("effective_spread_bps", "inventory-widened half-spread"), &["symbol"])
        .expect("metric")
});

// Inventory & PnL
pub static INVENTORY: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("inventory_qty", "net base-asset quantity"), &["asset"]).expect("metric")
});

pub static PNL_MARKED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_marked", "cash + inventory at last mid (quote ccy)").expect("metric"));

// ---- Config visibility (feed / strategy / symbol) ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_feed_mode", "feed mode (label: mode)"), &["mode"]).expect("metric")
});

pub static CONFIG_STRATEGY_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_strategy_active", "active strategy (label: strategy)"), &["strategy"])
        .expect("metric")
});

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_symbol", "configured symbol (label: symbol)"), &["symbol"])
        .expect("metric")
});

pub static CONFIG_SPREAD_BPS: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("config_spread_bps", "configured base half-spread").expect("metric"));

pub static CONFIG_INVENTORY_CLIP: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("config_inventory_clip", "configured inventory clip").expect("metric"));

pub fn init() {
    // Register all metrics to the custom registry
    for r in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(QUOTES.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(FILL_ERRORS.clone())),
        REGISTRY.register(Box::new(DRIVER_FAILURES.clone())),
        REGISTRY.register(Box::new(QUOTE_BID.clone())),
        REGISTRY.register(Box::new(QUOTE_ASK.clone())),
        REGISTRY.register(Box::new(EFFECTIVE_SPREAD_BPS.clone())),
        REGISTRY.register(Box::new(INVENTORY.clone())),
        REGISTRY.register(Box::new(PNL_MARKED.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_STRATEGY_ACTIVE.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
        REGISTRY.register(Box::new(CONFIG_SPREAD_BPS.clone())),
        REGISTRY.register(Box::new(CONFIG_INVENTORY_CLIP.clone())),
    ] {
        if let Err(e) = r {
            error!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, ?e, "metrics bind failed, endpoint disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
