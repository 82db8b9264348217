// ===============================
// src/feed.rs
// ===============================
//
// Market Data adapters (di-poll oleh driver):
// - MockBook    : random-walk order book, bisa di-seed untuk hasil deterministik
// - BinanceRest : Binance Spot public REST `GET /api/v3/depth` (Sandbox & Mainnet)
//
// Symbol domain memakai separator ("BTC/USDT"); untuk Binance dibuang ("BTCUSDT").
//

use async_trait::async_trait;
use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::domain::{Level, MarketSnapshot};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Market-data collaborator. Transport failures surface as `FeedError`.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<MarketSnapshot, FeedError>;
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

pub fn venue_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_ascii_uppercase()
}

// Binance hanya menerima limit tertentu.
const BINANCE_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

pub fn binance_limit(depth: usize) -> usize {
    BINANCE_LIMITS.iter().copied().find(|&l| l >= depth).unwrap_or(5000)
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    #[serde(rename = "lastUpdateId", default)]
    last_update_id: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

fn parse_levels(side: &str, raw: &[(String, String)], depth: usize) -> Result<Vec<Level>, FeedError> {
    raw.iter()
        .take(depth)
        .map(|(px, qty)| {
            let px = px.parse::<f64>().map_err(|e| FeedError::Malformed(format!("{side} price {px:?}: {e}")))?;
            let qty = qty.parse::<f64>().map_err(|e| FeedError::Malformed(format!("{side} size {qty:?}: {e}")))?;
            Ok((px, qty))
        })
        .collect()
}

/// Parses a `/api/v3/depth` body.
pub fn parse_depth(body: &str, depth: usize) -> Result<MarketSnapshot, FeedError> {
    let rsp: DepthResponse = serde_json::from_str(body).map_err(|e| FeedError::Malformed(e.to_string()))?;
    debug!(last_update_id = rsp.last_update_id, "depth");
    Ok(MarketSnapshot {
        ts_ns: now_ns(),
        bids: parse_levels("bid", &rsp.bids, depth)?,
        asks: parse_levels("ask", &rsp.asks, depth)?,
    })
}

pub struct BinanceRest {
    http: reqwest::Client,
    depth_url: Url,
}

impl BinanceRest {
    pub fn new(rest_base: &str) -> Result<Self, FeedError> {
        let base = Url::parse(rest_base).map_err(|e| FeedError::Malformed(format!("rest url {rest_base:?}: {e}")))?;
        let depth_url = base
            .join("/api/v3/depth")
            .map_err(|e| FeedError::Malformed(format!("rest url {rest_base:?}: {e}")))?;
        let http = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, depth_url })
    }
}

#[async_trait]
impl MarketData for BinanceRest {
    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<MarketSnapshot, FeedError> {
        let mut url = self.depth_url.clone();
        url.query_pairs_mut()
            .append_pair("symbol", &venue_symbol(symbol))
            .append_pair("limit", &binance_limit(depth).to_string());

        let rsp = self.http.get(url).send().await?;
        let status = rsp.status();
        let body = rsp.text().await?;
        if !status.is_success() {
            return Err(FeedError::Status { status: status.as_u16(), body });
        }
        parse_depth(&body, depth)
    }
}

/// Random-walk book around 100.00 with 0.01 price increments.
pub struct MockBook {
    inner: Mutex<MockState>,
}

struct MockState {
    rng: StdRng,
    mid_ticks: i64,
}

impl MockBook {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self { inner: Mutex::new(MockState { rng, mid_ticks: 100_00 }) }
    }
}

impl Default for MockBook {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl MarketData for MockBook {
    async fn get_order_book(&self, _symbol: &str, depth: usize) -> Result<MarketSnapshot, FeedError> {
        let mut st = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let step = st.rng.gen_range(-5..=5);
        st.mid_ticks = (st.mid_ticks + step).max(50_00);

        let best_bid = st.mid_ticks - 5;
        let best_ask = st.mid_ticks + 5;
        let depth = depth.max(1) as i64;
        let mut bids = Vec::with_capacity(depth as usize);
        let mut asks = Vec::with_capacity(depth as usize);
        for i in 0..depth {
            bids.push(((best_bid - i) as f64 / 100.0, st.rng.gen_range(0.1..2.0)));
            asks.push(((best_ask + i) as f64 / 100.0, st.rng.gen_range(0.1..2.0)));
        }
        Ok(MarketSnapshot { ts_ns: now_ns(), bids, asks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_mapping() {
        assert_eq!(venue_symbol("btc/usdt"), "BTCUSDT");
        assert_eq!(venue_symbol("ETHUSDT"), "ETHUSDT");
    }

    #[test]
    fn limit_snaps_up() {
        assert_eq!(binance_limit(1), 5);
        assert_eq!(binance_limit(20), 20);
        assert_eq!(binance_limit(21), 50);
        assert_eq!(binance_limit(9999), 5000);
    }

    #[test]
    fn parses_depth_payload() {
        let body = r#"{"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"],["3.99","1.5"]],"asks":[["4.00000200","12.00000000"]]}"#;
        let snap = parse_depth(body, 1).unwrap();
        assert_eq!(snap.bids, vec![(4.0, 431.0)]);
        assert_eq!(snap.asks, vec![(4.000002, 12.0)]);
    }

    #[test]
    fn non_numeric_level_is_malformed() {
        let body = r#"{"bids":[["abc","1"]],"asks":[]}"#;
        assert!(matches!(parse_depth(body, 5), Err(FeedError::Malformed(_))));
        assert!(matches!(parse_depth("<html>", 5), Err(FeedError::Malformed(_))));
    }

    #[test]
    fn rest_url_must_parse() {
        assert!(BinanceRest::new("not a url").is_err());
        assert!(BinanceRest::new("https://testnet.binance.vision").is_ok());
    }

    #[tokio::test]
    async fn seeded_mock_is_reproducible_and_valid() {
        let a = MockBook::with_seed(7);
        let b = MockBook::with_seed(7);
        for _ in 0..20 {
            let sa = a.get_order_book("BTC/USDT", 5).await.unwrap();
            let sb = b.get_order_book("BTC/USDT", 5).await.unwrap();
            assert_eq!(sa.bids, sb.bids);
            assert_eq!(sa.asks, sb.asks);
            let (bid, ask) = sa.top().unwrap();
            assert!(bid < ask);
            assert_eq!(sa.bids.len(), 5);
        }
    }
}
