// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> f64 { match self { Side::Buy => 1.0, Side::Sell => -1.0 } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// One book level: (price, size).
pub type Level = (f64, f64);

/// Top-of-book view for one symbol. Bids descending, asks ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default)]
    pub ts_ns: i64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl MarketSnapshot {
    pub fn new(bids: Vec<Level>, asks: Vec<Level>) -> Self {
        Self { ts_ns: 0, bids, asks }
    }

    pub fn best_bid(&self) -> Option<f64> { self.bids.first().map(|l| l.0) }
    pub fn best_ask(&self) -> Option<f64> { self.asks.first().map(|l| l.0) }

    /// Validates every level and returns (best_bid, best_ask).
    pub fn top(&self) -> Result<(f64, f64), StrategyError> {
        check_levels("bids", &self.bids)?;
        check_levels("asks", &self.asks)?;
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Ok((b, a)),
            _ => Err(StrategyError::MalformedInput("book side without levels".into())),
        }
    }
}

fn check_levels(side: &str, levels: &[Level]) -> Result<(), StrategyError> {
    if levels.is_empty() {
        return Err(StrategyError::MalformedInput(format!("no {side} levels")));
    }
    for (i, &(px, qty)) in levels.iter().enumerate() {
        if !px.is_finite() || px <= 0.0 {
            return Err(StrategyError::MalformedInput(format!("{side}[{i}] price {px}")));
        }
        if !qty.is_finite() || qty < 0.0 {
            return Err(StrategyError::MalformedInput(format!("{side}[{i}] size {qty}")));
        }
    }
    Ok(())
}

/// Two-sided quote derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub tick: u64,
    pub mid: f64,
    /// Base-asset inventory the quote was computed with.
    pub inventory: f64,
    pub effective_spread_bps: f64,
    pub bid: f64,
    pub ask: f64,
}

/// Execution report. Field names follow the exchange dict (`filled`, `price`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub filled: f64,
    pub price: f64,
}

impl Fill {
    pub fn new(symbol: impl Into<String>, side: Side, filled: f64, price: f64) -> Self {
        Self { order_id: None, symbol: symbol.into(), side, filled, price }
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if !self.filled.is_finite() || self.filled <= 0.0 {
            return Err(StrategyError::MalformedInput(format!("fill qty {}", self.filled)));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(StrategyError::MalformedInput(format!("fill price {}", self.price)));
        }
        base_asset(&self.symbol).map(|_| ())
    }
}

/// "BTC/USDT" -> "BTC". A symbol without separator is its own base.
pub fn base_asset(symbol: &str) -> Result<&str, StrategyError> {
    let base = symbol.split('/').next().unwrap_or_default().trim();
    if base.is_empty() {
        return Err(StrategyError::MalformedInput(format!("symbol {symbol:?} has no base asset")));
    }
    Ok(base)
}

/// Recorder line. `tick` and `fill` lines double as replay input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Tick { symbol: String, snapshot: MarketSnapshot },
    Quote(Quote),
    Fill(Fill),
    Note { msg: String },
}
