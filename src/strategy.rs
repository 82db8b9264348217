// ===============================
// src/strategy.rs
// ===============================
//
// Kontrak strategi: semua strategi menerima tick (snapshot order book) dan
// fill report, dan berbagi pembukuan inventory lewat `StrategyState`.
//
// Strategi yang tersedia:
// 1) passive_maker (default) -> quote dua sisi di sekitar mid, spread melebar
//    sesuai besar inventory (lihat strategy/passive_maker.rs)
//
// Pemilihan strategi lewat `StrategyKind` + `build()`, bukan hirarki kelas.
//

pub mod passive_maker;

use ahash::AHashMap as HashMap;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{Fill, MarketSnapshot, Quote};
use crate::recorder::EventSink;

pub use passive_maker::PassiveMaker;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },
}

/// Tunables fixed at construction. `spread_bps` is the half-spread.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyParams {
    pub spread_bps: f64,
    pub inventory_clip: f64,
    /// Seconds an order is nominally held. Informational only.
    pub hold_time: u64,
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    #[serde(default = "default_quote_every")]
    pub quote_every: u64,
}

fn default_price_decimals() -> u32 { 2 }
fn default_quote_every() -> u64 { 10 }

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            spread_bps: 10.0,
            inventory_clip: 0.2,
            hold_time: 60,
            price_decimals: default_price_decimals(),
            quote_every: default_quote_every(),
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if !self.spread_bps.is_finite() || self.spread_bps <= 0.0 {
            return Err(StrategyError::InvalidParam {
                name: "spread_bps",
                reason: format!("must be > 0, got {}", self.spread_bps),
            });
        }
        if !self.inventory_clip.is_finite() || self.inventory_clip <= 0.0 {
            return Err(StrategyError::InvalidParam {
                name: "inventory_clip",
                reason: format!("must be > 0, got {}", self.inventory_clip),
            });
        }
        if self.price_decimals > 12 {
            return Err(StrategyError::InvalidParam {
                name: "price_decimals",
                reason: format!("must be <= 12, got {}", self.price_decimals),
            });
        }
        Ok(())
    }
}

/// Signed base-asset quantities. Absent asset = 0.
#[derive(Debug, Clone, Default)]
pub struct Inventory(HashMap<String, f64>);

impl PartialEq for Inventory {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }
}

impl Inventory {
    pub fn get(&self, asset: &str) -> f64 {
        self.0.get(asset).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    // only StrategyState::update_inventory writes here
    fn add(&mut self, asset: &str, delta: f64) -> f64 {
        let qty = self.0.entry(asset.to_string()).or_insert(0.0);
        *qty += delta;
        *qty
    }
}

/// Per-run state shared by every strategy: config, inventory, tick counter.
#[derive(Debug)]
pub struct StrategyState {
    params: StrategyParams,
    inventory: Inventory,
    tick_count: u64,
}

impl StrategyState {
    pub fn new(params: StrategyParams) -> Result<Self, StrategyError> {
        params.validate()?;
        Ok(Self { params, inventory: Inventory::default(), tick_count: 0 })
    }

    pub fn params(&self) -> &StrategyParams { &self.params }
    pub fn inventory(&self) -> &Inventory { &self.inventory }
    pub fn tick_count(&self) -> u64 { self.tick_count }

    fn next_tick(&mut self) -> u64 {
        self.tick_count += 1;
        self.tick_count
    }

    /// Adds `delta` to the asset's quantity. No bounds checking. Returns the new quantity.
    pub fn update_inventory(&mut self, asset: &str, delta: f64) -> f64 {
        self.inventory.add(asset, delta)
    }
}

/// Tick/fill surface every strategy implements. Calls are strictly sequential.
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    fn state(&self) -> &StrategyState;
    fn state_mut(&mut self) -> &mut StrategyState;

    /// Once per market update. Synchronous.
    fn on_tick(&mut self, symbol: &str, snapshot: &MarketSnapshot) -> Result<Option<Quote>, StrategyError>;

    /// Once per execution report. Applies exactly one inventory delta.
    fn on_order_fill(&mut self, fill: &Fill) -> Result<(), StrategyError>;

    fn update_inventory(&mut self, asset: &str, delta: f64) -> f64 {
        self.state_mut().update_inventory(asset, delta)
    }

    fn inventory(&self) -> &Inventory { self.state().inventory() }
    fn tick_count(&self) -> u64 { self.state().tick_count() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    PassiveMaker,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::PassiveMaker => "passive_maker",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passive_maker" | "passivemaker" | "bookrunner" | "pm" => Ok(StrategyKind::PassiveMaker),
            other => Err(format!("unknown strategy {other:?}")),
        }
    }
}

/// Factory: validated params in, ready strategy out.
pub fn build(
    kind: StrategyKind,
    params: StrategyParams,
    sink: Box<dyn EventSink>,
) -> Result<Box<dyn Strategy>, StrategyError> {
    match kind {
        StrategyKind::PassiveMaker => Ok(Box::new(PassiveMaker::new(params, sink)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use crate::recorder::NullSink;

    #[test]
    fn update_inventory_defaults_to_zero() {
        let mut st = StrategyState::new(StrategyParams::default()).unwrap();
        assert_eq!(st.inventory().get("BTC"), 0.0);
        assert_eq!(st.update_inventory("BTC", 0.25), 0.25);
        assert_eq!(st.update_inventory("BTC", -1.0), -0.75);
        assert_eq!(st.inventory().get("BTC"), -0.75);
        assert_eq!(st.inventory().len(), 1);
    }

    #[test]
    fn rejects_non_positive_params() {
        for (spread, clip) in [(0.0, 0.2), (-1.0, 0.2), (10.0, 0.0), (10.0, -0.5), (f64::NAN, 0.2)] {
            let p = StrategyParams { spread_bps: spread, inventory_clip: clip, ..Default::default() };
            assert!(matches!(StrategyState::new(p), Err(StrategyError::InvalidParam { .. })));
        }
    }

    #[test]
    fn params_from_research_mapping() {
        let p: StrategyParams =
            serde_json::from_str(r#"{"spread_bps": 5, "inventory_clip": 0.5, "hold_time": 120}"#).unwrap();
        assert_eq!(p.spread_bps, 5.0);
        assert_eq!(p.price_decimals, 2);
        assert_eq!(p.quote_every, 10);
    }

    #[test]
    fn factory_builds_by_kind() {
        assert_eq!("bookrunner".parse::<StrategyKind>().unwrap(), StrategyKind::PassiveMaker);
        assert!("momentum".parse::<StrategyKind>().is_err());

        let mut s = build(StrategyKind::PassiveMaker, StrategyParams::default(), Box::new(NullSink)).unwrap();
        assert_eq!(s.name(), "passive_maker");
        s.on_order_fill(&Fill::new("ETH/USDT", Side::Buy, 2.0, 3000.0)).unwrap();
        assert_eq!(s.inventory().get("ETH"), 2.0);
    }

    #[test]
    fn factory_fails_fast_on_bad_params() {
        let p = StrategyParams { inventory_clip: 0.0, ..Default::default() };
        assert!(build(StrategyKind::PassiveMaker, p, Box::new(NullSink)).is_err());
    }
}
