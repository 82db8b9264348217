// ===============================
// src/posttrade.rs (PnL ledger)
// ===============================
//
// Ledger pasca-trade: cash (dalam quote currency) dari fill, mark-to-market
// dengan mid terakhir per asset, max drawdown dari equity yang dimark, dan
// Sharpe dari kenaikan PnL per mark:
//   sharpe = mean(dPnL) / (std(dPnL) + 1e-9) * sqrt(252)    (std populasi)
// Inventory tetap milik strategi; ledger hanya membaca quantity lewat quote.
//

use ahash::AHashMap as HashMap;
use serde::Serialize;

use crate::domain::{base_asset, Fill, Quote, Side};
use crate::strategy::Inventory;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub fills: u64,
    pub buys: u64,
    pub sells: u64,
    pub traded_qty: f64,
    pub traded_notional: f64,
    pub cash: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
}

const SHARPE_ANNUALIZATION: f64 = 252.0;

/// Running moments of the per-mark PnL increments.
#[derive(Debug, Clone, Default)]
struct PnlSteps {
    n: u64,
    sum: f64,
    sum_sq: f64,
}

impl PnlSteps {
    fn push(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;
    }

    fn sharpe(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let n = self.n as f64;
        let mean = self.sum / n;
        let var = (self.sum_sq / n - mean * mean).max(0.0);
        mean / (var.sqrt() + 1e-9) * SHARPE_ANNUALIZATION.sqrt()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    cash: f64,
    fills: u64,
    buys: u64,
    sells: u64,
    traded_qty: f64,
    traded_notional: f64,
    // asset -> (qty, last mid)
    marks: HashMap<String, (f64, f64)>,
    peak: Option<f64>,
    max_drawdown: f64,
    last_equity: f64,
    steps: PnlSteps,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn on_fill(&mut self, fill: &Fill) {
        let notional = fill.filled * fill.price;
        match fill.side {
            Side::Buy => { self.buys += 1; self.cash -= notional; }
            Side::Sell => { self.sells += 1; self.cash += notional; }
        }
        self.fills += 1;
        self.traded_qty += fill.filled;
        self.traded_notional += notional;
    }

    /// Marks the quote's base asset at its mid and updates the drawdown.
    pub fn on_quote(&mut self, quote: &Quote) {
        let Ok(base) = base_asset(&quote.symbol) else { return };
        self.marks.insert(base.to_string(), (quote.inventory, quote.mid));
        let equity = self.marked_equity();
        self.steps.push(equity - self.last_equity);
        self.last_equity = equity;
        let peak = self.peak.map_or(equity, |p| p.max(equity));
        self.peak = Some(peak);
        self.max_drawdown = self.max_drawdown.max(peak - equity);
    }

    fn marked_equity(&self) -> f64 {
        self.cash + self.marks.values().map(|(qty, mid)| qty * mid).sum::<f64>()
    }

    /// Cash plus `inventory` valued at the last mid seen per asset.
    pub fn equity(&self, inventory: &Inventory) -> f64 {
        self.cash
            + inventory
                .iter()
                .map(|(asset, qty)| qty * self.marks.get(asset).map_or(0.0, |m| m.1))
                .sum::<f64>()
    }

    pub fn summary(&self, inventory: &Inventory) -> Summary {
        Summary {
            fills: self.fills,
            buys: self.buys,
            sells: self.sells,
            traded_qty: self.traded_qty,
            traded_notional: self.traded_notional,
            cash: self.cash,
            total_pnl: self.equity(inventory),
            max_drawdown: self.max_drawdown,
            sharpe: self.steps.sharpe(),
        }
    }
}
