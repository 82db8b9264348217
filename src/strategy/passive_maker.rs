// ===============================
// src/strategy/passive_maker.rs
// ===============================
//
// Passive maker: quote bid/ask simetris di sekitar mid.
//   inv_factor     = min(|inventory| / inventory_clip, 1)
//   eff_spread_bps = spread_bps * (1 + inv_factor)      (maks 2x saat inventory >= clip)
//   half_spread    = mid * eff_spread_bps / 10_000
//   bid/ask        = round(mid -/+ half_spread, price_decimals)
//
// Catatan: inventory melebarkan kedua sisi sama besar, mid tidak digeser
// ke arah yang mengurangi inventory.
//

use tracing::{debug, info};

use super::{Strategy, StrategyError, StrategyParams, StrategyState};
use crate::domain::{base_asset, Event, Fill, MarketSnapshot, Quote};
use crate::recorder::EventSink;

pub struct PassiveMaker {
    state: StrategyState,
    sink: Box<dyn EventSink>,
}

impl PassiveMaker {
    pub fn new(params: StrategyParams, sink: Box<dyn EventSink>) -> Result<Self, StrategyError> {
        let state = StrategyState::new(params)?;
        let p = state.params();
        info!(
            spread_bps = p.spread_bps,
            inventory_clip = p.inventory_clip,
            hold_time = p.hold_time,
            price_decimals = p.price_decimals,
            "passive maker ready"
        );
        Ok(Self { state, sink })
    }
}

pub fn inventory_factor(inventory: f64, inventory_clip: f64) -> f64 {
    (inventory.abs() / inventory_clip).min(1.0)
}

pub fn effective_spread_bps(spread_bps: f64, inventory: f64, inventory_clip: f64) -> f64 {
    spread_bps * (1.0 + inventory_factor(inventory, inventory_clip))
}

pub fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (x * scale).round() / scale
}

/// Rounded (bid, ask). A side that rounds onto the mid moves one increment out.
pub fn quote_prices(mid: f64, half_spread: f64, decimals: u32) -> (f64, f64) {
    let scale = 10f64.powi(decimals as i32);
    let mut bid = round_to(mid - half_spread, decimals);
    let mut ask = round_to(mid + half_spread, decimals);
    if bid >= mid {
        bid = round_to(((mid * scale).ceil() - 1.0) / scale, decimals);
    }
    if ask <= mid {
        ask = round_to(((mid * scale).floor() + 1.0) / scale, decimals);
    }
    (bid, ask)
}

impl Strategy for PassiveMaker {
    fn name(&self) -> &'static str { "passive_maker" }

    fn state(&self) -> &StrategyState { &self.state }
    fn state_mut(&mut self) -> &mut StrategyState { &mut self.state }

    fn on_tick(&mut self, symbol: &str, snapshot: &MarketSnapshot) -> Result<Option<Quote>, StrategyError> {
        let (best_bid, best_ask) = snapshot.top()?;
        let base = base_asset(symbol)?;
        let tick = self.state.next_tick();

        let mid = (best_bid + best_ask) / 2.0;
        let inventory = self.state.inventory().get(base);
        let p = self.state.params();
        let eff_bps = effective_spread_bps(p.spread_bps, inventory, p.inventory_clip);
        let half_spread = mid * eff_bps / 10_000.0;
        let (bid, ask) = quote_prices(mid, half_spread, p.price_decimals);

        if p.quote_every > 0 && tick % p.quote_every == 0 {
            info!(%symbol, tick, bid, ask, mid, inventory, eff_bps, "quote");
        } else {
            debug!(%symbol, tick, bid, ask, mid, inventory, eff_bps, "quote");
        }

        let quote = Quote {
            symbol: symbol.to_string(),
            tick,
            mid,
            inventory,
            effective_spread_bps: eff_bps,
            bid,
            ask,
        };
        self.sink.emit(Event::Quote(quote.clone()));
        Ok(Some(quote))
    }

    fn on_order_fill(&mut self, fill: &Fill) -> Result<(), StrategyError> {
        fill.validate()?;
        let base = base_asset(&fill.symbol)?;
        let delta = fill.side.sign() * fill.filled;
        let inventory = self.update_inventory(base, delta);

        info!(
            side = fill.side.as_str(),
            qty = fill.filled,
            asset = %base,
            px = fill.price,
            inventory,
            "fill applied"
        );
        self.sink.emit(Event::Fill(fill.clone()));
        Ok(())
    }
}
