// ===============================
// src/gateway.rs (paper venue)
// ===============================
//
// Venue simulasi: quote terakhir diparkir sebagai 2 order limit (bid & ask).
// Snapshot berikutnya yang menembus harga order menghasilkan fill penuh di
// harga order:
//   - buy  terisi jika best_ask <= harga bid kita
//   - sell terisi jika best_bid >= harga ask kita
// Quote baru membatalkan order lama untuk symbol yang sama (cancel/replace).
//

use tracing::debug;

use crate::domain::{Fill, Quote, Side};
use crate::strategy::StrategyError;

#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
}

#[derive(Debug)]
pub struct PaperVenue {
    order_qty: f64,
    next_id: u64,
    resting: Vec<RestingOrder>,
}

impl PaperVenue {
    pub fn new(order_qty: f64) -> Result<Self, StrategyError> {
        if !order_qty.is_finite() || order_qty <= 0.0 {
            return Err(StrategyError::InvalidParam {
                name: "order_qty",
                reason: format!("must be > 0, got {order_qty}"),
            });
        }
        Ok(Self { order_qty, next_id: 0, resting: Vec::new() })
    }

    pub fn open_orders(&self) -> &[RestingOrder] { &self.resting }

    /// Rests a limit order and returns its id. Quantity is not checked here;
    /// a bad fill is rejected by the strategy.
    pub fn place_order(&mut self, symbol: &str, side: Side, qty: f64, price: f64) -> String {
        self.next_id += 1;
        let id = format!("PAPER-{}", self.next_id);
        debug!(%id, %symbol, side = side.as_str(), qty, price, "paper order placed");
        self.resting.push(RestingOrder { id: id.clone(), symbol: symbol.to_string(), side, qty, price });
        id
    }

    pub fn cancel_order(&mut self, id: &str) -> bool {
        let before = self.resting.len();
        self.resting.retain(|o| o.id != id);
        before != self.resting.len()
    }

    /// Cancel/replace: both sides of `quote` become the only resting orders for its symbol.
    pub fn requote(&mut self, quote: &Quote) -> (String, String) {
        self.resting.retain(|o| o.symbol != quote.symbol);
        let bid_id = self.place_order(&quote.symbol, Side::Buy, self.order_qty, quote.bid);
        let ask_id = self.place_order(&quote.symbol, Side::Sell, self.order_qty, quote.ask);
        (bid_id, ask_id)
    }

    /// Fills every resting order of `symbol` that a validated top of book
    /// (`MarketSnapshot::top`) trades through.
    pub fn on_top_of_book(&mut self, symbol: &str, best_bid: f64, best_ask: f64) -> Vec<Fill> {
        let mut fills = Vec::new();
        self.resting.retain(|o| {
            if o.symbol != symbol {
                return true;
            }
            let crossed = match o.side {
                Side::Buy => best_ask <= o.price,
                Side::Sell => best_bid >= o.price,
            };
            if crossed {
                fills.push(Fill {
                    order_id: Some(o.id.clone()),
                    symbol: o.symbol.clone(),
                    side: o.side,
                    filled: o.qty,
                    price: o.price,
                });
            }
            !crossed
        });
        fills
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote {
            symbol: "BTC/USDT".into(),
            tick: 1,
            mid: (bid + ask) / 2.0,
            inventory: 0.0,
            effective_spread_bps: 10.0,
            bid,
            ask,
        }
    }

    #[test]
    fn requote_replaces_previous_orders() {
        let mut v = PaperVenue::new(0.01).unwrap();
        v.requote(&quote(99.9, 100.1));
        let (bid_id, _) = v.requote(&quote(99.8, 100.2));
        assert_eq!(v.open_orders().len(), 2);
        assert_eq!(v.open_orders()[0].id, bid_id);
        assert_eq!(v.open_orders()[0].price, 99.8);
    }

    #[test]
    fn crossing_book_fills_at_order_price() {
        let mut v = PaperVenue::new(0.01).unwrap();
        v.requote(&quote(99.9, 100.1));

        // nothing crosses
        assert!(v.on_top_of_book("BTC/USDT", 99.95, 100.05).is_empty());

        // market drops through our bid
        let fills = v.on_top_of_book("BTC/USDT", 99.8, 99.85);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::Buy);
        assert_eq!(fills[0].price, 99.9);
        assert_eq!(fills[0].filled, 0.01);
        assert_eq!(v.open_orders().len(), 1);
        assert_eq!(v.open_orders()[0].side, Side::Sell);
    }

    #[test]
    fn other_symbols_are_untouched() {
        let mut v = PaperVenue::new(0.01).unwrap();
        v.requote(&quote(99.9, 100.1));
        assert!(v.on_top_of_book("ETH/USDT", 200.0, 1.0).is_empty());
        assert_eq!(v.open_orders().len(), 2);
    }

    #[test]
    fn cancel_by_id() {
        let mut v = PaperVenue::new(0.5).unwrap();
        let id = v.place_order("BTC/USDT", Side::Sell, 0.5, 101.0);
        assert!(v.cancel_order(&id));
        assert!(!v.cancel_order(&id));
        assert!(v.open_orders().is_empty());
    }

    #[test]
    fn rejects_non_positive_order_qty() {
        for qty in [0.0, -0.01, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                PaperVenue::new(qty),
                Err(StrategyError::InvalidParam { name: "order_qty", .. })
            ));
        }
    }
}
