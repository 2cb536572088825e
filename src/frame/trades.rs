// =============================================================================
// Trade-frame helpers: price, size and order views over a fill history
// =============================================================================

use rust_decimal::Decimal;

use super::TradeFrame;
use crate::records::decimal::round_to_tick;
use crate::types::Side;

impl TradeFrame {
    /// Price of the most recent fill.
    pub fn last_price(&self) -> Option<Decimal> {
        self.latest().map(|t| t.price())
    }

    pub fn total_quantity(&self) -> Decimal {
        self.iter().map(|t| t.quantity()).sum()
    }

    /// Volume-weighted average price; `None` when no quantity traded.
    pub fn vwap(&self) -> Option<Decimal> {
        let quantity = self.total_quantity();
        if quantity.is_zero() {
            return None;
        }
        let notional: Decimal = self.iter().map(|t| t.price() * t.quantity()).sum();
        notional.checked_div(quantity)
    }

    /// Fills belonging to one order.
    pub fn by_order(&self, order_id: u64) -> TradeFrame {
        self.filter(|t| t.order_id() == Some(order_id))
    }

    /// Last price snapped to the instrument tick, rounded so that a resting
    /// order at that price never crosses: buys down, sells up.
    pub fn limit_price(&self, side: Side, tick: Decimal) -> Option<Decimal> {
        self.last_price().map(|p| round_to_tick(p, tick, side))
    }
}
