//! Direction-aware decimal rounding for prices and quantities.
//!
//! Exchange filters only accept prices on the tick grid and quantities on the
//! lot grid. A buy is never rounded above what the caller asked to pay and a
//! sell is never rounded below what the caller asked to receive.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::Side;

fn strategy_for(side: Side) -> RoundingStrategy {
    match side {
        Side::Buy => RoundingStrategy::ToNegativeInfinity,
        Side::Sell => RoundingStrategy::ToPositiveInfinity,
    }
}

/// Round `price` to `dp` decimal places in the side's favourable direction.
pub fn round_price(price: Decimal, dp: u32, side: Side) -> Decimal {
    price.round_dp_with_strategy(dp, strategy_for(side))
}

/// Snap `price` onto a tick grid (e.g. `0.01`). A zero tick leaves the price untouched.
pub fn round_to_tick(price: Decimal, tick: Decimal, side: Side) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    let steps = (price / tick).round_dp_with_strategy(0, strategy_for(side));
    (steps * tick).normalize()
}

/// Truncate a quantity to `dp` decimal places; never rounds up.
pub fn round_quantity(quantity: Decimal, dp: u32) -> Decimal {
    quantity.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_rounds_down_sell_rounds_up() {
        assert_eq!(round_price(dec!(101.23456), 2, Side::Buy), dec!(101.23));
        assert_eq!(round_price(dec!(101.23456), 2, Side::Sell), dec!(101.24));
        assert_eq!(round_price(dec!(101.20), 2, Side::Sell), dec!(101.20));
    }

    #[test]
    fn tick_rounding_respects_side() {
        assert_eq!(round_to_tick(dec!(37012.37), dec!(0.5), Side::Buy), dec!(37012));
        assert_eq!(round_to_tick(dec!(37012.37), dec!(0.5), Side::Sell), dec!(37012.5));
        assert_eq!(round_to_tick(dec!(5.5), dec!(0), Side::Sell), dec!(5.5));
    }

    #[test]
    fn quantity_truncates() {
        assert_eq!(round_quantity(dec!(0.123999), 3), dec!(0.123));
        assert_eq!(round_quantity(dec!(-0.123999), 3), dec!(-0.123));
    }
}
