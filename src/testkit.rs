// =============================================================================
// Test fixtures shared across unit-test modules
// =============================================================================

use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::frame::{CandleFrame, TradeFrame};
use crate::records::{Candle, RawCandle, RawTrade, Trade};

pub(crate) fn raw_trade<T>(id: i128, time: T, price: Decimal) -> RawTrade<T> {
    RawTrade {
        symbol: "BTCUSDT".to_string(),
        id,
        order_id: Some(id * 10),
        order_list_id: Some(-1),
        time,
        price,
        quantity: dec!(0.5),
        quote_quantity: price * dec!(0.5),
        commission: dec!(0.001),
        commission_asset: "BNB".to_string(),
        is_buyer: true,
        is_maker: false,
        is_best_match: true,
    }
}

pub(crate) fn trade(id: u64, millis: i64, price: Decimal) -> Trade {
    Trade::try_from(raw_trade(i128::from(id), millis, price)).unwrap()
}

/// Frame of `(id, millis)` trades, all priced at 100.
pub(crate) fn trades(rows: &[(u64, i64)]) -> TradeFrame {
    rows.iter().map(|&(id, ms)| trade(id, ms, dec!(100))).collect()
}

pub(crate) fn raw_candle(
    open_ms: i64,
    width_ms: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
) -> RawCandle<i64> {
    RawCandle {
        open_time: open_ms,
        close_time: open_ms + width_ms - 1,
        open,
        high,
        low,
        close,
        volume: dec!(1),
        quote_volume: close,
        trade_count: 1,
        taker_buy_volume: dec!(0.5),
        taker_buy_quote_volume: close * dec!(0.5),
        is_best_match: true,
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn candle(
    open_ms: i64,
    width_ms: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    trades: u64,
    volume: Decimal,
) -> Candle {
    let mut raw = raw_candle(open_ms, width_ms, open, high, low, close);
    raw.trade_count = trades;
    raw.volume = volume;
    raw.taker_buy_volume = Decimal::ZERO;
    Candle::try_from(raw).unwrap()
}

/// Flat one-minute candle opening at `minute` minutes past the epoch.
pub(crate) fn minute_candle(minute: i64, close: Decimal, trades: u64, volume: Decimal) -> Candle {
    candle(minute * 60_000, 60_000, close, close, close, close, trades, volume)
}

/// Random trade frame: ids drawn from a small pool so frames overlap often,
/// prices from a couple of values so equal keys sometimes differ by value.
pub(crate) fn random_trades(rng: &mut StdRng, max_len: usize) -> TradeFrame {
    let len = rng.gen_range(0..=max_len);
    (0..len)
        .map(|_| {
            let id = rng.gen_range(0..40_u64);
            let price = if rng.gen_bool(0.8) { dec!(100) } else { dec!(101) };
            trade(id, id as i64 * 1_000, price)
        })
        .collect()
}

/// Random one-minute candle frame. Completeness and the high/low band vary
/// over small grids so equal keys often tie on trade count, on volume, or
/// on both.
pub(crate) fn random_candles(rng: &mut StdRng, max_len: usize) -> CandleFrame {
    let len = rng.gen_range(0..=max_len);
    (0..len)
        .map(|_| {
            let minute = rng.gen_range(0..30_i64);
            let trades = rng.gen_range(1..4_u64);
            let volume = Decimal::from(rng.gen_range(1..3_u32));
            let low = Decimal::from(rng.gen_range(8..10_u32));
            let high = Decimal::from(rng.gen_range(12..14_u32));
            let open = Decimal::from(rng.gen_range(10..12_u32));
            let close = Decimal::from(rng.gen_range(10..12_u32));
            candle(minute * 60_000, 60_000, open, high, low, close, trades, volume)
        })
        .collect()
}

/// Like `random_candles`, but every candle is flat at one price, so two
/// candles for one bucket differ only in completeness.
pub(crate) fn random_flat_candles(rng: &mut StdRng, max_len: usize) -> CandleFrame {
    let len = rng.gen_range(0..=max_len);
    (0..len)
        .map(|_| {
            let minute = rng.gen_range(0..30_i64);
            let trades = rng.gen_range(1..4_u64);
            let volume = Decimal::from(rng.gen_range(1..4_u32));
            minute_candle(minute, dec!(50), trades, volume)
        })
        .collect()
}
