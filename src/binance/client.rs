// =============================================================================
// Binance REST API Client: kline history and signed account trades
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between this host and Binance servers.
//
// Endpoints:
//   GET /api/v3/klines    public, weight 2, at most 1000 rows per page
//   GET /api/v3/myTrades  signed, weight 20, at most 1000 rows per page and
//                         at most 24 h between startTime and endTime
//
// Responses are decoded into Raw* records here and validated into Trade /
// Candle at the MarketSource boundary, so a malformed row surfaces as
// UpstreamError::Record rather than a transport failure.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use crate::error::UpstreamError;
use crate::records::{Candle, RawCandle, RawTrade, Timestamp, Trade};
use crate::sync::MarketSource;
use crate::time::{TimeInterval, TimeStep};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

const KLINES_WEIGHT: u32 = 2;
const MY_TRADES_WEIGHT: u32 = 20;
const PAGE_LIMIT: usize = 1000;
/// Widest startTime..endTime span /api/v3/myTrades accepts.
const TRADES_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client against the production API.
    ///
    /// # Arguments
    /// * `api_key`: Binance API key (sent as a header, never in query params).
    /// * `secret`: Binance secret key used exclusively for HMAC signing.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = DEFAULT_BASE_URL, "BinanceClient initialised");

        Ok(Self {
            api_key,
            secret,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        })
    }

    /// Point the client at another deployment (testnet, a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }

    pub fn rate_limit(&self) -> RateLimitSnapshot {
        self.rate_limit.snapshot()
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Append timestamp, recvWindow, and signature to `params`.
    fn signed_query(&self, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base)?;
        Ok(format!("{base}&signature={sig}"))
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    fn spend(&self, weight: u32) -> std::result::Result<(), UpstreamError> {
        if self.rate_limit.can_send_request(weight) {
            Ok(())
        } else {
            Err(UpstreamError::RateLimited {
                used_weight: self.rate_limit.used_weight(),
            })
        }
    }

    async fn get_json(&self, path: &str, query: &str) -> Result<Value> {
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", path, status, body);
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines: one page, oldest first.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        step: TimeStep,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawCandle<i64>>> {
        let mut query = format!("symbol={symbol}&interval={}&limit={limit}", step.label());
        if let Some(start) = start_ms {
            query.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_ms {
            query.push_str(&format!("&endTime={end}"));
        }

        let body = self.get_json("/api/v3/klines", &query).await?;
        let rows = body.as_array().context("klines response is not an array")?;
        let candles = rows
            .iter()
            .map(parse_kline_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(symbol, interval = step.label(), count = candles.len(), "klines fetched");
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Account trades
    // -------------------------------------------------------------------------

    /// GET /api/v3/myTrades (signed): one page, oldest first.
    #[instrument(skip(self), name = "binance::get_my_trades")]
    pub async fn get_my_trades(
        &self,
        symbol: &str,
        query: TradeQuery,
        limit: usize,
    ) -> Result<Vec<RawTrade<i64>>> {
        let params = my_trades_params(symbol, query, limit);
        let query = self.signed_query(&params)?;

        let body = self.get_json("/api/v3/myTrades", &query).await?;
        let rows = body.as_array().context("myTrades response is not an array")?;
        let trades = rows
            .iter()
            .map(parse_my_trade)
            .collect::<Result<Vec<_>>>()?;

        debug!(symbol, count = trades.len(), "account trades fetched");
        Ok(trades)
    }
}

#[async_trait]
impl MarketSource for BinanceClient {
    /// Pages forward from the interval start until a short page or the end.
    async fn fetch_candles(
        &self,
        symbol: &str,
        step: TimeStep,
        interval: &TimeInterval,
    ) -> std::result::Result<Vec<Candle>, UpstreamError> {
        let end = interval.end().map(|t| t.as_millis());
        let mut start = interval.start().map(|t| t.as_millis());
        let mut candles = Vec::new();

        loop {
            self.spend(KLINES_WEIGHT)?;
            let page = self.get_klines(symbol, step, start, end, PAGE_LIMIT).await?;
            let full = page.len() == PAGE_LIMIT;
            let last_open = page.last().map(|raw| raw.open_time);
            for raw in page {
                candles.push(Candle::try_from(raw)?);
            }

            // Without a start Binance returns the newest page only.
            let next = match (full, last_open, start) {
                (true, Some(last), Some(_)) => last + 1,
                _ => break,
            };
            if end.is_some_and(|e| next > e) {
                break;
            }
            start = Some(next);
        }
        Ok(candles)
    }

    /// Walks 24 h windows from the interval start; inside a window, a full
    /// page continues from one millisecond after its newest trade.
    async fn fetch_trades(
        &self,
        symbol: &str,
        interval: &TimeInterval,
    ) -> std::result::Result<Vec<Trade>, UpstreamError> {
        let mut trades = Vec::new();
        let end = interval.end().map(|t| t.as_millis());

        let Some(start) = interval.start().map(|t| t.as_millis()) else {
            self.spend(MY_TRADES_WEIGHT)?;
            for raw in self.get_my_trades(symbol, TradeQuery::Until(end), PAGE_LIMIT).await? {
                trades.push(Trade::try_from(raw)?);
            }
            return Ok(trades);
        };

        let end = end.unwrap_or_else(|| Timestamp::now().as_millis());
        if start > end {
            warn!(symbol, %interval, "trade range starts in the future, nothing to fetch");
            return Ok(trades);
        }
        let mut window_start = start;
        while window_start <= end {
            let window_end = window_start.saturating_add(TRADES_WINDOW_MS - 1).min(end);
            let mut query = TradeQuery::Between(window_start, window_end);
            loop {
                self.spend(MY_TRADES_WEIGHT)?;
                let page = self.get_my_trades(symbol, query, PAGE_LIMIT).await?;
                let next = next_trade_query(&page, window_end);
                for raw in page.into_iter().filter(|raw| raw.time <= window_end) {
                    trades.push(Trade::try_from(raw)?);
                }
                match next {
                    Some(q) => query = q,
                    None => break,
                }
            }
            window_start = window_end.saturating_add(1);
        }
        Ok(trades)
    }

    fn name(&self) -> &'static str {
        "binance"
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// myTrades paging
// -----------------------------------------------------------------------------

/// Which slice of the account's fills one myTrades request asks for.
/// The endpoint rejects `fromId` combined with a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeQuery {
    /// Most recent fills, optionally up to `endTime`.
    Until(Option<i64>),
    /// `startTime..=endTime`, at most 24 h wide.
    Between(i64, i64),
    /// Fills with `id >= fromId`.
    FromId(u64),
}

fn my_trades_params(symbol: &str, query: TradeQuery, limit: usize) -> String {
    let mut params = format!("symbol={symbol}&limit={limit}");
    match query {
        TradeQuery::Until(None) => {}
        TradeQuery::Until(Some(end)) => params.push_str(&format!("&endTime={end}")),
        TradeQuery::Between(start, end) => {
            params.push_str(&format!("&startTime={start}&endTime={end}"))
        }
        TradeQuery::FromId(id) => params.push_str(&format!("&fromId={id}")),
    }
    params
}

/// Follow-up request after `page`, or `None` when the window is exhausted.
///
/// A full page continues by id, so fills sharing the last page's final
/// millisecond are not skipped. Paging stops once a fill lands past
/// `window_end`.
fn next_trade_query(page: &[RawTrade<i64>], window_end: i64) -> Option<TradeQuery> {
    if page.len() < PAGE_LIMIT || page.iter().any(|raw| raw.time > window_end) {
        return None;
    }
    let last_id = page.iter().map(|raw| raw.id).max()?;
    u64::try_from(last_id + 1).ok().map(TradeQuery::FromId)
}

// -----------------------------------------------------------------------------
// Row decoding
// -----------------------------------------------------------------------------

/// Decode one kline row.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades,
///   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
pub fn parse_kline_row(row: &Value) -> Result<RawCandle<i64>> {
    let arr = row.as_array().context("kline entry is not an array")?;
    if arr.len() < 11 {
        anyhow::bail!("kline entry has {} elements, expected at least 11", arr.len());
    }
    Ok(RawCandle {
        open_time: arr[0].as_i64().context("kline openTime is not an integer")?,
        open: parse_decimal(&arr[1])?,
        high: parse_decimal(&arr[2])?,
        low: parse_decimal(&arr[3])?,
        close: parse_decimal(&arr[4])?,
        volume: parse_decimal(&arr[5])?,
        close_time: arr[6].as_i64().context("kline closeTime is not an integer")?,
        quote_volume: parse_decimal(&arr[7])?,
        trade_count: arr[8].as_u64().context("kline numberOfTrades is not an integer")?,
        taker_buy_volume: parse_decimal(&arr[9])?,
        taker_buy_quote_volume: parse_decimal(&arr[10])?,
        // Klines come from the matching engine itself.
        is_best_match: true,
    })
}

/// Decode one /api/v3/myTrades object.
pub fn parse_my_trade(v: &Value) -> Result<RawTrade<i64>> {
    Ok(RawTrade {
        symbol: v["symbol"].as_str().context("trade missing 'symbol'")?.to_string(),
        id: i128::from(v["id"].as_i64().context("trade missing 'id'")?),
        order_id: v["orderId"].as_i64().map(i128::from),
        order_list_id: v["orderListId"].as_i64(),
        time: v["time"].as_i64().context("trade missing 'time'")?,
        price: parse_decimal(&v["price"])?,
        quantity: parse_decimal(&v["qty"])?,
        quote_quantity: parse_decimal(&v["quoteQty"])?,
        commission: parse_decimal(&v["commission"])?,
        commission_asset: v["commissionAsset"].as_str().unwrap_or_default().to_string(),
        is_buyer: v["isBuyer"].as_bool().unwrap_or(false),
        is_maker: v["isMaker"].as_bool().unwrap_or(false),
        is_best_match: v["isBestMatch"].as_bool().unwrap_or(true),
    })
}

/// Parse a JSON value that may be either a string or a number into a Decimal.
fn parse_decimal(val: &Value) -> Result<Decimal> {
    if let Some(s) = val.as_str() {
        s.parse::<Decimal>()
            .with_context(|| format!("failed to parse '{s}' as decimal"))
    } else if let Some(n) = val.as_i64() {
        Ok(Decimal::from(n))
    } else if let Some(n) = val.as_f64() {
        Decimal::try_from(n).with_context(|| format!("failed to convert {n} to decimal"))
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}
