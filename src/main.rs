// =============================================================================
// market-frames: Main Entry Point
// =============================================================================
//
// Opens one synchronized view per configured (symbol, stream), requests the
// trailing lookback window for each, and keeps them fresh until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use market_frames::binance::BinanceClient;
use market_frames::config::{SyncConfig, SYMBOLS_ENV};
use market_frames::{SyncEvent, SyncRegistry, TimeInterval, Timestamp};

const CONFIG_PATH: &str = "sync_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = SyncConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SyncConfig::default()
    });

    if let Ok(syms) = std::env::var(SYMBOLS_ENV) {
        config.apply_symbols_override(&syms);
    }

    info!(
        symbols = ?config.symbols,
        steps = ?config.candle_steps,
        sync_trades = config.sync_trades,
        follow_latest = config.follow_latest,
        "market-frames starting"
    );

    // ── 2. Build Binance client ──────────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let client = BinanceClient::new(api_key, api_secret)?.with_base_url(config.base_url.clone());

    let sync_trades = config.sync_trades && client.has_credentials();
    if config.sync_trades && !sync_trades {
        warn!("sync_trades is set but BINANCE_API_KEY / BINANCE_API_SECRET are missing; trade streams disabled");
    }

    // ── 3. Registry & initial requests ───────────────────────────────────
    let registry = Arc::new(SyncRegistry::new(
        Arc::new(client),
        config.settings(),
        config.event_capacity,
    ));
    let mut events = registry.subscribe();

    let initial = TimeInterval::trailing(Timestamp::now(), config.lookback());
    let mut candle_views = Vec::new();
    let mut trade_views = Vec::new();
    for symbol in &config.symbols {
        for step in &config.candle_steps {
            let view = registry.candles(symbol, *step);
            view.request(initial);
            candle_views.push(view);
        }
        if sync_trades {
            let view = registry.trades(symbol);
            view.request(initial);
            trade_views.push(view);
        }
    }
    info!(views = registry.len(), %initial, "initial ranges requested");

    // ── 4. Event log ─────────────────────────────────────────────────────
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Merged { key, fetched, total, .. }) => {
                    debug!(key = %key, fetched, total, "merged");
                }
                Ok(SyncEvent::FetchFailed { key, attempt, error, .. }) => {
                    warn!(key = %key, attempt, error = %error, "fetch failed");
                }
                Ok(SyncEvent::RangeDropped { key, interval, attempts, error }) => {
                    error!(key = %key, %interval, attempts, error = %error, "range dropped");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagging behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── 5. Periodic snapshot report ──────────────────────────────────────
    let report_views = candle_views.clone();
    let report_trades = trade_views.clone();
    let report_every = config.report_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(report_every));
        loop {
            interval.tick().await;
            for view in &report_views {
                let frame = view.snapshot();
                info!(
                    key = %view.key(),
                    candles = frame.len(),
                    last_close = ?frame.last_close(),
                    newest = ?frame.end_time().map(|t| t.to_string()),
                    pending = view.pending(),
                    "candle snapshot"
                );
            }
            for view in &report_trades {
                let frame = view.snapshot();
                info!(
                    key = %view.key(),
                    trades = frame.len(),
                    last_price = ?frame.last_price(),
                    vwap = ?frame.vwap(),
                    "trade snapshot"
                );
            }
        }
    });

    // ── 6. Idle eviction ─────────────────────────────────────────────────
    let evict_registry = registry.clone();
    let evict_every = config.evict_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(evict_every));
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = evict_registry.evict_idle();
            if !evicted.is_empty() {
                info!(count = evicted.len(), "idle views evicted");
            }
        }
    });

    info!("All views running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    for report in registry.reports() {
        info!(
            key = %report.key,
            records = report.records,
            fetches_ok = report.health.fetches_ok,
            fetches_failed = report.health.fetches_failed,
            ranges_dropped = report.health.ranges_dropped,
            "final view state"
        );
    }
    registry.shutdown().await;

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save sync config on shutdown");
    }

    info!("market-frames shut down complete.");
    Ok(())
}
