// =============================================================================
// Sync Configuration: which streams to keep fresh, and how hard to try
// =============================================================================
//
// Loaded once at startup from a JSON file and saved back on shutdown.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::binance::client::DEFAULT_BASE_URL;
use crate::sync::{RetryPolicy, SyncSettings};
use crate::time::TimeStep;
use crate::types::normalize_symbol;

/// Comma-separated symbol list that replaces `symbols` from the file.
pub const SYMBOLS_ENV: &str = "FRAMES_SYMBOLS";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_candle_steps() -> Vec<TimeStep> {
    vec![TimeStep::M1, TimeStep::H1]
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_lookback_minutes() -> u32 {
    60
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_report_interval_secs() -> u64 {
    30
}

fn default_evict_interval_secs() -> u64 {
    300
}

// =============================================================================
// SyncConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    // --- Streams ------------------------------------------------------------

    /// Symbols to synchronize.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candle widths kept for every symbol, as exchange labels ("1m", "1h").
    #[serde(default = "default_candle_steps")]
    pub candle_steps: Vec<TimeStep>,

    /// Also keep the account's own fills (needs API credentials).
    #[serde(default)]
    pub sync_trades: bool,

    // --- Loop behavior ------------------------------------------------------

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// History requested when a stream is first opened.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u32,

    /// Keep polling for new records after the initial range is fetched.
    #[serde(default = "default_true")]
    pub follow_latest: bool,

    #[serde(default)]
    pub retry: RetryPolicy,

    // --- Transport & housekeeping -------------------------------------------

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Buffered sync events per subscriber before the slowest one lags.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    #[serde(default = "default_evict_interval_secs")]
    pub evict_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            candle_steps: default_candle_steps(),
            sync_trades: false,
            poll_interval_ms: default_poll_interval_ms(),
            lookback_minutes: default_lookback_minutes(),
            follow_latest: true,
            retry: RetryPolicy::default(),
            base_url: default_base_url(),
            event_capacity: default_event_capacity(),
            report_interval_secs: default_report_interval_secs(),
            evict_interval_secs: default_evict_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse sync config from {}", path.display()))?;
        config.normalize();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            steps = ?config.candle_steps,
            "sync config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise sync config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "sync config saved (atomic)");
        Ok(())
    }

    /// Replace `symbols` with a comma-separated override, if non-empty.
    pub fn apply_symbols_override(&mut self, raw: &str) {
        let symbols: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if symbols.is_empty() {
            warn!(value = raw, "empty symbol override ignored");
            return;
        }
        self.symbols = symbols;
        self.normalize();
    }

    /// Upper-case symbols; drop duplicate symbols and steps.
    fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.symbols = self
            .symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        self.candle_steps.sort();
        self.candle_steps.dedup();
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lookback_minutes))
    }

    /// Per-view loop settings.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            retry: self.retry,
            follow_latest: self.follow_latest,
            lookback: self.lookback(),
        }
    }
}
