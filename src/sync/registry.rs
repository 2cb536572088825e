// =============================================================================
// SyncRegistry: one shared SyncView per key
// =============================================================================
//
// Owned by the application and handed to consumers by reference. The maps
// are mutex-guarded so concurrent first requests for a key always end up
// with the same view and therefore the same single loop.
//
// Views nobody else holds can be evicted; shutdown cancels and joins them all.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::records::{Candle, Trade};
use crate::sync::{Fetch, HealthSnapshot, MarketSource, SyncEvent, SyncSettings, SyncView};
use crate::time::{TimeInterval, TimeStep};
use crate::types::{DataKind, SyncKey};

/// A view of either record kind.
#[derive(Debug, Clone)]
pub enum AnyView {
    Trades(Arc<SyncView<Trade>>),
    Candles(Arc<SyncView<Candle>>),
}

impl AnyView {
    pub fn key(&self) -> &SyncKey {
        match self {
            Self::Trades(v) => v.key(),
            Self::Candles(v) => v.key(),
        }
    }

    pub fn request(&self, interval: TimeInterval) {
        match self {
            Self::Trades(v) => v.request(interval),
            Self::Candles(v) => v.request(interval),
        }
    }

    pub fn report(&self) -> ViewReport {
        match self {
            Self::Trades(v) => ViewReport::of(&**v),
            Self::Candles(v) => ViewReport::of(&**v),
        }
    }

    fn cancel(&self) {
        match self {
            Self::Trades(v) => v.cancel(),
            Self::Candles(v) => v.cancel(),
        }
    }

    async fn join(&self) {
        match self {
            Self::Trades(v) => v.join().await,
            Self::Candles(v) => v.join().await,
        }
    }

    fn is_shared(&self) -> bool {
        match self {
            Self::Trades(v) => Arc::strong_count(v) > 1,
            Self::Candles(v) => Arc::strong_count(v) > 1,
        }
    }
}

/// Point-in-time summary of one view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewReport {
    pub key: SyncKey,
    pub records: usize,
    pub pending: usize,
    pub running: bool,
    pub health: HealthSnapshot,
}

impl ViewReport {
    fn of<R: Fetch>(view: &SyncView<R>) -> Self {
        Self {
            key: view.key().clone(),
            records: view.snapshot().len(),
            pending: view.pending(),
            running: view.is_running(),
            health: view.health(),
        }
    }
}

pub struct SyncRegistry {
    source: Arc<dyn MarketSource>,
    settings: SyncSettings,
    views: Mutex<HashMap<SyncKey, AnyView>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncRegistry {
    pub fn new(source: Arc<dyn MarketSource>, settings: SyncSettings, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            source,
            settings,
            views: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// The view for `key`, created on first use.
    pub fn get_or_create_view(&self, key: &SyncKey) -> AnyView {
        let mut views = self.views.lock();
        if let Some(view) = views.get(key) {
            return view.clone();
        }
        let view = match key.kind {
            DataKind::Trades => AnyView::Trades(Arc::new(self.build(key))),
            DataKind::Candles(_) => AnyView::Candles(Arc::new(self.build(key))),
        };
        info!(key = %key, "sync view created");
        views.insert(key.clone(), view.clone());
        view
    }

    fn build<R: Fetch>(&self, key: &SyncKey) -> SyncView<R> {
        SyncView::new(
            key.clone(),
            Arc::clone(&self.source),
            self.settings.clone(),
            self.events.clone(),
        )
    }

    pub fn trades(&self, symbol: &str) -> Arc<SyncView<Trade>> {
        match self.get_or_create_view(&SyncKey::trades(symbol)) {
            AnyView::Trades(view) => view,
            AnyView::Candles(_) => unreachable!("trade key mapped to a candle view"),
        }
    }

    pub fn candles(&self, symbol: &str, step: TimeStep) -> Arc<SyncView<Candle>> {
        match self.get_or_create_view(&SyncKey::candles(symbol, step)) {
            AnyView::Candles(view) => view,
            AnyView::Trades(_) => unreachable!("candle key mapped to a trade view"),
        }
    }

    pub fn get(&self, key: &SyncKey) -> Option<AnyView> {
        self.views.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<SyncKey> {
        let mut keys: Vec<SyncKey> = self.views.lock().keys().cloned().collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn reports(&self) -> Vec<ViewReport> {
        let mut reports: Vec<ViewReport> = self.views.lock().values().map(AnyView::report).collect();
        reports.sort_by_key(|r| r.key.to_string());
        reports
    }

    /// Remove `key` and cancel its loop. Outstanding handles keep their last
    /// snapshot. Returns whether the key was registered.
    pub fn release(&self, key: &SyncKey) -> bool {
        let removed = self.views.lock().remove(key);
        match removed {
            Some(view) => {
                view.cancel();
                info!(key = %key, "sync view released");
                true
            }
            None => false,
        }
    }

    /// Release every view that no consumer holds a handle to.
    pub fn evict_idle(&self) -> Vec<SyncKey> {
        let evicted: Vec<AnyView> = {
            let mut views = self.views.lock();
            let idle: Vec<SyncKey> = views
                .iter()
                .filter(|(_, view)| !view.is_shared())
                .map(|(key, _)| key.clone())
                .collect();
            idle.iter().filter_map(|key| views.remove(key)).collect()
        };
        for view in &evicted {
            view.cancel();
            debug!(key = %view.key(), "idle sync view evicted");
        }
        evicted.iter().map(|v| v.key().clone()).collect()
    }

    /// Cancel every loop and wait for all of them to exit.
    pub async fn shutdown(&self) {
        let views: Vec<AnyView> = self.views.lock().drain().map(|(_, v)| v).collect();
        info!(views = views.len(), "shutting down sync views");
        for view in &views {
            view.cancel();
        }
        join_all(views.iter().map(|view| view.join())).await;
    }
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRegistry")
            .field("source", &self.source.name())
            .field("views", &self.keys())
            .finish()
    }
}
