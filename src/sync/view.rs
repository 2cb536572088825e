// =============================================================================
// SyncView: one key's Frame plus the single loop that keeps it fed
// =============================================================================
//
// Readers call `snapshot()` and get the current Arc<Frame>; they never wait
// on the queue or on an in-flight fetch. Writers call `request(interval)`,
// which queues the range and makes sure exactly one loop is running.
//
// Loop pass:
//   1. (follow mode) queue the open range from the newest merged record
//   2. take every expectation whose backoff deadline has passed, in order
//   3. fetch each range and merge it into the Frame with `union`
//   4. a failed range goes back on the queue with a backoff deadline, or is
//      dropped once the retry budget is spent
//   5. sleep `poll_interval`, or park until the next request when idle
//
// The loop holds only a Weak reference between passes. Dropping the last
// Arc, or calling `cancel()`, ends it.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::frame::Frame;
use crate::records::{Candle, Record, Timestamp};
use crate::sync::{Fetch, HealthSnapshot, MarketSource, RetryPolicy, SyncEvent, SyncHealth};
use crate::time::TimeInterval;
use crate::types::SyncKey;

/// Per-view loop behavior.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Minimum pause between two loop passes.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Keep fetching the open range after the newest record even when
    /// nobody asked for it.
    pub follow_latest: bool,
    /// Follow-mode starting point for an empty frame.
    pub lookback: chrono::Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            follow_latest: false,
            lookback: chrono::Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone)]
struct Expectation {
    interval: TimeInterval,
    failures: u32,
    not_before: Instant,
}

pub struct SyncView<R: Fetch> {
    key: SyncKey,
    source: Arc<dyn MarketSource>,
    settings: SyncSettings,
    frame: RwLock<Arc<Frame<R>>>,
    queue: Mutex<VecDeque<Expectation>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    loops_spawned: AtomicU64,
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
    health: SyncHealth,
    events: broadcast::Sender<SyncEvent>,
}

impl<R: Fetch> SyncView<R> {
    pub fn new(
        key: SyncKey,
        source: Arc<dyn MarketSource>,
        settings: SyncSettings,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            key,
            source,
            settings,
            frame: RwLock::new(Arc::new(Frame::empty())),
            queue: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
            loops_spawned: AtomicU64::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            stop: Arc::new(Notify::new()),
            health: SyncHealth::default(),
            events,
        }
    }

    pub fn key(&self) -> &SyncKey {
        &self.key
    }

    // ── Reading ───────────────────────────────────────────────────────────

    /// Everything merged so far. Never waits on pending requests.
    pub fn snapshot(&self) -> Arc<Frame<R>> {
        self.frame.read().clone()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Number of ranges waiting to be fetched.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn pending_intervals(&self) -> Vec<TimeInterval> {
        self.queue.lock().iter().map(|e| e.interval).collect()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// How many loops this view has ever started.
    pub fn loops_spawned(&self) -> u64 {
        self.loops_spawned.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    // ── Requesting ────────────────────────────────────────────────────────

    /// Queue `interval` for fetching and start the loop if none is running.
    /// Must be called from within a Tokio runtime.
    ///
    /// An untagged interval is tagged with this view's step.
    ///
    /// # Panics
    /// If `interval` is tagged with a step other than this view's.
    pub fn request(self: &Arc<Self>, interval: TimeInterval) {
        if self.is_cancelled() {
            warn!(key = %self.key, %interval, "request on a cancelled view ignored");
            return;
        }
        let queued = self.enqueue(interval);
        debug!(key = %self.key, %interval, queued, "range requested");
        self.ensure_worker();
        self.wake.notify_one();
    }

    /// Queue the range, merging it into the newest pending expectation when
    /// the two touch. Returns the queue length.
    fn enqueue(&self, interval: TimeInterval) -> usize {
        let interval = self.tag(interval);
        let mut queue = self.queue.lock();
        match queue.back_mut() {
            Some(last) if last.failures == 0 && last.interval.touches(&interval) => {
                last.interval = last.interval.union(&interval);
            }
            _ => queue.push_back(Expectation {
                interval,
                failures: 0,
                not_before: Instant::now(),
            }),
        }
        queue.len()
    }

    fn tag(&self, interval: TimeInterval) -> TimeInterval {
        let own = self.key.kind.step();
        match (interval.step(), own) {
            (None, Some(step)) => interval.with_step(step),
            (tagged, own) => {
                assert!(
                    tagged == own,
                    "contract violation: {} cannot serve {interval}",
                    self.key
                );
                interval
            }
        }
    }

    fn ensure_worker(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let spawned = self.loops_spawned.fetch_add(1, Ordering::SeqCst) + 1;
        info!(key = %self.key, source = self.source.name(), spawned, "sync loop starting");
        *worker = Some(tokio::spawn(run_loop(
            Arc::downgrade(self),
            Arc::clone(&self.wake),
            Arc::clone(&self.stop),
            Arc::clone(&self.cancelled),
            self.settings.poll_interval,
        )));
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Stop the loop after its current fetch. Pending ranges stay queued
    /// but are never fetched.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!(key = %self.key, pending = self.pending(), "sync loop cancelled");
        }
        self.stop.notify_one();
        self.wake.notify_one();
    }

    /// Wait for the loop to exit. Returns immediately when none was started.
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(key = %self.key, error = %err, "sync loop ended abnormally");
            }
        }
    }

    // ── Loop body ─────────────────────────────────────────────────────────

    /// One pass over the queue. Returns whether more work may be waiting.
    async fn run_pass(&self) -> bool {
        self.health.record_pass();
        if self.settings.follow_latest {
            self.enqueue(self.follow_interval());
        }

        for expectation in self.take_ready(Instant::now()) {
            if self.is_cancelled() {
                break;
            }
            self.fetch_and_merge(expectation).await;
        }

        self.settings.follow_latest || !self.queue.lock().is_empty()
    }

    /// Open range from the start of the newest record, so a bucket that is
    /// still forming is fetched again on every pass.
    fn follow_interval(&self) -> TimeInterval {
        match self.snapshot().latest().map(|r| r.start()) {
            Some(newest) => TimeInterval::since(newest),
            None => TimeInterval::trailing(Timestamp::now(), self.settings.lookback),
        }
    }

    fn take_ready(&self, now: Instant) -> Vec<Expectation> {
        let mut queue = self.queue.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|e| e.not_before <= now);
        *queue = waiting.into();
        ready
    }

    async fn fetch_and_merge(&self, expectation: Expectation) {
        let interval = expectation.interval;
        match R::fetch(self.source.as_ref(), &self.key, &interval).await {
            Ok(records) => {
                let fetched = records.len();
                let incoming = Frame::from_records(records);
                // Only this loop writes the frame, so read-merge-swap cannot
                // lose an update.
                let merged = self.snapshot().union(&incoming);
                let total = merged.len();
                *self.frame.write() = Arc::new(merged);

                self.health.record_success(fetched);
                debug!(key = %self.key, %interval, fetched, total, "range merged");
                self.emit(SyncEvent::Merged {
                    key: self.key.clone(),
                    interval,
                    fetched,
                    total,
                });
            }
            Err(err) => {
                let failures = expectation.failures + 1;
                let error = format!("{err:#}");
                self.health.record_failure(&error);

                if self.settings.retry.allows_retry(failures) {
                    let backoff = self.settings.retry.backoff(failures);
                    warn!(
                        key = %self.key,
                        %interval,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "fetch failed, will retry"
                    );
                    self.queue.lock().push_back(Expectation {
                        interval,
                        failures,
                        not_before: Instant::now() + backoff,
                    });
                    self.emit(SyncEvent::FetchFailed {
                        key: self.key.clone(),
                        interval,
                        attempt: failures,
                        error,
                    });
                } else {
                    self.health.record_drop();
                    warn!(
                        key = %self.key,
                        %interval,
                        attempts = failures,
                        error = %error,
                        "fetch failed, range dropped"
                    );
                    self.emit(SyncEvent::RangeDropped {
                        key: self.key.clone(),
                        interval,
                        attempts: failures,
                        error,
                    });
                }
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl SyncView<Candle> {
    /// Bucket ranges of `interval` not yet present in the frame.
    pub fn missing_ranges(&self, interval: &TimeInterval) -> Vec<TimeInterval> {
        let Some(step) = self.key.kind.step() else {
            panic!("contract violation: {} is not a candle view", self.key);
        };
        self.snapshot().gaps(interval, step)
    }

    /// Request only the parts of `interval` the frame does not cover yet.
    /// Returns how many ranges were queued.
    pub fn request_missing(self: &Arc<Self>, interval: &TimeInterval) -> usize {
        let gaps = self.missing_ranges(interval);
        let count = gaps.len();
        for gap in gaps {
            self.request(gap);
        }
        count
    }
}

impl<R: Fetch> Drop for SyncView<R> {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop.notify_one();
        self.wake.notify_one();
    }
}

impl<R: Fetch> std::fmt::Debug for SyncView<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncView")
            .field("key", &self.key)
            .field("records", &self.snapshot().len())
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

async fn run_loop<R: Fetch>(
    view: Weak<SyncView<R>>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let busy = match view.upgrade() {
            Some(view) => view.run_pass().await,
            None => break,
        };
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = stop.notified() => continue,
        }
        if !busy {
            tokio::select! {
                _ = wake.notified() => {}
                _ = stop.notified() => {}
            }
        }
    }
    debug!("sync loop exited");
}
