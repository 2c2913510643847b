//! Per-key request counters with time-based expiry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::sweep::{SweepConfig, SweepHandle, SweepState};
use crate::context::far_future;
use crate::error::{Result, TurnstileError};

/// Request count for a single key.
#[derive(Debug)]
struct Counter {
    /// Time of the most recent request
    last_attempt: Instant,
    /// Requests seen since the entry was created
    count: u64,
}

#[derive(Debug)]
struct StoreInner {
    counters: HashMap<String, Counter>,
    sweep_state: SweepState,
}

/// Counts requests per key and forgets keys that go idle.
///
/// Typical use: start a sweep, then on each request check the count for the
/// caller's key (a client IP, say), reject above a threshold, and otherwise
/// record the request.
///
/// Every read and write goes through a single lock, including the sweep's
/// full scan. Requests for different keys therefore serialize, and a sweep
/// over a large map briefly blocks them; this is fine for moderate key
/// cardinality.
#[derive(Debug)]
pub struct ExpiringCounterStore {
    inner: Mutex<StoreInner>,
}

impl ExpiringCounterStore {
    /// Create an empty store. No sweep is running.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                counters: HashMap::new(),
                sweep_state: SweepState::Created,
            }),
        }
    }

    /// Number of requests recorded for `key`, or 0 if it is unknown or has
    /// been evicted.
    pub fn check_request(&self, key: &str) -> u64 {
        let inner = self.inner.lock();
        inner.counters.get(key).map_or(0, |counter| counter.count)
    }

    /// Record one request for `key`, refreshing its last-activity time.
    pub fn record_request(&self, key: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.counters.get_mut(key) {
            Some(counter) => {
                counter.count += 1;
                counter.last_attempt = now;
                trace!(key = %key, count = counter.count, "Recorded request");
            }
            None => {
                inner.counters.insert(
                    key.to_string(),
                    Counter {
                        last_attempt: now,
                        count: 1,
                    },
                );
                trace!(key = %key, "Created request counter");
            }
        }
    }

    /// Remove every entry idle for longer than `stale_after`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_stale(&self, stale_after: Duration) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.counters.len();

        inner
            .counters
            .retain(|_, counter| now.saturating_duration_since(counter.last_attempt) <= stale_after);

        before - inner.counters.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.inner.lock().counters.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().counters.is_empty()
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.inner.lock().counters.clear();
    }

    /// Current sweep lifecycle state.
    pub fn state(&self) -> SweepState {
        self.inner.lock().sweep_state
    }

    /// Run the sweep loop until `stop` is cancelled.
    ///
    /// The first pass happens one full interval after the call. Stopping ends
    /// future evictions; the counters themselves are kept.
    ///
    /// # Errors
    /// Returns `SweepAlreadyRunning` if another sweep is active on this store.
    pub async fn run_sweep(&self, config: SweepConfig, stop: CancellationToken) -> Result<()> {
        self.begin_sweep(&config)?;
        let guard = SweepGuard { store: self };
        guard.store.sweep_loop(config, stop).await;
        Ok(())
    }

    /// Spawn the sweep onto a background task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `SweepAlreadyRunning` if another sweep is active on this store.
    pub fn spawn_sweep(self: &Arc<Self>, config: SweepConfig) -> Result<SweepHandle> {
        self.begin_sweep(&config)?;

        let stop = CancellationToken::new();
        let guard = SweepGuard {
            store: Arc::clone(self),
        };
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            let guard = guard;
            guard.store.sweep_loop(config, task_stop).await;
        });

        Ok(SweepHandle::new(stop, task))
    }

    fn begin_sweep(&self, config: &SweepConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.sweep_state == SweepState::Running {
            return Err(TurnstileError::SweepAlreadyRunning);
        }
        inner.sweep_state = SweepState::Running;

        info!(
            interval_ms = u64::try_from(config.interval().as_millis()).unwrap_or(u64::MAX),
            stale_after_ms = u64::try_from(config.stale_after().as_millis()).unwrap_or(u64::MAX),
            "Starting counter sweep"
        );
        Ok(())
    }

    async fn sweep_loop(&self, config: SweepConfig, stop: CancellationToken) {
        let start = Instant::now()
            .checked_add(config.interval())
            .unwrap_or_else(far_future);
        let mut ticker = interval_at(start, config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.evict_stale(config.stale_after());
                    if evicted > 0 {
                        debug!(evicted = evicted, remaining = self.len(), "Evicted stale counters");
                    }
                }
            }
        }
    }
}

/// Marks the sweep stopped however the sweep exits: normal return, a
/// dropped future, an aborted task or a panic.
struct SweepGuard<S: Deref<Target = ExpiringCounterStore>> {
    store: S,
}

impl<S: Deref<Target = ExpiringCounterStore>> Drop for SweepGuard<S> {
    fn drop(&mut self) {
        self.store.inner.lock().sweep_state = SweepState::Stopped;
        info!("Counter sweep stopped");
    }
}

impl Default for ExpiringCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep_config(interval_ms: u64, stale_after_ms: u64) -> SweepConfig {
        SweepConfig::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(stale_after_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_key_is_zero() {
        let store = ExpiringCounterStore::new();
        assert_eq!(store.check_request("foo"), 0);
        // Checking never creates an entry
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_increments() {
        let store = ExpiringCounterStore::new();

        store.record_request("foo");
        assert_eq!(store.check_request("foo"), 1);

        store.record_request("foo");
        assert_eq!(store.check_request("foo"), 2);
    }

    #[test]
    fn test_keys_counted_separately() {
        let store = ExpiringCounterStore::new();

        store.record_request("10.0.0.1");
        store.record_request("10.0.0.1");
        store.record_request("10.0.0.2");

        assert_eq!(store.check_request("10.0.0.1"), 2);
        assert_eq!(store.check_request("10.0.0.2"), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear() {
        let store = ExpiringCounterStore::new();
        store.record_request("foo");

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.check_request("foo"), 0);
    }

    #[test]
    fn test_concurrent_records_not_lost() {
        let store = ExpiringCounterStore::new();
        let threads = 16;
        let per_thread = 250;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    for _ in 0..per_thread {
                        store.record_request("shared");
                    }
                });
            }
        });

        assert_eq!(store.check_request("shared"), threads * per_thread);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale_uses_last_activity() {
        let store = ExpiringCounterStore::new();
        store.record_request("idle");
        store.record_request("active");

        tokio::time::advance(Duration::from_millis(40)).await;
        store.record_request("active");
        tokio::time::advance(Duration::from_millis(20)).await;

        let evicted = store.evict_stale(Duration::from_millis(50));

        assert_eq!(evicted, 1);
        assert_eq!(store.check_request("idle"), 0);
        assert_eq!(store.check_request("active"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_key() {
        let store = Arc::new(ExpiringCounterStore::new());
        store.record_request("foo");
        store.record_request("foo");
        assert_eq!(store.check_request("foo"), 2);

        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();

        // After the first pass the key has only been idle for 30ms
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.check_request("foo"), 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.check_request("foo"), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_key_survives_sweep() {
        let store = Arc::new(ExpiringCounterStore::new());
        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();

        for _ in 0..30 {
            store.record_request("busy");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(store.check_request("busy"), 30);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_evictions() {
        let store = Arc::new(ExpiringCounterStore::new());
        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        assert_eq!(store.state(), SweepState::Running);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
        assert_eq!(store.state(), SweepState::Stopped);

        store.record_request("foo");
        tokio::time::sleep(Duration::from_millis(500)).await;

        // No sweep is left to evict the idle key
        assert_eq!(store.check_request("foo"), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_counters() {
        let store = Arc::new(ExpiringCounterStore::new());
        store.record_request("foo");

        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        handle.shutdown().await;

        assert_eq!(store.check_request("foo"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_lifecycle() {
        let store = Arc::new(ExpiringCounterStore::new());
        assert_eq!(store.state(), SweepState::Created);

        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        assert_eq!(store.state(), SweepState::Running);

        assert!(matches!(
            store.spawn_sweep(sweep_config(20, 50)),
            Err(TurnstileError::SweepAlreadyRunning)
        ));

        handle.shutdown().await;
        assert_eq!(store.state(), SweepState::Stopped);

        // A stopped store can be swept again
        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        assert_eq!(store.state(), SweepState::Running);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweep_in_place() {
        let store = Arc::new(ExpiringCounterStore::new());
        store.record_request("foo");
        let stop = CancellationToken::new();

        let task = {
            let store = store.clone();
            let stop = stop.clone();
            tokio::spawn(async move { store.run_sweep(sweep_config(20, 50), stop).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.check_request("foo"), 0);

        stop.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(store.state(), SweepState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_sweep_can_be_restarted() {
        let store = Arc::new(ExpiringCounterStore::new());
        let stop = CancellationToken::new();

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.run_sweep(sweep_config(20, 50), stop).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.state(), SweepState::Running);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(store.state(), SweepState::Stopped);

        store.record_request("foo");
        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.check_request("foo"), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_sweep_future_resets_state() {
        let store = ExpiringCounterStore::new();
        let stop = CancellationToken::new();

        let mut sweep = tokio_test::task::spawn(store.run_sweep(sweep_config(20, 50), stop));
        tokio_test::assert_pending!(sweep.poll());
        assert_eq!(store.state(), SweepState::Running);

        drop(sweep);
        assert_eq!(store.state(), SweepState::Stopped);
    }

    #[tokio::test]
    async fn test_huge_interval_sweep_stays_healthy() {
        let store = Arc::new(ExpiringCounterStore::new());
        let config = SweepConfig::new(Duration::MAX, Duration::from_millis(50)).unwrap();

        let handle = store.spawn_sweep(config).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(store.state(), SweepState::Running);

        handle.shutdown().await;
        assert_eq!(store.state(), SweepState::Stopped);

        let handle = store.spawn_sweep(sweep_config(20, 50)).unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reads_and_writes_valid_in_every_state() {
        let store = Arc::new(ExpiringCounterStore::new());
        store.record_request("foo");

        let handle = store.spawn_sweep(sweep_config(1000, 60_000)).unwrap();
        store.record_request("foo");
        assert_eq!(store.check_request("foo"), 2);

        handle.shutdown().await;
        store.record_request("foo");
        assert_eq!(store.check_request("foo"), 3);
    }
}
