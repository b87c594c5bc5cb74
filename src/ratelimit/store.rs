//! Expiring fixed-window counter storage.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::window::WindowConfig;

/// Default minimum spacing between opportunistic sweeps.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;

/// A counter for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Attempts counted in the current window
    pub count: u32,
    /// Absolute time (ms) at which the window ends
    pub reset_at: u64,
}

impl CounterEntry {
    /// Whether the window has ended at `now`. The entry is still live at
    /// exactly `reset_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_at < now
    }
}

/// Outcome of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub admitted: bool,
    pub remaining: u32,
    pub reset_at: u64,
}

/// Thread-safe table of per-key fixed-window counters.
///
/// Entries whose window has ended are treated as absent on access and are
/// physically removed by [`evict_expired`](Self::evict_expired), either from a
/// background task or through the throttled [`maybe_sweep`](Self::maybe_sweep).
///
/// Updates for one key are serialized by the map's shard lock, held across
/// the whole read-modify-write. Keys in other shards are not blocked.
pub struct WindowStore {
    entries: DashMap<String, CounterEntry>,
    sweep_interval_ms: u64,
    next_sweep_at: AtomicU64,
}

impl WindowStore {
    /// Create an empty store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL_MS)
    }

    /// Create an empty store that sweeps at most once per `sweep_interval_ms`.
    pub fn with_sweep_interval(sweep_interval_ms: u64) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_interval_ms,
            next_sweep_at: AtomicU64::new(0),
        }
    }

    /// Record one attempt for `key` at `now` and return the verdict.
    pub fn record_attempt(&self, key: &str, now: u64, config: &WindowConfig) -> Attempt {
        let limit = config.limit();

        // Hit path: borrowed lookup, no key allocation.
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                return Self::bump(key, &mut entry, limit);
            }
        }

        match self.entries.entry(key.to_owned()) {
            // Another caller opened the window between the lookup and here.
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                Self::bump(key, occupied.get_mut(), limit)
            }
            Entry::Occupied(mut occupied) => {
                let entry = Self::fresh_entry(now, config);
                debug!(key = %key, reset_at = entry.reset_at, "Rolling over expired window");
                occupied.insert(entry);
                Self::first_attempt(entry, limit)
            }
            Entry::Vacant(vacant) => {
                let entry = Self::fresh_entry(now, config);
                debug!(key = %key, reset_at = entry.reset_at, limit, "Opening new window");
                vacant.insert(entry);
                Self::first_attempt(entry, limit)
            }
        }
    }

    /// Remove every entry whose window has ended. Returns how many were removed.
    pub fn evict_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Evicted expired windows");
        }
        removed
    }

    /// Run [`evict_expired`](Self::evict_expired) if the sweep interval has
    /// passed since the last sweep.
    ///
    /// Exactly one concurrent caller wins the slot; the rest return `None`
    /// immediately. Must not be called while holding a reference into the map.
    pub fn maybe_sweep(&self, now: u64) -> Option<usize> {
        let due = self.next_sweep_at.load(Ordering::Acquire);
        if now < due {
            return None;
        }

        let next = now.saturating_add(self.sweep_interval_ms);
        self.next_sweep_at
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| self.evict_expired(now))
    }

    /// Look up the live entry for `key`, if any.
    pub fn get(&self, key: &str, now: u64) -> Option<CounterEntry> {
        self.entries
            .get(key)
            .map(|entry| *entry.value())
            .filter(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Count one attempt against a live window. Called with the shard guard held.
    fn bump(key: &str, entry: &mut CounterEntry, limit: u32) -> Attempt {
        if entry.count >= limit {
            trace!(key = %key, count = entry.count, limit, "Window exhausted");
            return Attempt {
                admitted: false,
                remaining: 0,
                reset_at: entry.reset_at,
            };
        }

        entry.count += 1;
        Attempt {
            admitted: true,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    fn fresh_entry(now: u64, config: &WindowConfig) -> CounterEntry {
        CounterEntry {
            count: 1,
            reset_at: now.saturating_add(config.window_ms()),
        }
    }

    fn first_attempt(entry: CounterEntry, limit: u32) -> Attempt {
        Attempt {
            admitted: true,
            remaining: limit.saturating_sub(1),
            reset_at: entry.reset_at,
        }
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Barrier};

    fn config(limit: u32, window_ms: u64) -> WindowConfig {
        WindowConfig::new(limit, window_ms).unwrap()
    }

    #[test]
    fn test_first_attempt_opens_window() {
        let store = WindowStore::new();
        let attempt = store.record_attempt("1.2.3.4:/x", 0, &config(3, 1_000));

        assert!(attempt.admitted);
        assert_eq!(attempt.remaining, 2);
        assert_eq!(attempt.reset_at, 1_000);
        assert_eq!(
            store.get("1.2.3.4:/x", 0),
            Some(CounterEntry {
                count: 1,
                reset_at: 1_000
            })
        );
    }

    #[test]
    fn test_exactly_limit_admissions_per_window() {
        let store = WindowStore::new();
        let cfg = config(5, 1_000);

        for i in 0..5u32 {
            let attempt = store.record_attempt("k", 10 * i as u64, &cfg);
            assert!(attempt.admitted);
            assert_eq!(attempt.remaining, 4 - i);
        }

        let attempt = store.record_attempt("k", 60, &cfg);
        assert!(!attempt.admitted);
        assert_eq!(attempt.remaining, 0);
    }

    #[test]
    fn test_denied_attempt_leaves_entry_unchanged() {
        let store = WindowStore::new();
        let cfg = config(1, 1_000);

        store.record_attempt("k", 0, &cfg);
        for t in 1..10 {
            assert!(!store.record_attempt("k", t, &cfg).admitted);
        }

        assert_eq!(store.get("k", 10).map(|e| e.count), Some(1));
    }

    #[test]
    fn test_window_rollover_scenario() {
        let store = WindowStore::new();
        let cfg = config(2, 1_000);

        let verdicts: Vec<_> = [0, 100, 200]
            .iter()
            .map(|&t| {
                let a = store.record_attempt("k", t, &cfg);
                (a.admitted, a.remaining)
            })
            .collect();
        assert_eq!(verdicts, vec![(true, 1), (true, 0), (false, 0)]);

        let attempt = store.record_attempt("k", 1_100, &cfg);
        assert!(attempt.admitted);
        assert_eq!(attempt.remaining, 1);
        assert_eq!(attempt.reset_at, 2_100);
    }

    #[test]
    fn test_window_is_live_through_reset_at() {
        let store = WindowStore::new();
        let cfg = config(1, 1_000);

        store.record_attempt("k", 0, &cfg);
        assert!(!store.record_attempt("k", 999, &cfg).admitted);
        assert!(!store.record_attempt("k", 1_000, &cfg).admitted);

        let attempt = store.record_attempt("k", 1_001, &cfg);
        assert!(attempt.admitted);
        assert_eq!(attempt.reset_at, 2_001);
    }

    #[test]
    fn test_evict_at_reset_at_keeps_entry() {
        let store = WindowStore::new();
        store.record_attempt("k", 0, &config(1, 1_000));

        assert_eq!(store.evict_expired(1_000), 0);
        assert!(store.get("k", 1_000).is_some());

        assert_eq!(store.evict_expired(1_001), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_are_isolated() {
        let store = WindowStore::new();
        let cfg = config(1, 1_000);

        assert!(store.record_attempt("A:/x", 0, &cfg).admitted);
        assert!(store.record_attempt("B:/x", 0, &cfg).admitted);
        assert!(!store.record_attempt("A:/x", 1, &cfg).admitted);

        assert_eq!(store.get("B:/x", 1).map(|e| e.count), Some(1));
    }

    #[test]
    fn test_evict_expired_keeps_live_entries() {
        let store = WindowStore::new();

        store.record_attempt("short", 0, &config(1, 100));
        store.record_attempt("long", 0, &config(1, 10_000));
        assert_eq!(store.len(), 2);

        assert_eq!(store.evict_expired(101), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long", 101).is_some());
        assert!(store.get("short", 101).is_none());
    }

    #[test]
    fn test_get_hides_expired_entries_before_sweep() {
        let store = WindowStore::new();
        store.record_attempt("k", 0, &config(1, 100));

        assert!(store.get("k", 500).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_maybe_sweep_is_throttled() {
        let store = WindowStore::with_sweep_interval(1_000);
        store.record_attempt("k", 0, &config(1, 10));

        assert_eq!(store.maybe_sweep(50), Some(1));
        store.record_attempt("k", 60, &config(1, 10));

        // Next sweep not due until 1_050.
        assert_eq!(store.maybe_sweep(500), None);
        assert_eq!(store.len(), 1);

        assert_eq!(store.maybe_sweep(1_050), Some(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear() {
        let store = WindowStore::new();
        store.record_attempt("a", 0, &config(1, 100));
        store.record_attempt("b", 0, &config(1, 100));

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_attempts_never_exceed_limit() {
        const THREADS: usize = 32;
        let store = Arc::new(WindowStore::new());
        let cfg = config(8, 60_000);
        let admitted = AtomicU32::new(0);
        let barrier = Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    if store.record_attempt("hot", 0, &cfg).admitted {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 8);
        assert_eq!(store.get("hot", 0).map(|e| e.count), Some(8));
    }

    #[test]
    fn test_concurrent_last_slot_admits_once() {
        const THREADS: usize = 16;
        let store = WindowStore::new();
        let cfg = config(3, 60_000);
        store.record_attempt("k", 0, &cfg);
        store.record_attempt("k", 0, &cfg);

        let admitted = AtomicU32::new(0);
        let barrier = Barrier::new(THREADS);
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    if store.record_attempt("k", 1, &cfg).admitted {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_concurrent_with_attempts_on_live_keys() {
        const WORKERS: usize = 8;
        const LIMIT: u32 = 50;
        const NOW: u64 = 100;
        let store = WindowStore::with_sweep_interval(0);
        let live = config(LIMIT, 60_000);

        // Stale windows for the evictor to chew through.
        for i in 0..1_000 {
            store.record_attempt(&format!("stale-{}", i), 0, &config(1, 10));
        }

        let admitted: Vec<AtomicU32> = (0..WORKERS).map(|_| AtomicU32::new(0)).collect();
        let done = std::sync::atomic::AtomicBool::new(false);
        let barrier = Barrier::new(WORKERS + 1);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                loop {
                    store.evict_expired(NOW);
                    store.maybe_sweep(NOW);
                    if done.load(Ordering::SeqCst) {
                        break;
                    }
                }
            });

            let workers: Vec<_> = (0..WORKERS)
                .map(|w| {
                    let (store, live, admitted, barrier) = (&store, &live, &admitted, &barrier);
                    scope.spawn(move || {
                        let key = format!("live-{}", w);
                        barrier.wait();
                        for _ in 0..LIMIT * 2 {
                            if store.record_attempt(&key, NOW, live).admitted {
                                admitted[w].fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        for (w, count) in admitted.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), LIMIT);
            let entry = store.get(&format!("live-{}", w), NOW).unwrap();
            assert_eq!(entry.count, LIMIT);
        }
        assert_eq!(store.len(), WORKERS);
    }
}
