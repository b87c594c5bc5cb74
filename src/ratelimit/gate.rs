//! The admit/deny decision point.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::identity::RateLimitKey;
use super::store::WindowStore;
use super::window::WindowConfig;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Attempts left in the current window, never negative
    pub remaining: u32,
    /// The configured limit for this resource
    pub limit: u32,
    /// Absolute time (ms) of the last instant in the current window
    pub reset_at: u64,
}

impl Verdict {
    /// Time from `now` until a new window can open, i.e. just past `reset_at`.
    pub fn retry_after(&self, now: u64) -> Duration {
        Duration::from_millis(self.reset_at.saturating_add(1).saturating_sub(now))
    }
}

/// Combines per-resource configuration with the shared [`WindowStore`].
///
/// The gate holds no policy of its own: every call supplies the
/// [`WindowConfig`] for the resource being protected.
pub struct Gate {
    store: Arc<WindowStore>,
    clock: Arc<dyn Clock>,
}

impl Gate {
    /// Create a gate over an explicit store and clock.
    pub fn new(store: Arc<WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a gate with a fresh store and the wall clock.
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(WindowStore::new()), Arc::new(SystemClock))
    }

    /// Check whether `identity` may access `resource` under `config`.
    pub fn check(&self, identity: &str, resource: &str, config: &WindowConfig) -> Verdict {
        self.check_key(&RateLimitKey::new(identity, resource), config)
    }

    /// Check a pre-composed key.
    pub fn check_key(&self, key: &RateLimitKey, config: &WindowConfig) -> Verdict {
        let now = self.clock.now_ms();

        if let Some(removed) = self.store.maybe_sweep(now) {
            trace!(removed, "Opportunistic sweep ran");
        }

        let attempt = self.store.record_attempt(key.as_str(), now, config);

        trace!(
            key = %key,
            admitted = attempt.admitted,
            remaining = attempt.remaining,
            "Checked rate limit"
        );

        if !attempt.admitted {
            debug!(
                key = %key,
                limit = config.limit(),
                reset_at = attempt.reset_at,
                "Rate limit exceeded"
            );
        }

        Verdict {
            admitted: attempt.admitted,
            remaining: attempt.remaining,
            limit: config.limit(),
            reset_at: attempt.reset_at,
        }
    }

    /// Current time according to this gate's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn gate_at(start_ms: u64) -> (Gate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let gate = Gate::new(Arc::new(WindowStore::new()), clock.clone());
        (gate, clock)
    }

    #[test]
    fn test_rollover_scenario() {
        let (gate, clock) = gate_at(0);
        let cfg = WindowConfig::new(2, 1_000).unwrap();

        let v = gate.check("203.0.113.7", "/x", &cfg);
        assert!(v.admitted);
        assert_eq!(v.remaining, 1);

        clock.set(100);
        let v = gate.check("203.0.113.7", "/x", &cfg);
        assert!(v.admitted);
        assert_eq!(v.remaining, 0);

        clock.set(200);
        let v = gate.check("203.0.113.7", "/x", &cfg);
        assert!(!v.admitted);
        assert_eq!(v.remaining, 0);
        assert_eq!(v.retry_after(200), Duration::from_millis(801));

        clock.set(1_000);
        assert!(!gate.check("203.0.113.7", "/x", &cfg).admitted);

        clock.set(1_100);
        let v = gate.check("203.0.113.7", "/x", &cfg);
        assert!(v.admitted);
        assert_eq!(v.remaining, 1);
    }

    #[test]
    fn test_retry_after_lands_in_next_window() {
        let (gate, clock) = gate_at(0);
        let cfg = WindowConfig::new(1, 1_000).unwrap();

        gate.check("A", "/x", &cfg);
        let denied = gate.check("A", "/x", &cfg);
        assert!(!denied.admitted);

        let wait = denied.retry_after(gate.now_ms());
        clock.advance(wait.as_millis() as u64 - 1);
        assert!(!gate.check("A", "/x", &cfg).admitted);

        clock.advance(1);
        assert!(gate.check("A", "/x", &cfg).admitted);
    }

    #[test]
    fn test_isolation_between_identities() {
        let (gate, _clock) = gate_at(0);
        let cfg = WindowConfig::new(1, 1_000).unwrap();

        assert!(gate.check("A", "/x", &cfg).admitted);
        assert!(gate.check("B", "/x", &cfg).admitted);
        assert!(!gate.check("A", "/x", &cfg).admitted);

        let b = gate.store().get("B:/x", gate.now_ms()).unwrap();
        assert_eq!(b.count, 1);
    }

    #[test]
    fn test_same_identity_limited_per_resource() {
        let (gate, _clock) = gate_at(0);
        let cfg = WindowConfig::new(1, 1_000).unwrap();

        assert!(gate.check("A", "/x", &cfg).admitted);
        assert!(gate.check("A", "/y", &cfg).admitted);
        assert!(!gate.check("A", "/x", &cfg).admitted);
    }

    #[test]
    fn test_verdict_carries_limit() {
        let (gate, _clock) = gate_at(5_000);
        let cfg = WindowConfig::new(7, 60_000).unwrap();

        let v = gate.check("A", "/x", &cfg);
        assert_eq!(v.limit, 7);
        assert_eq!(v.reset_at, 65_000);
    }

    #[test]
    fn test_remaining_bounds() {
        let (gate, clock) = gate_at(0);
        let cfg = WindowConfig::new(4, 1_000).unwrap();

        for _ in 0..10 {
            let v = gate.check("A", "/x", &cfg);
            if v.admitted {
                assert!(v.remaining <= cfg.limit() - 1);
            } else {
                assert_eq!(v.remaining, 0);
            }
            clock.advance(10);
        }
    }

    #[test]
    fn test_expired_keys_are_swept_on_check() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(WindowStore::with_sweep_interval(500));
        let gate = Gate::new(store.clone(), clock.clone());
        let cfg = WindowConfig::new(1, 100).unwrap();

        gate.check("A", "/x", &cfg);
        gate.check("B", "/x", &cfg);
        assert_eq!(store.len(), 2);

        clock.set(600);
        gate.check("C", "/x", &cfg);
        assert_eq!(store.len(), 1);
    }
}
