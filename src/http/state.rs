//! Shared state for the HTTP surface and its background tasks.

use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ratelimit::{
    ForwardedHeaderResolver, Gate, IdentityResolver, PolicyTable, RoutePolicy,
};

/// State shared by every request handler.
pub struct GateState {
    gate: Gate,
    resolver: Box<dyn IdentityResolver>,
    policies: RwLock<PolicyTable>,
}

impl GateState {
    /// Create state using the proxy-header identity resolver.
    pub fn new(gate: Gate, policies: PolicyTable) -> Self {
        Self::with_resolver(gate, policies, Box::new(ForwardedHeaderResolver))
    }

    /// Create state with a custom identity resolver.
    pub fn with_resolver(
        gate: Gate,
        policies: PolicyTable,
        resolver: Box<dyn IdentityResolver>,
    ) -> Self {
        Self {
            gate,
            resolver,
            policies: RwLock::new(policies),
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn resolver(&self) -> &dyn IdentityResolver {
        self.resolver.as_ref()
    }

    /// Policy protecting `path`, cloned out so no lock is held by the caller.
    pub fn policy_for(&self, path: &str) -> Option<RoutePolicy> {
        self.policies.read().find(path).cloned()
    }

    /// Replace the policy table. Existing counters are kept.
    pub fn set_policies(&self, policies: PolicyTable) {
        let count = policies.len();
        *self.policies.write() = policies;
        info!(policies = count, "Rate limit policies updated");
    }

    /// Number of protected routes.
    pub fn policy_count(&self) -> usize {
        self.policies.read().len()
    }

    /// Periodically evict expired windows so idle keys are reclaimed.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = state.gate.now_ms();
                let removed = state.gate.store().evict_expired(now);
                debug!(
                    removed,
                    live = state.gate.store().len(),
                    "Periodic sweep finished"
                );
            }
        })
    }

    /// Periodically reload the policy file. A file that fails to load leaves
    /// the current policies in place.
    pub fn spawn_policy_reloader(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; policies were just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match PolicyTable::from_file(&path) {
                    Ok(policies) => state.set_policies(policies),
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to reload policies, keeping previous table"
                    ),
                }
            }
        })
    }
}
