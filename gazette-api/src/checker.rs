//! Readiness tracking for the running pipeline

use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe readiness flags for the pipeline components
///
/// The controller flips each flag once the matching component is up. The
/// API answers readiness probes from these flags.
#[derive(Debug, Default)]
pub struct HealthChecker {
    /// Whether the subscriber store and delivery log are open
    store_ready: AtomicBool,

    /// Whether the distribution worker is consuming dispatches
    worker_ready: AtomicBool,

    /// Whether the scheduler loop is running
    scheduler_ready: AtomicBool,
}

impl HealthChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_store_ready(&self, ready: bool) {
        self.store_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Store readiness updated");
    }

    pub fn set_worker_ready(&self, ready: bool) {
        self.worker_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Worker readiness updated");
    }

    pub fn set_scheduler_ready(&self, ready: bool) {
        self.scheduler_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Scheduler readiness updated");
    }

    /// The process is alive as long as it can answer at all
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    /// Every component is up
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let status = self.get_status();
        let ready = status.store_ready && status.worker_ready && status.scheduler_ready;

        if !ready {
            tracing::debug!(
                store_ready = status.store_ready,
                worker_ready = status.worker_ready,
                scheduler_ready = status.scheduler_ready,
                "Readiness check failed"
            );
        }

        ready
    }

    #[must_use]
    pub fn get_status(&self) -> HealthStatus {
        let store_ready = self.store_ready.load(Ordering::Relaxed);
        let worker_ready = self.worker_ready.load(Ordering::Relaxed);
        let scheduler_ready = self.scheduler_ready.load(Ordering::Relaxed);

        HealthStatus {
            alive: self.is_alive(),
            ready: store_ready && worker_ready && scheduler_ready,
            store_ready,
            worker_ready,
            scheduler_ready,
        }
    }
}

/// Snapshot of the readiness flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "One flag per tracked component"
)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub store_ready: bool,
    pub worker_ready: bool,
    pub scheduler_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_until_every_component_is() {
        let checker = HealthChecker::new();
        assert!(checker.is_alive());
        assert!(!checker.is_ready());

        checker.set_store_ready(true);
        checker.set_worker_ready(true);
        assert!(!checker.is_ready());

        checker.set_scheduler_ready(true);
        assert!(checker.is_ready());

        checker.set_worker_ready(false);
        let status = checker.get_status();
        assert!(!status.ready);
        assert!(status.store_ready);
        assert!(!status.worker_ready);
    }
}
