use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::action::Locality;

/// Progress counters exposed to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: u64,
    pub active_local: u64,
    pub active_remote: u64,
    pub finished: u64,
}

impl SchedulerStats {
    /// Every action the scheduler currently knows about.
    pub fn total(&self) -> u64 {
        self.queued + self.active_local + self.active_remote + self.finished
    }

    pub fn active(&self) -> u64 {
        self.active_local + self.active_remote
    }
}

/// Budget consumption read under the table lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    /// Weight held by running local actions.
    pub local_weight: f64,
    /// Cache probes in flight.
    pub cache_queries: u32,
    /// Actions in `Running` state.
    pub running: usize,
}

impl BudgetSnapshot {
    pub fn is_released(&self) -> bool {
        self.local_weight == 0.0 && self.cache_queries == 0 && self.running == 0
    }
}

/// Lock-free counters behind [`SchedulerStats`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    queued: AtomicU64,
    active_local: AtomicU64,
    active_remote: AtomicU64,
    finished: AtomicU64,
}

fn decrement(counter: &AtomicU64, name: &str) {
    let prev = counter.fetch_sub(1, Ordering::AcqRel);
    assert!(prev > 0, "{} counter underflow", name);
}

impl Counters {
    pub(crate) fn queued(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dequeued(&self) {
        decrement(&self.queued, "queued");
    }

    pub(crate) fn discard_queued(&self, count: u64) {
        self.queued.fetch_sub(count, Ordering::AcqRel);
    }

    pub(crate) fn activated(&self, locality: Locality) {
        match locality {
            Locality::Local => self.active_local.fetch_add(1, Ordering::AcqRel),
            Locality::Remote => self.active_remote.fetch_add(1, Ordering::AcqRel),
        };
    }

    pub(crate) fn deactivated(&self, locality: Locality) {
        match locality {
            Locality::Local => decrement(&self.active_local, "active local"),
            Locality::Remote => decrement(&self.active_remote, "active remote"),
        }
    }

    pub(crate) fn finished(&self) {
        self.finished.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn active_remote(&self) -> u64 {
        self.active_remote.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queued.load(Ordering::Acquire),
            active_local: self.active_local.load(Ordering::Acquire),
            active_remote: self.active_remote.load(Ordering::Acquire),
            finished: self.finished.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_counts() {
        let c = Counters::default();
        c.queued();
        c.queued();
        c.dequeued();
        c.activated(Locality::Local);
        assert_eq!(
            c.snapshot(),
            SchedulerStats { queued: 1, active_local: 1, active_remote: 0, finished: 0 }
        );

        c.deactivated(Locality::Local);
        c.finished();
        let s = c.snapshot();
        assert_eq!(s.finished, 1);
        assert_eq!(s.total(), 2);
        assert_eq!(s.active(), 0);
    }

    #[test]
    #[should_panic(expected = "active remote counter underflow")]
    fn underflow_is_fatal() {
        Counters::default().deactivated(Locality::Remote);
    }

    #[test]
    fn released_budget() {
        assert!(BudgetSnapshot::default().is_released());
        let held = BudgetSnapshot { local_weight: 1.5, ..Default::default() };
        assert!(!held.is_released());
    }
}
