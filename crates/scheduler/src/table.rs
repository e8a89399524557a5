//! Append-only record of every enqueued action.
//!
//! Entries are addressed by their [`ActionId`], which is the index they were
//! appended at; nothing hands out references across the lock boundary, so ids
//! stay valid while other threads append. Only `status` (and the payload it
//! guards) changes after an entry is created.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::action::{ActionId, ActionPayload, ActionStatus};
use crate::executor::{ClaimKind, ExecutionToken};
use crate::stats::BudgetSnapshot;

/// One enqueued action.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    /// `None` once the action reached a terminal state.
    pub(crate) payload: Option<Arc<ActionPayload>>,
    pub(crate) dependencies: Vec<ActionId>,
    pub(crate) can_detour: bool,
    pub(crate) can_execute_remotely: bool,
    pub(crate) weight: f64,
    pub(crate) status: ActionStatus,
    /// Bumped on every claim; completions carrying an older value are stale.
    pub(crate) generation: u32,
    pub(crate) cache_query_time: Option<Duration>,
}

/// Fields for a new entry.
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub(crate) payload: ActionPayload,
    pub(crate) dependencies: Vec<ActionId>,
    pub(crate) can_detour: bool,
    pub(crate) can_execute_remotely: bool,
    pub(crate) cache_eligible: bool,
    pub(crate) weight: f64,
}

/// Everything guarded by the table lock, budgets included.
#[derive(Debug, Default)]
pub(crate) struct TableState {
    pub(crate) entries: Vec<Entry>,
    /// No entry before this index is queued or running.
    pub(crate) cursor: usize,
    pub(crate) local_weight: f64,
    pub(crate) local_runs: usize,
    pub(crate) cache_queries: u32,
    pub(crate) running: usize,
}

impl TableState {
    pub(crate) fn push(&mut self, new: NewEntry) -> ActionId {
        let id = ActionId(self.entries.len());
        self.entries.push(Entry {
            payload: Some(Arc::new(new.payload)),
            dependencies: new.dependencies,
            can_detour: new.can_detour,
            can_execute_remotely: new.can_execute_remotely,
            weight: new.weight,
            status: if new.cache_eligible {
                ActionStatus::QueuedForCache
            } else {
                ActionStatus::QueuedForRun
            },
            generation: 0,
            cache_query_time: None,
        });
        id
    }

    pub(crate) fn entry(&self, id: ActionId) -> &Entry {
        &self.entries[id.0]
    }

    /// Compare-and-set from a queued state to `Running`.
    ///
    /// Returns the pre-claim status, or `None` if the entry was not queued.
    pub(crate) fn transition_to_running(&mut self, id: ActionId) -> Option<ActionStatus> {
        let entry = self.entries.get_mut(id.0)?;
        let prev = entry.status;
        if !prev.is_queued() {
            return None;
        }
        entry.status = ActionStatus::Running;
        entry.generation = entry.generation.wrapping_add(1);
        self.running += 1;
        Some(prev)
    }

    /// Record a terminal status and drop the heavy per-action data.
    pub(crate) fn set_terminal(&mut self, id: ActionId, status: ActionStatus) -> Option<Arc<ActionPayload>> {
        assert!(status.is_terminal(), "{:?} is not a terminal status", status);
        let entry = &mut self.entries[id.0];
        assert!(
            !entry.status.is_terminal(),
            "action {} already finished as {:?}",
            id,
            entry.status
        );
        entry.status = status;
        entry.dependencies = Vec::new();
        entry.payload.take()
    }

    /// Put a running entry back in the queue.
    pub(crate) fn requeue(&mut self, id: ActionId, status: ActionStatus) {
        debug_assert!(status.is_queued());
        self.entries[id.0].status = status;
        self.cursor = self.cursor.min(id.0);
    }

    /// Whether `token` still names the live claim on its entry.
    pub(crate) fn is_current(&self, token: &ExecutionToken) -> bool {
        self.entries
            .get(token.id.0)
            .is_some_and(|e| e.status == ActionStatus::Running && e.generation == token.generation)
    }

    /// Debit the budget a claim of `kind` consumes.
    pub(crate) fn debit(&mut self, kind: ClaimKind, weight: f64) {
        match kind {
            ClaimKind::LocalRun => {
                self.local_weight += weight;
                self.local_runs += 1;
            }
            ClaimKind::CacheQuery => self.cache_queries += 1,
            ClaimKind::RemoteRun => {}
        }
    }

    /// Release exactly what the claim behind `token` debited.
    pub(crate) fn release(&mut self, token: &ExecutionToken) {
        match token.kind {
            ClaimKind::LocalRun => {
                self.local_runs = self
                    .local_runs
                    .checked_sub(1)
                    .expect("local weight released more often than claimed");
                self.local_weight -= token.weight;
                if self.local_runs == 0 {
                    self.local_weight = 0.0;
                }
            }
            ClaimKind::CacheQuery => {
                self.cache_queries = self
                    .cache_queries
                    .checked_sub(1)
                    .expect("cache query released more often than claimed");
            }
            ClaimKind::RemoteRun => {}
        }
        self.running = self
            .running
            .checked_sub(1)
            .expect("running count released more often than claimed");
    }

    /// Whether a local run of `weight` fits the budget right now.
    ///
    /// An action heavier than the whole budget may still run alone.
    pub(crate) fn local_weight_fits(&self, weight: f64, max_weight: f64) -> bool {
        const EPSILON: f64 = 1e-9;
        if max_weight <= 0.0 {
            return false;
        }
        self.local_runs == 0 || self.local_weight + weight <= max_weight + EPSILON
    }

    pub(crate) fn budgets(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            local_weight: self.local_weight,
            cache_queries: self.cache_queries,
            running: self.running,
        }
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_queued()).count()
    }

    pub(crate) fn all_terminal(&self) -> bool {
        self.entries[self.cursor.min(self.entries.len())..]
            .iter()
            .all(|e| e.status.is_terminal())
    }

    pub(crate) fn clear(&mut self) {
        *self = TableState::default();
    }
}

/// Thread-safe storage and status transitions for all enqueued actions.
#[derive(Debug, Default)]
pub struct ProcessTable {
    state: RwLock<TableState>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a queued entry. Exactly one caller observes `true` per claim.
    pub fn transition_to_running(&self, id: ActionId) -> bool {
        self.write().transition_to_running(id).is_some()
    }

    pub fn status(&self, id: ActionId) -> Option<ActionStatus> {
        self.read().entries.get(id.0).map(|e| e.status)
    }

    /// Status of every entry, in id order.
    pub fn statuses(&self) -> Vec<ActionStatus> {
        self.read().entries.iter().map(|e| e.status).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
