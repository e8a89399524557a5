//! Picks the next runnable action.
//!
//! A single pass from the table cursor forward, in enqueue order. The first
//! candidate that matches the locality class and has every dependency
//! succeeded is claimed. A candidate with a failed or skipped dependency is
//! marked skipped and returned instead, so repeated pops drain a skip chain.

use std::sync::Arc;

use crate::action::{ActionId, ActionPayload, ActionStatus, Locality};
use crate::error::GraphError;
use crate::executor::{ClaimKind, ExecutionToken};
use crate::table::TableState;

/// Budget limits and policy flags for one pop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PopPolicy {
    pub(crate) locality: Locality,
    /// Leave remote-capable actions for remote slots.
    pub(crate) force_remote: bool,
    pub(crate) max_local_weight: f64,
    pub(crate) max_cache_queries: u32,
    /// Whether cache-queued entries may be claimed (never for reuse).
    pub(crate) allow_cache: bool,
}

/// A successful claim.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub(crate) token: ExecutionToken,
    pub(crate) prev_status: ActionStatus,
    pub(crate) payload: Arc<ActionPayload>,
    pub(crate) can_detour: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum Popped {
    /// Marked skipped because a dependency failed; needs reporting.
    Skipped {
        id: ActionId,
        payload: Option<Arc<ActionPayload>>,
    },
    Claimed(Claim),
}

enum Readiness {
    Ready,
    Blocked,
    Broken,
}

fn readiness(state: &TableState, id: ActionId) -> Result<Readiness, GraphError> {
    let registered = state.entries.len();
    let mut ready = true;
    for &dependency in &state.entry(id).dependencies {
        let Some(dep) = state.entries.get(dependency.0) else {
            return Err(GraphError::UnknownDependency {
                action: id,
                dependency,
                registered,
            });
        };
        if dep.status.is_broken() {
            return Ok(Readiness::Broken);
        }
        if dep.status != ActionStatus::Success {
            ready = false;
        }
    }
    Ok(if ready { Readiness::Ready } else { Readiness::Blocked })
}

fn claim_kind(locality: Locality, status: ActionStatus) -> ClaimKind {
    match (locality, status) {
        (Locality::Remote, _) => ClaimKind::RemoteRun,
        (Locality::Local, ActionStatus::QueuedForCache) => ClaimKind::CacheQuery,
        (Locality::Local, _) => ClaimKind::LocalRun,
    }
}

fn matches_policy(state: &TableState, index: usize, policy: &PopPolicy) -> bool {
    let entry = &state.entries[index];
    match (policy.locality, entry.status) {
        (Locality::Local, ActionStatus::QueuedForCache) => {
            policy.allow_cache && state.cache_queries < policy.max_cache_queries
        }
        (Locality::Local, ActionStatus::QueuedForRun) => {
            !(policy.force_remote && entry.can_execute_remotely)
                && state.local_weight_fits(entry.weight, policy.max_local_weight)
        }
        (Locality::Remote, ActionStatus::QueuedForRun) => entry.can_execute_remotely,
        _ => false,
    }
}

/// Select and claim one action, or report that none is runnable now.
///
/// `Ok(None)` does not mean the table is drained.
pub(crate) fn pop(state: &mut TableState, policy: &PopPolicy) -> Result<Option<Popped>, GraphError> {
    let mut terminal_prefix = true;
    let mut index = state.cursor;
    while index < state.entries.len() {
        let status = state.entries[index].status;
        if status.is_terminal() {
            if terminal_prefix {
                state.cursor = index + 1;
            }
            index += 1;
            continue;
        }
        terminal_prefix = false;

        if !matches_policy(state, index, policy) {
            index += 1;
            continue;
        }

        let id = ActionId(index);
        match readiness(state, id)? {
            Readiness::Blocked => {
                index += 1;
                continue;
            }
            Readiness::Broken => {
                let payload = state.set_terminal(id, ActionStatus::Skipped);
                return Ok(Some(Popped::Skipped { id, payload }));
            }
            Readiness::Ready => {}
        }

        let kind = claim_kind(policy.locality, status);
        let prev_status = state
            .transition_to_running(id)
            .expect("queued entry refused the running transition");
        let entry = state.entry(id);
        let weight = entry.weight;
        let can_detour = entry.can_detour;
        let generation = entry.generation;
        let payload = entry
            .payload
            .clone()
            .expect("running entry without payload");
        state.debit(kind, weight);

        return Ok(Some(Popped::Claimed(Claim {
            token: ExecutionToken {
                id,
                generation,
                kind,
                weight,
            },
            prev_status,
            payload,
            can_detour,
        })));
    }
    Ok(None)
}
