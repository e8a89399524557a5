use std::time::Duration;

use tracing::{debug, warn};

use crate::action::{ActionStatus, ExecutionType, Locality};
use crate::executor::{CacheResult, ClaimKind, ExecutionToken};
use crate::resolver::Claim;

use super::dispatch::finished_record;
use super::Shared;

impl Shared {
    /// Record the exit of a dispatched run and release what its claim held.
    ///
    /// Stale tokens (the action was returned or already finished) are ignored.
    pub(crate) fn complete(&self, token: &ExecutionToken, exit_code: u32, execution: ExecutionType) {
        if self.record_exit(token, exit_code, execution) {
            self.after_change();
        }
    }

    /// Exit bookkeeping and observer notification without waking the loop.
    pub(super) fn record_exit(&self, token: &ExecutionToken, exit_code: u32, execution: ExecutionType) -> bool {
        let record = {
            let mut state = self.table.write();
            if !state.is_current(token) {
                debug!(id = %token.id, exit_code, "ignoring stale completion");
                return false;
            }
            state.release(token);
            self.counters.deactivated(token.kind.locality());

            let status = if exit_code == 0 {
                ActionStatus::Success
            } else {
                ActionStatus::Failed
            };
            let cache_query_time = state.entry(token.id).cache_query_time;
            let payload = state.set_terminal(token.id, status);
            self.counters.finished();
            finished_record(token.id, payload.as_deref(), exit_code, status, execution, cache_query_time)
        };

        if record.is_failure() {
            debug!(id = %token.id, exit_code, "action failed");
        } else {
            debug!(id = %token.id, "action succeeded");
        }
        self.notify_finished(&record);
        true
    }

    /// A cache probe returned. Hits finish the action, misses queue it to run.
    pub(super) fn cache_finished(&self, token: &ExecutionToken, result: CacheResult, elapsed: Duration) {
        let record = {
            let mut state = self.table.write();
            if !state.is_current(token) {
                return;
            }
            state.release(token);
            self.counters.deactivated(Locality::Local);
            state.entries[token.id.0].cache_query_time = Some(elapsed);

            if result.hit {
                let payload = state.set_terminal(token.id, ActionStatus::Success);
                self.counters.finished();
                Some(finished_record(
                    token.id,
                    payload.as_deref(),
                    0,
                    ActionStatus::Success,
                    ExecutionType::FromCache,
                    Some(elapsed),
                ))
            } else {
                state.requeue(token.id, ActionStatus::QueuedForRun);
                self.counters.queued();
                None
            }
        };

        match record {
            Some(record) => {
                debug!(id = %token.id, elapsed_ms = elapsed.as_millis() as u64, "cache hit");
                for line in &result.log_lines {
                    debug!(id = %token.id, "{}", line);
                }
                self.notify_finished(&record);
            }
            None => debug!(id = %token.id, elapsed_ms = elapsed.as_millis() as u64, "cache miss"),
        }
        self.after_change();
    }

    /// The remote agent took its slot back; queue the action again.
    pub(crate) fn process_returned(&self, token: &ExecutionToken) {
        {
            let mut state = self.table.write();
            if token.kind != ClaimKind::RemoteRun || !state.is_current(token) {
                debug!(id = %token.id, "ignoring return of a process that is not running remotely");
                return;
            }
            state.release(token);
            state.requeue(token.id, ActionStatus::QueuedForRun);
            self.counters.deactivated(Locality::Remote);
            self.counters.queued();
        }
        warn!(id = %token.id, "remote process returned, requeued");
        self.after_change();
    }

    /// Undo a claim whose job never started.
    pub(super) fn revert_claim(&self, claim: &Claim) {
        {
            let mut state = self.table.write();
            state.release(&claim.token);
            state.requeue(claim.token.id, claim.prev_status);
            self.counters.deactivated(claim.token.kind.locality());
            self.counters.queued();
        }
        self.after_change();
    }
}
