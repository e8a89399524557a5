use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::{ExecutionType, Locality};
use crate::executor::{Completion, ExecutionToken, ReusableWorker, ReuseOutcome};

use super::dispatch::local_execution;
use super::Shared;

impl Shared {
    /// Finish the exiting action, then offer its worker the next one of the
    /// same locality. Cache-queued actions are never handed to a worker.
    pub(crate) fn exit_and_reuse(
        self: &Arc<Self>,
        token: &ExecutionToken,
        exit_code: u32,
        execution: ExecutionType,
        worker: &dyn ReusableWorker,
    ) -> ReuseOutcome {
        if !self.record_exit(token, exit_code, execution) {
            return ReuseOutcome::Idle;
        }
        let outcome = self.reuse_worker(token, worker);
        self.after_change();
        outcome
    }

    // Must run before the loop is woken for the exit, or the loop takes the
    // freed slot first.
    fn reuse_worker(self: &Arc<Self>, token: &ExecutionToken, worker: &dyn ReusableWorker) -> ReuseOutcome {
        if !self.config.scheduler.enable_process_reuse {
            return ReuseOutcome::Idle;
        }
        let locality = token.kind.locality();
        let Some(claim) = self.pop_next(locality, false) else {
            return ReuseOutcome::Idle;
        };

        let job = self.job(&claim, locality);
        let next_execution = match locality {
            Locality::Local => local_execution(&job),
            Locality::Remote => ExecutionType::Remote,
        };
        if worker.assign_next_job(&job) {
            debug!(previous = %token.id, next = %claim.token.id, "worker reused");
            ReuseOutcome::Assigned(Completion::new(Arc::clone(self), claim.token, next_execution))
        } else {
            warn!(id = %claim.token.id, "handing job to reused worker failed, requeueing");
            self.revert_claim(&claim);
            ReuseOutcome::Idle
        }
    }
}
