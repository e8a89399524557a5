use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use crate::action::{
    ActionId, ActionPayload, ActionStatus, CANCEL_EXIT_CODE, ExecutionType, FinishedProcess, Locality,
};
use crate::error::GraphError;
use crate::executor::{CacheResult, ClaimKind, Completion, Job, RootPaths};
use crate::resolver::{self, Claim, PopPolicy, Popped};

use super::Shared;

impl Shared {
    fn policy(&self, locality: Locality, allow_cache: bool) -> PopPolicy {
        let settings = &self.config.scheduler;
        PopPolicy {
            locality,
            force_remote: settings.force_remote && self.remote.is_some(),
            max_local_weight: f64::from(self.max_local_processors.load(Ordering::Acquire)),
            max_cache_queries: settings.max_cache_queries,
            allow_cache,
        }
    }

    pub(super) fn is_aborted(&self) -> bool {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(super) fn is_halted(&self) -> bool {
        !self.accepting.load(Ordering::Acquire) || self.is_aborted()
    }

    fn abort(&self, err: GraphError) {
        error!(error = %err, "dependency graph error, scheduling aborted");
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.progress.notify();
    }

    /// Claim the next runnable action for `locality`.
    ///
    /// Actions skipped along the way are reported before this returns.
    pub(super) fn pop_next(&self, locality: Locality, allow_cache: bool) -> Option<Claim> {
        loop {
            if self.is_halted() {
                return None;
            }
            let policy = self.policy(locality, allow_cache);
            let popped = {
                let mut state = self.table.write();
                let popped = resolver::pop(&mut state, &policy);
                match &popped {
                    Ok(Some(Popped::Claimed(claim))) => {
                        self.counters.dequeued();
                        self.counters.activated(claim.token.kind.locality());
                    }
                    Ok(Some(Popped::Skipped { .. })) => {
                        self.counters.dequeued();
                        self.counters.finished();
                    }
                    Ok(None) | Err(_) => {}
                }
                popped
            };

            match popped {
                Ok(Some(Popped::Claimed(claim))) => {
                    debug!(
                        id = %claim.token.id,
                        kind = ?claim.token.kind,
                        weight = claim.token.weight,
                        "claimed"
                    );
                    return Some(claim);
                }
                Ok(Some(Popped::Skipped { id, payload })) => {
                    debug!(id = %id, "dependency failed, skipping");
                    let record = finished_record(
                        id,
                        payload.as_deref(),
                        CANCEL_EXIT_CODE,
                        ActionStatus::Skipped,
                        ExecutionType::Skipped,
                        None,
                    );
                    self.notify_finished(&record);
                    self.after_change();
                }
                Ok(None) => return None,
                Err(err) => {
                    self.abort(err);
                    return None;
                }
            }
        }
    }

    /// Drain local pops until nothing is runnable.
    pub(super) fn run_queued(self: &Arc<Self>) {
        while let Some(claim) = self.pop_next(Locality::Local, true) {
            self.dispatch(claim);
        }
    }

    pub(super) fn job(&self, claim: &Claim, locality: Locality) -> Job {
        let native = locality == Locality::Local && self.config.scheduler.force_native;
        Job {
            id: claim.token.id,
            payload: Arc::clone(&claim.payload),
            can_detour: claim.can_detour && !native,
            weight: claim.token.weight,
        }
    }

    /// Hand a claim to its execution path. Never blocks on execution.
    pub(super) fn dispatch(self: &Arc<Self>, claim: Claim) {
        match claim.token.kind {
            ClaimKind::CacheQuery => self.probe_cache(claim),
            ClaimKind::LocalRun => {
                let job = self.job(&claim, Locality::Local);
                let execution = local_execution(&job);
                let completion = Completion::new(Arc::clone(self), claim.token, execution);
                self.local.run_local(job, completion);
            }
            ClaimKind::RemoteRun => match &self.remote {
                Some(remote) => {
                    let job = self.job(&claim, Locality::Remote);
                    let completion = Completion::new(Arc::clone(self), claim.token, ExecutionType::Remote);
                    remote.run_remote(job, completion);
                }
                None => {
                    warn!(id = %claim.token.id, "remote claim without a remote executor");
                    self.revert_claim(&claim);
                }
            },
        }
    }

    fn probe_cache(self: &Arc<Self>, claim: Claim) {
        let shared = Arc::clone(self);
        self.cache_pool.spawn(move || {
            let roots = shared.primary_roots();
            let started = Instant::now();
            let result = match &shared.cache {
                Some(cache) => cache.fetch_from_cache(&roots, &claim.payload),
                None => CacheResult::miss(),
            };
            shared.cache_finished(&claim.token, result, started.elapsed());
        });
    }

    fn primary_roots(&self) -> RootPaths {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
            .unwrap_or_default()
    }

    pub(super) fn notify_finished(&self, record: &FinishedProcess) {
        let callback = self
            .on_finished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(record);
        }
    }

    /// Publish a status change: progress, loop wakeup and waiters.
    pub(super) fn after_change(&self) {
        let stats = self.counters.snapshot();
        trace!(total = stats.total(), finished = stats.finished, "progress");
        self.wakeup.set();
        self.progress.notify();
    }
}

pub(super) fn local_execution(job: &Job) -> ExecutionType {
    if job.can_detour {
        ExecutionType::Detoured
    } else {
        ExecutionType::Native
    }
}

pub(super) fn finished_record(
    id: ActionId,
    payload: Option<&ActionPayload>,
    exit_code: u32,
    status: ActionStatus,
    execution: ExecutionType,
    cache_query_time: Option<std::time::Duration>,
) -> FinishedProcess {
    let (application, arguments, description) = match payload {
        Some(p) => (p.application.clone(), p.arguments.clone(), p.description.clone()),
        None => Default::default(),
    };
    FinishedProcess {
        id,
        application,
        arguments,
        description,
        exit_code,
        status,
        execution,
        cache_query_time,
        finished_at: Utc::now(),
    }
}
