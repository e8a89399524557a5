use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use tracing::{debug, error, info, warn};

use crate::action::ActionStatus;
use crate::error::SchedulerError;

use super::{Scheduler, Shared};

impl Scheduler {
    /// Spawn the scheduling loop thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.shared.accepting.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("kiln-scheduler".to_string())
            .spawn(move || shared.run_loop())
            .map_err(|e| {
                self.shared.accepting.store(false, Ordering::Release);
                SchedulerError::Spawn(e.to_string())
            })?;
        *thread = Some(handle);

        let settings = &self.shared.config.scheduler;
        info!(
            max_local_processors = self.max_local_processors(),
            process_reuse = settings.enable_process_reuse,
            remote = self.shared.remote.is_some(),
            cache = self.shared.cache.is_some(),
            "Scheduler started"
        );
        self.shared.wakeup.set();
        Ok(())
    }

    /// Stop dispatching, wait for every running action to exit, then clear
    /// the table. Blocks without a timeout. A scheduler that was never
    /// started only has its queued entries discarded.
    pub fn stop(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let shared = &self.shared;

        let Some(handle) = handle else {
            if !shared.table.is_empty() {
                shared.discard_table();
            }
            return;
        };

        info!("Stopping scheduler");
        shared.accepting.store(false, Ordering::Release);
        shared.wakeup.set();
        if handle.join().is_err() {
            error!("scheduling thread panicked");
        }

        shared
            .progress
            .wait_until(None, || shared.table.read().running == 0);
        shared.discard_table();
        info!(finished = shared.counters.snapshot().finished, "Scheduler stopped");
    }
}

impl Shared {
    /// Clear the table once nothing is running. Queued entries are dropped.
    fn discard_table(&self) {
        let mut state = self.table.write();
        assert!(
            state.entries.iter().all(|e| e.status != ActionStatus::Running),
            "scheduler stopped with running actions"
        );
        let never_dispatched = state.queued_count();
        if never_dispatched > 0 {
            warn!(count = never_dispatched, "Stopping with actions that were never dispatched");
            self.counters.discard_queued(never_dispatched as u64);
        }
        state.clear();
        drop(state);
        self.progress.notify();
    }

    fn run_loop(self: Arc<Self>) {
        debug!("scheduling loop running");
        loop {
            self.wakeup.wait();
            if !self.accepting.load(Ordering::Acquire) {
                break;
            }
            self.run_queued();
        }
        debug!("scheduling loop exited");
    }
}
