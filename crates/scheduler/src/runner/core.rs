use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use kiln_core::KilnConfig;
use tracing::{debug, info, trace, warn};

use crate::action::{ActionId, ActionStatus, EnqueueRequest, FinishedProcess, Locality};
use crate::error::{GraphError, SchedulerError};
use crate::executor::{CacheClient, LocalExecutor, RemoteExecutor, RootPaths};
use crate::graph::topological_order;
use crate::ingest::ProcessList;
use crate::rules;
use crate::signal::{Progress, Signal};
use crate::stats::{BudgetSnapshot, Counters, SchedulerStats};
use crate::table::{NewEntry, ProcessTable};

use super::{FinishedCallback, Shared};

/// The build-process scheduler.
///
/// Actions are enqueued with [`enqueue`](Scheduler::enqueue) from any thread.
/// After [`start`](Scheduler::start) a dedicated thread dispatches runnable
/// actions to the local executor and the cache; remote slots pull work through
/// a [`SchedulerHandle`]. Dropping a started scheduler stops it.
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    pub(super) thread: Mutex<Option<JoinHandle<()>>>,
}

/// Collaborators and configuration for a [`Scheduler`].
pub struct SchedulerBuilder {
    local: Box<dyn LocalExecutor>,
    remote: Option<Box<dyn RemoteExecutor>>,
    cache: Option<Box<dyn CacheClient>>,
    config: KilnConfig,
}

impl SchedulerBuilder {
    pub fn remote(mut self, remote: impl RemoteExecutor + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    pub fn cache(mut self, cache: impl CacheClient + 'static) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    pub fn config(mut self, config: KilnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let settings = &self.config.scheduler;
        if settings.force_remote && self.remote.is_none() {
            warn!("force_remote is set without a remote executor, running everything locally");
        }

        let cache_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.cache_worker_threads)
            .thread_name(|i| format!("kiln-cache-{}", i))
            .build()?;

        let shared = Shared {
            table: ProcessTable::new(),
            counters: Counters::default(),
            wakeup: Signal::default(),
            progress: Progress::default(),
            max_local_processors: AtomicU32::new(settings.resolved_max_local_processors()),
            local: self.local,
            remote: self.remote,
            cache: self.cache,
            cache_pool,
            config: self.config,
            accepting: AtomicBool::new(false),
            fatal: Mutex::new(None),
            on_finished: RwLock::new(None),
            roots: RwLock::new(Vec::new()),
        };

        Ok(Scheduler {
            shared: Arc::new(shared),
            thread: Mutex::new(None),
        })
    }
}

impl Scheduler {
    /// Start building a scheduler around a local executor.
    pub fn builder(local: impl LocalExecutor + 'static) -> SchedulerBuilder {
        SchedulerBuilder {
            local: Box::new(local),
            remote: None,
            cache: None,
            config: KilnConfig::default(),
        }
    }

    /// Add an action. Returns its stable id.
    ///
    /// Dependencies may name ids that are not registered yet, as long as they
    /// exist by the time the action is considered for dispatch.
    pub fn enqueue(&self, request: EnqueueRequest) -> ActionId {
        let shared = &self.shared;
        let EnqueueRequest {
            payload,
            dependencies,
            mut can_detour,
            can_execute_remotely,
            mut weight,
        } = request;

        let mut can_execute_remotely = can_execute_remotely && can_detour;
        if let Some(overrides) = shared.config.process_overrides(&payload.application) {
            if let Some(remote) = overrides.can_execute_remotely {
                can_execute_remotely = remote;
            }
            if let Some(detour) = overrides.can_detour {
                can_detour = detour;
            }
        }

        if !weight.is_finite() || weight < 0.0 {
            warn!(application = %payload.application, weight, "invalid weight, using 1.0");
            weight = 1.0;
        }

        let cache_eligible = shared.cache.is_some() && rules::is_cacheable(&payload.application);
        let id = {
            let mut state = shared.table.write();
            let id = state.push(NewEntry {
                payload,
                dependencies,
                can_detour,
                can_execute_remotely,
                cache_eligible,
                weight,
            });
            shared.counters.queued();
            id
        };
        trace!(id = %id, cache_eligible, can_execute_remotely, "enqueued");

        shared.after_change();
        id
    }

    /// Enqueue every entry of `list` in file order and register its cache roots.
    ///
    /// The list is validated first; nothing is enqueued if it is invalid.
    pub fn enqueue_list(&self, list: &ProcessList) -> Result<Vec<ActionId>, SchedulerError> {
        list.validate()?;
        for roots in list.root_paths() {
            self.register_root_paths(roots);
        }
        let mut ids = Vec::with_capacity(list.len());
        for entry in &list.processes {
            let id = self.enqueue(entry.to_request(&ids));
            ids.push(id);
        }
        debug!(count = ids.len(), "enqueued process list");
        Ok(ids)
    }

    pub fn enqueue_from_file(&self, path: impl AsRef<Path>) -> Result<Vec<ActionId>, SchedulerError> {
        let list = ProcessList::from_file(path)?;
        self.enqueue_list(&list)
    }

    /// Check that every dependency exists and the graph is acyclic.
    pub fn validate_graph(&self) -> Result<(), GraphError> {
        let dependencies: Vec<Vec<ActionId>> = self
            .shared
            .table
            .read()
            .entries
            .iter()
            .map(|e| e.dependencies.clone())
            .collect();
        topological_order(&dependencies).map(|_| ())
    }

    /// The configuration error that aborted scheduling, if any.
    pub fn fatal_error(&self) -> Option<GraphError> {
        self.shared
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_process_finished_callback(&self, callback: impl Fn(&FinishedProcess) + Send + Sync + 'static) {
        let callback: FinishedCallback = Arc::new(callback);
        *self
            .shared
            .on_finished
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Change the local weight budget. Zero pauses local dispatch.
    pub fn set_max_local_processors(&self, processors: u32) {
        self.shared
            .max_local_processors
            .store(processors, Ordering::Release);
        info!(processors, "local processor budget changed");
        self.shared.wakeup.set();
    }

    pub fn max_local_processors(&self) -> u32 {
        self.shared.max_local_processors.load(Ordering::Acquire)
    }

    /// Cache roots handed to cache fetches. The first registered set is used.
    pub fn register_root_paths(&self, roots: RootPaths) {
        self.shared
            .roots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(roots);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    pub fn budgets(&self) -> BudgetSnapshot {
        self.shared.table.read().budgets()
    }

    pub fn status(&self, id: ActionId) -> Option<ActionStatus> {
        self.shared.table.status(id)
    }

    pub fn statuses(&self) -> Vec<ActionStatus> {
        self.shared.table.statuses()
    }

    /// Queued remote-capable runs plus actions running remotely.
    pub fn remote_capable_count(&self) -> usize {
        let queued = {
            let state = self.shared.table.read();
            state.entries[state.cursor.min(state.entries.len())..]
                .iter()
                .filter(|e| e.status == ActionStatus::QueuedForRun && e.can_execute_remotely)
                .count()
        };
        queued + self.shared.counters.active_remote() as usize
    }

    /// Block until every enqueued action is terminal and nothing is running.
    ///
    /// Returns false on timeout or when scheduling was aborted.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let shared = &self.shared;
        let mut idle = false;
        shared.progress.wait_until(timeout, || {
            let state = shared.table.read();
            idle = state.running == 0 && state.all_terminal();
            drop(state);
            idle || shared.is_aborted()
        });
        idle
    }

    /// Remote-facing handle that can outlive borrows of the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Dispatch one action to a free remote slot. See [`SchedulerHandle`].
    pub fn remote_slot_available(&self) -> bool {
        self.shared.remote_slot_available()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable handle for remote slot providers.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// A remote slot opened up. Claims and dispatches at most one
    /// remote-capable action; returns whether one was dispatched.
    pub fn remote_slot_available(&self) -> bool {
        self.shared.remote_slot_available()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }
}

impl Shared {
    pub(super) fn remote_slot_available(self: &Arc<Self>) -> bool {
        if self.remote.is_none() {
            return false;
        }
        match self.pop_next(Locality::Remote, false) {
            Some(claim) => {
                self.dispatch(claim);
                true
            }
            None => false,
        }
    }
}
