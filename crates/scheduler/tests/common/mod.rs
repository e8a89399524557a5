#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use kiln_core::KilnConfig;
use kiln_scheduler::{
    ActionId, ActionPayload, CacheClient, CacheResult, Completion, EnqueueRequest, FinishedProcess,
    Job, LocalExecutor, RemoteExecutor, ReusableWorker, RootPaths, Scheduler,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn request(name: &str) -> EnqueueRequest {
    EnqueueRequest::new(ActionPayload::new("clang++", format!("-c {}.cpp", name)).description(name))
}

pub fn config(max_local: u32) -> KilnConfig {
    let mut config = KilnConfig::default();
    config.scheduler.max_local_processors = max_local;
    config
}

/// Holds every dispatched job until the test reports its exit.
#[derive(Default)]
pub struct ManualExecutor {
    pending: Mutex<Vec<(Job, Completion)>>,
    dispatched: Mutex<Vec<ActionId>>,
    cond: Condvar,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, job: Job, completion: Completion) {
        self.dispatched.lock().unwrap().push(job.id);
        self.pending.lock().unwrap().push((job, completion));
        self.cond.notify_all();
    }

    /// Block until at least `count` jobs are pending; returns their ids.
    pub fn wait_for(&self, count: usize) -> Vec<ActionId> {
        let deadline = Instant::now() + TIMEOUT;
        let mut pending = self.pending.lock().unwrap();
        while pending.len() < count {
            let now = Instant::now();
            assert!(now < deadline, "timed out waiting for {} pending jobs, have {}", count, pending.len());
            pending = self.cond.wait_timeout(pending, deadline - now).unwrap().0;
        }
        pending.iter().map(|(job, _)| job.id).collect()
    }

    pub fn pending_ids(&self) -> Vec<ActionId> {
        self.pending.lock().unwrap().iter().map(|(job, _)| job.id).collect()
    }

    /// Every id ever dispatched, in dispatch order.
    pub fn dispatched(&self) -> Vec<ActionId> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn take(&self, id: ActionId) -> (Job, Completion) {
        let mut pending = self.pending.lock().unwrap();
        let index = pending
            .iter()
            .position(|(job, _)| job.id == id)
            .unwrap_or_else(|| panic!("action {} is not pending", id));
        pending.remove(index)
    }

    pub fn finish(&self, id: ActionId, exit_code: u32) {
        let (_, completion) = self.take(id);
        completion.exited(exit_code);
    }
}

impl LocalExecutor for ManualExecutor {
    fn run_local(&self, job: Job, completion: Completion) {
        self.push(job, completion);
    }
}

impl RemoteExecutor for ManualExecutor {
    fn run_remote(&self, job: Job, completion: Completion) {
        self.push(job, completion);
    }
}

/// Exits every job on its own thread after a short delay.
///
/// Exit codes are looked up by description (default 0). Tracks the weight
/// held by jobs it is running and per-action dispatch counts.
#[derive(Clone, Default)]
pub struct AutoExecutor {
    inner: Arc<AutoState>,
}

#[derive(Default)]
struct AutoState {
    exit_codes: HashMap<String, u32>,
    delay: Duration,
    held: Mutex<f64>,
    max_held: Mutex<f64>,
    runs: Mutex<HashMap<ActionId, usize>>,
    completed: AtomicUsize,
}

impl AutoExecutor {
    pub fn new(delay: Duration) -> Self {
        Self::with_exit_codes(delay, &[])
    }

    pub fn with_exit_codes(delay: Duration, codes: &[(&str, u32)]) -> Self {
        Self {
            inner: Arc::new(AutoState {
                delay,
                exit_codes: codes.iter().map(|(d, c)| (d.to_string(), *c)).collect(),
                ..AutoState::default()
            }),
        }
    }

    pub fn max_held(&self) -> f64 {
        *self.inner.max_held.lock().unwrap()
    }

    pub fn runs(&self) -> HashMap<ActionId, usize> {
        self.inner.runs.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }
}

impl LocalExecutor for AutoExecutor {
    fn run_local(&self, job: Job, completion: Completion) {
        let state = Arc::clone(&self.inner);
        *state.runs.lock().unwrap().entry(job.id).or_insert(0) += 1;
        {
            let mut held = state.held.lock().unwrap();
            *held += job.weight;
            let mut max = state.max_held.lock().unwrap();
            if *held > *max {
                *max = *held;
            }
        }
        let exit_code = state.exit_codes.get(&job.payload.description).copied().unwrap_or(0);
        std::thread::spawn(move || {
            std::thread::sleep(state.delay);
            *state.held.lock().unwrap() -= job.weight;
            state.completed.fetch_add(1, Ordering::SeqCst);
            completion.exited(exit_code);
        });
    }
}

/// Cache that answers from a fixed set of hit descriptions.
#[derive(Default)]
pub struct ScriptedCache {
    hits: Vec<String>,
    fetches: Mutex<Vec<(String, RootPaths)>>,
}

impl ScriptedCache {
    pub fn hitting(descriptions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hits: descriptions.iter().map(|d| d.to_string()).collect(),
            fetches: Mutex::new(Vec::new()),
        })
    }

    pub fn fetches(&self) -> Vec<(String, RootPaths)> {
        self.fetches.lock().unwrap().clone()
    }
}

impl CacheClient for ScriptedCache {
    fn fetch_from_cache(&self, roots: &RootPaths, payload: &ActionPayload) -> CacheResult {
        self.fetches
            .lock()
            .unwrap()
            .push((payload.description.clone(), roots.clone()));
        if self.hits.contains(&payload.description) {
            CacheResult::hit(vec![format!("cached {}", payload.description)])
        } else {
            CacheResult::miss()
        }
    }
}

/// Worker that records its handoffs and can be told to refuse them.
pub struct RecordingWorker {
    accept: bool,
    pub events: Mutex<Vec<String>>,
}

impl RecordingWorker {
    pub fn accepting() -> Self {
        Self { accept: true, events: Mutex::new(Vec::new()) }
    }

    pub fn refusing() -> Self {
        Self { accept: false, events: Mutex::new(Vec::new()) }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ReusableWorker for RecordingWorker {
    fn assign_next_job(&self, job: &Job) -> bool {
        self.events
            .lock()
            .unwrap()
            .push(format!("assign {}", job.payload.description));
        self.accept
    }
}

/// Collect every finished record through the observer hook.
pub fn record_finished(scheduler: &Scheduler) -> Arc<Mutex<Vec<FinishedProcess>>> {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    scheduler.set_process_finished_callback(move |record| sink.lock().unwrap().push(record.clone()));
    records
}

pub fn wait_idle(scheduler: &Scheduler) {
    assert!(scheduler.wait_idle(Some(TIMEOUT)), "scheduler did not go idle");
}

/// Let the loop thread drain any wakeups still pending.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}
