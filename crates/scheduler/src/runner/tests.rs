use std::sync::{Arc, Mutex};

use kiln_core::KilnConfig;

use crate::action::{ActionPayload, ActionStatus, EnqueueRequest, ExecutionType, Locality};
use crate::error::SchedulerError;
use crate::executor::{CacheClient, CacheResult, Completion, Job, LocalExecutor, RootPaths};
use crate::ingest::{ProcessEntry, ProcessList};
use crate::runner::Scheduler;

/// Keeps completions so tests can drive them by hand.
#[derive(Default)]
struct Holding {
    jobs: Mutex<Vec<(Job, Completion)>>,
}

impl LocalExecutor for Holding {
    fn run_local(&self, job: Job, completion: Completion) {
        self.jobs.lock().unwrap().push((job, completion));
    }
}

struct NeverHits;

impl CacheClient for NeverHits {
    fn fetch_from_cache(&self, _roots: &RootPaths, _payload: &ActionPayload) -> CacheResult {
        CacheResult::miss()
    }
}

fn scheduler() -> Scheduler {
    Scheduler::builder(Holding::default()).build().unwrap()
}

#[test]
fn build_rejects_invalid_config() {
    let mut config = KilnConfig::default();
    config.scheduler.max_cache_queries = 0;
    let result = Scheduler::builder(Holding::default()).config(config).build();
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}

#[test]
fn enqueue_sanitizes_weight_and_couples_remote_to_detour() {
    let scheduler = scheduler();
    let bad = scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")).weight(f64::NAN));
    let native = scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")).can_detour(false));

    let state = scheduler.shared.table.read();
    assert_eq!(state.entry(bad).weight, 1.0);
    assert!(state.entry(bad).can_execute_remotely);
    assert!(!state.entry(native).can_execute_remotely);
    assert_eq!(scheduler.stats().queued, 2);
}

#[test]
fn cache_queue_requires_a_cache_client() {
    let without = scheduler();
    let id = without.enqueue(EnqueueRequest::new(ActionPayload::new("cl.exe", "/c a.cpp")));
    assert_eq!(without.status(id), Some(ActionStatus::QueuedForRun));

    let with = Scheduler::builder(Holding::default()).cache(NeverHits).build().unwrap();
    let id = with.enqueue(EnqueueRequest::new(ActionPayload::new("cl.exe", "/c a.cpp")));
    assert_eq!(with.status(id), Some(ActionStatus::QueuedForCache));
}

#[test]
fn claim_and_exit_keep_counters_in_step() {
    let scheduler = scheduler();
    let shared = &scheduler.shared;
    shared.accepting.store(true, std::sync::atomic::Ordering::Release);
    let id = scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")));

    let claim = shared.pop_next(Locality::Local, true).expect("claimable");
    assert_eq!(claim.token.id, id);
    let stats = scheduler.stats();
    assert_eq!((stats.queued, stats.active_local), (0, 1));
    assert_eq!(scheduler.budgets().running, 1);

    shared.revert_claim(&claim);
    let stats = scheduler.stats();
    assert_eq!((stats.queued, stats.active_local), (1, 0));
    assert!(scheduler.budgets().is_released());
    assert_eq!(scheduler.status(id), Some(ActionStatus::QueuedForRun));

    let claim = shared.pop_next(Locality::Local, true).expect("claimable again");
    assert_eq!(claim.token.generation, 2);
    shared.complete(&claim.token, 0, ExecutionType::Detoured);
    assert_eq!(scheduler.stats().finished, 1);

    // A second report for the same claim is stale.
    shared.complete(&claim.token, 1, ExecutionType::Detoured);
    assert_eq!(scheduler.status(id), Some(ActionStatus::Success));
    assert_eq!(scheduler.stats().finished, 1);
    shared.accepting.store(false, std::sync::atomic::Ordering::Release);
}

#[test]
fn nothing_is_claimed_before_start() {
    let scheduler = scheduler();
    scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")));
    assert!(scheduler.shared.pop_next(Locality::Local, true).is_none());
}

#[test]
fn enqueue_list_maps_file_indices_and_roots() {
    let list = ProcessList::from_yaml(
        "cacheroots:\n  - /work\nprocesses:\n  - app: cc\n  - app: cc\n    dep: [0]\n",
    )
    .unwrap();
    let scheduler = scheduler();
    scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("prelude", "")));
    let ids = scheduler.enqueue_list(&list).unwrap();

    assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), vec![1, 2]);
    let state = scheduler.shared.table.read();
    assert_eq!(state.entry(ids[1]).dependencies, vec![ids[0]]);
    drop(state);
    assert_eq!(scheduler.shared.roots.read().unwrap().len(), 1);
}

#[test]
fn holding_executor_keeps_completions_alive() {
    let holding = Arc::new(Holding::default());
    let scheduler = Scheduler::builder(Arc::clone(&holding)).build().unwrap();
    let id = scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")));
    scheduler.start().unwrap();
    assert!(scheduler
        .shared
        .progress
        .wait_until(Some(std::time::Duration::from_secs(10)), || !holding.jobs.lock().unwrap().is_empty()));

    let (job, completion) = holding.jobs.lock().unwrap().pop().unwrap();
    assert_eq!(job.id, id);
    assert_eq!(completion.execution(), ExecutionType::Detoured);
    completion.exited(0);
    scheduler.stop();
}

#[test]
fn enqueue_list_rejects_hand_built_list_with_bad_dependency() {
    let entry = |dep: Vec<usize>| ProcessEntry {
        app: "cc".into(),
        arg: String::new(),
        dir: String::new(),
        desc: String::new(),
        detour: true,
        remote: true,
        weight: 1.0,
        dep,
    };
    let scheduler = scheduler();

    let out_of_range = ProcessList { processes: vec![entry(vec![3])], ..ProcessList::default() };
    let result = scheduler.enqueue_list(&out_of_range);
    assert!(matches!(result, Err(SchedulerError::InvalidProcessList(_))));

    let forward = ProcessList {
        processes: vec![entry(vec![1]), entry(Vec::new())],
        ..ProcessList::default()
    };
    assert!(scheduler.enqueue_list(&forward).is_err());

    assert!(scheduler.shared.table.is_empty(), "nothing is enqueued from an invalid list");
    assert_eq!(scheduler.stats().queued, 0);
}

#[test]
fn stop_without_start_clears_queued_entries() {
    let scheduler = scheduler();
    scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")));
    scheduler.enqueue(EnqueueRequest::new(ActionPayload::new("ld", "")));
    assert_eq!(scheduler.stats().queued, 2);

    scheduler.stop();
    assert!(scheduler.shared.table.is_empty());
    assert_eq!(scheduler.stats().queued, 0);
    assert!(scheduler.statuses().is_empty());
}
