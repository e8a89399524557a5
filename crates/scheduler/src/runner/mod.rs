//! Scheduler runner -- owns the process table and drives dispatch.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, builder, enqueue and accessor methods
//! - `execution`: scheduling loop thread, start and stop
//! - `dispatch`: pop-and-claim wrapper, job handoff and cache probes
//! - `completion`: exit, cache result and process-returned bookkeeping
//! - `reuse`: handing a warm worker its next action

mod completion;
mod core;
mod dispatch;
mod execution;
mod reuse;
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::{Arc, Mutex, RwLock};

use kiln_core::KilnConfig;

use crate::action::FinishedProcess;
use crate::error::GraphError;
use crate::executor::{CacheClient, LocalExecutor, RemoteExecutor, RootPaths};
use crate::signal::{Progress, Signal};
use crate::stats::Counters;
use crate::table::ProcessTable;

pub use self::core::{Scheduler, SchedulerBuilder, SchedulerHandle};

/// Observer invoked once per action that reached a terminal state.
pub type FinishedCallback = Arc<dyn Fn(&FinishedProcess) + Send + Sync>;

/// State shared by the scheduler, its loop thread, cache workers and every
/// outstanding [`Completion`](crate::Completion).
pub(crate) struct Shared {
    pub(super) table: ProcessTable,
    pub(super) counters: Counters,
    /// Re-arms the scheduling loop.
    pub(super) wakeup: Signal,
    /// Broadcast on every status change, for `stop` and `wait_idle`.
    pub(super) progress: Progress,
    pub(super) local: Box<dyn LocalExecutor>,
    pub(super) remote: Option<Box<dyn RemoteExecutor>>,
    pub(super) cache: Option<Box<dyn CacheClient>>,
    pub(super) cache_pool: rayon::ThreadPool,
    pub(super) config: KilnConfig,
    pub(super) max_local_processors: AtomicU32,
    /// True between `start` and `stop`.
    pub(super) accepting: AtomicBool,
    pub(super) fatal: Mutex<Option<GraphError>>,
    pub(super) on_finished: RwLock<Option<FinishedCallback>>,
    pub(super) roots: RwLock<Vec<RootPaths>>,
}
