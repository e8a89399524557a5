//! Distributed build-process scheduler.
//!
//! Actions are enqueued into a [`ProcessTable`](table::ProcessTable) with
//! their dependencies and capabilities, and a dedicated scheduling thread
//! dispatches each one exactly once to local execution, remote execution, or
//! a cache fetch. Completions arrive asynchronously through
//! [`Completion`] handles owned by the execution collaborators.

pub mod action;
pub mod error;
pub mod executor;
pub mod graph;
pub mod ingest;
pub mod rules;
pub mod runner;
pub mod stats;
pub mod table;

mod resolver;
mod signal;

pub use action::{
    ABANDONED_EXIT_CODE, ActionId, ActionPayload, ActionStatus, CANCEL_EXIT_CODE, EnqueueRequest,
    ExecutionType, FinishedProcess, Locality,
};
pub use error::{GraphError, SchedulerError};
pub use executor::{
    CacheClient, CacheResult, ClaimKind, Completion, ExecutionToken, Job, LocalExecutor,
    RemoteExecutor, ReuseOutcome, ReusableWorker, RootPaths,
};
pub use ingest::{ProcessEntry, ProcessList};
pub use graph::topological_order;
pub use runner::{FinishedCallback, Scheduler, SchedulerBuilder, SchedulerHandle};
pub use stats::{BudgetSnapshot, SchedulerStats};
