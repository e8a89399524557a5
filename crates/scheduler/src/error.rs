use thiserror::Error;

use kiln_core::KilnError;

use crate::action::ActionId;

/// Dependency-graph configuration errors. Fatal to scheduling, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("action {action} depends on {dependency} but only {registered} actions are registered")]
    UnknownDependency {
        action: ActionId,
        dependency: ActionId,
        registered: usize,
    },

    #[error("circular dependency between actions {0:?}")]
    CircularDependency(Vec<ActionId>),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("invalid process list: {0}")]
    InvalidProcessList(String),

    #[error("process list I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process list parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to build cache worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn scheduling thread: {0}")]
    Spawn(String),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] KilnError),
}
