use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported for actions skipped because a dependency failed.
pub const CANCEL_EXIT_CODE: u32 = 0xFFFF_FFFE;

/// Exit code recorded when a [`Completion`](crate::Completion) is dropped
/// without reporting an exit.
pub const ABANDONED_EXIT_CODE: u32 = 0xFFFF_FFFD;

/// Stable index of an action in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub(crate) usize);

impl ActionId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of an action.
///
/// `Queued* -> Running -> {Success, Failed}` for executed actions,
/// `Queued* -> Skipped` when a dependency failed or was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    QueuedForCache,
    QueuedForRun,
    Running,
    Success,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn is_queued(self) -> bool {
        matches!(self, ActionStatus::QueuedForCache | ActionStatus::QueuedForRun)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Success | ActionStatus::Failed | ActionStatus::Skipped
        )
    }

    /// A finished dependency in this state poisons its dependents.
    pub fn is_broken(self) -> bool {
        matches!(self, ActionStatus::Failed | ActionStatus::Skipped)
    }
}

/// Where an action is being considered for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    Local,
    Remote,
}

/// Everything needed to actually launch an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub application: String,
    pub arguments: String,
    pub working_dir: String,
    pub description: String,
    /// Opaque blob handed to remote agents so they can prefetch inputs.
    #[serde(default)]
    pub known_inputs: Vec<u8>,
}

impl ActionPayload {
    pub fn new(application: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            arguments: arguments.into(),
            ..Self::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn known_inputs(mut self, blob: Vec<u8>) -> Self {
        self.known_inputs = blob;
        self
    }

    /// Description if set, otherwise the application.
    pub fn display_name(&self) -> &str {
        if self.description.is_empty() {
            &self.application
        } else {
            &self.description
        }
    }
}

/// Producer-facing enqueue request.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub payload: ActionPayload,
    pub dependencies: Vec<ActionId>,
    pub can_detour: bool,
    pub can_execute_remotely: bool,
    pub weight: f64,
}

impl EnqueueRequest {
    /// Detourable, remote-capable, weight 1.0, no dependencies.
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            payload,
            dependencies: Vec::new(),
            can_detour: true,
            can_execute_remotely: true,
            weight: 1.0,
        }
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = ActionId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn can_detour(mut self, value: bool) -> Self {
        self.can_detour = value;
        self
    }

    pub fn can_execute_remotely(mut self, value: bool) -> Self {
        self.can_execute_remotely = value;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// How a finished action was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionType {
    /// Local, not detoured.
    Native,
    /// Local, detoured.
    Detoured,
    Remote,
    FromCache,
    Skipped,
}

/// Record handed to the process-finished observer.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedProcess {
    pub id: ActionId,
    pub application: String,
    pub arguments: String,
    pub description: String,
    pub exit_code: u32,
    pub status: ActionStatus,
    pub execution: ExecutionType,
    /// Time spent probing the cache, when a probe happened.
    pub cache_query_time: Option<Duration>,
    pub finished_at: DateTime<Utc>,
}

impl FinishedProcess {
    pub fn is_failure(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}
