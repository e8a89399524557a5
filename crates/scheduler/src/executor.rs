//! Collaborator interfaces and the completion handle they report through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::action::{ABANDONED_EXIT_CODE, ActionId, ActionPayload, ExecutionType, Locality};
use crate::runner::Shared;

/// Which budget a claim debited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    LocalRun,
    CacheQuery,
    RemoteRun,
}

impl ClaimKind {
    /// Cache probes occupy a local slot.
    pub fn locality(self) -> Locality {
        match self {
            ClaimKind::LocalRun | ClaimKind::CacheQuery => Locality::Local,
            ClaimKind::RemoteRun => Locality::Remote,
        }
    }
}

/// Identifies one claim of one action. Completions quoting an older
/// generation than the entry's are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionToken {
    pub id: ActionId,
    pub generation: u32,
    pub kind: ClaimKind,
    pub weight: f64,
}

/// A unit of work handed to an execution collaborator.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: ActionId,
    pub payload: Arc<ActionPayload>,
    /// False when the process must run without detouring.
    pub can_detour: bool,
    pub weight: f64,
}

/// Reporting handle for one dispatched job.
///
/// Consumed by [`exited`](Completion::exited) or
/// [`exited_reusable`](Completion::exited_reusable). Dropping it unreported
/// records the action as failed with [`ABANDONED_EXIT_CODE`].
#[must_use = "a dropped completion marks its action as failed"]
pub struct Completion {
    shared: Option<Arc<Shared>>,
    token: ExecutionToken,
    execution: ExecutionType,
}

impl Completion {
    pub(crate) fn new(shared: Arc<Shared>, token: ExecutionToken, execution: ExecutionType) -> Self {
        Self {
            shared: Some(shared),
            token,
            execution,
        }
    }

    pub fn id(&self) -> ActionId {
        self.token.id
    }

    pub fn token(&self) -> ExecutionToken {
        self.token
    }

    pub fn execution(&self) -> ExecutionType {
        self.execution
    }

    /// Report the process exit. Zero is success.
    pub fn exited(mut self, exit_code: u32) {
        if let Some(shared) = self.shared.take() {
            shared.complete(&self.token, exit_code, self.execution);
        }
    }

    /// The remote agent gave the process back before it exited.
    ///
    /// The action is queued again and any later exit reported through this
    /// handle is ignored.
    pub fn notify_returned(&self) {
        if let Some(shared) = &self.shared {
            shared.process_returned(&self.token);
        }
    }

    /// Report the exit, then try to hand `worker` the next action.
    pub fn exited_reusable(mut self, exit_code: u32, worker: &dyn ReusableWorker) -> ReuseOutcome {
        match self.shared.take() {
            Some(shared) => shared.exit_and_reuse(&self.token, exit_code, self.execution, worker),
            None => ReuseOutcome::Idle,
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            warn!(id = %self.token.id, "completion dropped without an exit report");
            shared.complete(&self.token, ABANDONED_EXIT_CODE, self.execution);
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("token", &self.token)
            .field("execution", &self.execution)
            .field("reported", &self.shared.is_none())
            .finish()
    }
}

/// Result of [`Completion::exited_reusable`].
#[derive(Debug)]
pub enum ReuseOutcome {
    /// The worker now runs the next action; report its exit through this.
    Assigned(Completion),
    /// Nothing to hand over. Tear the process down.
    Idle,
}

/// Launches actions on this machine.
pub trait LocalExecutor: Send + Sync {
    /// Must not block. `completion` is reported exactly once, from any thread.
    fn run_local(&self, job: Job, completion: Completion);
}

/// Runs actions on remote agents.
pub trait RemoteExecutor: Send + Sync {
    fn run_remote(&self, job: Job, completion: Completion);
}

impl<T: LocalExecutor + ?Sized> LocalExecutor for Arc<T> {
    fn run_local(&self, job: Job, completion: Completion) {
        (**self).run_local(job, completion)
    }
}

impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    fn run_remote(&self, job: Job, completion: Completion) {
        (**self).run_remote(job, completion)
    }
}

/// A live worker process that can take another job without relaunching.
pub trait ReusableWorker {
    /// Returns false if the job could not be handed over.
    fn assign_next_job(&self, job: &Job) -> bool;
}

/// Outcome of a cache fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheResult {
    pub hit: bool,
    /// Output the cached process originally produced.
    pub log_lines: Vec<String>,
}

impl CacheResult {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(log_lines: Vec<String>) -> Self {
        Self { hit: true, log_lines }
    }
}

/// Content-addressed cache collaborator.
pub trait CacheClient: Send + Sync {
    /// Called from a cache worker thread; may block on I/O.
    fn fetch_from_cache(&self, roots: &RootPaths, payload: &ActionPayload) -> CacheResult;
}

impl<T: CacheClient + ?Sized> CacheClient for Arc<T> {
    fn fetch_from_cache(&self, roots: &RootPaths, payload: &ActionPayload) -> CacheResult {
        (**self).fetch_from_cache(roots, payload)
    }
}

/// Directory roots that cache keys are normalized against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootPaths {
    roots: Vec<PathBuf>,
    system: bool,
}

impl RootPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// The platform's system directories.
    pub fn system() -> Self {
        Self {
            roots: Vec::new(),
            system: true,
        }
    }

    pub fn register_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn includes_system(&self) -> bool {
        self.system
    }

    /// Longest registered root containing `path`.
    pub fn root_of(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}
