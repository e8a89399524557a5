//! Declarative process-list files.
//!
//! ```yaml
//! environment: /usr/bin:/bin
//! cacheroots:
//!   - SystemRoots
//!   - /work/root
//! processes:
//!   - app: clang++
//!     arg: -c a.cpp -o a.o
//!     dir: /work
//!     desc: a.cpp
//!   - app: clang++
//!     arg: a.o -o a
//!     dep: [0]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{ActionId, ActionPayload, EnqueueRequest};
use crate::error::SchedulerError;
use crate::executor::RootPaths;

const SYSTEM_ROOTS_MARKER: &str = "SystemRoots";

/// A parsed process-list file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessList {
    /// PATH handed to launched processes.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub cacheroots: Vec<String>,
    #[serde(default)]
    pub processes: Vec<ProcessEntry>,
}

/// One process record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessEntry {
    pub app: String,
    #[serde(default)]
    pub arg: String,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default = "default_true")]
    pub detour: bool,
    #[serde(default = "default_true")]
    pub remote: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Indices of earlier entries in the same file.
    #[serde(default)]
    pub dep: Vec<usize>,
}

fn default_true() -> bool { true }
fn default_weight() -> f64 { 1.0 }

impl ProcessList {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, SchedulerError> {
        let list: ProcessList = serde_yaml::from_str(yaml)?;
        list.validate()?;
        debug!(processes = list.processes.len(), "parsed process list");
        Ok(list)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Reject empty applications, bad weights and non-backward dependencies.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for (index, entry) in self.processes.iter().enumerate() {
            if entry.app.trim().is_empty() {
                return Err(SchedulerError::InvalidProcessList(format!(
                    "process {} has no app",
                    index
                )));
            }
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(SchedulerError::InvalidProcessList(format!(
                    "process {} has invalid weight {}",
                    index, entry.weight
                )));
            }
            if let Some(&dep) = entry.dep.iter().find(|&&dep| dep >= index) {
                return Err(SchedulerError::InvalidProcessList(format!(
                    "process {} depends on {}, dependencies must refer to earlier processes",
                    index, dep
                )));
            }
        }
        Ok(())
    }

    /// Cache roots in file order.
    pub fn root_paths(&self) -> Vec<RootPaths> {
        self.cacheroots
            .iter()
            .map(|root| {
                if root == SYSTEM_ROOTS_MARKER {
                    RootPaths::system()
                } else {
                    RootPaths::new().register_root(root)
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl ProcessEntry {
    /// Build the enqueue request, mapping file indices through `ids`.
    ///
    /// `ids[i]` is the action id entry `i` was enqueued as.
    ///
    /// # Panics
    ///
    /// If a dependency index is not covered by `ids`. [`ProcessList::validate`]
    /// rules that out for entries enqueued in file order.
    pub fn to_request(&self, ids: &[ActionId]) -> EnqueueRequest {
        let payload = ActionPayload::new(&self.app, &self.arg)
            .working_dir(&self.dir)
            .description(&self.desc);
        EnqueueRequest::new(payload)
            .depends_on(self.dep.iter().map(|&dep| ids[dep]))
            .can_detour(self.detour)
            .can_execute_remotely(self.remote)
            .weight(self.weight)
    }
}
