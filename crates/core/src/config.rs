use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KilnError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled value: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: &dyn Fn(&str) -> Option<String>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed) {
            return Some(v);
        }
    }
    lookup(key)
}

fn profiled_parse<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    profile: &str,
    key: &str,
) -> Result<Option<T>, KilnError> {
    match profiled_opt(lookup, profile, key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KilnError::InvalidEnv { key: key.to_string(), value }),
        None => Ok(None),
    }
}

fn profiled_bool(
    lookup: &dyn Fn(&str) -> Option<String>,
    profile: &str,
    key: &str,
) -> Result<Option<bool>, KilnError> {
    match profiled_opt(lookup, profile, key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(KilnError::InvalidEnv { key: key.to_string(), value }),
        },
        None => Ok(None),
    }
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for a kiln build run.
///
/// Parsed from `kiln.toml`; every `[scheduler]` key can be overridden from the
/// environment (see [`KilnConfig::apply_env_overrides`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Per-program capability overrides, keyed by [`process_config_key`].
    #[serde(default)]
    pub processes: HashMap<String, ProcessOverrides>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Local weight budget. 0 = logical processor count.
    #[serde(default)]
    pub max_local_processors: u32,
    /// Hand finished worker processes the next job instead of relaunching.
    #[serde(default)]
    pub enable_process_reuse: bool,
    /// Keep remote-capable actions off the local pop path.
    #[serde(default)]
    pub force_remote: bool,
    /// Never detour local processes.
    #[serde(default)]
    pub force_native: bool,
    /// Concurrent cache probes allowed from the local pop path.
    #[serde(default = "default_max_cache_queries")]
    pub max_cache_queries: u32,
    /// Background threads used for cache probes.
    #[serde(default = "default_cache_worker_threads")]
    pub cache_worker_threads: usize,
}

fn default_max_cache_queries() -> u32 { 16 }
fn default_cache_worker_threads() -> usize { 4 }

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_local_processors: 0,
            enable_process_reuse: false,
            force_remote: false,
            force_native: false,
            max_cache_queries: default_max_cache_queries(),
            cache_worker_threads: default_cache_worker_threads(),
        }
    }
}

impl SchedulerSettings {
    /// Resolve the local budget (0 means use available parallelism).
    pub fn resolved_max_local_processors(&self) -> u32 {
        if self.max_local_processors == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(4)
        } else {
            self.max_local_processors
        }
    }
}

/// Capability overrides for one program. Unset fields keep the enqueued value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOverrides {
    pub can_execute_remotely: Option<bool>,
    pub can_detour: Option<bool>,
}

/// Key used to look up [`ProcessOverrides`] for an application path.
///
/// File name after the last path separator, lower-cased, `.` replaced by `_`.
pub fn process_config_key(application: &str) -> String {
    let name = application
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(application);
    name.to_lowercase().replace('.', "_")
}

impl KilnConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, KilnError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KilnError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides (no config file).
    pub fn from_env() -> Result<Self, KilnError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KILN_*` environment overrides.
    ///
    /// Profile is read from `KILN_PROFILE`. When set (e.g. `CI`), every key is
    /// first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn apply_env_overrides(&mut self) -> Result<(), KilnError> {
        let profile = env_opt("KILN_PROFILE").unwrap_or_default().to_uppercase();
        self.apply_overrides_from(&profile, &env_opt)
    }

    pub(crate) fn apply_overrides_from(
        &mut self,
        profile: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), KilnError> {
        let s = &mut self.scheduler;
        if let Some(v) = profiled_parse(lookup, profile, "KILN_MAX_LOCAL_PROCESSORS")? {
            s.max_local_processors = v;
        }
        if let Some(v) = profiled_bool(lookup, profile, "KILN_ENABLE_PROCESS_REUSE")? {
            s.enable_process_reuse = v;
        }
        if let Some(v) = profiled_bool(lookup, profile, "KILN_FORCE_REMOTE")? {
            s.force_remote = v;
        }
        if let Some(v) = profiled_bool(lookup, profile, "KILN_FORCE_NATIVE")? {
            s.force_native = v;
        }
        if let Some(v) = profiled_parse(lookup, profile, "KILN_MAX_CACHE_QUERIES")? {
            s.max_cache_queries = v;
        }
        Ok(())
    }

    /// Validate the config: reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), KilnError> {
        let s = &self.scheduler;
        if s.max_cache_queries == 0 {
            return Err(KilnError::Config("scheduler.max_cache_queries must be at least 1".into()));
        }
        if s.cache_worker_threads == 0 {
            return Err(KilnError::Config("scheduler.cache_worker_threads must be at least 1".into()));
        }
        if s.force_remote && s.force_native {
            return Err(KilnError::Config(
                "scheduler.force_remote and scheduler.force_native are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Overrides registered for the program behind `application`, if any.
    pub fn process_overrides(&self, application: &str) -> Option<&ProcessOverrides> {
        if self.processes.is_empty() {
            return None;
        }
        self.processes.get(&process_config_key(application))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        let s = &self.scheduler;
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler:   max_local={}, reuse={}, force_remote={}, force_native={}",
            s.resolved_max_local_processors(),
            s.enable_process_reuse,
            s.force_remote,
            s.force_native
        );
        tracing::info!(
            "  cache:       max_queries={}, workers={}",
            s.max_cache_queries,
            s.cache_worker_threads
        );
        tracing::info!("  processes:   {} override table(s)", self.processes.len());
    }
}
