//! Local executor that launches each job as a child process on the tokio runtime.

use std::process::Stdio;

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, error};

use kiln_scheduler::{ActionPayload, Completion, Job, LocalExecutor};

/// Reported when the child could not be spawned or was killed by a signal.
pub const LAUNCH_FAILED_EXIT_CODE: u32 = u32::MAX;

pub struct ProcessLauncher {
    runtime: Handle,
    path: Option<String>,
}

impl ProcessLauncher {
    /// `path` replaces the children's PATH when set.
    pub fn new(runtime: Handle, path: Option<String>) -> Self {
        Self { runtime, path }
    }
}

impl LocalExecutor for ProcessLauncher {
    fn run_local(&self, job: Job, completion: Completion) {
        let path = self.path.clone();
        self.runtime.spawn(async move {
            let (exit_code, output) = run_process(&job.payload, path.as_deref()).await;
            completion.exited(exit_code);
            if !output.is_empty() {
                eprint!("{output}");
            }
        });
    }
}

/// Run one process to completion, returning its exit code and captured output.
pub async fn run_process(payload: &ActionPayload, path: Option<&str>) -> (u32, String) {
    let mut cmd = Command::new(&payload.application);
    cmd.args(split_arguments(&payload.arguments))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !payload.working_dir.is_empty() {
        cmd.current_dir(&payload.working_dir);
    }
    if let Some(path) = path {
        cmd.env("PATH", path);
    }

    debug!(app = %payload.application, args = %payload.arguments, "launching process");
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(app = %payload.application, error = %e, "failed to spawn process");
            return (LAUNCH_FAILED_EXIT_CODE, String::new());
        }
    };

    match child.wait_with_output().await {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (exit_code_of(output.status.code()), text)
        }
        Err(e) => {
            error!(app = %payload.application, error = %e, "failed waiting for process");
            (LAUNCH_FAILED_EXIT_CODE, String::new())
        }
    }
}

/// `None` means the child was terminated by a signal.
pub fn exit_code_of(code: Option<i32>) -> u32 {
    match code {
        Some(code) => code as u32,
        None => LAUNCH_FAILED_EXIT_CODE,
    }
}

/// Split a command line on whitespace. Double quotes group words and are
/// stripped; `\"` inside quotes is a literal quote.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}
