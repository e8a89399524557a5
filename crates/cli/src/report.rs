use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::error;

use kiln_scheduler::{ActionStatus, ExecutionType, FinishedProcess};

/// Prints one progress line per finished process and remembers failures.
pub struct Reporter {
    total: usize,
    json: bool,
    finished: AtomicUsize,
    failures: Mutex<Vec<String>>,
}

impl Reporter {
    pub fn new(total: usize, json: bool) -> Self {
        Self {
            total,
            json,
            finished: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, record: &FinishedProcess) {
        let n = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        if self.json {
            match serde_json::to_string(record) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(id = %record.id, error = %e, "failed to serialize finished record"),
            }
        } else {
            println!("{}", progress_line(n, self.total, record));
        }
        if record.is_failure() {
            error!(
                id = %record.id,
                app = %record.application,
                exit_code = record.exit_code,
                "process failed"
            );
            self.failures
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(label(record).to_string());
        }
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn label(record: &FinishedProcess) -> &str {
    if record.description.is_empty() {
        &record.application
    } else {
        &record.description
    }
}

/// `[n/total] desc`, suffixed with how the process was carried out when it
/// was not a plain detoured run.
pub fn progress_line(n: usize, total: usize, record: &FinishedProcess) -> String {
    let suffix = match (record.status, record.execution) {
        (ActionStatus::Skipped, _) => " (Skipped)",
        (_, ExecutionType::Native) => " (Not detoured)",
        (_, ExecutionType::FromCache) => " (From cache)",
        (_, ExecutionType::Remote) => " (Remote)",
        _ => "",
    };
    let mut line = format!("[{}/{}] {}{}", n, total, label(record), suffix);
    if record.status == ActionStatus::Failed {
        line.push_str(&format!(" failed with exit code {}", record.exit_code));
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use kiln_scheduler::ActionId;

    use super::*;

    fn finished(desc: &str, status: ActionStatus, execution: ExecutionType, exit_code: u32) -> FinishedProcess {
        FinishedProcess {
            id: ActionId::new(0),
            application: "cl.exe".into(),
            arguments: String::new(),
            description: desc.into(),
            exit_code,
            status,
            execution,
            cache_query_time: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn formats_suffixes() {
        let plain = finished("Compile a.cpp", ActionStatus::Success, ExecutionType::Detoured, 0);
        assert_eq!(progress_line(1, 3, &plain), "[1/3] Compile a.cpp");

        let native = finished("Link", ActionStatus::Success, ExecutionType::Native, 0);
        assert_eq!(progress_line(2, 3, &native), "[2/3] Link (Not detoured)");

        let cached = finished("b.cpp", ActionStatus::Success, ExecutionType::FromCache, 0);
        assert_eq!(progress_line(3, 3, &cached), "[3/3] b.cpp (From cache)");
    }

    #[test]
    fn falls_back_to_application_and_reports_failures() {
        let failed = finished("", ActionStatus::Failed, ExecutionType::Detoured, 2);
        assert_eq!(progress_line(1, 1, &failed), "[1/1] cl.exe failed with exit code 2");

        let reporter = Reporter::new(2, false);
        reporter.record(&failed);
        reporter.record(&finished("ok", ActionStatus::Success, ExecutionType::Detoured, 0));
        assert_eq!(reporter.finished(), 2);
        assert_eq!(reporter.failures(), vec!["cl.exe".to_string()]);
    }

    #[test]
    fn skipped_processes_are_not_failures() {
        let skipped = finished("dependent", ActionStatus::Skipped, ExecutionType::Skipped, kiln_scheduler::CANCEL_EXIT_CODE);
        assert_eq!(progress_line(1, 1, &skipped), "[1/1] dependent (Skipped)");
        let reporter = Reporter::new(1, true);
        reporter.record(&skipped);
        assert!(reporter.failures().is_empty());
    }
}
