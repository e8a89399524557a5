use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Auto-reset event. `set` before `wait` is not lost.
#[derive(Default)]
pub(crate) struct Signal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn set(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *set = true;
        self.cond.notify_one();
    }

    /// Block until set, then reset.
    pub(crate) fn wait(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
        *set = false;
    }
}

const RECHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Broadcast wakeup for threads waiting on a predicate over scheduler state.
#[derive(Default)]
pub(crate) struct Progress {
    lock: Mutex<()>,
    cond: Condvar,
}

impl Progress {
    pub(crate) fn notify(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    /// Wait until `done` returns true. Returns false if `timeout` elapsed first.
    ///
    /// Woken by `notify`; `done` is also re-checked periodically.
    pub(crate) fn wait_until(&self, timeout: Option<Duration>, mut done: impl FnMut() -> bool) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if done() {
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(RECHECK_INTERVAL)
                }
                None => RECHECK_INTERVAL,
            };
            guard = self
                .cond
                .wait_timeout(guard, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
