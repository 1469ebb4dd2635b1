//! Deadline-bounded collaborator calls.
//!
//! The action runs on its own thread and races a `recv_timeout`. When the deadline
//! wins, the caller gets `JobError::Timeout` and moves on. The action thread is
//! detached and its eventual result is discarded. Detached threads are counted
//! until they finish, and new calls fail fast once the count reaches its limit.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::warn;

use crate::error::{ActionError, JobError};

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs actions under a shared timeout and tracks the ones it gave up on.
#[derive(Debug)]
pub(crate) struct Deadline {
    timeout: Duration,
    max_stalled: usize,
    stalled: Arc<AtomicUsize>,
}

impl Deadline {
    pub(crate) fn new(timeout: Duration, max_stalled: usize) -> Self {
        Self {
            timeout,
            max_stalled: max_stalled.max(1),
            stalled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Timed-out actions whose threads have not finished yet.
    pub(crate) fn stalled(&self) -> usize {
        self.stalled.load(Ordering::Acquire)
    }

    /// Runs `action` and waits at most the configured timeout for it.
    pub(crate) fn call<T, F>(&self, label: &str, action: F) -> Result<T, JobError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ActionError> + Send + 'static,
    {
        let outstanding = self.stalled();
        if outstanding >= self.max_stalled {
            warn!(
                action = label,
                outstanding,
                limit = self.max_stalled,
                "refusing to start action while timed-out actions are still running"
            );
            return Err(JobError::Stalled {
                outstanding,
                limit: self.max_stalled,
            });
        }

        let (tx, rx) = bounded(1);
        let phase = Arc::new(AtomicU8::new(RUNNING));
        let helper_phase = Arc::clone(&phase);
        let stalled = Arc::clone(&self.stalled);
        thread::Builder::new()
            .name(format!("autorules-{label}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(action));
                // Receiver is gone if the deadline already passed.
                let _ = tx.send(outcome);
                if helper_phase.swap(FINISHED, Ordering::AcqRel) == ABANDONED {
                    stalled.fetch_sub(1, Ordering::AcqRel);
                }
            })
            .map_err(|e| JobError::Spawn {
                message: e.to_string(),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(result)) => result.map_err(JobError::from),
            Ok(Err(payload)) => Err(JobError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
            Err(RecvTimeoutError::Timeout) => {
                // Count first so the helper's decrement never precedes it.
                let outstanding = self.stalled.fetch_add(1, Ordering::AcqRel) + 1;
                if phase.swap(ABANDONED, Ordering::AcqRel) == FINISHED {
                    self.stalled.fetch_sub(1, Ordering::AcqRel);
                } else {
                    warn!(action = label, outstanding, "action timed out; thread left running");
                }
                Err(JobError::Timeout {
                    duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(JobError::Panicked {
                message: "action thread exited without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crossbeam_channel::{Receiver, Sender};

    fn deadline(timeout: Duration) -> Deadline {
        Deadline::new(timeout, 64)
    }

    #[test]
    fn returns_result_within_deadline() {
        let out = deadline(Duration::from_secs(1))
            .call("test", || Ok::<_, ActionError>(7))
            .unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn propagates_action_error() {
        let err = deadline(Duration::from_secs(1))
            .call("test", || Err::<(), _>(ActionError::new("boom")))
            .unwrap_err();
        assert_eq!(err, JobError::Action(ActionError::new("boom")));
    }

    #[test]
    fn times_out_hung_action() {
        let started = Instant::now();
        let err = deadline(Duration::from_millis(50))
            .call("test", || {
                thread::sleep(Duration::from_secs(2));
                Ok::<_, ActionError>(())
            })
            .unwrap_err();
        assert_eq!(err, JobError::Timeout { duration_ms: 50 });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn converts_panic() {
        let err = deadline(Duration::from_secs(1))
            .call("test", || -> Result<(), ActionError> { panic!("report engine crashed") })
            .unwrap_err();
        assert_eq!(
            err,
            JobError::Panicked {
                message: "report engine crashed".to_string()
            }
        );
    }

    fn blocked_on(release: &Receiver<()>) -> impl FnOnce() -> Result<(), ActionError> {
        let release = release.clone();
        move || {
            let _ = release.recv();
            Ok(())
        }
    }

    fn wait_for_stalled(deadline: &Deadline, want: usize) {
        let started = Instant::now();
        while deadline.stalled() != want {
            assert!(
                started.elapsed() < Duration::from_secs(5),
                "stalled count stuck at {}",
                deadline.stalled()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn counts_abandoned_threads_until_they_finish() {
        let deadline = Deadline::new(Duration::from_millis(20), 8);
        let (release, gate): (Sender<()>, _) = bounded(0);

        for _ in 0..2 {
            let err = deadline.call("test", blocked_on(&gate)).unwrap_err();
            assert_eq!(err, JobError::Timeout { duration_ms: 20 });
        }
        assert_eq!(deadline.stalled(), 2);

        drop(release);
        wait_for_stalled(&deadline, 0);
    }

    #[test]
    fn refuses_new_actions_at_the_stalled_limit() {
        let deadline = Deadline::new(Duration::from_millis(20), 1);
        let (release, gate): (Sender<()>, _) = bounded(0);

        deadline.call("test", blocked_on(&gate)).unwrap_err();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let err = deadline
            .call("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ActionError>(())
            })
            .unwrap_err();
        assert_eq!(
            err,
            JobError::Stalled {
                outstanding: 1,
                limit: 1
            }
        );
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        drop(release);
        wait_for_stalled(&deadline, 0);
        deadline.call("test", || Ok::<_, ActionError>(())).unwrap();
    }
}
