//! Bounded worker pool executing job requests.
//!
//! `submit` only enqueues. A worker runs the job body, stores report results, and
//! publishes exactly one terminal notification per job. Failures of any kind
//! (collaborator errors, timeouts, panics) become the kind's failure notification;
//! a worker thread never exits because of a job.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{info, warn};

use crate::config::{BackpressurePolicy, JobDispatcherConfig};
use crate::error::{ActionError, AutoRulesError, AutoRulesResult, ExecutionError, JobError};
use crate::notify::{Notification, Publisher};

use super::actions::JobActions;
use super::deadline::{panic_message, Deadline};
use super::request::{JobId, JobKind, JobRequest, UploadSource};
use super::results::{ReportResult, ResultStore};

const QUEUE_PATH: &str = "job_queue";

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued, waiting for a worker.
    Submitted,
    /// A worker is running the body.
    Running,
    /// The body finished and its success notification was published.
    Succeeded,
    /// The body failed, timed out or panicked.
    Failed,
}

impl JobState {
    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Running => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Submitted,
            1 => Self::Running,
            2 => Self::Succeeded,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(JobState::Submitted.to_u8()))
    }

    fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: JobState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

/// Handle returned by `submit`.
///
/// Dropping it does not affect the job. Job failures are reported as
/// `JobState::Failed` plus a notification, never as an `Err` here.
pub struct JobHandle {
    job_id: JobId,
    kind: JobKind,
    state: Arc<StateCell>,
    rx: Receiver<JobState>,
}

impl JobHandle {
    /// The job's id.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The job's kind.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.kind
    }

    /// Current state; never blocks.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.state.get()
    }

    /// Waits for the job to reach a terminal state.
    pub fn join(self) -> AutoRulesResult<JobState> {
        let state = self.rx.recv().map_err(|_| ExecutionError::Disconnected {
            path: QUEUE_PATH.to_string(),
        })?;
        Ok(state)
    }

    /// Waits for the job to reach a terminal state, at most `timeout`.
    pub fn join_timeout(self, timeout: Duration) -> AutoRulesResult<JobState> {
        let state = self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => ExecutionError::Disconnected {
                path: QUEUE_PATH.to_string(),
            },
        })?;
        Ok(state)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("kind", &self.kind)
            .field("state", &self.state.get())
            .finish()
    }
}

struct QueuedJob {
    request: JobRequest,
    state: Arc<StateCell>,
    reply: Sender<JobState>,
}

/// Everything a worker needs to run a job body.
struct Shared {
    actions: JobActions,
    publisher: Arc<dyn Publisher>,
    results: Arc<ResultStore>,
    deadline: Deadline,
}

/// Asynchronous job pipeline: bounded queue, worker threads, result store.
pub struct JobDispatcher {
    tx: Option<Sender<QueuedJob>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
    backpressure: BackpressurePolicy,
    shared: Arc<Shared>,
}

impl JobDispatcher {
    /// Starts `cfg.workers` worker threads.
    pub fn new(
        cfg: JobDispatcherConfig,
        actions: JobActions,
        publisher: Arc<dyn Publisher>,
    ) -> AutoRulesResult<Self> {
        let workers = cfg.workers.max(1);
        let queue_capacity = cfg.queue_capacity.max(1);
        let (tx, rx) = bounded::<QueuedJob>(queue_capacity);
        let shared = Arc::new(Shared {
            actions,
            publisher,
            results: Arc::new(ResultStore::new()),
            deadline: Deadline::new(cfg.action_timeout, cfg.max_stalled_actions),
        });

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<QueuedJob> = rx.clone();
            let shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("autorules-job-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        execute(&shared, job);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Close the queue so already-started workers exit.
                    drop(tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let message = format!("failed to spawn job worker: {e}");
                    return Err(AutoRulesError::internal(message));
                }
            }
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            queue_capacity,
            backpressure: cfg.backpressure,
            shared,
        })
    }

    /// Enqueues `request` and returns a handle to it.
    ///
    /// Under `BackpressurePolicy::Block` a full queue makes this wait for space;
    /// under `Reject` it fails with `ExecutionError::QueueFull`.
    pub fn submit(&self, request: impl Into<JobRequest>) -> AutoRulesResult<JobHandle> {
        let request = request.into();
        let job_id = request.id().clone();
        let kind = request.kind();
        let state = Arc::new(StateCell::new());
        let (reply, rx) = bounded::<JobState>(1);
        let job = QueuedJob {
            request,
            state: Arc::clone(&state),
            reply,
        };

        let Some(tx) = self.tx.as_ref() else {
            return Err(ExecutionError::Disconnected {
                path: QUEUE_PATH.to_string(),
            }
            .into());
        };
        match self.backpressure {
            BackpressurePolicy::Block => tx.send(job).map_err(|_| ExecutionError::Disconnected {
                path: QUEUE_PATH.to_string(),
            })?,
            BackpressurePolicy::Reject => match tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    return Err(ExecutionError::QueueFull {
                        capacity: self.queue_capacity,
                    }
                    .into())
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(ExecutionError::Disconnected {
                        path: QUEUE_PATH.to_string(),
                    }
                    .into())
                }
            },
        }

        info!(job_id = %job_id, kind = %kind, "job submitted");
        Ok(JobHandle {
            job_id,
            kind,
            state,
            rx,
        })
    }

    /// Report result for `job_id`; `None` if not completed or unknown. Never blocks
    /// on an in-flight job.
    #[must_use]
    pub fn result(&self, job_id: &str) -> Option<Arc<ReportResult>> {
        self.shared.results.get(job_id)
    }

    /// The shared result store.
    #[must_use]
    pub fn results(&self) -> &Arc<ResultStore> {
        &self.shared.results
    }

    /// Timed-out actions whose threads are still running.
    ///
    /// Once this reaches `max_stalled_actions`, bounded jobs fail with
    /// `JobError::Stalled` without calling their collaborator.
    #[must_use]
    pub fn stalled_actions(&self) -> usize {
        self.shared.deadline.stalled()
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .field("backpressure", &self.backpressure)
            .field("queued", &self.queued())
            .field("stalled_actions", &self.stalled_actions())
            .finish_non_exhaustive()
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        // Workers drain queued jobs, then see the closed channel and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn execute(shared: &Shared, job: QueuedJob) {
    let QueuedJob { request, state, reply } = job;
    let job_id = request.id().clone();
    let kind = request.kind();
    state.set(JobState::Running);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| run_body(shared, &request))) {
        Ok(result) => result,
        Err(payload) => Err(JobError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };

    let (terminal, notification) = match outcome {
        Ok(notification) => {
            info!(job_id = %job_id, kind = %kind, "job succeeded");
            (JobState::Succeeded, notification)
        }
        Err(source) => {
            let cause = source.to_string();
            let err = ExecutionError::JobExecutionFailed {
                job_id: job_id.to_string(),
                source,
            };
            warn!(job_id = %job_id, kind = %kind, error = %err, cause = %cause, "job failed");
            (
                JobState::Failed,
                Notification::for_job(kind.failure_category(), job_id.as_str()),
            )
        }
    };

    let category = notification.category;
    if panic::catch_unwind(AssertUnwindSafe(|| shared.publisher.publish(notification))).is_err() {
        warn!(job_id = %job_id, category = %category, "publisher panicked; notification lost");
    }

    state.set(terminal);
    let _ = reply.send(terminal);
}

/// Runs `action`, under the action timeout when `kind` is time-bounded.
fn run_action<T, F>(shared: &Shared, kind: JobKind, action: F) -> Result<T, JobError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ActionError> + Send + 'static,
{
    if kind.is_time_bounded() {
        shared.deadline.call(kind.as_str(), action)
    } else {
        action().map_err(JobError::from)
    }
}

/// Runs the body for `request` and builds its success notification.
fn run_body(shared: &Shared, request: &JobRequest) -> Result<Notification, JobError> {
    let kind = request.kind();
    let job_id = request.id();
    match request {
        JobRequest::Archive(req) => {
            let archiver = Arc::clone(&shared.actions.archiver);
            let recording = req.recording().clone();
            run_action(shared, kind, move || archiver.archive(&recording))?;
            Ok(Notification::for_job(kind.success_category(), job_id.as_str()))
        }
        JobRequest::DatasetUpload(req) => {
            let uploader = Arc::clone(&shared.actions.uploader);
            let source: UploadSource = req.source().clone();
            run_action(shared, kind, move || uploader.upload(&source))?;
            Ok(Notification::for_job(kind.success_category(), job_id.as_str()))
        }
        JobRequest::ActiveReport(req) => {
            let reports = Arc::clone(&shared.actions.reports);
            let recording = req.recording().clone();
            let report = run_action(shared, kind, move || reports.active_report(&recording))?;
            store_report(shared, job_id, kind, report)
        }
        JobRequest::ArchivedReport(req) => {
            let reports = Arc::clone(&shared.actions.reports);
            let recording = req.recording().clone();
            let report = run_action(shared, kind, move || reports.archived_report(&recording))?;
            store_report(shared, job_id, kind, report)
        }
    }
}

/// Stores the report and returns a `ReportSuccess` whose payload is the report
/// itself, without a `jobId` field.
fn store_report(
    shared: &Shared,
    job_id: &JobId,
    kind: JobKind,
    report: ReportResult,
) -> Result<Notification, JobError> {
    let payload = serde_json::to_value(&report).map_err(|e| {
        JobError::Action(ActionError::new(format!("report is not serializable: {e}")))
    })?;
    shared.results.insert(job_id, report);
    Ok(Notification::new(kind.success_category(), payload))
}
