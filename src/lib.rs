//! # autorules - rule-driven automation for monitored processes
//!
//! Users define rules: a boolean match expression over target metadata plus an
//! action policy. When a rule matches a target the crate schedules asynchronous
//! jobs (recording archival, dataset upload, report generation) and reports every
//! job's outcome through a notification channel.
//!
//! ## Core Concepts
//!
//! - **Expression cache**: compiles predicates once and memoizes results per
//!   `(predicate, target snapshot)` pair
//! - **Match evaluator**: `applies` for a single target, `matching_targets` for sweeps
//! - **Job dispatcher**: bounded worker pool; exactly one terminal notification per job
//! - **Result store**: report results keyed by job id, for polling
//! - **Notification publisher**: fire-and-forget fan-out to subscribers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autorules::{
//!     ActiveRecording, ArchiveRequest, JobDispatcher, JobDispatcherConfig, JobId, MatchEvaluator,
//!     NotificationPublisher, TargetSnapshot,
//! };
//!
//! let evaluator = MatchEvaluator::new();
//! let target = TargetSnapshot::new("service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi", "app");
//! assert!(evaluator.applies("target.alias == 'app'", &target)?);
//!
//! let publisher = Arc::new(NotificationPublisher::default());
//! let events = publisher.subscribe();
//! let dispatcher = JobDispatcher::new(JobDispatcherConfig::default(), actions, publisher)?;
//! let handle = dispatcher.submit(ArchiveRequest::new(
//!     JobId::new("job-1")?,
//!     ActiveRecording::new(1, 7, "continuous")?,
//! ))?;
//! handle.join()?;
//! let outcome = events.recv()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod expression;
pub mod jobs;
pub mod matcher;
pub mod notify;
pub mod rules;
pub mod target;

// Re-export primary types at crate root for convenience
pub use config::{AutoRulesConfig, BackpressurePolicy, JobDispatcherConfig, NotificationConfig};
pub use error::{
    ActionError, AutoRulesError, AutoRulesResult, CompileError, EvalError, ExecutionError,
    ExpressionError, JobError, MatchError, ValidationError,
};
pub use expression::{BuiltinEngine, CacheStats, ExpressionCache, ExpressionEngine, Program};
pub use jobs::{
    ActiveRecording, ActiveReportRequest, AnalysisResult, ArchiveRequest, ArchivedRecording,
    ArchivedReportRequest, DatasetUploadRequest, DatasetUploader, Evaluation, JobActions,
    JobDispatcher, JobHandle, JobId, JobKind, JobRequest, JobState, RecordingArchiver,
    ReportGenerator, ReportResult, ResultStore, UploadSource,
};
pub use matcher::{ExpressionEvent, ExpressionEventCategory, MatchEvaluator};
pub use notify::{
    Notification, NotificationCategory, NotificationPublisher, NotificationStream, Publisher,
};
pub use rules::{RecordingLookup, Rule, RuleEvent, RuleEventCategory, RuleReactor};
pub use target::{InMemoryTargetSource, Target, TargetSnapshot, TargetSource};
