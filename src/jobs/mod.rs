//! Asynchronous job pipeline.
//!
//! Requests are validated at construction, queued on a bounded worker pool, and
//! reported through exactly one terminal notification each. Report jobs also
//! leave their result in a [`ResultStore`] for polling.

/// Collaborator traits for job bodies.
pub mod actions;
mod deadline;
/// Worker pool and job handles.
pub mod dispatcher;
/// Request types.
pub mod request;
/// Report results and their store.
pub mod results;

pub use actions::{DatasetUploader, JobActions, RecordingArchiver, ReportGenerator};
pub use dispatcher::{JobDispatcher, JobHandle, JobState};
pub use request::{
    ActiveRecording, ActiveReportRequest, ArchiveRequest, ArchivedRecording, ArchivedReportRequest,
    DatasetUploadRequest, JobId, JobKind, JobRequest, UploadSource, MAX_JOB_ID_LEN,
};
pub use results::{AnalysisResult, Evaluation, ReportResult, ResultStore};
