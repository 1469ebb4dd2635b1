//! Collaborator actions run by job bodies.
//!
//! The pipeline owns scheduling, timeouts and notifications; what archiving,
//! uploading or report generation actually does lives behind these traits.

use std::fmt;
use std::sync::Arc;

use crate::error::ActionError;

use super::request::{ActiveRecording, ArchivedRecording, UploadSource};
use super::results::ReportResult;

/// Archives an active recording.
pub trait RecordingArchiver: Send + Sync {
    /// Copies the recording into the archive and returns the archived reference.
    fn archive(&self, recording: &ActiveRecording) -> Result<ArchivedRecording, ActionError>;
}

/// Uploads a recording to the external dataset service.
pub trait DatasetUploader: Send + Sync {
    /// Performs the upload and returns the service's response body.
    fn upload(&self, source: &UploadSource) -> Result<String, ActionError>;
}

/// Generates automated analysis reports.
pub trait ReportGenerator: Send + Sync {
    /// Report for a recording still held by its target.
    fn active_report(&self, recording: &ActiveRecording) -> Result<ReportResult, ActionError>;

    /// Report for an archived recording.
    fn archived_report(&self, recording: &ArchivedRecording) -> Result<ReportResult, ActionError>;
}

/// The set of collaborators a dispatcher runs against.
#[derive(Clone)]
pub struct JobActions {
    /// Runs archive jobs.
    pub archiver: Arc<dyn RecordingArchiver>,
    /// Runs dataset-upload jobs.
    pub uploader: Arc<dyn DatasetUploader>,
    /// Runs both report kinds.
    pub reports: Arc<dyn ReportGenerator>,
}

impl JobActions {
    /// Bundles the three collaborators.
    pub fn new(
        archiver: Arc<dyn RecordingArchiver>,
        uploader: Arc<dyn DatasetUploader>,
        reports: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self {
            archiver,
            uploader,
            reports,
        }
    }
}

impl fmt::Debug for JobActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobActions").finish_non_exhaustive()
    }
}
