//! Job request types.
//!
//! Every request carries a caller-supplied, non-empty job id and a payload
//! reference. Both invariants are enforced by construction: `JobId` and the
//! recording references can only be built through validating constructors.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::notify::NotificationCategory;

/// Maximum accepted length of a job id.
pub const MAX_JOB_ID_LEN: usize = 256;

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Caller-supplied unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Wraps a caller-supplied id.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate_non_empty("job_id", &id)?;
        if id.len() > MAX_JOB_ID_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "job_id".to_string(),
                max_length: MAX_JOB_ID_LEN,
            });
        }
        Ok(Self(id))
    }

    /// Creates a random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a recording still held by a running target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveRecording {
    target_id: i64,
    remote_id: i64,
    name: String,
}

impl ActiveRecording {
    /// Validates the recording name.
    pub fn new(
        target_id: i64,
        remote_id: i64,
        name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_non_empty("recording.name", &name)?;
        Ok(Self {
            target_id,
            remote_id,
            name,
        })
    }

    /// Storage id of the owning target.
    #[must_use]
    pub const fn target_id(&self) -> i64 {
        self.target_id
    }

    /// Id of the recording on the target.
    #[must_use]
    pub const fn remote_id(&self) -> i64 {
        self.remote_id
    }

    /// Name of the recording on the target.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reference to an archived recording: source jvm id plus archive file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchivedRecording {
    jvm_id: String,
    filename: String,
}

impl ArchivedRecording {
    /// Validates both identifiers.
    pub fn new(
        jvm_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let jvm_id = jvm_id.into();
        let filename = filename.into();
        validate_non_empty("archive.jvm_id", &jvm_id)?;
        validate_non_empty("archive.filename", &filename)?;
        Ok(Self { jvm_id, filename })
    }

    /// Id of the JVM the recording came from.
    #[must_use]
    pub fn jvm_id(&self) -> &str {
        &self.jvm_id
    }

    /// Archived file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// What a dataset upload sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UploadSource {
    /// A recording already archived.
    Archived(ArchivedRecording),
    /// A recording still held by its target.
    #[allow(missing_docs)]
    Active { target_id: i64, remote_id: i64 },
}

/// Archive an active recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    id: JobId,
    recording: ActiveRecording,
}

impl ArchiveRequest {
    /// Archive `recording` under job `id`.
    #[must_use]
    pub const fn new(id: JobId, recording: ActiveRecording) -> Self {
        Self { id, recording }
    }

    /// The job's id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    /// The recording to archive.
    #[must_use]
    pub const fn recording(&self) -> &ActiveRecording {
        &self.recording
    }
}

/// Upload a recording to the dataset service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetUploadRequest {
    id: JobId,
    source: UploadSource,
}

impl DatasetUploadRequest {
    /// Upload an archived recording.
    #[must_use]
    pub const fn archived(id: JobId, recording: ArchivedRecording) -> Self {
        Self {
            id,
            source: UploadSource::Archived(recording),
        }
    }

    /// Upload an active recording identified by target and remote ids.
    #[must_use]
    pub const fn active(id: JobId, target_id: i64, remote_id: i64) -> Self {
        Self {
            id,
            source: UploadSource::Active { target_id, remote_id },
        }
    }

    /// The job's id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    /// What to upload.
    #[must_use]
    pub const fn source(&self) -> &UploadSource {
        &self.source
    }
}

/// Generate a report for an active recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReportRequest {
    id: JobId,
    recording: ActiveRecording,
}

impl ActiveReportRequest {
    /// Report on `recording` under job `id`.
    #[must_use]
    pub const fn new(id: JobId, recording: ActiveRecording) -> Self {
        Self { id, recording }
    }

    /// The job's id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    /// The recording to analyze.
    #[must_use]
    pub const fn recording(&self) -> &ActiveRecording {
        &self.recording
    }
}

/// Generate a report for an archived recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedReportRequest {
    id: JobId,
    recording: ArchivedRecording,
}

impl ArchivedReportRequest {
    /// Report on the archived `recording` under job `id`.
    #[must_use]
    pub const fn new(id: JobId, recording: ArchivedRecording) -> Self {
        Self { id, recording }
    }

    /// The job's id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    /// The archived recording to analyze.
    #[must_use]
    pub const fn recording(&self) -> &ArchivedRecording {
        &self.recording
    }
}

/// Job kind, used for routing outcomes and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Archive an active recording.
    Archive,
    /// Upload a recording as a dataset.
    DatasetUpload,
    /// Report on an active recording.
    ActiveReport,
    /// Report on an archived recording.
    ArchivedReport,
}

impl JobKind {
    /// Stable snake_case name, used in logs and thread names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::DatasetUpload => "dataset_upload",
            Self::ActiveReport => "active_report",
            Self::ArchivedReport => "archived_report",
        }
    }

    /// Category published when a job of this kind succeeds.
    #[must_use]
    pub const fn success_category(self) -> NotificationCategory {
        match self {
            Self::Archive => NotificationCategory::ArchiveRecordingSuccess,
            Self::DatasetUpload => NotificationCategory::GrafanaUploadSuccess,
            Self::ActiveReport | Self::ArchivedReport => NotificationCategory::ReportSuccess,
        }
    }

    /// Category published when a job of this kind fails.
    #[must_use]
    pub const fn failure_category(self) -> NotificationCategory {
        match self {
            Self::Archive => NotificationCategory::ArchiveRecordingFailed,
            Self::DatasetUpload => NotificationCategory::GrafanaUploadFailed,
            Self::ActiveReport | Self::ArchivedReport => NotificationCategory::ReportFailure,
        }
    }

    /// Whether the job body is bounded by the configured action timeout.
    #[must_use]
    pub const fn is_time_bounded(self) -> bool {
        !matches!(self, Self::Archive)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of asynchronous work.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Archive(ArchiveRequest),
    DatasetUpload(DatasetUploadRequest),
    ActiveReport(ActiveReportRequest),
    ArchivedReport(ArchivedReportRequest),
}

impl JobRequest {
    /// The caller-supplied job id.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        match self {
            Self::Archive(r) => r.id(),
            Self::DatasetUpload(r) => r.id(),
            Self::ActiveReport(r) => r.id(),
            Self::ArchivedReport(r) => r.id(),
        }
    }

    /// Kind of the wrapped request.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Archive(_) => JobKind::Archive,
            Self::DatasetUpload(_) => JobKind::DatasetUpload,
            Self::ActiveReport(_) => JobKind::ActiveReport,
            Self::ArchivedReport(_) => JobKind::ArchivedReport,
        }
    }
}

impl From<ArchiveRequest> for JobRequest {
    fn from(r: ArchiveRequest) -> Self {
        Self::Archive(r)
    }
}

impl From<DatasetUploadRequest> for JobRequest {
    fn from(r: DatasetUploadRequest) -> Self {
        Self::DatasetUpload(r)
    }
}

impl From<ActiveReportRequest> for JobRequest {
    fn from(r: ActiveReportRequest) -> Self {
        Self::ActiveReport(r)
    }
}

impl From<ArchivedReportRequest> for JobRequest {
    fn from(r: ArchivedReportRequest) -> Self {
        Self::ArchivedReport(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_rejects_empty() {
        assert_eq!(
            JobId::new("  ").unwrap_err(),
            ValidationError::MissingField {
                field: "job_id".to_string()
            }
        );
        assert!(matches!(
            JobId::new("x".repeat(MAX_JOB_ID_LEN + 1)).unwrap_err(),
            ValidationError::FieldTooLong { .. }
        ));
        assert_eq!(JobId::new("job-1").unwrap().as_str(), "job-1");
    }

    #[test]
    fn job_id_deserialization_validates() {
        let id: JobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.to_string(), "abc");
        assert!(serde_json::from_str::<JobId>("\"\"").is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[test]
    fn payload_references_reject_empty_fields() {
        assert!(ActiveRecording::new(1, 2, "").is_err());
        assert!(ArchivedRecording::new("jvm", " ").is_err());
        assert!(ArchivedRecording::new("", "file.jfr").is_err());
    }

    #[test]
    fn kinds_route_to_categories() {
        let id = JobId::new("r1").unwrap();
        let archived = ArchivedRecording::new("jvm", "a.jfr").unwrap();
        let req: JobRequest = ArchivedReportRequest::new(id, archived).into();
        assert_eq!(req.kind(), JobKind::ArchivedReport);
        assert_eq!(req.kind().success_category(), NotificationCategory::ReportSuccess);
        assert_eq!(req.kind().failure_category(), NotificationCategory::ReportFailure);
        assert!(req.kind().is_time_bounded());
        assert!(!JobKind::Archive.is_time_bounded());
        assert_eq!(req.id().as_str(), "r1");
    }
}
