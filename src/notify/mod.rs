//! Job outcome notifications.
//!
//! A single logical channel fans `Notification`s out to every current subscriber.
//! Publishing never blocks: a full or vanished subscriber just misses the event.
//! Late subscribers get no replay.

/// Subscriber stream handle.
pub mod stream;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;

pub use stream::NotificationStream;

/// Fixed notification categories.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCategory {
    ArchiveRecordingSuccess,
    ArchiveRecordingFailed,
    GrafanaUploadSuccess,
    GrafanaUploadFailed,
    ReportSuccess,
    ReportFailure,
    RuleCreated,
    RuleUpdated,
    RuleDeleted,
}

impl NotificationCategory {
    /// Category name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArchiveRecordingSuccess => "ArchiveRecordingSuccess",
            Self::ArchiveRecordingFailed => "ArchiveRecordingFailed",
            Self::GrafanaUploadSuccess => "GrafanaUploadSuccess",
            Self::GrafanaUploadFailed => "GrafanaUploadFailed",
            Self::ReportSuccess => "ReportSuccess",
            Self::ReportFailure => "ReportFailure",
            Self::RuleCreated => "RuleCreated",
            Self::RuleUpdated => "RuleUpdated",
            Self::RuleDeleted => "RuleDeleted",
        }
    }

    /// Returns true for the failure outcome of a job.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::ArchiveRecordingFailed | Self::GrafanaUploadFailed | Self::ReportFailure
        )
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(category, payload)` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Event category.
    pub category: NotificationCategory,
    /// Category-specific JSON body.
    pub payload: serde_json::Value,
    /// When the notification was created.
    pub server_time: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(category: NotificationCategory, payload: serde_json::Value) -> Self {
        Self {
            category,
            payload,
            server_time: Utc::now(),
        }
    }

    /// Creates a notification whose payload is `{"jobId": job_id}`.
    #[must_use]
    pub fn for_job(category: NotificationCategory, job_id: &str) -> Self {
        Self::new(category, json!({ "jobId": job_id }))
    }

    /// The `jobId` payload field, if present.
    ///
    /// `ReportSuccess` payloads carry the report itself and have no `jobId`.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.payload.get("jobId").and_then(serde_json::Value::as_str)
    }
}

/// Fire-and-forget broadcast seam used by the job pipeline.
pub trait Publisher: Send + Sync {
    /// Broadcasts `notification` to all current subscribers.
    fn publish(&self, notification: Notification);
}

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type Registry = RwLock<HashMap<SubscriberId, Sender<Notification>>>;

/// In-process publisher with per-subscriber bounded buffers.
#[derive(Debug)]
pub struct NotificationPublisher {
    cfg: NotificationConfig,
    subscribers: Arc<Registry>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl NotificationPublisher {
    /// Publisher with the given per-subscriber buffer size.
    #[must_use]
    pub fn new(cfg: NotificationConfig) -> Self {
        Self {
            cfg,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a subscriber. Only notifications published afterwards are seen.
    #[must_use]
    pub fn subscribe(&self) -> NotificationStream {
        let id = SubscriberId::new();
        let (tx, rx) = bounded::<Notification>(self.cfg.subscriber_capacity.max(1));
        match self.subscribers.write() {
            Ok(mut guard) => {
                guard.insert(id, tx);
            }
            Err(_) => warn!(
                subscriber = %id,
                "subscriber registry lock poisoned; stream will stay empty"
            ),
        }
        NotificationStream::new(id, rx, Arc::downgrade(&self.subscribers))
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Total notifications published.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Deliveries skipped because a subscriber was full or gone.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for NotificationPublisher {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}

impl Publisher for NotificationPublisher {
    fn publish(&self, notification: Notification) {
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut disconnected = Vec::new();
        {
            let Ok(guard) = self.subscribers.read() else {
                warn!(
                    category = %notification.category,
                    "subscriber registry lock poisoned; notification dropped"
                );
                return;
            };
            for (id, tx) in guard.iter() {
                match tx.try_send(notification.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            subscriber = %id,
                            category = %notification.category,
                            "subscriber full; notification dropped"
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        disconnected.push(*id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            if let Ok(mut guard) = self.subscribers.write() {
                for id in disconnected {
                    guard.remove(&id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn category_serializes_as_wire_name() {
        let json = serde_json::to_string(&NotificationCategory::GrafanaUploadFailed).unwrap();
        assert_eq!(json, "\"GrafanaUploadFailed\"");
        assert_eq!(NotificationCategory::ReportSuccess.to_string(), "ReportSuccess");
    }

    #[test]
    fn job_notification_carries_job_id() {
        let n = Notification::for_job(NotificationCategory::ArchiveRecordingSuccess, "job-7");
        assert_eq!(n.job_id(), Some("job-7"));
        assert_eq!(n.payload, json!({ "jobId": "job-7" }));
    }

    #[test]
    fn broadcasts_to_all_subscribers() {
        let publisher = NotificationPublisher::default();
        let a = publisher.subscribe();
        let b = publisher.subscribe();

        publisher.publish(Notification::for_job(NotificationCategory::ReportFailure, "r1"));

        for stream in [&a, &b] {
            let n = stream.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(n.category, NotificationCategory::ReportFailure);
            assert_eq!(n.job_id(), Some("r1"));
        }
        assert_eq!(publisher.published(), 1);
    }

    #[test]
    fn late_subscriber_gets_no_replay() {
        let publisher = NotificationPublisher::default();
        publisher.publish(Notification::for_job(NotificationCategory::ReportFailure, "early"));
        let late = publisher.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn full_subscriber_does_not_block_publisher() {
        let publisher = NotificationPublisher::new(NotificationConfig { subscriber_capacity: 1 });
        let slow = publisher.subscribe();

        for i in 0..5 {
            let job_id = format!("j{i}");
            publisher.publish(Notification::for_job(
                NotificationCategory::GrafanaUploadSuccess,
                &job_id,
            ));
        }
        assert_eq!(publisher.dropped(), 4);
        assert_eq!(
            slow.try_recv().and_then(|n| n.job_id().map(str::to_string)),
            Some("j0".to_string())
        );
    }

    #[test]
    fn dropped_stream_unregisters() {
        let publisher = NotificationPublisher::default();
        let stream = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        drop(stream);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
