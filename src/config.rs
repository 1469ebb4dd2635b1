//! Runtime configuration.
//!
//! Plain structs with defaults. Hosts deserialize them from whatever source they
//! use; durations travel as integer milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What `submit` does when the job queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for queue space.
    #[default]
    Block,
    /// Fail fast with `ExecutionError::QueueFull`.
    Reject,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Job worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDispatcherConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs before backpressure applies.
    pub queue_capacity: usize,
    /// Behavior when the queue is full.
    pub backpressure: BackpressurePolicy,
    /// Bound applied to dataset-upload and report-generation actions.
    #[serde(rename = "action_timeout_ms", with = "duration_ms")]
    pub action_timeout: Duration,
    /// Timed-out actions whose threads may still be running before new bounded
    /// jobs fail fast instead of starting another thread.
    pub max_stalled_actions: usize,
}

impl Default for JobDispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::Block,
            action_timeout: Duration::from_secs(30),
            max_stalled_actions: 64,
        }
    }
}

/// Notification channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-subscriber buffer capacity.
    pub subscriber_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRulesConfig {
    /// Job worker pool settings.
    pub jobs: JobDispatcherConfig,
    /// Notification fan-out settings.
    pub notifications: NotificationConfig,
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.to_string(),
    }
}

impl AutoRulesConfig {
    /// Rejects values that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jobs.workers == 0 {
            return Err(invalid("jobs.workers must be at least 1"));
        }
        if self.jobs.queue_capacity == 0 {
            return Err(invalid("jobs.queue_capacity must be at least 1"));
        }
        if self.jobs.action_timeout.is_zero() {
            return Err(invalid("jobs.action_timeout_ms must be positive"));
        }
        if self.jobs.max_stalled_actions == 0 {
            return Err(invalid("jobs.max_stalled_actions must be at least 1"));
        }
        if self.notifications.subscriber_capacity == 0 {
            return Err(invalid("notifications.subscriber_capacity must be at least 1"));
        }
        Ok(())
    }
}
