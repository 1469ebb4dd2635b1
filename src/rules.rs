//! Automated rules and the reactor that turns rule changes into jobs.
//!
//! A rule pairs a match expression with an archival policy. When a rule is
//! created or updated the reactor sweeps the known targets and schedules one
//! archive job per matching target that has an active recording for the rule.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{AutoRulesResult, ValidationError};
use crate::jobs::{ActiveRecording, ArchiveRequest, JobDispatcher, JobHandle, JobId};
use crate::matcher::MatchEvaluator;
use crate::notify::{Notification, NotificationCategory, Publisher};
use crate::target::{TargetSnapshot, TargetSource};

/// Maximum accepted length of a rule name.
pub const MAX_RULE_NAME_LEN: usize = 255;

/// A user-defined automation rule.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub match_expression: String,
    pub event_specifier: String,
    #[serde(default)]
    pub archival_period_seconds: i64,
    #[serde(default)]
    pub initial_delay_seconds: i64,
    #[serde(default)]
    pub preserved_archives: i64,
    #[serde(default)]
    pub max_age_seconds: i64,
    #[serde(default)]
    pub max_size_bytes: i64,
    #[serde(default)]
    pub enabled: bool,
}

impl Rule {
    /// Creates an enabled rule with no archival policy.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        match_expression: impl Into<String>,
        event_specifier: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            match_expression: match_expression.into(),
            event_specifier: event_specifier.into(),
            archival_period_seconds: 0,
            initial_delay_seconds: 0,
            preserved_archives: 0,
            max_age_seconds: 0,
            max_size_bytes: 0,
            enabled: true,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the archival period and number of archives to keep.
    #[must_use]
    pub const fn with_archival(mut self, period_seconds: i64, preserved_archives: i64) -> Self {
        self.archival_period_seconds = period_seconds;
        self.preserved_archives = preserved_archives;
        self
    }

    /// Sets the delay before the first archival.
    #[must_use]
    pub const fn with_initial_delay(mut self, seconds: i64) -> Self {
        self.initial_delay_seconds = seconds;
        self
    }

    /// Sets recording size and age limits.
    #[must_use]
    pub const fn with_limits(mut self, max_age_seconds: i64, max_size_bytes: i64) -> Self {
        self.max_age_seconds = max_age_seconds;
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Enables or disables the rule.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the rule asks for periodic archival at all.
    #[must_use]
    pub const fn wants_archival(&self) -> bool {
        self.enabled && self.archival_period_seconds > 0
    }

    /// Checks required fields and numeric ranges.
    ///
    /// The match expression is only checked for presence here; compiling it is the
    /// evaluator's job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("name", &self.name),
            ("matchExpression", &self.match_expression),
            ("eventSpecifier", &self.event_specifier),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if self.name.len() > MAX_RULE_NAME_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "name".to_string(),
                max_length: MAX_RULE_NAME_LEN,
            });
        }
        for (field, value) in [
            ("archivalPeriodSeconds", self.archival_period_seconds),
            ("initialDelaySeconds", self.initial_delay_seconds),
            ("preservedArchives", self.preserved_archives),
            ("maxAgeSeconds", self.max_age_seconds),
            ("maxSizeBytes", self.max_size_bytes),
        ] {
            if value < 0 {
                return Err(ValidationError::InvalidRule {
                    reason: format!("{field} must not be negative, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Lifecycle category of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleEventCategory {
    /// A rule was added.
    Created,
    /// A rule's definition changed.
    Updated,
    /// A rule was removed.
    Deleted,
}

impl RuleEventCategory {
    /// Notification category published for this event.
    #[must_use]
    pub const fn notification_category(self) -> NotificationCategory {
        match self {
            Self::Created => NotificationCategory::RuleCreated,
            Self::Updated => NotificationCategory::RuleUpdated,
            Self::Deleted => NotificationCategory::RuleDeleted,
        }
    }
}

/// A rule was created, updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvent {
    /// What happened.
    pub category: RuleEventCategory,
    /// The rule as of the event. Deleted events carry the last known definition.
    pub rule: Rule,
}

impl RuleEvent {
    /// Event of `category` for `rule`.
    #[must_use]
    pub const fn new(category: RuleEventCategory, rule: Rule) -> Self {
        Self { category, rule }
    }

    /// The notification announcing this event; its payload is the rule.
    #[must_use]
    pub fn notification(&self) -> Notification {
        let payload = serde_json::to_value(&self.rule)
            .unwrap_or_else(|_| json!({ "name": self.rule.name }));
        Notification::new(self.category.notification_category(), payload)
    }
}

/// Finds the recording a rule manages on a target.
pub trait RecordingLookup: Send + Sync {
    /// Returns the active recording `rule` maintains on `target`, if any.
    fn active_recording(&self, rule: &Rule, target: &TargetSnapshot) -> Option<ActiveRecording>;
}

/// Reacts to rule events by sweeping targets and scheduling archive jobs.
pub struct RuleReactor {
    evaluator: Arc<MatchEvaluator>,
    dispatcher: Arc<JobDispatcher>,
    publisher: Arc<dyn Publisher>,
    targets: Arc<dyn TargetSource>,
    recordings: Arc<dyn RecordingLookup>,
}

impl RuleReactor {
    /// Wires the reactor to its collaborators.
    pub fn new(
        evaluator: Arc<MatchEvaluator>,
        dispatcher: Arc<JobDispatcher>,
        publisher: Arc<dyn Publisher>,
        targets: Arc<dyn TargetSource>,
        recordings: Arc<dyn RecordingLookup>,
    ) -> Self {
        Self {
            evaluator,
            dispatcher,
            publisher,
            targets,
            recordings,
        }
    }

    /// The evaluator used for sweeps.
    #[must_use]
    pub fn evaluator(&self) -> &MatchEvaluator {
        &self.evaluator
    }

    /// Handles one rule event and returns the handles of any jobs it scheduled.
    ///
    /// Created and updated rules must validate and their expression must compile
    /// before any side effect. Updates and deletions then drop cached state for
    /// the rule's expression. Deleted rules never schedule jobs.
    pub fn on_rule_event(&self, event: &RuleEvent) -> AutoRulesResult<Vec<JobHandle>> {
        let rule = &event.rule;
        if event.category != RuleEventCategory::Deleted {
            rule.validate()?;
            self.evaluator.compile(&rule.match_expression)?;
        }
        if event.category != RuleEventCategory::Created {
            let dropped = self.evaluator.invalidate(&rule.match_expression);
            debug!(rule = %rule.name, dropped, "invalidated rule expression");
        }

        self.publisher.publish(event.notification());

        match event.category {
            RuleEventCategory::Deleted => Ok(Vec::new()),
            RuleEventCategory::Created | RuleEventCategory::Updated if rule.wants_archival() => {
                self.archive_matching(rule)
            }
            RuleEventCategory::Created | RuleEventCategory::Updated => Ok(Vec::new()),
        }
    }

    /// Submits one archive job per target matching `rule` that has an active
    /// recording for it.
    pub fn archive_matching(&self, rule: &Rule) -> AutoRulesResult<Vec<JobHandle>> {
        let matched = self
            .evaluator
            .matched_targets(&rule.match_expression, self.targets.as_ref())?;

        let mut handles = Vec::with_capacity(matched.len());
        for target in &matched {
            let Some(recording) = self.recordings.active_recording(rule, target) else {
                debug!(rule = %rule.name, target = target.alias(), "no active recording; skipping");
                continue;
            };
            let request = ArchiveRequest::new(JobId::generate(), recording);
            handles.push(self.dispatcher.submit(request)?);
        }

        info!(
            rule = %rule.name,
            matched = matched.len(),
            scheduled = handles.len(),
            "rule archival scheduled"
        );
        Ok(handles)
    }
}

impl fmt::Debug for RuleReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleReactor")
            .field("evaluator", &self.evaluator)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
