//! Report results keyed by job id.
//!
//! Entries are written once per completed report job and retained until removed
//! explicitly or the process exits. Polling clients rely on that retention.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::request::JobId;

/// Detailed evaluation attached to an analysis result.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub summary: String,
    pub explanation: String,
    pub solution: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// One rule's analysis of a recording.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub topic: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

impl AnalysisResult {
    /// A result with no evaluation attached.
    #[must_use]
    pub fn new(name: impl Into<String>, topic: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            score,
            evaluation: None,
        }
    }
}

/// A full report: result category name to analysis.
pub type ReportResult = BTreeMap<String, AnalysisResult>;

/// Concurrent map from job id to completed report.
///
/// Writes are single map operations, so a poisoned lock still guards a
/// consistent map and is recovered rather than surfaced.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, Arc<ReportResult>>>,
}

impl ResultStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `result` under `job_id`, replacing any earlier entry.
    pub fn insert(&self, job_id: &JobId, result: ReportResult) {
        let mut guard = self.results.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(job_id.as_str().to_string(), Arc::new(result));
    }

    /// Returns the report for `job_id`; `None` means not completed yet or unknown.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<Arc<ReportResult>> {
        let guard = self.results.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(job_id).cloned()
    }

    /// Removes and returns the report for `job_id`.
    pub fn remove(&self, job_id: &str) -> Option<Arc<ReportResult>> {
        let mut guard = self.results.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(job_id)
    }

    /// Number of stored reports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no report is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(score: f64) -> ReportResult {
        let mut r = ReportResult::new();
        r.insert("leak".to_string(), AnalysisResult::new("Memory Leak", "heap", score));
        r
    }

    #[test]
    fn get_returns_stored_report() {
        let store = ResultStore::new();
        let id = JobId::new("r1").unwrap();
        store.insert(&id, report(42.0));

        let got = store.get("r1").unwrap();
        assert_eq!(got.get("leak").map(|a| a.score), Some(42.0));
        assert!(store.get("unknown").is_none());
    }

    #[test]
    fn insert_overwrites_and_remove_deletes() {
        let store = ResultStore::new();
        let id = JobId::new("r1").unwrap();
        store.insert(&id, report(1.0));
        store.insert(&id, report(2.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap()["leak"].score, 2.0);

        assert!(store.remove("r1").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn analysis_result_serializes_without_empty_evaluation() {
        let json = serde_json::to_value(AnalysisResult::new("n", "t", 0.5)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "n", "topic": "t", "score": 0.5}));
    }
}
