//! Monitored process identity and its matching snapshot.
//!
//! `Target` is the mutable record owned by discovery/persistence collaborators.
//! Match expressions never see it directly: each evaluation projects it into an
//! immutable `TargetSnapshot` holding only the fields the predicate schema exposes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A monitored process as known to discovery.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Storage id assigned by the persistence layer.
    pub id: i64,
    pub connect_url: String,
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_id: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Target {
    /// Creates a target with no jvm id, labels or annotations.
    #[must_use]
    pub fn new(id: i64, connect_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id,
            connect_url: connect_url.into(),
            alias: alias.into(),
            jvm_id: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Projects this target into the immutable view used for matching.
    #[must_use]
    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot::from(self)
    }
}

/// Immutable, matching-relevant projection of a `Target`.
///
/// Equality and hashing are structural over every field, which makes the snapshot
/// usable as half of a memoization key. Maps are ordered so insertion order never
/// affects equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSnapshot {
    connect_url: String,
    alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jvm_id: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl TargetSnapshot {
    /// Creates a snapshot with empty labels and annotations.
    #[must_use]
    pub fn new(connect_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            connect_url: connect_url.into(),
            alias: alias.into(),
            jvm_id: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Sets the jvm id.
    #[must_use]
    pub fn with_jvm_id(mut self, jvm_id: impl Into<String>) -> Self {
        self.jvm_id = Some(jvm_id.into());
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Connection URL of the target.
    #[must_use]
    pub fn connect_url(&self) -> &str {
        &self.connect_url
    }

    /// Display alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// JVM id, when the target has been identified.
    #[must_use]
    pub fn jvm_id(&self) -> Option<&str> {
        self.jvm_id.as_deref()
    }

    /// Target labels.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Target annotations.
    #[must_use]
    pub const fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }
}

impl From<&Target> for TargetSnapshot {
    fn from(target: &Target) -> Self {
        Self {
            connect_url: target.connect_url.clone(),
            alias: target.alias.clone(),
            jvm_id: target.jvm_id.clone(),
            labels: target.labels.clone(),
            annotations: target.annotations.clone(),
        }
    }
}

/// Collaborator that streams every known target.
///
/// The iterator may be produced lazily (e.g. paged from storage); consumers drain it
/// exactly once.
pub trait TargetSource: Send + Sync {
    /// Streams all known targets as snapshots.
    fn stream_all(&self) -> Box<dyn Iterator<Item = TargetSnapshot> + '_>;
}

/// In-memory target source for embedded usage and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTargetSource {
    targets: Vec<Target>,
}

impl InMemoryTargetSource {
    /// Source over a fixed list of targets.
    #[must_use]
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Adds a target.
    pub fn push(&mut self, target: Target) {
        self.targets.push(target);
    }
}

impl TargetSource for InMemoryTargetSource {
    fn stream_all(&self) -> Box<dyn Iterator<Item = TargetSnapshot> + '_> {
        Box::new(self.targets.iter().map(TargetSnapshot::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_projects_matching_fields() {
        let mut target = Target::new(7, "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi", "app");
        target.jvm_id = Some("abc".to_string());
        target.labels.insert("env".to_string(), "prod".to_string());

        let snap = target.snapshot();
        assert_eq!(snap.connect_url(), "service:jmx:rmi:///jndi/rmi://app:9091/jmxrmi");
        assert_eq!(snap.alias(), "app");
        assert_eq!(snap.jvm_id(), Some("abc"));
        assert_eq!(snap.labels().get("env").map(String::as_str), Some("prod"));
        assert!(snap.annotations().is_empty());
    }

    #[test]
    fn snapshot_equality_ignores_insertion_order() {
        let a = TargetSnapshot::new("url", "a").with_label("x", "1").with_label("y", "2");
        let b = TargetSnapshot::new("url", "a").with_label("y", "2").with_label("x", "1");
        assert_eq!(a, b);

        let c = b.clone().with_annotation("k", "v");
        assert_ne!(a, c);
    }

    #[test]
    fn in_memory_source_streams_all() {
        let source =
            InMemoryTargetSource::new(vec![Target::new(1, "u1", "a"), Target::new(2, "u2", "b")]);
        let aliases: Vec<String> = source.stream_all().map(|t| t.alias().to_string()).collect();
        assert_eq!(aliases, vec!["a".to_string(), "b".to_string()]);
    }
}
