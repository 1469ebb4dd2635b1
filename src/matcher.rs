//! Match evaluation of predicates against targets.
//!
//! `MatchEvaluator` fronts the expression cache. Single evaluations surface every
//! failure; bulk sweeps log and skip targets whose evaluation fails so one bad
//! target cannot abort matching the rest.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{ExpressionError, MatchError};
use crate::expression::{BuiltinEngine, ExpressionCache, ExpressionEngine};
use crate::target::{TargetSnapshot, TargetSource};

/// Lifecycle category of a stored match expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpressionEventCategory {
    /// A new expression was stored.
    Created,
    /// An expression was replaced.
    Updated,
    /// An expression was removed.
    Deleted,
}

/// Notification that a stored match expression changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionEvent {
    /// What happened.
    pub category: ExpressionEventCategory,
    /// Predicate text the event is about.
    pub expression: String,
}

impl ExpressionEvent {
    /// Event for `expression`.
    #[must_use]
    pub fn new(category: ExpressionEventCategory, expression: impl Into<String>) -> Self {
        Self {
            category,
            expression: expression.into(),
        }
    }
}

fn into_match_error(predicate: &str, err: ExpressionError) -> MatchError {
    match err {
        ExpressionError::Compile(e) => MatchError::Compile(e),
        ExpressionError::Eval(source) => MatchError::ExpressionEvalFailed {
            expression: predicate.to_string(),
            source,
        },
        ExpressionError::Internal { message } => MatchError::Internal { message },
    }
}

/// Evaluates predicates against target snapshots through a shared cache.
#[derive(Debug)]
pub struct MatchEvaluator<E: ExpressionEngine = BuiltinEngine> {
    cache: ExpressionCache<E>,
}

impl MatchEvaluator<BuiltinEngine> {
    /// Creates an evaluator backed by the built-in engine.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(ExpressionCache::new())
    }
}

impl Default for MatchEvaluator<BuiltinEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ExpressionEngine> MatchEvaluator<E> {
    /// Creates an evaluator over an existing cache.
    pub const fn with_cache(cache: ExpressionCache<E>) -> Self {
        Self { cache }
    }

    /// The underlying cache.
    pub const fn cache(&self) -> &ExpressionCache<E> {
        &self.cache
    }

    /// Returns whether `predicate` holds for `target`.
    ///
    /// Deterministic for a fixed predicate text and snapshot: the first result is
    /// memoized until the predicate is invalidated.
    pub fn applies(&self, predicate: &str, target: &TargetSnapshot) -> Result<bool, MatchError> {
        self.cache
            .evaluate(predicate, target)
            .map_err(|e| into_match_error(predicate, e))
    }

    /// Compiles `predicate` without evaluating it, caching the program.
    pub fn compile(&self, predicate: &str) -> Result<(), MatchError> {
        self.cache
            .compile(predicate)
            .map(|_| ())
            .map_err(|e| into_match_error(predicate, e))
    }

    /// Filters `targets` down to those matching `predicate`.
    ///
    /// The sequence is always drained exactly once. A predicate that fails to
    /// compile still consumes it and then returns the compile error. Targets whose
    /// evaluation fails are logged and excluded.
    pub fn matching_targets<I>(
        &self,
        predicate: &str,
        targets: I,
    ) -> Result<Vec<TargetSnapshot>, MatchError>
    where
        I: IntoIterator<Item = TargetSnapshot>,
    {
        if let Err(e) = self.compile(predicate) {
            let skipped = targets.into_iter().count();
            error!(
                expression = predicate,
                skipped,
                error = %e,
                "expression failed to compile, sweep matched nothing"
            );
            return Err(e);
        }

        let started = Instant::now();
        let mut failed = 0usize;
        let mut matched = Vec::new();
        for target in targets {
            match self.applies(predicate, &target) {
                Ok(true) => matched.push(target),
                Ok(false) => {}
                Err(e) => {
                    failed += 1;
                    error!(
                        expression = predicate,
                        target = target.alias(),
                        error = %e,
                        "error while processing expression"
                    );
                }
            }
        }

        debug!(
            expression = predicate,
            matched = matched.len(),
            failed,
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "match sweep complete"
        );
        Ok(matched)
    }

    /// Sweeps every target known to `source`.
    pub fn matched_targets(
        &self,
        predicate: &str,
        source: &dyn TargetSource,
    ) -> Result<Vec<TargetSnapshot>, MatchError> {
        self.matching_targets(predicate, source.stream_all())
    }

    /// Drops cached state for `predicate`.
    pub fn invalidate(&self, predicate: &str) -> usize {
        self.cache.invalidate(predicate)
    }

    /// Reacts to a stored expression changing.
    ///
    /// Expressions are not meant to be edited in place, but an update is still
    /// handled by invalidating.
    pub fn on_expression_event(&self, event: &ExpressionEvent) {
        match event.category {
            ExpressionEventCategory::Created => {}
            ExpressionEventCategory::Updated | ExpressionEventCategory::Deleted => {
                self.invalidate(&event.expression);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::{CompileError, EvalError};

    fn snap(alias: &str) -> TargetSnapshot {
        TargetSnapshot::new(format!("service:jmx:rmi:///jndi/rmi://{alias}:9091/jmxrmi"), alias)
    }

    #[test]
    fn applies_wraps_eval_failures() {
        let evaluator = MatchEvaluator::new();
        let err = evaluator
            .applies("target.labels.env == 'prod'", &snap("a"))
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::ExpressionEvalFailed {
                expression: "target.labels.env == 'prod'".to_string(),
                source: EvalError::NoSuchKey { key: "env".to_string() },
            }
        );
    }

    #[test]
    fn applies_surfaces_compile_errors() {
        let evaluator = MatchEvaluator::new();
        let err = evaluator.applies("target.alias ==", &snap("a")).unwrap_err();
        assert!(matches!(err, MatchError::Compile(CompileError::Syntax { .. })));
    }

    #[test]
    fn sweep_skips_failing_targets() {
        let evaluator = MatchEvaluator::new();
        let p = "target.labels.env == 'prod'";
        let t1 = snap("t1");
        let t2 = snap("t2").with_label("env", "prod");
        let t3 = snap("t3").with_label("env", "dev");

        let matched = evaluator
            .matching_targets(p, vec![t1, t2.clone(), t3])
            .unwrap();
        assert_eq!(matched, vec![t2]);
    }

    #[test]
    fn sweep_compile_error_still_drains_input() {
        let evaluator = MatchEvaluator::new();
        let mut pulled = 0;
        let targets = std::iter::from_fn(|| {
            pulled += 1;
            (pulled <= 3).then(|| snap("a"))
        });
        let err = evaluator.matching_targets("target.nope", targets).unwrap_err();
        assert!(matches!(err, MatchError::Compile(CompileError::UndefinedField { .. })));
        // Three targets plus the terminating `None`.
        assert_eq!(pulled, 4);
        assert!(evaluator.cache().is_empty());
    }

    #[test]
    fn compile_reports_errors_without_evaluating() {
        let evaluator = MatchEvaluator::new();
        evaluator.compile("target.alias == 'a'").unwrap();
        assert!(evaluator.cache().has_program("target.alias == 'a'"));
        assert!(evaluator.cache().is_empty());

        let err = evaluator.compile("target.alias ==").unwrap_err();
        assert!(matches!(err, MatchError::Compile(CompileError::Syntax { .. })));
    }

    #[test]
    fn update_and_delete_events_invalidate() {
        let evaluator = MatchEvaluator::new();
        let p = "target.alias == 'a'";
        evaluator.applies(p, &snap("a")).unwrap();
        assert_eq!(evaluator.cache().len(), 1);

        evaluator.on_expression_event(&ExpressionEvent::new(ExpressionEventCategory::Created, p));
        assert_eq!(evaluator.cache().len(), 1);

        evaluator.on_expression_event(&ExpressionEvent::new(ExpressionEventCategory::Updated, p));
        assert!(evaluator.cache().is_empty());

        evaluator.applies(p, &snap("a")).unwrap();
        evaluator.on_expression_event(&ExpressionEvent::new(ExpressionEventCategory::Deleted, p));
        assert!(evaluator.cache().is_empty());
    }
}
