//! Compiled program and match result cache.
//!
//! Programs are memoized by exact predicate text; boolean results are memoized by
//! `(predicate text, target snapshot)`. Failures are never cached. Invalidation
//! drops the program and every result recorded for a predicate text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::{EvalError, ExpressionError};
use crate::target::TargetSnapshot;

use super::program::{Bindings, BuiltinEngine, ExpressionEngine, Program, Value};

/// Memoization key for a single match result.
///
/// Equality is structural over both the predicate text and the full snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchCacheKey {
    predicate: String,
    target: TargetSnapshot,
}

impl MatchCacheKey {
    /// Key for `predicate` evaluated against `target`.
    #[must_use]
    pub fn new(predicate: impl Into<String>, target: TargetSnapshot) -> Self {
        Self {
            predicate: predicate.into(),
            target,
        }
    }

    /// The predicate text.
    #[must_use]
    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    /// The target snapshot.
    #[must_use]
    pub const fn target(&self) -> &TargetSnapshot {
        &self.target
    }
}

/// Point-in-time cache counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub invalidations: u64,
}

fn poisoned(what: &str) -> ExpressionError {
    ExpressionError::Internal {
        message: format!("{what} lock poisoned"),
    }
}

/// Thread-safe expression cache.
///
/// All state is internally synchronized; callers never lock.
pub struct ExpressionCache<E: ExpressionEngine = BuiltinEngine> {
    engine: E,
    programs: RwLock<HashMap<String, Arc<dyn Program>>>,
    results: RwLock<HashMap<MatchCacheKey, bool>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    invalidations: AtomicU64,
}

impl ExpressionCache<BuiltinEngine> {
    /// Creates a cache backed by the built-in engine.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(BuiltinEngine)
    }
}

impl Default for ExpressionCache<BuiltinEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ExpressionEngine> std::fmt::Debug for ExpressionCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<E: ExpressionEngine> ExpressionCache<E> {
    /// Creates a cache backed by a custom engine.
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            programs: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// The engine used for compilation.
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the cached program for `predicate`, compiling it on first use.
    ///
    /// Compile errors are returned as-is and leave the cache untouched.
    pub fn compile(&self, predicate: &str) -> Result<Arc<dyn Program>, ExpressionError> {
        {
            let guard = self.programs.read().map_err(|_| poisoned("program cache"))?;
            if let Some(program) = guard.get(predicate) {
                return Ok(Arc::clone(program));
            }
        }

        let compiled = self.engine.compile(predicate)?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(
            predicate,
            fingerprint = %compiled.fingerprint().to_hex(),
            "compiled match expression"
        );

        let mut guard = self.programs.write().map_err(|_| poisoned("program cache"))?;
        // Another thread may have inserted it while we compiled.
        let program = guard.entry(predicate.to_string()).or_insert(compiled);
        Ok(Arc::clone(program))
    }

    /// Evaluates `predicate` against `target`, memoizing the boolean result.
    pub fn evaluate(
        &self,
        predicate: &str,
        target: &TargetSnapshot,
    ) -> Result<bool, ExpressionError> {
        let key = MatchCacheKey::new(predicate, target.clone());

        {
            let guard = self.results.read().map_err(|_| poisoned("result cache"))?;
            if let Some(&hit) = guard.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let program = self.compile(predicate)?;
        let value = match program.run(&Bindings::new(target))? {
            Value::Bool(b) => b,
            other => {
                return Err(EvalError::NotBoolean {
                    found: other.type_name().to_string(),
                }
                .into());
            }
        };

        let mut guard = self.results.write().map_err(|_| poisoned("result cache"))?;
        guard.insert(key, value);
        Ok(value)
    }

    /// Drops the program and every memoized result for `predicate`.
    ///
    /// Best-effort: a poisoned lock is logged and skipped. Returns the number of
    /// result entries removed. Results inserted by evaluations that were already
    /// running when this began may survive.
    pub fn invalidate(&self, predicate: &str) -> usize {
        self.invalidations.fetch_add(1, Ordering::Relaxed);

        match self.programs.write() {
            Ok(mut guard) => {
                guard.remove(predicate);
            }
            Err(_) => warn!(predicate, "program cache lock poisoned during invalidation"),
        }

        let removed = match self.results.write() {
            Ok(mut guard) => {
                let before = guard.len();
                guard.retain(|key, _| key.predicate() != predicate);
                before - guard.len()
            }
            Err(_) => {
                warn!(predicate, "result cache lock poisoned during invalidation");
                0
            }
        };

        debug!(predicate, removed, "invalidated match expression");
        removed
    }

    /// Returns true if a result is memoized for `key`.
    #[must_use]
    pub fn contains(&self, key: &MatchCacheKey) -> bool {
        self.results
            .read()
            .map(|guard| guard.contains_key(key))
            .unwrap_or(false)
    }

    /// Returns true if a program is cached for `predicate`.
    #[must_use]
    pub fn has_program(&self, predicate: &str) -> bool {
        self.programs
            .read()
            .map(|guard| guard.contains_key(predicate))
            .unwrap_or(false)
    }

    /// Number of memoized results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true when no result is memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
