//! Error types for autorules.
//!
//! All errors are strongly typed using thiserror so callers can pattern match on
//! the specific failure: a predicate that does not compile, a program that fails
//! against one target, or a job body that failed on a worker.

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid rule: {reason}")]
    InvalidRule {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// A predicate failed to parse or type-check.
///
/// Compile errors are never cached: compiling the same text again re-runs the
/// compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax {
        offset: usize,
        message: String,
    },

    #[error("Undeclared reference to '{name}'")]
    UndeclaredReference {
        name: String,
    },

    #[error("Undefined field '{field}' on {on}")]
    UndefinedField {
        field: String,
        on: String,
    },

    #[error("Undeclared function '{name}'")]
    UndeclaredFunction {
        name: String,
    },

    #[error("Found no matching overload for '{operation}' applied to ({operands})")]
    NoMatchingOverload {
        operation: String,
        operands: String,
    },

    #[error("Expression must evaluate to bool, found {found}")]
    NotBoolean {
        found: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Expression exceeds maximum length of {max_length}")]
    TooLong {
        max_length: usize,
    },

    #[error("Expression exceeds maximum nesting depth of {max_depth}")]
    TooDeep {
        max_depth: usize,
    },
}

/// A compiled program failed while running against a specific target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("No such key: {key}")]
    NoSuchKey {
        key: String,
    },

    #[error("Cannot apply '{operation}' to null")]
    NullValue {
        operation: String,
    },

    #[error("Index {index} out of range for list of size {len}")]
    IndexOutOfRange {
        index: i64,
        len: usize,
    },

    #[error("Integer overflow in '{operation}'")]
    Overflow {
        operation: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Expression returned {found}, expected bool")]
    NotBoolean {
        found: String,
    },

    #[error("Expression engine error: {message}")]
    Engine {
        message: String,
    },
}

/// Errors surfaced by the expression cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

/// Errors surfaced by the match evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Failed to evaluate expression '{expression}': {source}")]
    ExpressionEvalFailed {
        expression: String,
        #[source]
        source: EvalError,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

/// Failure reported by a collaborator action (archive, upload, report).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    /// Creates an action error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The collaborator-supplied message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a job body failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    #[error("Action timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Job body panicked: {message}")]
    Panicked {
        message: String,
    },

    #[error("Failed to spawn action thread: {message}")]
    Spawn {
        message: String,
    },

    #[error("Too many timed-out actions still running ({outstanding}, limit {limit})")]
    Stalled {
        outstanding: usize,
        limit: usize,
    },
}

/// Execution errors raised by the job pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Job queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Job {job_id} failed: {source}")]
    JobExecutionFailed {
        job_id: String,
        #[source]
        source: JobError,
    },
}

/// Top-level error type for autorules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutoRulesError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl AutoRulesError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a match error.
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Match(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for autorules operations.
pub type AutoRulesResult<T> = Result<T, AutoRulesError>;
