//! Match expression compilation, evaluation and caching.
//!
//! Predicates are written in a small CEL-style language over a single bound
//! variable, `target`. The engine behind compilation is pluggable through
//! `ExpressionEngine`; the cache and evaluator only see `Program`s.

/// Syntax tree.
pub mod ast;
/// Program and result memoization.
pub mod cache;
/// Static type checking.
pub mod checker;
/// Lexer and parser.
pub mod parser;
/// Engine seam and the built-in interpreter.
pub mod program;

pub use cache::{CacheStats, ExpressionCache, MatchCacheKey};
pub use program::{Bindings, BuiltinEngine, CompiledExpression, ExpressionEngine, Program, Value};
