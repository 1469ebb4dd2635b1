//! Executable programs and the pluggable engine seam.
//!
//! The cache only depends on `ExpressionEngine` and `Program`. `BuiltinEngine`
//! is the default implementation: parse, type-check, then tree-walk.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{CompileError, EvalError};
use crate::target::TargetSnapshot;

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::checker::{check_predicate, TARGET_VAR};
use super::parser::parse;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

pub(crate) fn cached_regex(pattern: &str) -> Result<regex::Regex, EvalError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache.read().map_err(|_| EvalError::Engine {
            message: "regex cache lock poisoned".to_string(),
        })?;
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern).map_err(|e| EvalError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut guard = cache.write().map_err(|_| EvalError::Engine {
        message: "regex cache lock poisoned".to_string(),
    })?;

    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }

    guard
        .entry(pattern.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// Runtime value produced while evaluating a program.
///
/// Values borrow from the bound target wherever possible.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    String(Cow<'a, str>),
    Map(&'a BTreeMap<String, String>),
    List(Vec<Value<'a>>),
    Target(&'a TargetSnapshot),
}

impl Value<'_> {
    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::String(_) => "string",
            Self::Map(_) => "map",
            Self::List(_) => "list",
            Self::Target(_) => "target",
        }
    }
}

/// Variables bound while running a program.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    /// The `target` variable.
    pub target: &'a TargetSnapshot,
}

impl<'a> Bindings<'a> {
    /// Bindings exposing `target` to the expression.
    #[must_use]
    pub const fn new(target: &'a TargetSnapshot) -> Self {
        Self { target }
    }
}

/// Compiled, reusable form of a predicate.
pub trait Program: Send + Sync + fmt::Debug {
    /// The source text this program was compiled from.
    fn source(&self) -> &str;

    /// Runs the program with the given bindings.
    fn run<'a>(&self, bindings: &Bindings<'a>) -> Result<Value<'a>, EvalError>;

    /// Stable content hash of the source text, used to correlate log lines.
    fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(self.source().as_bytes())
    }
}

/// Compiles predicate source into programs.
pub trait ExpressionEngine: Send + Sync {
    /// Compiles `source` against the target schema.
    fn compile(&self, source: &str) -> Result<Arc<dyn Program>, CompileError>;
}

/// Default tree-walking engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEngine;

impl ExpressionEngine for BuiltinEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn Program>, CompileError> {
        Ok(Arc::new(CompiledExpression::compile(source)?))
    }
}

/// A parsed and type-checked expression.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    fingerprint: blake3::Hash,
    root: Expr,
}

impl CompiledExpression {
    /// Parses and type-checks `source`.
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let root = parse(source)?;
        check_predicate(&root)?;
        Ok(Self {
            source: source.to_string(),
            fingerprint: blake3::hash(source.as_bytes()),
            root,
        })
    }
}

impl Program for CompiledExpression {
    fn source(&self) -> &str {
        &self.source
    }

    fn run<'a>(&self, bindings: &Bindings<'a>) -> Result<Value<'a>, EvalError> {
        eval(&self.root, bindings)
    }

    fn fingerprint(&self) -> blake3::Hash {
        self.fingerprint
    }
}

fn null_err(operation: &str) -> EvalError {
    EvalError::NullValue {
        operation: operation.to_string(),
    }
}

fn overflow(operation: &str) -> EvalError {
    EvalError::Overflow {
        operation: operation.to_string(),
    }
}

fn engine_err(message: impl Into<String>) -> EvalError {
    EvalError::Engine {
        message: message.into(),
    }
}

fn eval<'a>(expr: &Expr, bindings: &Bindings<'a>) -> Result<Value<'a>, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::String(s) => Value::String(Cow::Owned(s.clone())),
        }),

        Expr::Ident(name) if name == TARGET_VAR => Ok(Value::Target(bindings.target)),
        Expr::Ident(name) => Err(engine_err(format!("unbound variable '{name}'"))),

        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, bindings))
                .collect::<Result<_, _>>()?,
        )),

        Expr::Select { operand, field } => match eval(operand, bindings)? {
            Value::Target(t) => select_target(t, field),
            Value::Map(m) => lookup(m, field),
            other => Err(engine_err(format!("cannot select '{field}' on {}", other.type_name()))),
        },

        Expr::Index { operand, index } => {
            match (eval(operand, bindings)?, eval(index, bindings)?) {
                (Value::Map(m), Value::String(key)) => lookup(m, &key),
                (Value::List(items), Value::Int(i)) => {
                    let len = items.len();
                    usize::try_from(i)
                        .ok()
                        .and_then(|idx| items.into_iter().nth(idx))
                        .ok_or(EvalError::IndexOutOfRange { index: i, len })
                }
                (_, Value::Null) | (Value::Null, _) => Err(null_err("_[_]")),
                (a, b) => Err(engine_err(format!(
                    "cannot index {} with {}",
                    a.type_name(),
                    b.type_name()
                ))),
            }
        }

        Expr::Call {
            receiver,
            function,
            args,
        } => eval_call(receiver.as_deref(), function, args, bindings),

        Expr::Unary { op, operand } => match (op, eval(operand, bindings)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::Overflow {
                    operation: "-_".to_string(),
                }),
            (_, other) => Err(engine_err(format!("bad unary operand {}", other.type_name()))),
        },

        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, bindings),

        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => match eval(condition, bindings)? {
            Value::Bool(true) => eval(then, bindings),
            Value::Bool(false) => eval(otherwise, bindings),
            other => Err(EvalError::NotBoolean {
                found: other.type_name().to_string(),
            }),
        },
    }
}

fn select_target<'a>(target: &'a TargetSnapshot, field: &str) -> Result<Value<'a>, EvalError> {
    match field {
        "connectUrl" => Ok(Value::String(Cow::Borrowed(target.connect_url()))),
        "alias" => Ok(Value::String(Cow::Borrowed(target.alias()))),
        "jvmId" => Ok(target
            .jvm_id()
            .map_or(Value::Null, |id| Value::String(Cow::Borrowed(id)))),
        "labels" => Ok(Value::Map(target.labels())),
        "annotations" => Ok(Value::Map(target.annotations())),
        other => Err(engine_err(format!("no field '{other}' on target"))),
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, String>, key: &str) -> Result<Value<'a>, EvalError> {
    map.get(key)
        .map(|v| Value::String(Cow::Borrowed(v.as_str())))
        .ok_or_else(|| EvalError::NoSuchKey { key: key.to_string() })
}

fn as_bool(value: &Value<'_>, operation: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Err(null_err(operation)),
        other => Err(engine_err(format!("'{operation}' expects bool, got {}", other.type_name()))),
    }
}

fn eval_binary<'a>(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    bindings: &Bindings<'a>,
) -> Result<Value<'a>, EvalError> {
    match op {
        BinaryOp::And => {
            if !as_bool(&eval(lhs, bindings)?, "&&")? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(as_bool(&eval(rhs, bindings)?, "&&")?));
        }
        BinaryOp::Or => {
            if as_bool(&eval(lhs, bindings)?, "||")? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(as_bool(&eval(rhs, bindings)?, "||")?));
        }
        _ => {}
    }

    let l = eval(lhs, bindings)?;
    let r = eval(rhs, bindings)?;
    match (op, l, r) {
        (BinaryOp::Eq, a, b) => Ok(Value::Bool(a == b)),
        (BinaryOp::Ne, a, b) => Ok(Value::Bool(a != b)),

        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, a, b) => {
            let ordering = match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => x.cmp(y),
                (Value::String(x), Value::String(y)) => x.cmp(y),
                (Value::Null, _) | (_, Value::Null) => return Err(null_err(op.symbol())),
                _ => {
                    return Err(engine_err(format!(
                        "cannot compare {} with {}",
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        (BinaryOp::In, needle, Value::Map(m)) => match needle {
            Value::String(key) => Ok(Value::Bool(m.contains_key(&*key))),
            Value::Null => Err(null_err("in")),
            other => Err(engine_err(format!("map key must be string, got {}", other.type_name()))),
        },
        (BinaryOp::In, needle, Value::List(items)) => Ok(Value::Bool(items.contains(&needle))),

        (BinaryOp::Add, Value::Int(x), Value::Int(y)) => {
            x.checked_add(y).map(Value::Int).ok_or_else(|| overflow("+"))
        }
        (BinaryOp::Add, Value::String(x), Value::String(y)) => {
            Ok(Value::String(Cow::Owned(format!("{x}{y}"))))
        }
        (BinaryOp::Add, Value::List(mut x), Value::List(y)) => {
            x.extend(y);
            Ok(Value::List(x))
        }
        (BinaryOp::Sub, Value::Int(x), Value::Int(y)) => {
            x.checked_sub(y).map(Value::Int).ok_or_else(|| overflow("-"))
        }

        (_, Value::Null, _) | (_, _, Value::Null) => Err(null_err(op.symbol())),
        (_, a, b) => Err(engine_err(format!(
            "no runtime overload for '{}' on ({}, {})",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn string_arg<'a>(value: Value<'a>, operation: &str) -> Result<Cow<'a, str>, EvalError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(null_err(operation)),
        other => Err(engine_err(format!(
            "'{operation}' expects string, got {}",
            other.type_name()
        ))),
    }
}

fn size(value: &Value<'_>) -> Result<Value<'static>, EvalError> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Map(m) => m.len(),
        Value::List(items) => items.len(),
        Value::Null => return Err(null_err("size")),
        other => return Err(engine_err(format!("size() not defined for {}", other.type_name()))),
    };
    i64::try_from(len).map(Value::Int).map_err(|_| EvalError::Overflow {
        operation: "size".to_string(),
    })
}

fn eval_call<'a>(
    receiver: Option<&Expr>,
    function: &str,
    args: &[Expr],
    bindings: &Bindings<'a>,
) -> Result<Value<'a>, EvalError> {
    match (receiver, function, args) {
        (None, "has", [Expr::Select { operand, field }]) => match eval(operand, bindings)? {
            Value::Target(t) => Ok(Value::Bool(match field.as_str() {
                "jvmId" => t.jvm_id().is_some(),
                _ => true,
            })),
            Value::Map(m) => Ok(Value::Bool(m.contains_key(field))),
            other => Err(engine_err(format!("has() not defined for {}", other.type_name()))),
        },
        (None, "size", [arg]) => size(&eval(arg, bindings)?),
        (Some(recv), "size", []) => size(&eval(recv, bindings)?),
        (Some(recv), "contains" | "startsWith" | "endsWith" | "matches", [arg]) => {
            let subject = string_arg(eval(recv, bindings)?, function)?;
            let needle = string_arg(eval(arg, bindings)?, function)?;
            let hit = match function {
                "contains" => subject.contains(&*needle),
                "startsWith" => subject.starts_with(&*needle),
                "endsWith" => subject.ends_with(&*needle),
                _ => cached_regex(&needle)?.is_match(&subject),
            };
            Ok(Value::Bool(hit))
        }
        _ => Err(engine_err(format!("no runtime overload for function '{function}'"))),
    }
}
