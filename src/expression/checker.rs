//! Static type checking against the target schema.
//!
//! The only bound variable is `target`. Its fields are fixed: `connectUrl`,
//! `alias`, `jvmId` (nullable), `labels` and `annotations` (string maps).

use std::fmt;

use crate::error::{CompileError, EvalError};

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::program::cached_regex;

/// Name of the single bound variable.
pub const TARGET_VAR: &str = "target";

/// Static type of an expression node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    String,
    /// A string that may be absent at run time (`target.jvmId`).
    NullableString,
    Null,
    StringMap,
    Target,
    List(Box<Type>),
    /// Element type of an empty list literal.
    Dyn,
}

impl Type {
    const fn is_stringish(&self) -> bool {
        matches!(self, Self::String | Self::NullableString | Self::Dyn)
    }

    fn is_list(&self) -> bool {
        matches!(self, Self::List(_) | Self::Dyn)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::String => f.write_str("string"),
            Self::NullableString => f.write_str("string?"),
            Self::Null => f.write_str("null"),
            Self::StringMap => f.write_str("map(string, string)"),
            Self::Target => f.write_str("target"),
            Self::List(elem) => write!(f, "list({elem})"),
            Self::Dyn => f.write_str("dyn"),
        }
    }
}

fn comparable(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Dyn, _) | (_, Type::Dyn) => true,
        (Type::List(x), Type::List(y)) => comparable(x, y),
        (Type::String | Type::NullableString, Type::String | Type::NullableString)
        | (Type::Null | Type::NullableString, Type::Null | Type::NullableString) => true,
        _ => a == b,
    }
}

fn no_overload(operation: impl Into<String>, operands: &[&Type]) -> CompileError {
    CompileError::NoMatchingOverload {
        operation: operation.into(),
        operands: operands
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn target_field(field: &str) -> Result<Type, CompileError> {
    match field {
        "connectUrl" | "alias" => Ok(Type::String),
        "jvmId" => Ok(Type::NullableString),
        "labels" | "annotations" => Ok(Type::StringMap),
        other => Err(CompileError::UndefinedField {
            field: other.to_string(),
            on: TARGET_VAR.to_string(),
        }),
    }
}

/// Checks that `expr` is a well-typed boolean expression.
pub fn check_predicate(expr: &Expr) -> Result<(), CompileError> {
    let ty = check(expr)?;
    match ty {
        Type::Bool | Type::Dyn => Ok(()),
        other => Err(CompileError::NotBoolean {
            found: other.to_string(),
        }),
    }
}

/// Infers the static type of `expr`.
pub fn check(expr: &Expr) -> Result<Type, CompileError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::Bool,
            Literal::Int(_) => Type::Int,
            Literal::String(_) => Type::String,
        }),

        Expr::Ident(name) => {
            if name == TARGET_VAR {
                Ok(Type::Target)
            } else {
                Err(CompileError::UndeclaredReference { name: name.clone() })
            }
        }

        Expr::List(items) => {
            let mut elem = Type::Dyn;
            for item in items {
                let ty = check(item)?;
                if elem == Type::Dyn {
                    elem = ty;
                } else if !comparable(&elem, &ty) {
                    return Err(no_overload("list literal", &[&elem, &ty]));
                }
            }
            Ok(Type::List(Box::new(elem)))
        }

        Expr::Select { operand, field } => match check(operand)? {
            Type::Target => target_field(field),
            Type::StringMap => Ok(Type::String),
            other => Err(CompileError::UndefinedField {
                field: field.clone(),
                on: other.to_string(),
            }),
        },

        Expr::Index { operand, index } => {
            let operand_ty = check(operand)?;
            let index_ty = check(index)?;
            match (&operand_ty, &index_ty) {
                (Type::StringMap, t) if t.is_stringish() => Ok(Type::String),
                (Type::List(elem), Type::Int | Type::Dyn) => Ok((**elem).clone()),
                _ => Err(no_overload("_[_]", &[&operand_ty, &index_ty])),
            }
        }

        Expr::Call {
            receiver,
            function,
            args,
        } => check_call(receiver.as_deref(), function, args),

        Expr::Unary { op, operand } => {
            let ty = check(operand)?;
            match (op, &ty) {
                (UnaryOp::Not, Type::Bool | Type::Dyn) => Ok(Type::Bool),
                (UnaryOp::Neg, Type::Int | Type::Dyn) => Ok(Type::Int),
                (UnaryOp::Not, _) => Err(no_overload("!_", &[&ty])),
                (UnaryOp::Neg, _) => Err(no_overload("-_", &[&ty])),
            }
        }

        Expr::Binary { op, lhs, rhs } => {
            let l = check(lhs)?;
            let r = check(rhs)?;
            check_binary(*op, &l, &r)
        }

        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            let cond = check(condition)?;
            if !matches!(cond, Type::Bool | Type::Dyn) {
                return Err(no_overload("_?_:_", &[&cond]));
            }
            let a = check(then)?;
            let b = check(otherwise)?;
            if !comparable(&a, &b) {
                return Err(no_overload("_?_:_", &[&cond, &a, &b]));
            }
            Ok(if a == Type::Dyn || a == Type::Null { b } else { a })
        }
    }
}

fn check_binary(op: BinaryOp, l: &Type, r: &Type) -> Result<Type, CompileError> {
    let ok = match op {
        BinaryOp::And | BinaryOp::Or => {
            matches!(l, Type::Bool | Type::Dyn) && matches!(r, Type::Bool | Type::Dyn)
        }
        BinaryOp::Eq | BinaryOp::Ne => comparable(l, r),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            (matches!(l, Type::Int | Type::Dyn) && matches!(r, Type::Int | Type::Dyn))
                || (l.is_stringish() && r.is_stringish())
        }
        BinaryOp::In => match r {
            Type::StringMap => l.is_stringish(),
            Type::List(elem) => comparable(l, elem),
            Type::Dyn => true,
            _ => false,
        },
        BinaryOp::Add => {
            return match (l, r) {
                (Type::Int, Type::Int) => Ok(Type::Int),
                (a, b) if a.is_stringish() && b.is_stringish() && *a != Type::Dyn => {
                    Ok(Type::String)
                }
                (Type::List(a), Type::List(b)) if comparable(a, b) => {
                    Ok(Type::List(if **a == Type::Dyn { b.clone() } else { a.clone() }))
                }
                (Type::Dyn, other) | (other, Type::Dyn) => Ok(other.clone()),
                _ => Err(no_overload(op.symbol(), &[l, r])),
            };
        }
        BinaryOp::Sub => matches!(l, Type::Int | Type::Dyn) && matches!(r, Type::Int | Type::Dyn),
    };

    if !ok {
        return Err(no_overload(op.symbol(), &[l, r]));
    }
    Ok(if op == BinaryOp::Sub { Type::Int } else { Type::Bool })
}

fn check_call(
    receiver: Option<&Expr>,
    function: &str,
    args: &[Expr],
) -> Result<Type, CompileError> {
    match (receiver, function) {
        (None, "has") => {
            let [arg] = args else {
                return Err(no_overload("has", &[]));
            };
            let Expr::Select { operand, field } = arg else {
                return Err(CompileError::Syntax {
                    offset: 0,
                    message: "has() requires a field selection argument".to_string(),
                });
            };
            match check(operand)? {
                Type::Target => target_field(field).map(|_| Type::Bool),
                Type::StringMap => Ok(Type::Bool),
                other => Err(no_overload("has", &[&other])),
            }
        }

        (None, "size") => {
            let [arg] = args else {
                return Err(no_overload("size", &[]));
            };
            size_of(&check(arg)?)
        }

        (Some(recv), "size") => {
            if !args.is_empty() {
                return Err(no_overload("size", &[]));
            }
            size_of(&check(recv)?)
        }

        (Some(recv), "contains" | "startsWith" | "endsWith" | "matches") => {
            let recv_ty = check(recv)?;
            let arg_tys = args.iter().map(check).collect::<Result<Vec<_>, _>>()?;
            let [arg_ty] = arg_tys.as_slice() else {
                return Err(no_overload(function, &[&recv_ty]));
            };
            if !recv_ty.is_stringish() || !arg_ty.is_stringish() {
                return Err(no_overload(function, &[&recv_ty, arg_ty]));
            }
            if function == "matches" {
                if let [Expr::Literal(Literal::String(pattern))] = args {
                    cached_regex(pattern).map_err(|e| CompileError::InvalidRegex {
                        pattern: pattern.clone(),
                        reason: match e {
                            EvalError::InvalidRegex { reason, .. } => reason,
                            other => other.to_string(),
                        },
                    })?;
                }
            }
            Ok(Type::Bool)
        }

        _ => Err(CompileError::UndeclaredFunction {
            name: function.to_string(),
        }),
    }
}

fn size_of(ty: &Type) -> Result<Type, CompileError> {
    if ty.is_stringish() || ty.is_list() || *ty == Type::StringMap {
        Ok(Type::Int)
    } else {
        Err(no_overload("size", &[ty]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::parse;

    fn check_src(src: &str) -> Result<(), CompileError> {
        check_predicate(&parse(src)?)
    }

    #[test]
    fn accepts_schema_fields() {
        check_src("target.alias == 'a' && target.connectUrl.contains('9091')").unwrap();
        check_src("target.jvmId == null || target.jvmId.startsWith('x')").unwrap();
        check_src("'app' in target.labels && target.labels.app == 'web'").unwrap();
        check_src("has(target.annotations.PORT) && size(target.annotations) > 0").unwrap();
        check_src("target.alias in ['a', 'b']").unwrap();
    }

    #[test]
    fn rejects_unknown_variable() {
        assert_eq!(
            check_src("process.alias == 'a'").unwrap_err(),
            CompileError::UndeclaredReference {
                name: "process".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_field() {
        let err = check_src("target.pid == 1").unwrap_err();
        assert!(matches!(err, CompileError::UndefinedField { ref field, .. } if field == "pid"));
    }

    #[test]
    fn rejects_type_mismatch() {
        let err = check_src("target.alias == 1").unwrap_err();
        assert!(matches!(err, CompileError::NoMatchingOverload { .. }), "got {err:?}");
        assert!(matches!(
            check_src("target.alias && true").unwrap_err(),
            CompileError::NoMatchingOverload { .. }
        ));
    }

    #[test]
    fn rejects_non_boolean_result() {
        assert_eq!(
            check_src("target.alias").unwrap_err(),
            CompileError::NotBoolean {
                found: "string".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_function_and_bad_regex() {
        assert!(matches!(
            check_src("target.alias.lower() == 'a'").unwrap_err(),
            CompileError::UndeclaredFunction { .. }
        ));
        assert!(matches!(
            check_src("target.alias.matches('(')").unwrap_err(),
            CompileError::InvalidRegex { .. }
        ));
    }
}
