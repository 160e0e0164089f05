// ABOUTME: Postfix-method builtins (`.upper`, `.len`, `.keys`, ...) and
// binary/unary operators, reachable from any pipe value without a host
// round-trip. Dispatch is by receiver variant, arity-checked per method,
// mirroring the teacher's category-per-file builtin modules.

use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;

pub mod dicts;
pub mod lists;
pub mod numeric;
pub mod ops;
pub mod strings;

/// Dispatches a postfix method call by receiver type. `.?name` existence
/// checks are handled one layer up in eval.rs, which swallows this
/// function's `Err` and returns `Value::Null` instead.
pub fn call_method(value: &Value, name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => strings::call(s, name, args, span),
        Value::Number(n) => numeric::call(*n, name, args, span),
        Value::List(items) => lists::call(items, name, args, span),
        Value::Dict(dict) => dicts::call(dict, name, args, span),
        Value::Bool(_) | Value::Null | Value::Tuple(_) | Value::Callable(_) => {
            Err(EvalError::host_error(name, format!("no method `{name}` on {}", value.type_name()), span))
        }
    }
}

pub(crate) fn arity(name: &str, expected: &str, actual: usize, span: Span) -> EvalError {
    EvalError::ArityMismatch { name: name.to_string(), expected: expected.to_string(), actual, span }
}

pub(crate) fn expect_string<'a>(value: &'a Value, span: Span) -> Result<&'a str, EvalError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(EvalError::type_mismatch("string", other.type_name(), span)),
    }
}

pub(crate) fn expect_number(value: &Value, span: Span) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(EvalError::type_mismatch("number", other.type_name(), span)),
    }
}
