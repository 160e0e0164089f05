// ABOUTME: Number postfix methods (`.round`, `.abs`, ...). Grounded on the
// teacher's `builtins/arithmetic.rs` variadic-free-function shape,
// narrowed to single-receiver methods.

use super::arity;
use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;

pub fn call(n: f64, name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
    if !args.is_empty() {
        return Err(arity(name, "0", args.len(), span));
    }
    match name {
        "round" => Ok(Value::Number(n.round())),
        "floor" => Ok(Value::Number(n.floor())),
        "ceil" => Ok(Value::Number(n.ceil())),
        "abs" => Ok(Value::Number(n.abs())),
        "sqrt" => Ok(Value::Number(n.sqrt())),
        "to_string" => Ok(Value::String(Value::Number(n).to_string())),
        other => Err(EvalError::host_error(other, format!("no number method `.{other}`"), span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    fn span() -> Span {
        Span::point(Position::start())
    }

    #[test]
    fn round_and_abs() {
        assert_eq!(call(2.6, "round", &[], span()).unwrap(), Value::Number(3.0));
        assert_eq!(call(-4.0, "abs", &[], span()).unwrap(), Value::Number(4.0));
    }
}
