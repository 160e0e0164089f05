// ABOUTME: String postfix methods (`.upper`, `.split`, `.trim`, ...).
// Grounded on the teacher's `builtins/strings.rs` category, adapted from
// free host functions taking an explicit receiver arg to methods taking
// the receiver separately from `args`.

use super::{arity, expect_number, expect_string};
use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;

pub fn call(s: &str, name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
    match name {
        "upper" => {
            no_args(name, args, span)?;
            Ok(Value::String(s.to_uppercase()))
        }
        "lower" => {
            no_args(name, args, span)?;
            Ok(Value::String(s.to_lowercase()))
        }
        "trim" => {
            no_args(name, args, span)?;
            Ok(Value::String(s.trim().to_string()))
        }
        "len" => {
            no_args(name, args, span)?;
            Ok(Value::Number(s.chars().count() as f64))
        }
        "empty" => {
            no_args(name, args, span)?;
            Ok(Value::Bool(s.is_empty()))
        }
        "split" => {
            let delim = one_string_arg(name, args, span)?;
            Ok(Value::list(s.split(delim).map(|p| Value::String(p.to_string())).collect()))
        }
        "contains" => {
            let needle = one_string_arg(name, args, span)?;
            Ok(Value::Bool(s.contains(needle)))
        }
        "starts_with" => {
            let prefix = one_string_arg(name, args, span)?;
            Ok(Value::Bool(s.starts_with(prefix)))
        }
        "ends_with" => {
            let suffix = one_string_arg(name, args, span)?;
            Ok(Value::Bool(s.ends_with(suffix)))
        }
        "replace" => {
            if args.len() != 2 {
                return Err(arity(name, "2", args.len(), span));
            }
            let pattern = expect_string(&args[0], span)?;
            let replacement = expect_string(&args[1], span)?;
            Ok(Value::String(s.replace(pattern, replacement)))
        }
        "slice" => {
            if args.len() != 2 {
                return Err(arity(name, "2", args.len(), span));
            }
            let start = expect_number(&args[0], span)? as usize;
            let end = expect_number(&args[1], span)? as usize;
            let chars: Vec<char> = s.chars().collect();
            if start > chars.len() || end > chars.len() || start > end {
                return Err(EvalError::IndexOutOfBounds { index: end as i64, length: chars.len(), span });
            }
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "to_number" => {
            no_args(name, args, span)?;
            s.trim().parse::<f64>().map(Value::Number).map_err(|_| EvalError::host_error(name, format!("cannot parse `{s}` as a number"), span))
        }
        "chars" => {
            no_args(name, args, span)?;
            Ok(Value::list(s.chars().map(|c| Value::String(c.to_string())).collect()))
        }
        other => Err(EvalError::host_error(other, format!("no string method `.{other}`"), span)),
    }
}

fn no_args(name: &str, args: &[Value], span: Span) -> Result<(), EvalError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(arity(name, "0", args.len(), span))
    }
}

fn one_string_arg<'a>(name: &str, args: &'a [Value], span: Span) -> Result<&'a str, EvalError> {
    if args.len() != 1 {
        return Err(arity(name, "1", args.len(), span));
    }
    expect_string(&args[0], span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    fn span() -> Span {
        Span::point(Position::start())
    }

    #[test]
    fn upper_and_lower_round_trip() {
        assert_eq!(call("Hello", "upper", &[], span()).unwrap(), Value::String("HELLO".into()));
        assert_eq!(call("Hello", "lower", &[], span()).unwrap(), Value::String("hello".into()));
    }

    #[test]
    fn split_on_delimiter() {
        let result = call("a,b,c", "split", &[Value::String(",".into())], span()).unwrap();
        assert_eq!(result, Value::list(vec![Value::String("a".into()), Value::String("b".into()), Value::String("c".into())]));
    }

    #[test]
    fn unknown_method_is_a_host_error() {
        assert!(call("x", "nonsense", &[], span()).is_err());
    }
}
