// ABOUTME: List postfix methods (`.len`, `.first`, `.sort`, ...). Grounded
// on the teacher's `builtins/lists.rs` (`car`/`cdr`/`length`/`empty?`),
// generalized from `cons`-list free functions to methods on `Value::List`.

use super::{arity, expect_number};
use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;

pub fn call(items: &[Value], name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
    match name {
        "len" => {
            no_args(name, args, span)?;
            Ok(Value::Number(items.len() as f64))
        }
        "empty" => {
            no_args(name, args, span)?;
            Ok(Value::Bool(items.is_empty()))
        }
        "first" => {
            no_args(name, args, span)?;
            items.first().cloned().ok_or_else(|| EvalError::host_error(name, "first of empty list", span))
        }
        "last" => {
            no_args(name, args, span)?;
            items.last().cloned().ok_or_else(|| EvalError::host_error(name, "last of empty list", span))
        }
        "rest" => {
            no_args(name, args, span)?;
            Ok(Value::list(items.get(1..).unwrap_or(&[]).to_vec()))
        }
        "reverse" => {
            no_args(name, args, span)?;
            let mut out = items.to_vec();
            out.reverse();
            Ok(Value::list(out))
        }
        "sort" => {
            no_args(name, args, span)?;
            let mut out = items.to_vec();
            out.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            Ok(Value::list(out))
        }
        "contains" => {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len(), span));
            }
            Ok(Value::Bool(items.contains(&args[0])))
        }
        "push" => {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len(), span));
            }
            let mut out = items.to_vec();
            out.push(args[0].clone());
            Ok(Value::list(out))
        }
        "join" => {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len(), span));
            }
            let delim = match &args[0] {
                Value::String(s) => s.clone(),
                other => return Err(EvalError::type_mismatch("string", other.type_name(), span)),
            };
            Ok(Value::String(items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&delim)))
        }
        "at" => {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len(), span));
            }
            let idx = expect_number(&args[0], span)? as i64;
            let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
            if resolved < 0 || resolved as usize >= items.len() {
                return Err(EvalError::IndexOutOfBounds { index: idx, length: items.len(), span });
            }
            Ok(items[resolved as usize].clone())
        }
        other => Err(EvalError::host_error(other, format!("no list method `.{other}`"), span)),
    }
}

fn no_args(name: &str, args: &[Value], span: Span) -> Result<(), EvalError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(arity(name, "0", args.len(), span))
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
    fn len_and_first_last() {
        let items = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        assert_eq!(call(&items, "len", &[], span()).unwrap(), Value::Number(3.0));
        assert_eq!(call(&items, "first", &[], span()).unwrap(), Value::Number(1.0));
        assert_eq!(call(&items, "last", &[], span()).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn first_of_empty_list_is_an_error() {
        assert!(call(&[], "first", &[], span()).is_err());
    }

    #[test]
    fn reverse_does_not_mutate_receiver() {
        let items = vec![Value::Number(1.0), Value::Number(2.0)];
        let reversed = call(&items, "reverse", &[], span()).unwrap();
        assert_eq!(reversed, Value::list(vec![Value::Number(2.0), Value::Number(1.0)]));
    }
}
