// ABOUTME: Dict postfix methods (`.has`, `.get`, `.merge`, ...). `keys`,
// `values`, `entries` are reserved field names handled directly by
// `eval::field_of`, not here — this module covers everything reachable
// only via an explicit method call. Grounded on the teacher's
// `builtins/maps.rs` (`map-get`/`map-set`/`map-has?`/`map-merge`).

use super::arity;
use crate::error::EvalError;
use crate::span::Span;
use crate::value::{Dict, Value};

pub fn call(dict: &Dict, name: &str, args: &[Value], span: Span) -> Result<Value, EvalError> {
    match name {
        "has" => {
            let key = one_string_arg(name, args, span)?;
            Ok(Value::Bool(dict.get(key).is_some()))
        }
        "get" => {
            if args.is_empty() || args.len() > 2 {
                return Err(arity(name, "1 or 2", args.len(), span));
            }
            let key = match &args[0] {
                Value::String(s) => s.as_str(),
                other => return Err(EvalError::type_mismatch("string", other.type_name(), span)),
            };
            match dict.get(key) {
                Some(v) => Ok(v.clone()),
                None => Ok(args.get(1).cloned().unwrap_or(Value::Null)),
            }
        }
        "set" => {
            if args.len() != 2 {
                return Err(arity(name, "2", args.len(), span));
            }
            let key = match &args[0] {
                Value::String(s) => s.clone(),
                other => return Err(EvalError::type_mismatch("string", other.type_name(), span)),
            };
            Ok(Value::dict(dict.with(key, args[1].clone())))
        }
        "remove" => {
            let key = one_string_arg(name, args, span)?;
            Ok(Value::dict(Dict::from_entries(dict.iter().filter(|(k, _)| k != key).cloned().collect())))
        }
        "merge" => {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len(), span));
            }
            match &args[0] {
                Value::Dict(other) => {
                    let mut entries = dict.iter().cloned().collect::<Vec<_>>();
                    for (k, v) in other.iter() {
                        entries.retain(|(ek, _)| ek != k);
                        entries.push((k.clone(), v.clone()));
                    }
                    Ok(Value::dict(Dict::from_entries(entries)))
                }
                other => Err(EvalError::type_mismatch("dict", other.type_name(), span)),
            }
        }
        "size" => {
            no_args(name, args, span)?;
            Ok(Value::Number(dict.len() as f64))
        }
        "empty" => {
            no_args(name, args, span)?;
            Ok(Value::Bool(dict.is_empty()))
        }
        other => Err(EvalError::host_error(other, format!("no dict method `.{other}`"), span)),
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
    match &args[0] {
        Value::String(s) => Ok(s),
        other => Err(EvalError::type_mismatch("string", other.type_name(), span)),
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
    fn has_and_get() {
        let dict = Dict::from_entries(vec![("a".into(), Value::Number(1.0))]);
        assert_eq!(call(&dict, "has", &[Value::String("a".into())], span()).unwrap(), Value::Bool(true));
        assert_eq!(call(&dict, "get", &[Value::String("b".into())], span()).unwrap(), Value::Null);
    }

    #[test]
    fn set_returns_a_new_dict() {
        let dict = Dict::from_entries(vec![("a".into(), Value::Number(1.0))]);
        let updated = call(&dict, "set", &[Value::String("b".into()), Value::Number(2.0)], span()).unwrap();
        assert_eq!(dict.get("b"), None);
        if let Value::Dict(d) = updated {
            assert_eq!(d.get("b"), Some(&Value::Number(2.0)));
        } else {
            panic!("expected dict");
        }
    }
}
