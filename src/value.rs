// ABOUTME: The Rill value model: the closed set of runtime values and their
// equality, truthiness, formatting, and type-inference rules.

use crate::ast::{ClosureBody, ClosureDef};
use crate::env::Scope;
use crate::host::HostFunction;
use std::fmt;
use std::rc::{Rc, Weak};

/// An ordered, string-keyed mapping. Insertion order is preserved; lookups
/// are linear, which is fine at script scale and keeps equality/iteration
/// order trivially consistent with insertion order.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(String, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Dict { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        let mut dict = Dict::new();
        for (k, v) in entries {
            dict.insert(k, v);
        }
        dict
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or overwrites a key, preserving the position of the first
    /// insertion for overwrites.
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Returns a new dict with `key` set to `value`, leaving `self` untouched.
    pub fn with(&self, key: String, value: Value) -> Dict {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| Value::String(k.clone())).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn entries(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::Tuple(Rc::new(Tuple::positional(vec![Value::String(k.clone()), v.clone()]))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }
}

impl Dict {
    /// Builds a dict from `entries`, binding every closure value in it to
    /// the dict being constructed so `self.method` resolves at call time
    /// (§3 "Closures" — method binding). Uses `Rc::new_cyclic` so the
    /// closure's back-reference is a `Weak` pointing at the very `Rc<Dict>`
    /// being returned, avoiding a reference cycle (§9 "Cyclic references").
    pub fn with_bound_callables(entries: Vec<(String, Value)>) -> Rc<Dict> {
        Rc::new_cyclic(|weak: &Weak<Dict>| {
            let bound = entries
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::Callable(Callable::Closure(c)) => {
                            let bound = Closure { bound: Some(weak.clone()), ..(*c).clone() };
                            Value::Callable(Callable::Closure(Rc::new(bound)))
                        }
                        other => other,
                    };
                    (k, v)
                })
                .collect();
            Dict::from_entries(bound)
        })
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

/// A fixed, positional+named argument bundle. Keys are `number | string`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

impl Tuple {
    pub fn positional(values: Vec<Value>) -> Self {
        Tuple { positional: values, named: Vec::new() }
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// A parameter binding: name, optional type tag, optional default literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_tag: Option<TypeTag>,
    pub default: Option<crate::ast::Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Number,
    Bool,
    List,
    Dict,
    Callable,
    Any,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Bool => "bool",
            TypeTag::List => "list",
            TypeTag::Dict => "dict",
            TypeTag::Callable => "callable",
            TypeTag::Any => "any",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            TypeTag::Any => true,
            TypeTag::String => matches!(value, Value::String(_)),
            TypeTag::Number => matches!(value, Value::Number(_)),
            TypeTag::Bool => matches!(value, Value::Bool(_)),
            TypeTag::List => matches!(value, Value::List(_)),
            TypeTag::Dict => matches!(value, Value::Dict(_)),
            TypeTag::Callable => matches!(value, Value::Callable(_)),
        }
    }

    pub fn parse(name: &str) -> Option<TypeTag> {
        Some(match name {
            "string" => TypeTag::String,
            "number" => TypeTag::Number,
            "bool" => TypeTag::Bool,
            "list" => TypeTag::List,
            "dict" => TypeTag::Dict,
            "callable" => TypeTag::Callable,
            "any" => TypeTag::Any,
            _ => return None,
        })
    }
}

/// A script closure: params, body, and an immutable reference to the scope
/// it closed over. May additionally be bound to a dict, giving `self`
/// access during invocation (`bound` is a weak back-reference so the
/// closure <-> dict cycle does not leak memory).
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<Param>,
    pub body: ClosureBody,
    pub defining_scope: Rc<Scope>,
    pub bound: Option<Weak<Dict>>,
}

impl Closure {
    pub fn from_def(def: &ClosureDef, defining_scope: Rc<Scope>) -> Self {
        Closure {
            params: def
                .params
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    type_tag: p.type_tag.as_deref().and_then(TypeTag::parse),
                    default: p.default.clone(),
                })
                .collect(),
            body: def.body.clone(),
            defining_scope,
            bound: None,
        }
    }

    pub fn bind(&self, dict: &Rc<Dict>) -> Closure {
        Closure { bound: Some(Rc::downgrade(dict)), ..self.clone() }
    }

    /// Structural equality: same defining scope identity, same param
    /// shape (including structurally-equal default expressions), same
    /// body. See SPEC_FULL.md Open Question decision on closure equality.
    pub fn structurally_eq(&self, other: &Closure) -> bool {
        if !Rc::ptr_eq(&self.defining_scope, &other.defining_scope) {
            return false;
        }
        if self.params.len() != other.params.len() {
            return false;
        }
        for (a, b) in self.params.iter().zip(other.params.iter()) {
            if a.name != b.name || a.type_tag != b.type_tag || a.default != b.default {
                return false;
            }
        }
        self.body == other.body
    }
}

/// A runtime built-in: a pure computation reachable via postfix method call
/// (`.upper`, `.len`, ...) or an operator. Not a host capability.
pub type BuiltinFn = fn(&Value, &[Value]) -> Result<Value, crate::error::EvalError>;

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone)]
pub enum Callable {
    Closure(Rc<Closure>),
    Builtin(Rc<Builtin>),
    Host(Rc<HostFunction>),
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::Closure(a), Callable::Closure(b)) => a.structurally_eq(b),
            (Callable::Builtin(a), Callable::Builtin(b)) => a == b,
            (Callable::Host(a), Callable::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    List(Rc<Vec<Value>>),
    Dict(Rc<Dict>),
    Tuple(Rc<Tuple>),
    Callable(Callable),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(dict))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Tuple(_) => "tuple",
            Value::Callable(_) => "callable",
        }
    }

    /// Whether `self` satisfies the declared type tag, per §4.3.3 `expr:T`.
    pub fn type_matches(&self, tag: TypeTag) -> bool {
        tag.matches(self)
    }

    /// General truthy check used by the auto-exception predicate matcher,
    /// which looks at arbitrary post-statement pipe values. Boolean
    /// contexts the language defines structurally (conditionals, loop
    /// guards) require an actual `Bool` and reject everything else with a
    /// type error instead of calling this.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Tuple(t) => !(t.positional.is_empty() && t.named.is_empty()),
            Value::Callable(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether a freshly-assigned value is compatible with the type a
    /// variable has already locked to, per §4.3.3. Locking is by runtime
    /// type name, not structural value equality.
    pub fn same_locked_type(&self, other: &Value) -> bool {
        self.type_name() == other.type_name()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Dict(dict) => {
                write!(f, "[")?;
                for (i, (k, v)) in dict.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "]")
            }
            Value::Tuple(tuple) => {
                write!(f, "(")?;
                let mut first = true;
                for v in &tuple.positional {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{v}")?;
                }
                for (k, v) in &tuple.named {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{k}: {v}")?;
                }
                write!(f, ")")
            }
            Value::Callable(Callable::Closure(_)) => write!(f, "<closure>"),
            Value::Callable(Callable::Builtin(b)) => write!(f, "<builtin {}>", b.name),
            Value::Callable(Callable::Host(h)) => write!(f, "<host {}>", h.qualified_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_display_matches_whole_number_rule() {
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::Number(-2.5)), "-2.5");
        assert_eq!(format!("{}", Value::Number(0.0)), "0");
    }

    #[test]
    fn dict_preserves_insertion_order_and_overwrite_position() {
        let mut d = Dict::new();
        d.insert("a".into(), Value::Number(1.0));
        d.insert("b".into(), Value::Number(2.0));
        d.insert("a".into(), Value::Number(3.0));
        assert_eq!(d.keys(), vec![Value::String("a".into()), Value::String("b".into())]);
        assert_eq!(d.get("a"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn dict_equality_ignores_order() {
        let mut a = Dict::new();
        a.insert("x".into(), Value::Number(1.0));
        a.insert("y".into(), Value::Number(2.0));
        let mut b = Dict::new();
        b.insert("y".into(), Value::Number(2.0));
        b.insert("x".into(), Value::Number(1.0));
        assert_eq!(a, b);
    }

    #[test]
    fn truthiness_treats_empty_collections_as_falsy() {
        assert!(!Value::list(vec![]).is_truthy());
        assert!(Value::list(vec![Value::Null]).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn type_lock_compares_by_runtime_type_name() {
        assert!(Value::Number(1.0).same_locked_type(&Value::Number(2.0)));
        assert!(!Value::Number(1.0).same_locked_type(&Value::String("x".into())));
    }
}
