// ABOUTME: Variable scope chain: the per-block/closure binding environment
// the evaluator reads and writes during execution (§4.3.8).

use crate::error::EvalError;
use crate::span::Span;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    /// Creates a new root scope with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Scope { bindings: RefCell::new(HashMap::new()), parent: None })
    }

    /// Creates a new child scope. Every `Block`, `Closure`, and
    /// `GroupedExpr` creates one of these (§4.3.8).
    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Scope { bindings: RefCell::new(HashMap::new()), parent: Some(Rc::clone(parent)) })
    }

    /// Seeds a binding directly, bypassing the type-lock check. Used for
    /// parameter binding and context-supplied `variables` seeding, where
    /// there is by construction no prior binding to conflict with.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Walks the scope chain from innermost outward.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// A snapshot of this scope's own bindings, not walking the parent
    /// chain. Used to report the root scope's variables after execution
    /// (§6 `execute` result's `variables` field).
    pub fn bindings_snapshot(&self) -> HashMap<String, Value> {
        self.bindings.borrow().clone()
    }

    /// Captures a value under `name` in THIS scope (§4.3.8: "writes go to
    /// the innermost scope"). If `name` is already bound in this same
    /// scope, the new value's type must match the locked type (§4.3.3);
    /// capturing under a name that shadows an outer scope's binding is not
    /// a type-lock violation, since the outer binding is untouched.
    pub fn capture(&self, name: &str, value: Value, span: Span) -> Result<(), EvalError> {
        let mut bindings = self.bindings.borrow_mut();
        if let Some(existing) = bindings.get(name) {
            if !existing.same_locked_type(&value) {
                return Err(EvalError::TypeLock {
                    name: name.to_string(),
                    locked: existing.type_name().to_string(),
                    actual: value.type_name().to_string(),
                    span,
                });
            }
        }
        bindings.insert(name.to_string(), value);
        Ok(())
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
    fn define_and_get_round_trips() {
        let scope = Scope::new();
        scope.define("x", Value::Number(42.0));
        assert_eq!(scope.get("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn undefined_variable_is_none() {
        let scope = Scope::new();
        assert!(scope.get("undefined").is_none());
    }

    #[test]
    fn child_scope_shadows_without_mutating_parent() {
        let parent = Scope::new();
        parent.define("x", Value::Number(42.0));

        let child = Scope::child(&parent);
        child.define("x", Value::Number(100.0));

        assert_eq!(child.get("x"), Some(Value::Number(100.0)));
        assert_eq!(parent.get("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn child_scope_sees_parent_bindings() {
        let parent = Scope::new();
        parent.define("x", Value::Number(42.0));
        let child = Scope::child(&parent);
        assert_eq!(child.get("x"), Some(Value::Number(42.0)));
    }

    #[test]
    fn capture_locks_type_within_same_scope() {
        let scope = Scope::new();
        scope.capture("x", Value::Number(1.0), span()).unwrap();
        let err = scope.capture("x", Value::String("two".into()), span()).unwrap_err();
        assert!(matches!(err, EvalError::TypeLock { .. }));
    }

    #[test]
    fn capture_allows_same_type_reassignment() {
        let scope = Scope::new();
        scope.capture("x", Value::Number(1.0), span()).unwrap();
        scope.capture("x", Value::Number(2.0), span()).unwrap();
        assert_eq!(scope.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn shadowing_in_child_scope_is_not_a_type_lock_violation() {
        let parent = Scope::new();
        parent.capture("x", Value::Number(1.0), span()).unwrap();
        let child = Scope::child(&parent);
        child.capture("x", Value::String("shadow".into()), span()).unwrap();
        assert_eq!(child.get("x"), Some(Value::String("shadow".into())));
    }
}
