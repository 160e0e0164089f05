// ABOUTME: RuntimeContext — everything the evaluator reads during one
// execution: the host function table, callbacks, observability hooks,
// abort signal, auto-exception patterns, and iteration/concurrency
// defaults (§4.4).
//
// The variable scope chain, the current pipe value, and the annotation
// stack in force are deliberately NOT stored here as shared mutable
// fields: `map`/`filter` fan out concurrently (§5), and a shared mutable
// pipe value or annotation stack would let concurrent branches corrupt
// each other's view of "the current statement's" state. Instead the
// evaluator threads those through explicitly as call parameters (see
// `eval::Frame`); `RuntimeContext` only owns state that is safe to share
// read-mostly across concurrent branches — matching §5's note that only
// the variable environment is exclusive to "the current statement".

use crate::host::HostTable;
use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::env::Scope;

/// `{ onLog?(value), onLogEvent?(event) }` (§6).
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_log: Option<Rc<dyn Fn(&Value)>>,
    pub on_log_event: Option<Rc<dyn Fn(&Value)>>,
}

/// `{ onStepStart?, onStepEnd?, onError? }` (§6).
#[derive(Clone, Default)]
pub struct Observability {
    pub on_step_start: Option<Rc<dyn Fn(usize, usize, &Value)>>,
    pub on_step_end: Option<Rc<dyn Fn(usize, usize, &Value, u128)>>,
    pub on_error: Option<Rc<dyn Fn(&crate::error::EvalError, usize)>>,
}

/// `{ pattern, code, message }` (§6) — matched against the post-statement
/// pipe value, "typically a string match" per §4.3.7.
#[derive(Debug, Clone)]
pub struct AutoException {
    pub pattern: String,
    pub code: String,
    pub message: String,
}

impl AutoException {
    pub fn matches(&self, value: &Value) -> bool {
        value.to_string().contains(&self.pattern)
    }
}

/// A host-observed cancellation primitive, plus the core's own one-shot
/// timeout arming for the `timeout` annotation (§4.3.7, §5).
#[derive(Clone)]
pub struct AbortSignal {
    host_signal: Option<Rc<dyn Fn() -> bool>>,
    deadline: Rc<Cell<Option<Instant>>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        AbortSignal { host_signal: None, deadline: Rc::new(Cell::new(None)) }
    }
}

impl AbortSignal {
    pub fn from_host(signal: Rc<dyn Fn() -> bool>) -> Self {
        AbortSignal { host_signal: Some(signal), deadline: Rc::new(Cell::new(None)) }
    }

    /// Arms a one-shot deadline `ms` milliseconds from now, per the
    /// `timeout` annotation (§4.3.7). Cooperative only: checked at the same
    /// points as the externally-supplied signal (before each statement and
    /// each loop iteration), never pre-empting an in-flight host call — see
    /// SPEC_FULL.md §E.3.
    pub fn arm_timeout(&self, ms: u64) {
        self.deadline.set(Some(Instant::now() + Duration::from_millis(ms)));
    }

    pub fn is_set(&self) -> bool {
        if self.host_signal.as_ref().is_some_and(|f| f()) {
            return true;
        }
        matches!(self.deadline.get(), Some(deadline) if Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub iteration_cap: usize,
    pub concurrency_limit: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            iteration_cap: crate::config::DEFAULT_ITERATION_CAP,
            concurrency_limit: crate::config::DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

/// Options passed by the host when creating a context (§6 "Embedding API").
#[derive(Default)]
pub struct ContextOptions {
    pub functions: HostTable,
    pub callbacks: Callbacks,
    pub observability: Observability,
    pub abort_signal: AbortSignal,
    pub auto_exceptions: Vec<AutoException>,
    pub variables: Vec<(String, Value)>,
    pub defaults: Defaults,
}

pub struct RuntimeContext {
    pub functions: HostTable,
    pub callbacks: Callbacks,
    pub observability: Observability,
    pub abort_signal: AbortSignal,
    pub auto_exceptions: Vec<AutoException>,
    pub defaults: Defaults,
    root_scope: Rc<Scope>,
}

impl RuntimeContext {
    pub fn create(options: ContextOptions) -> Rc<Self> {
        let root_scope = Scope::new();
        for (name, value) in options.variables {
            root_scope.define(name, value);
        }
        Rc::new(RuntimeContext {
            functions: options.functions,
            callbacks: options.callbacks,
            observability: options.observability,
            abort_signal: options.abort_signal,
            auto_exceptions: options.auto_exceptions,
            defaults: options.defaults,
            root_scope,
        })
    }

    pub fn root_scope(&self) -> Rc<Scope> {
        Rc::clone(&self.root_scope)
    }

    /// Inherits functions/callbacks/hooks/abort signal/auto-exceptions from
    /// `parent`, and forks a fresh child scope rooted at the parent's
    /// current root scope (§4.4 `createChild`).
    pub fn create_child(parent: &Rc<RuntimeContext>) -> Rc<Self> {
        Rc::new(RuntimeContext {
            functions: parent.functions.clone(),
            callbacks: parent.callbacks.clone(),
            observability: parent.observability.clone(),
            abort_signal: parent.abort_signal.clone(),
            auto_exceptions: parent.auto_exceptions.clone(),
            defaults: parent.defaults,
            root_scope: Scope::child(&parent.root_scope),
        })
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.root_scope.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.root_scope.has(name)
    }

    pub fn set_variable(&self, name: &str, value: Value) -> Result<(), crate::error::EvalError> {
        self.root_scope.capture(name, value, crate::span::Span::point(crate::span::Position::start()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_seeds_root_scope_variables() {
        let ctx = RuntimeContext::create(ContextOptions {
            variables: vec![("x".to_string(), Value::Number(1.0))],
            ..Default::default()
        });
        assert_eq!(ctx.get_variable("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn create_child_inherits_but_shadows() {
        let parent = RuntimeContext::create(ContextOptions {
            variables: vec![("x".to_string(), Value::Number(1.0))],
            ..Default::default()
        });
        let child = RuntimeContext::create_child(&parent);
        assert_eq!(child.get_variable("x"), Some(Value::Number(1.0)));
        child.set_variable("x", Value::Number(2.0)).unwrap();
        assert_eq!(child.get_variable("x"), Some(Value::Number(2.0)));
        assert_eq!(parent.get_variable("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn abort_signal_observes_host_closure() {
        let flag = Rc::new(Cell::new(false));
        let flag_clone = Rc::clone(&flag);
        let signal = AbortSignal::from_host(Rc::new(move || flag_clone.get()));
        assert!(!signal.is_set());
        flag.set(true);
        assert!(signal.is_set());
    }

    #[test]
    fn auto_exception_matches_substring() {
        let ex = AutoException { pattern: "ERR".into(), code: "E1".into(), message: "boom".into() };
        assert!(ex.matches(&Value::String("got ERR: disk full".into())));
        assert!(!ex.matches(&Value::String("ok".into())));
    }
}
