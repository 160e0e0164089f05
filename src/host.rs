// ABOUTME: The host function table and extension contract (§4.4, §6): the
// seam through which an embedding application exposes capabilities to
// scripts. Generalizes the teacher's `Tool` trait to async, namespaced,
// typed host functions.

use crate::context::RuntimeContext;
use crate::error::EvalError;
use crate::value::{TypeTag, Value};
use futures::future::LocalBoxFuture;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct HostParam {
    pub name: String,
    pub type_tag: Option<TypeTag>,
    pub description: Option<String>,
}

impl HostParam {
    pub fn new(name: impl Into<String>) -> Self {
        HostParam { name: name.into(), type_tag: None, description: None }
    }

    pub fn typed(name: impl Into<String>, type_tag: TypeTag) -> Self {
        HostParam { name: name.into(), type_tag: Some(type_tag), description: None }
    }
}

pub type HostFuture = LocalBoxFuture<'static, Result<Value, EvalError>>;

/// The host's async implementation: `(args, ctx) -> value`. Not `Send`,
/// since the evaluator is single-threaded and cooperative (§5) and scopes
/// are `Rc`-based.
pub type HostFn = Rc<dyn Fn(Vec<Value>, Rc<RuntimeContext>) -> HostFuture>;

pub struct HostFunction {
    pub qualified_name: String,
    pub params: Vec<HostParam>,
    pub func: HostFn,
    pub description: Option<String>,
    pub return_type: Option<TypeTag>,
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction").field("qualified_name", &self.qualified_name).finish()
    }
}

/// A table of host functions keyed by fully qualified name (`ns::name` or
/// a bare `name`).
#[derive(Debug, Clone, Default)]
pub struct HostTable {
    functions: HashMap<String, Rc<HostFunction>>,
}

impl HostTable {
    pub fn new() -> Self {
        HostTable { functions: HashMap::new() }
    }

    pub fn register(&mut self, function: HostFunction) {
        self.functions.insert(function.qualified_name.clone(), Rc::new(function));
    }

    pub fn get(&self, qualified_name: &str) -> Option<Rc<HostFunction>> {
        self.functions.get(qualified_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Rekeys every function in `ext` under the `ns::` namespace and merges
    /// it into `self` (§4.4 `prefixFunctions`).
    pub fn merge_prefixed(&mut self, ns: &str, ext: HostTable) {
        for (name, func) in ext.functions {
            let qualified = format!("{ns}::{name}");
            let renamed = HostFunction {
                qualified_name: qualified.clone(),
                params: func.params.clone(),
                func: func.func.clone(),
                description: func.description.clone(),
                return_type: func.return_type,
            };
            self.functions.insert(qualified, Rc::new(renamed));
        }
    }
}

/// A bundle of host functions contributed under a namespace, plus an
/// idempotent teardown hook (§6 "Extension contract").
pub struct Extension {
    pub functions: HostTable,
    dispose_fn: RefCellOnce,
}

type RefCellOnce = Rc<Cell<Option<Box<dyn FnOnce()>>>>;

impl Extension {
    pub fn new(functions: HostTable) -> Self {
        Extension { functions, dispose_fn: Rc::new(Cell::new(None)) }
    }

    pub fn with_dispose(functions: HostTable, dispose: impl FnOnce() + 'static) -> Self {
        Extension { functions, dispose_fn: Rc::new(Cell::new(Some(Box::new(dispose)))) }
    }

    /// Idempotent: calling this more than once is a no-op after the first.
    pub fn dispose(&self) {
        if let Some(f) = self.dispose_fn.take() {
            f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_fn() -> HostFn {
        Rc::new(|args: Vec<Value>, _ctx: Rc<RuntimeContext>| {
            Box::pin(async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) })
        })
    }

    #[test]
    fn register_and_get_round_trips() {
        let mut table = HostTable::new();
        table.register(HostFunction {
            qualified_name: "identity".into(),
            params: vec![HostParam::new("x")],
            func: noop_fn(),
            description: None,
            return_type: None,
        });
        assert!(table.get("identity").is_some());
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn merge_prefixed_namespaces_functions() {
        let mut ext_table = HostTable::new();
        ext_table.register(HostFunction {
            qualified_name: "get".into(),
            params: vec![],
            func: noop_fn(),
            description: None,
            return_type: None,
        });
        let mut table = HostTable::new();
        table.merge_prefixed("kv", ext_table);
        assert!(table.get("kv::get").is_some());
        assert!(table.get("get").is_none());
    }

    #[test]
    fn dispose_is_idempotent() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        let ext = Extension::with_dispose(HostTable::new(), move || {
            calls_clone.set(calls_clone.get() + 1);
        });
        ext.dispose();
        ext.dispose();
        assert_eq!(calls.get(), 1);
    }
}
