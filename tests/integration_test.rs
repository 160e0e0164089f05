// ABOUTME: End-to-end scenarios and cross-cutting properties exercised
// through the public API surface (`rill::parse`/`execute`/`create_stepper`),
// as opposed to the per-module unit tests embedded in each source file.

use rill::context::{AbortSignal, ContextOptions, RuntimeContext};
use rill::value::Value;
use std::cell::Cell;
use std::rc::Rc;

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
}

#[test]
fn round_trip_parse_is_structurally_stable() {
    let source = "[1,2,3] -> map |x|($x*2)";
    let a = rill::parse(source).unwrap();
    let b = rill::parse(source).unwrap();
    assert_eq!(a, b);
}

#[test]
fn scenario_uppercase_method() {
    let script = rill::parse(r#""hello" -> .upper"#).unwrap();
    let ctx = RuntimeContext::create(ContextOptions::default());
    let result = block_on(rill::execute(&script, ctx)).unwrap();
    assert_eq!(result.value, Value::String("HELLO".into()));
}

#[test]
fn scenario_map_doubles_preserving_order() {
    let script = rill::parse("[1,2,3] -> map |x|($x*2)").unwrap();
    let ctx = RuntimeContext::create(ContextOptions::default());
    let result = block_on(rill::execute(&script, ctx)).unwrap();
    assert_eq!(result.value, Value::list(vec![Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]));
}

#[test]
fn scenario_dict_dispatch_with_default() {
    let script = rill::parse(r#""c" -> [a: "one", b: "two"] ?? "other""#).unwrap();
    let ctx = RuntimeContext::create(ContextOptions::default());
    let result = block_on(rill::execute(&script, ctx)).unwrap();
    assert_eq!(result.value, Value::String("other".into()));
}

#[test]
fn scenario_parse_error_has_a_span() {
    let err = rill::parse("[1,2,3").unwrap_err();
    let _ = err.to_string();
}

#[test]
fn scenario_parse_with_recovery_never_throws() {
    let (script, errors) = rill::parse_with_recovery("[1,2,3");
    assert!(!errors.is_empty());
    assert!(script.statements.is_empty() || errors.iter().any(|_| true));
}

#[test]
fn filter_preserves_order_of_retained_elements() {
    let script = rill::parse("[1,2,3,4,5] -> filter |x|($x%2==0)").unwrap();
    let ctx = RuntimeContext::create(ContextOptions::default());
    let result = block_on(rill::execute(&script, ctx)).unwrap();
    assert_eq!(result.value, Value::list(vec![Value::Number(2.0), Value::Number(4.0)]));
}

#[test]
fn type_lock_fails_on_reassignment_to_a_different_type() {
    let script = rill::parse("1 => $x\n\"two\" => $x").unwrap();
    let ctx = RuntimeContext::create(ContextOptions::default());
    let err = block_on(rill::execute(&script, ctx)).unwrap_err();
    assert!(matches!(err, rill::error::EvalError::TypeLock { .. }));
}

#[test]
fn iteration_cap_is_exceeded_after_exactly_the_cap() {
    let script = rill::parse("0 -> (true) @ { $+1 }").unwrap();
    let ctx = RuntimeContext::create(ContextOptions {
        defaults: rill::context::Defaults { iteration_cap: 10, concurrency_limit: 1 },
        ..Default::default()
    });
    let err = block_on(rill::execute(&script, ctx)).unwrap_err();
    assert!(matches!(err, rill::error::EvalError::IterationCapExceeded { cap: 10, .. }));
}

#[test]
fn cancellation_raises_abort_promptly() {
    let script = rill::parse("1 => $a\n2 => $b\n3 => $c").unwrap();
    let flag = Rc::new(Cell::new(false));
    let flag_clone = Rc::clone(&flag);
    let abort_signal = AbortSignal::from_host(Rc::new(move || flag_clone.get()));
    flag.set(true);
    let ctx = RuntimeContext::create(ContextOptions { abort_signal, ..Default::default() });
    let err = block_on(rill::execute(&script, ctx)).unwrap_err();
    assert!(matches!(err, rill::error::EvalError::Abort { .. }));
}

#[test]
fn stepper_reports_the_same_result_as_execute() {
    let script_for_execute = rill::parse("1 => $a\n$a + 1").unwrap();
    let script_for_stepper = rill::parse("1 => $a\n$a + 1").unwrap();

    let ctx_a = RuntimeContext::create(ContextOptions::default());
    let executed = block_on(rill::execute(&script_for_execute, ctx_a)).unwrap();

    let ctx_b = RuntimeContext::create(ContextOptions::default());
    let mut stepper = rill::create_stepper(script_for_stepper, ctx_b).unwrap();
    let stepped = block_on(stepper.run_to_completion()).unwrap();

    assert_eq!(executed.value, stepped.value);
}
