// ABOUTME: The async tree-walking evaluator (§4.3): executes a `Script`
// against a `RuntimeContext`, threading a pipe value and an annotation
// stack explicitly through `Frame` rather than through shared context
// state (see context.rs's module doc for why).

use crate::ast::*;
use crate::builtins;
use crate::context::RuntimeContext;
use crate::env::Scope;
use crate::error::EvalError;
use crate::span::Span;
use crate::value::{Callable, Closure, Dict, Tuple, TypeTag, Value};
use async_recursion::async_recursion;
use std::collections::HashMap;
use std::rc::Rc;

/// The sum type each evaluation function resolves to, modeled as data
/// rather than a host exception (§9 Design Notes): a `Result::Err` is
/// either a genuine evaluation error, or one of the two typed
/// non-local-exit signals `break`/`return` unwind with.
#[derive(Debug, Clone)]
pub enum Control {
    Break(Value, Span),
    Return(Value, Span),
    Error(EvalError),
}

impl From<EvalError> for Control {
    fn from(err: EvalError) -> Self {
        Control::Error(err)
    }
}

impl Control {
    pub(crate) fn into_error(self) -> EvalError {
        match self {
            Control::Error(e) => e,
            Control::Break(_, span) => EvalError::BreakOutsideLoop { span },
            // Only reachable if a bare `return` escapes every enclosing
            // closure at the very top of script execution; `execute`
            // intercepts this case directly before it gets here.
            Control::Return(_, span) => EvalError::Custom { message: "`return` escaped to top level".into(), span },
        }
    }
}

/// Scope, pipe value, and annotation stack threaded through every
/// evaluation call. Cloning a `Frame` is cheap: `scope` and the
/// annotation table entries are `Rc`, and `pipe` is a `Value` (itself
/// mostly `Rc`-backed for the non-scalar variants).
#[derive(Clone)]
pub struct Frame {
    pub scope: Rc<Scope>,
    pub pipe: Value,
    annotations: Vec<Rc<HashMap<String, Value>>>,
}

impl Frame {
    pub fn new(scope: Rc<Scope>) -> Self {
        Frame { scope, pipe: Value::Null, annotations: Vec::new() }
    }

    fn with_pipe(&self, pipe: Value) -> Frame {
        Frame { scope: Rc::clone(&self.scope), pipe, annotations: self.annotations.clone() }
    }

    fn with_scope(&self, scope: Rc<Scope>) -> Frame {
        Frame { scope, pipe: self.pipe.clone(), annotations: self.annotations.clone() }
    }

    fn child(&self) -> Frame {
        self.with_scope(Scope::child(&self.scope))
    }

    fn with_annotations(&self, table: HashMap<String, Value>) -> Frame {
        let mut annotations = self.annotations.clone();
        annotations.push(Rc::new(table));
        Frame { scope: Rc::clone(&self.scope), pipe: self.pipe.clone(), annotations }
    }

    /// Reads the annotation stack in force at the current statement, most
    /// recently pushed first (§4.3.7 reflection form `$.^key`).
    fn lookup_annotation(&self, key: &str) -> Option<Value> {
        self.annotations.iter().rev().find_map(|table| table.get(key).cloned())
    }

    fn concurrency_limit(&self, default: usize) -> usize {
        match self.lookup_annotation("limit") {
            Some(Value::Number(n)) if n >= 1.0 => n as usize,
            _ => default,
        }
    }
}

pub struct ExecutionResult {
    pub value: Value,
    pub variables: HashMap<String, Value>,
}

fn check_abort(ctx: &Rc<RuntimeContext>, span: Span) -> Result<(), Control> {
    if ctx.abort_signal.is_set() {
        Err(Control::Error(EvalError::Abort { span }))
    } else {
        Ok(())
    }
}

/// Scans every statement slot reachable from `script` (including nested
/// blocks) for a `StatementNode::Recovered` left by a recovery-mode parse.
/// Scripts containing one are rejected at run time (§4.2, §7).
pub fn find_recovery_error(script: &Script) -> Option<EvalError> {
    find_in_statements(&script.statements)
}

fn find_in_statements(statements: &[AnnotatedStatement]) -> Option<EvalError> {
    for stmt in statements {
        match &stmt.statement {
            StatementNode::Recovered(r) => return Some(EvalError::ParseInvalid { span: r.span }),
            StatementNode::Parsed(s) => {
                if let Some(e) = find_in_chain(&s.expression) {
                    return Some(e);
                }
            }
        }
    }
    None
}

fn find_in_chain(chain: &PipeChain) -> Option<EvalError> {
    find_in_expr(&chain.head).or_else(|| chain.pipes.iter().find_map(|p| find_in_pipe_target(&p.kind)))
}

fn find_in_body(body: &Body) -> Option<EvalError> {
    match body {
        Body::Block(b) => find_in_statements(&b.statements),
        Body::Chain(c) => find_in_chain(c),
    }
}

fn find_in_closure_body(body: &ClosureBody) -> Option<EvalError> {
    match body {
        ClosureBody::Block(b) => find_in_statements(&b.statements),
        ClosureBody::Grouped(c) | ClosureBody::Pipe(c) => find_in_chain(c),
        ClosureBody::Postfix(p) => find_in_postfix(p),
    }
}

fn find_in_collection_body(body: &CollectionBody) -> Option<EvalError> {
    match body {
        CollectionBody::Block(b) => find_in_statements(&b.statements),
        CollectionBody::Grouped(c) => find_in_chain(c),
        CollectionBody::InlineClosure(def) => find_in_closure_body(&def.body),
        _ => None,
    }
}

fn find_in_pipe_target(target: &PipeTarget) -> Option<EvalError> {
    match target {
        PipeTarget::Conditional(c) => find_in_conditional(c),
        PipeTarget::Loop(l) => find_in_loop(l),
        PipeTarget::Each(e) => find_in_collection_body(&e.body),
        PipeTarget::Map(e) => find_in_collection_body(&e.body),
        PipeTarget::Fold(e) => find_in_collection_body(&e.body),
        PipeTarget::Filter(e) => find_in_collection_body(&e.body),
        PipeTarget::Closure(def) => find_in_closure_body(&def.body),
        PipeTarget::PipedConditional(t, e) => find_in_body(t).or_else(|| find_in_body(e)),
        _ => None,
    }
}

fn find_in_conditional(cond: &Conditional) -> Option<EvalError> {
    find_in_expr(&cond.condition).or_else(|| find_in_body(&cond.then_branch)).or_else(|| match &cond.else_branch {
        Some(ElseBranch::Body(b)) => find_in_body(b),
        Some(ElseBranch::ElseIf(c)) => find_in_conditional(c),
        None => None,
    })
}

fn find_in_loop(l: &Loop) -> Option<EvalError> {
    match l {
        Loop::PostTest { body, condition, .. } | Loop::PreTest { condition, body, .. } => find_in_expr(condition).or_else(|| find_in_body(body)),
    }
}

fn find_in_postfix(p: &PostfixExpr) -> Option<EvalError> {
    find_in_primary(&p.primary).or_else(|| {
        p.ops.iter().find_map(|op| match op {
            PostfixOp::Method(mc) => mc.args.iter().find_map(find_in_arg),
            PostfixOp::Invoke { args, .. } => args.iter().find_map(find_in_arg),
            PostfixOp::Index { index, .. } => find_in_expr(index),
        })
    })
}

fn find_in_arg(arg: &Arg) -> Option<EvalError> {
    match arg {
        Arg::Positional(e) | Arg::Named(_, e) | Arg::Spread(e) => find_in_expr(e),
    }
}

fn find_in_expr(expr: &Expr) -> Option<EvalError> {
    match expr {
        Expr::Binary(b) => find_in_expr(&b.left).or_else(|| find_in_expr(&b.right)),
        Expr::Unary(u) => find_in_expr(&u.operand),
        Expr::Postfix(p) => find_in_postfix(p),
    }
}

fn find_in_primary(primary: &Primary) -> Option<EvalError> {
    match primary {
        Primary::Block(b) => find_in_statements(&b.statements),
        Primary::Grouped(c) => find_in_chain(c),
        Primary::Conditional(c) => find_in_conditional(c),
        Primary::Loop(l) => find_in_loop(l),
        Primary::Closure(def) => find_in_closure_body(&def.body),
        Primary::HostCall(h) => h.args.iter().find_map(find_in_arg),
        Primary::ClosureCall(c) => c.args.iter().find_map(find_in_arg),
        _ => None,
    }
}

// ---- top-level execution ---------------------------------------------

pub async fn execute(script: &Script, ctx: Rc<RuntimeContext>) -> Result<ExecutionResult, EvalError> {
    if let Some(err) = find_recovery_error(script) {
        return Err(err);
    }
    let frame = Frame::new(ctx.root_scope());
    let mut last = Value::Null;
    for stmt in &script.statements {
        last = match run_statement(&frame, stmt, &ctx).await {
            Ok(v) => v,
            Err(Control::Return(v, _)) => v,
            Err(other) => return Err(other.into_error()),
        };
    }
    Ok(ExecutionResult { value: last, variables: ctx.root_scope().bindings_snapshot() })
}

/// Runs one annotated statement: resolves its annotation table, honors the
/// reserved `limit`/`timeout` keys, checks the abort signal, evaluates the
/// chain, then runs the auto-exception check (§4.3.1, §4.3.7).
pub async fn run_statement(frame: &Frame, stmt: &AnnotatedStatement, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let mut table = HashMap::new();
    for ann in &stmt.annotations {
        match &ann.value {
            AnnotationValue::Expr(e) => {
                table.insert(ann.key.clone(), eval_expr(frame, e, ctx).await?);
            }
            AnnotationValue::Spread(e) => {
                if let Value::Tuple(t) = eval_expr(frame, e, ctx).await? {
                    for (k, v) in &t.named {
                        table.insert(k.clone(), v.clone());
                    }
                }
            }
        }
    }
    let stmt_frame = frame.with_annotations(table);
    if let Some(Value::Number(ms)) = stmt_frame.lookup_annotation("timeout") {
        ctx.abort_signal.arm_timeout(ms as u64);
    }
    check_abort(ctx, stmt.span)?;

    let parsed = match &stmt.statement {
        StatementNode::Parsed(s) => s,
        StatementNode::Recovered(r) => return Err(Control::Error(EvalError::ParseInvalid { span: r.span })),
    };
    let result = eval_pipe_chain(&stmt_frame, &parsed.expression, ctx).await?;

    for auto in &ctx.auto_exceptions {
        if auto.matches(&result) {
            return Err(Control::Error(EvalError::AutoException { code: auto.code.clone(), message: auto.message.clone(), span: stmt.span }));
        }
    }
    Ok(result)
}

async fn eval_block(frame: &Frame, block: &Block, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    if block.statements.is_empty() {
        return Err(Control::Error(EvalError::EmptyBlock { span: block.span }));
    }
    let block_frame = frame.child();
    let mut last = Value::Null;
    for stmt in &block.statements {
        last = run_statement(&block_frame, stmt, ctx).await?;
    }
    Ok(last)
}

#[async_recursion(?Send)]
async fn eval_body(frame: &Frame, body: &Body, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match body {
        Body::Block(b) => eval_block(frame, b, ctx).await,
        Body::Chain(c) => eval_pipe_chain(&frame.child(), c, ctx).await,
    }
}

#[async_recursion(?Send)]
async fn eval_closure_body(frame: &Frame, body: &ClosureBody, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match body {
        ClosureBody::Block(b) => eval_block(frame, b, ctx).await,
        ClosureBody::Grouped(c) | ClosureBody::Pipe(c) => eval_pipe_chain(&frame.child(), c, ctx).await,
        ClosureBody::Postfix(p) => eval_postfix(frame, p, ctx).await,
    }
}

// ---- pipe chains --------------------------------------------------------

#[async_recursion(?Send)]
pub async fn eval_pipe_chain(frame: &Frame, chain: &PipeChain, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let head_value = eval_expr(frame, &chain.head, ctx).await?;
    let mut current = frame.with_pipe(head_value);
    let mut value = current.pipe.clone();
    for target in &chain.pipes {
        value = eval_pipe_target(&current, target, ctx).await?;
        current = current.with_pipe(value.clone());
    }
    match &chain.terminator {
        None | Some(Terminator::Pass) => Ok(value),
        Some(Terminator::Break) => Err(Control::Break(value, chain.span)),
        Some(Terminator::Return) => Err(Control::Return(value, chain.span)),
        Some(Terminator::Capture(cap)) => {
            if let Some(type_name) = &cap.type_name {
                let tag = TypeTag::parse(type_name)
                    .ok_or_else(|| Control::Error(EvalError::type_mismatch(type_name.clone(), value.type_name(), cap.span)))?;
                if !tag.matches(&value) {
                    return Err(Control::Error(EvalError::type_mismatch(tag.name(), value.type_name(), cap.span)));
                }
            }
            current.scope.capture(&cap.name, value.clone(), cap.span)?;
            Ok(value)
        }
    }
}

async fn eval_pipe_target(frame: &Frame, target: &PipeTargetNode, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match &target.kind {
        PipeTarget::Method(mc) => eval_method_call(frame, &frame.pipe.clone(), mc, ctx).await,
        PipeTarget::HostCall(hc) => eval_host_call(frame, hc, ctx).await,
        PipeTarget::ClosureCall(cc) => eval_closure_call(frame, cc, ctx).await,
        PipeTarget::Closure(def) => {
            let closure = Rc::new(Closure::from_def(def, Rc::clone(&frame.scope)));
            invoke_closure(frame, &closure, vec![frame.pipe.clone()], def.span, ctx).await
        }
        PipeTarget::Conditional(c) => eval_conditional(frame, c, ctx).await,
        PipeTarget::Loop(l) => eval_loop(frame, l, ctx).await,
        PipeTarget::Each(e) => eval_each(frame, e, ctx).await,
        PipeTarget::Map(e) => eval_map(frame, e, ctx).await,
        PipeTarget::Fold(e) => eval_fold(frame, e, ctx).await,
        PipeTarget::Filter(e) => eval_filter(frame, e, ctx).await,
        PipeTarget::Destructure(d) => eval_destructure(frame, d).map(|_| frame.pipe.clone()),
        PipeTarget::Slice(s) => eval_slice(frame, s, ctx).await,
        PipeTarget::Spread(e) => Ok(spread_to_tuple(eval_expr(frame, e, ctx).await?)),
        PipeTarget::Dispatch(expr) => eval_dispatch(frame, expr, target.span, ctx).await,
        PipeTarget::PipeInvoke(args) => {
            let tuple = eval_args(frame, args, ctx).await?;
            let mut all_args = tuple.positional.clone();
            for (_, v) in &tuple.named {
                all_args.push(v.clone());
            }
            let callee = frame.pipe.clone();
            invoke_value(frame, &callee, all_args, target.span, ctx).await
        }
        PipeTarget::InlineCapture(name, type_name) => {
            let value = frame.pipe.clone();
            if let Some(type_name) = type_name {
                let tag = TypeTag::parse(type_name)
                    .ok_or_else(|| Control::Error(EvalError::type_mismatch(type_name.clone(), value.type_name(), target.span)))?;
                if !tag.matches(&value) {
                    return Err(Control::Error(EvalError::type_mismatch(tag.name(), value.type_name(), target.span)));
                }
            }
            frame.scope.capture(name, value.clone(), target.span)?;
            Ok(value)
        }
        PipeTarget::PipedConditional(then_branch, else_branch) => {
            let truth = frame
                .pipe
                .as_bool()
                .ok_or_else(|| Control::Error(EvalError::NonBooleanConditional { actual: frame.pipe.type_name().to_string(), span: target.span }))?;
            if truth {
                eval_body(frame, then_branch, ctx).await
            } else {
                eval_body(frame, else_branch, ctx).await
            }
        }
    }
}

/// Dict/tuple-as-pipe-target dispatch (§4.3.5). A trailing `?? default` on
/// the literal's own postfix expr is reinterpreted here as the dispatch's
/// fallback, not as a nullish-default over the literal itself.
async fn eval_dispatch(frame: &Frame, expr: &Expr, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let (table, default_expr) = match expr {
        Expr::Postfix(p) if p.ops.is_empty() => (eval_primary(frame, &p.primary, ctx).await?, p.default.clone()),
        other => (eval_expr(frame, other, ctx).await?, None),
    };
    match table {
        Value::Dict(d) => {
            let key = dispatch_key(&frame.pipe);
            if let Some(v) = d.get(&key) {
                return Ok(v.clone());
            }
            match default_expr {
                Some(de) => eval_expr(frame, &de, ctx).await,
                None => Err(Control::Error(EvalError::DictFieldMissing { field: key, span })),
            }
        }
        Value::Tuple(t) => {
            let mut acc = frame.pipe.clone();
            for handler in &t.positional {
                acc = invoke_value(frame, handler, vec![acc], span, ctx).await?;
            }
            Ok(acc)
        }
        other => Err(Control::Error(EvalError::type_mismatch("dict or tuple", other.type_name(), span))),
    }
}

fn dispatch_key(value: &Value) -> String {
    value.to_string()
}

fn spread_to_tuple(value: Value) -> Value {
    match value {
        Value::Tuple(t) => Value::Tuple(t),
        Value::List(l) => Value::Tuple(Rc::new(Tuple::positional((*l).clone()))),
        Value::Dict(d) => Value::Tuple(Rc::new(Tuple { positional: vec![], named: d.iter().cloned().collect() })),
        other => Value::Tuple(Rc::new(Tuple::positional(vec![other]))),
    }
}

// ---- expressions ---------------------------------------------------------

#[async_recursion(?Send)]
pub async fn eval_expr(frame: &Frame, expr: &Expr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match expr {
        Expr::Binary(b) => eval_binary(frame, b, ctx).await,
        Expr::Unary(u) => eval_unary(frame, u, ctx).await,
        Expr::Postfix(p) => eval_postfix(frame, p, ctx).await,
    }
}

async fn eval_binary(frame: &Frame, b: &BinaryExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match b.op {
        BinaryOp::And => {
            let left = eval_expr(frame, &b.left, ctx).await?;
            let truth = left.as_bool().ok_or_else(|| Control::Error(EvalError::type_mismatch("bool", left.type_name(), b.span)))?;
            if !truth {
                return Ok(Value::Bool(false));
            }
            let right = eval_expr(frame, &b.right, ctx).await?;
            right.as_bool().map(Value::Bool).ok_or_else(|| Control::Error(EvalError::type_mismatch("bool", right.type_name(), b.span)))
        }
        BinaryOp::Or => {
            let left = eval_expr(frame, &b.left, ctx).await?;
            let truth = left.as_bool().ok_or_else(|| Control::Error(EvalError::type_mismatch("bool", left.type_name(), b.span)))?;
            if truth {
                return Ok(Value::Bool(true));
            }
            let right = eval_expr(frame, &b.right, ctx).await?;
            right.as_bool().map(Value::Bool).ok_or_else(|| Control::Error(EvalError::type_mismatch("bool", right.type_name(), b.span)))
        }
        op => {
            let left = eval_expr(frame, &b.left, ctx).await?;
            let right = eval_expr(frame, &b.right, ctx).await?;
            builtins::ops::binary(op, left, right, b.span).map_err(Control::Error)
        }
    }
}

async fn eval_unary(frame: &Frame, u: &UnaryExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let operand = eval_expr(frame, &u.operand, ctx).await?;
    builtins::ops::unary(u.op, operand, u.span).map_err(Control::Error)
}

#[async_recursion(?Send)]
async fn eval_postfix(frame: &Frame, p: &PostfixExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let mut value = eval_primary(frame, &p.primary, ctx).await?;
    for op in &p.ops {
        value = match op {
            PostfixOp::Method(mc) => eval_method_call(frame, &value.clone(), mc, ctx).await?,
            PostfixOp::Invoke { args, span } => {
                let tuple = eval_args(frame, args, ctx).await?;
                let mut all_args = tuple.positional.clone();
                for (_, v) in &tuple.named {
                    all_args.push(v.clone());
                }
                invoke_value(frame, &value, all_args, *span, ctx).await?
            }
            PostfixOp::Index { index, span } => {
                let idx = eval_expr(frame, index, ctx).await?;
                index_value(&value, &idx, *span)?
            }
        };
    }
    if matches!(value, Value::Null) {
        if let Some(default) = &p.default {
            value = eval_expr(frame, default, ctx).await?;
        }
    }
    Ok(value)
}

async fn eval_method_call(frame: &Frame, receiver: &Value, mc: &MethodCall, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    if mc.existence_check && matches!(receiver, Value::Null) {
        return Ok(Value::Null);
    }
    let tuple = eval_args(frame, &mc.args, ctx).await?;
    let mut args = tuple.positional.clone();
    for (_, v) in &tuple.named {
        args.push(v.clone());
    }
    match builtins::call_method(receiver, &mc.name, &args, mc.span) {
        Ok(v) => Ok(v),
        Err(_) if mc.existence_check => Ok(Value::Null),
        Err(e) => Err(Control::Error(e)),
    }
}

async fn eval_host_call(frame: &Frame, call: &HostCall, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let qualified = match &call.namespace {
        Some(ns) => format!("{ns}::{}", call.name),
        None => call.name.clone(),
    };
    let func = ctx
        .functions
        .get(&qualified)
        .ok_or_else(|| Control::Error(EvalError::UndefinedVariable { name: qualified.clone(), span: call.span }))?;
    let tuple = eval_args(frame, &call.args, ctx).await?;
    let args = bind_host_args(&func.params, &tuple, &qualified, call.span)?;
    (func.func)(args, Rc::clone(ctx)).await.map_err(Control::Error)
}

fn bind_host_args(params: &[crate::host::HostParam], tuple: &Tuple, name: &str, span: Span) -> Result<Vec<Value>, Control> {
    if params.is_empty() {
        let mut args = tuple.positional.clone();
        for (_, v) in &tuple.named {
            args.push(v.clone());
        }
        return Ok(args);
    }
    let mut args = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let value = tuple.get_named(&param.name).cloned().or_else(|| tuple.positional.get(i).cloned()).ok_or_else(|| {
            Control::Error(EvalError::ArityMismatch { name: name.to_string(), expected: params.len().to_string(), actual: tuple.positional.len(), span })
        })?;
        if let Some(tag) = param.type_tag {
            if !tag.matches(&value) {
                return Err(Control::Error(EvalError::type_mismatch(tag.name(), value.type_name(), span)));
            }
        }
        args.push(value);
    }
    Ok(args)
}

async fn eval_closure_call(frame: &Frame, call: &ClosureCall, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let callee = frame.scope.get(&call.name).ok_or_else(|| Control::Error(EvalError::UndefinedVariable { name: call.name.clone(), span: call.span }))?;
    let tuple = eval_args(frame, &call.args, ctx).await?;
    let mut args = tuple.positional.clone();
    for (_, v) in &tuple.named {
        args.push(v.clone());
    }
    invoke_value(frame, &callee, args, call.span, ctx).await
}

pub async fn eval_args(frame: &Frame, args: &[Arg], ctx: &Rc<RuntimeContext>) -> Result<Tuple, Control> {
    let mut positional = Vec::new();
    let mut named = Vec::new();
    for arg in args {
        match arg {
            Arg::Positional(e) => positional.push(eval_expr(frame, e, ctx).await?),
            Arg::Named(name, e) => named.push((name.clone(), eval_expr(frame, e, ctx).await?)),
            Arg::Spread(e) => match eval_expr(frame, e, ctx).await? {
                Value::Tuple(t) => {
                    positional.extend(t.positional.clone());
                    named.extend(t.named.clone());
                }
                Value::List(l) => positional.extend((*l).clone()),
                Value::Dict(d) => named.extend(d.iter().cloned()),
                other => positional.push(other),
            },
        }
    }
    Ok(Tuple { positional, named })
}

async fn invoke_value(frame: &Frame, callee: &Value, args: Vec<Value>, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match callee {
        Value::Callable(Callable::Closure(c)) => invoke_closure(frame, c, args, span, ctx).await,
        Value::Callable(Callable::Builtin(b)) => {
            let receiver = args.first().cloned().unwrap_or(Value::Null);
            let rest = if args.is_empty() { &[][..] } else { &args[1..] };
            (b.func)(&receiver, rest).map_err(Control::Error)
        }
        Value::Callable(Callable::Host(h)) => {
            let func = Rc::clone(&h.func);
            func(args, Rc::clone(ctx)).await.map_err(Control::Error)
        }
        _ => Err(Control::Error(EvalError::NotCallable { span })),
    }
}

async fn invoke_closure(frame: &Frame, closure: &Rc<Closure>, args: Vec<Value>, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let call_scope = Scope::child(&closure.defining_scope);
    bind_params(&call_scope, &closure.params, &args, frame, ctx, span).await?;
    if let Some(bound) = &closure.bound {
        if let Some(dict) = bound.upgrade() {
            call_scope.define("self", Value::Dict(dict));
        }
    }
    let call_frame = Frame { scope: call_scope, pipe: frame.pipe.clone(), annotations: frame.annotations.clone() };
    match eval_closure_body(&call_frame, &closure.body, ctx).await {
        Ok(v) => Ok(v),
        Err(Control::Return(v, _)) => Ok(v),
        Err(other) => Err(other),
    }
}

async fn bind_params(
    scope: &Rc<Scope>,
    params: &[crate::value::Param],
    args: &[Value],
    frame: &Frame,
    ctx: &Rc<RuntimeContext>,
    span: Span,
) -> Result<(), Control> {
    for (i, param) in params.iter().enumerate() {
        let value = match args.get(i).cloned() {
            Some(v) => v,
            None => match &param.default {
                Some(expr) => eval_expr(&frame.with_scope(Rc::clone(scope)), expr, ctx).await?,
                None => {
                    return Err(Control::Error(EvalError::ArityMismatch {
                        name: "closure".into(),
                        expected: params.len().to_string(),
                        actual: args.len(),
                        span,
                    }))
                }
            },
        };
        if let Some(tag) = param.type_tag {
            if !tag.matches(&value) {
                return Err(Control::Error(EvalError::type_mismatch(tag.name(), value.type_name(), span)));
            }
        }
        scope.define(param.name.clone(), value);
    }
    Ok(())
}

// ---- primaries -------------------------------------------------------------

#[async_recursion(?Send)]
async fn eval_primary(frame: &Frame, primary: &Primary, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match primary {
        Primary::Literal(lit) => eval_literal(frame, lit, ctx).await,
        Primary::Variable(v) => eval_variable(frame, v, ctx).await,
        Primary::HostCall(h) => eval_host_call(frame, h, ctx).await,
        Primary::ClosureCall(c) => eval_closure_call(frame, c, ctx).await,
        Primary::Closure(def) => Ok(Value::Callable(Callable::Closure(Rc::new(Closure::from_def(def, Rc::clone(&frame.scope)))))),
        Primary::Conditional(c) => eval_conditional(frame, c, ctx).await,
        Primary::Loop(l) => eval_loop(frame, l, ctx).await,
        Primary::Block(b) => eval_block(frame, b, ctx).await,
        Primary::Grouped(chain) => eval_pipe_chain(&frame.child(), chain, ctx).await,
        Primary::Spread(e) => Ok(spread_to_tuple(eval_expr(frame, e, ctx).await?)),
        Primary::Destructure(d) => eval_destructure(frame, d).map(|_| frame.pipe.clone()),
        Primary::Slice(s) => eval_slice(frame, s, ctx).await,
        Primary::TypeAssertion { expr, type_name, span } => {
            let value = eval_expr(frame, expr, ctx).await?;
            let tag = TypeTag::parse(type_name).ok_or_else(|| Control::Error(EvalError::type_mismatch(type_name.clone(), value.type_name(), *span)))?;
            if tag.matches(&value) {
                Ok(value)
            } else {
                Err(Control::Error(EvalError::type_mismatch(tag.name(), value.type_name(), *span)))
            }
        }
        Primary::TypeCheck { expr, type_name, span } => {
            let value = eval_expr(frame, expr, ctx).await?;
            let tag = TypeTag::parse(type_name).ok_or_else(|| Control::Error(EvalError::type_mismatch(type_name.clone(), value.type_name(), *span)))?;
            Ok(Value::Bool(tag.matches(&value)))
        }
        Primary::Pass(_) => Ok(frame.pipe.clone()),
        Primary::Assert(expr, span) => {
            let value = eval_expr(frame, expr, ctx).await?;
            match value.as_bool() {
                Some(true) => Ok(frame.pipe.clone()),
                _ => Err(Control::Error(EvalError::AssertionFailed { span: *span })),
            }
        }
        Primary::Error(expr, span) => {
            let value = eval_expr(frame, expr, ctx).await?;
            Err(Control::Error(EvalError::Custom { message: value.to_string(), span: *span }))
        }
    }
}

async fn eval_literal(frame: &Frame, lit: &Literal, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match lit {
        Literal::Number(n, _) => Ok(Value::Number(*n)),
        Literal::Bool(b, _) => Ok(Value::Bool(*b)),
        Literal::String(s) => {
            let mut out = String::new();
            for part in &s.parts {
                match part {
                    StringPart::Literal(text) => out.push_str(text),
                    StringPart::Interpolation(expr) => out.push_str(&eval_expr(frame, expr, ctx).await?.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        Literal::Tuple(t) => {
            let mut positional = Vec::new();
            let mut named = Vec::new();
            for el in &t.elements {
                match el {
                    TupleElement::Positional(e) => positional.push(eval_expr(frame, e, ctx).await?),
                    TupleElement::Named(name, e) => named.push((name.clone(), eval_expr(frame, e, ctx).await?)),
                    TupleElement::Spread(e) => match eval_expr(frame, e, ctx).await? {
                        Value::Tuple(inner) => {
                            positional.extend(inner.positional.clone());
                            named.extend(inner.named.clone());
                        }
                        Value::List(l) => positional.extend((*l).clone()),
                        Value::Dict(d) => named.extend(d.iter().cloned()),
                        other => positional.push(other),
                    },
                }
            }
            // A bracketed literal with no named entries reads naturally as
            // a list; named entries make it a `Tuple` (§3 "Values").
            if named.is_empty() {
                Ok(Value::list(positional))
            } else {
                Ok(Value::Tuple(Rc::new(Tuple { positional, named })))
            }
        }
        Literal::Dict(d) => {
            let mut entries = Vec::new();
            for entry in &d.entries {
                match entry {
                    DictEntry::KeyValue(key, e) => {
                        let k = match key {
                            DictKey::Name(n) => n.clone(),
                            DictKey::Computed(ke) => eval_expr(frame, ke, ctx).await?.to_string(),
                        };
                        entries.push((k, eval_expr(frame, e, ctx).await?));
                    }
                    DictEntry::Spread(e) => match eval_expr(frame, e, ctx).await? {
                        Value::Dict(inner) => entries.extend(inner.iter().cloned()),
                        Value::Tuple(t) => entries.extend(t.named.clone()),
                        _ => {}
                    },
                }
            }
            Ok(Value::Dict(Dict::with_bound_callables(entries)))
        }
    }
}

async fn eval_variable(frame: &Frame, v: &Variable, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let base = if v.is_pipe_var {
        frame.pipe.clone()
    } else {
        let name = v.name.as_deref().unwrap_or_default();
        match frame.scope.get(name) {
            Some(value) => value,
            None => match &v.default {
                Some(default) => return eval_expr(frame, default, ctx).await,
                None => {
                    if v.existence_check {
                        return Ok(Value::Bool(false));
                    }
                    return Err(Control::Error(EvalError::UndefinedVariable { name: name.to_string(), span: v.span }));
                }
            },
        }
    };
    walk_access_chain(frame, base, &v.access_chain, v.existence_check, v.span, ctx).await
}

async fn walk_access_chain(
    frame: &Frame,
    mut value: Value,
    chain: &[AccessStep],
    existence_check: bool,
    span: Span,
    ctx: &Rc<RuntimeContext>,
) -> Result<Value, Control> {
    for step in chain {
        match resolve_access_step(frame, &value, step, span, ctx).await {
            Ok(Some(v)) => value = v,
            Ok(None) if existence_check => return Ok(Value::Bool(false)),
            Ok(None) => return Err(Control::Error(EvalError::DictFieldMissing { field: step_label(step), span })),
            Err(_) if existence_check => return Ok(Value::Bool(false)),
            Err(e) => return Err(e),
        }
    }
    if existence_check {
        Ok(Value::Bool(true))
    } else {
        Ok(value)
    }
}

fn step_label(step: &AccessStep) -> String {
    match step {
        AccessStep::Field(f) => f.clone(),
        AccessStep::ComputedField(_) => "<computed>".into(),
        AccessStep::BlockField(_) => "<block>".into(),
        AccessStep::Alternatives(names) => names.join("|"),
        AccessStep::Annotation(k) => format!("^{k}"),
        AccessStep::Index(_) => "<index>".into(),
    }
}

async fn resolve_access_step(frame: &Frame, value: &Value, step: &AccessStep, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Option<Value>, Control> {
    match step {
        AccessStep::Field(name) => Ok(field_of(value, name)),
        AccessStep::ComputedField(e) => {
            let key = eval_expr(frame, e, ctx).await?.to_string();
            Ok(field_of(value, &key))
        }
        AccessStep::BlockField(block) => {
            let key = eval_block(frame, block, ctx).await?.to_string();
            Ok(field_of(value, &key))
        }
        AccessStep::Annotation(key) => Ok(Some(frame.lookup_annotation(key).unwrap_or(Value::Null))),
        AccessStep::Index(e) => {
            let idx = eval_expr(frame, e, ctx).await?;
            match index_value(value, &idx, span) {
                Ok(v) => Ok(Some(v)),
                Err(e) => Err(e),
            }
        }
        // No concrete surface syntax resolves to this variant (left
        // unparsed — see parser.rs); kept only so the AST stays closed
        // over every `AccessStep` the grammar could in principle grow.
        AccessStep::Alternatives(_) => Ok(None),
    }
}

fn field_of(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Dict(d) => match name {
            "keys" => Some(Value::list(d.keys())),
            "values" => Some(Value::list(d.values())),
            "entries" => Some(Value::list(d.entries())),
            other => d.get(other).cloned(),
        },
        _ => None,
    }
}

fn index_value(value: &Value, index: &Value, span: Span) -> Result<Value, Control> {
    let i = match index {
        Value::Number(n) => *n as i64,
        other => return Err(Control::Error(EvalError::type_mismatch("number", other.type_name(), span))),
    };
    match value {
        Value::List(items) => resolve_index(items.len(), i)
            .and_then(|idx| items.get(idx).cloned())
            .ok_or(Control::Error(EvalError::IndexOutOfBounds { index: i, length: items.len(), span })),
        Value::Tuple(t) => resolve_index(t.positional.len(), i)
            .and_then(|idx| t.positional.get(idx).cloned())
            .ok_or(Control::Error(EvalError::IndexOutOfBounds { index: i, length: t.positional.len(), span })),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            resolve_index(chars.len(), i)
                .and_then(|idx| chars.get(idx).map(|c| Value::String(c.to_string())))
                .ok_or(Control::Error(EvalError::IndexOutOfBounds { index: i, length: chars.len(), span }))
        }
        other => Err(Control::Error(EvalError::type_mismatch("list, tuple, or string", other.type_name(), span))),
    }
}

fn resolve_index(len: usize, i: i64) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

// ---- conditionals / loops --------------------------------------------------

#[async_recursion(?Send)]
async fn eval_conditional(frame: &Frame, cond: &Conditional, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let cond_value = eval_expr(frame, &cond.condition, ctx).await?;
    let truth = cond_value
        .as_bool()
        .ok_or_else(|| Control::Error(EvalError::NonBooleanConditional { actual: cond_value.type_name().to_string(), span: cond.condition.span() }))?;
    if truth {
        eval_body(frame, &cond.then_branch, ctx).await
    } else {
        match &cond.else_branch {
            None => Ok(Value::Null),
            Some(ElseBranch::Body(b)) => eval_body(frame, b, ctx).await,
            Some(ElseBranch::ElseIf(c)) => eval_conditional(frame, c, ctx).await,
        }
    }
}

async fn eval_loop(frame: &Frame, loop_node: &Loop, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    // `limit` doubles as both the concurrency override and the iteration-
    // cap override (§4.3.7): if it was not set the raw lookup falls back to
    // the concurrency default, so unwrap it against the iteration cap here.
    let cap = match frame.lookup_annotation("limit") {
        Some(Value::Number(n)) if n >= 1.0 => n as usize,
        _ => ctx.defaults.iteration_cap,
    };
    let mut current = frame.pipe.clone();
    let mut iterations = 0usize;
    match loop_node {
        Loop::PreTest { condition, body, span, .. } => loop {
            check_abort(ctx, *span)?;
            let cond_frame = frame.with_pipe(current.clone());
            let cond_value = eval_expr(&cond_frame, condition, ctx).await?;
            let truth = cond_value
                .as_bool()
                .ok_or_else(|| Control::Error(EvalError::NonBooleanConditional { actual: cond_value.type_name().to_string(), span: condition.span() }))?;
            if !truth {
                break;
            }
            if iterations >= cap {
                return Err(Control::Error(EvalError::IterationCapExceeded { cap, span: *span }));
            }
            iterations += 1;
            let iter_frame = cond_frame.child();
            match eval_body(&iter_frame, body, ctx).await {
                Ok(v) => current = v,
                Err(Control::Break(v, _)) => {
                    current = v;
                    break;
                }
                Err(other) => return Err(other),
            }
        },
        Loop::PostTest { body, condition, span, .. } => loop {
            check_abort(ctx, *span)?;
            if iterations >= cap {
                return Err(Control::Error(EvalError::IterationCapExceeded { cap, span: *span }));
            }
            iterations += 1;
            let iter_frame = frame.with_pipe(current.clone()).child();
            match eval_body(&iter_frame, body, ctx).await {
                Ok(v) => current = v,
                Err(Control::Break(v, _)) => {
                    current = v;
                    break;
                }
                Err(other) => return Err(other),
            }
            let cond_frame = frame.with_pipe(current.clone());
            let cond_value = eval_expr(&cond_frame, condition, ctx).await?;
            let truth = cond_value
                .as_bool()
                .ok_or_else(|| Control::Error(EvalError::NonBooleanConditional { actual: cond_value.type_name().to_string(), span: condition.span() }))?;
            if !truth {
                break;
            }
        },
    }
    Ok(current)
}

// ---- collection operators --------------------------------------------------

async fn collect_elements(pipe: &Value, cap: usize, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Vec<Value>, Control> {
    match pipe {
        Value::List(items) => {
            if items.len() > cap {
                return Err(Control::Error(EvalError::IterationCapExceeded { cap, span }));
            }
            Ok((**items).clone())
        }
        // A dict shaped like `{ done, value, next }` is treated as a lazy
        // iterator and pulled until exhausted or the cap is hit.
        Value::Dict(d) if d.get("next").is_some() && d.get("done").is_some() => {
            let mut out = Vec::new();
            let mut state = Rc::clone(d);
            loop {
                check_abort(ctx, span)?;
                if out.len() >= cap {
                    return Err(Control::Error(EvalError::IterationCapExceeded { cap, span }));
                }
                let done = state.get("done").and_then(Value::as_bool).unwrap_or(true);
                if done {
                    break;
                }
                if let Some(v) = state.get("value") {
                    out.push(v.clone());
                }
                let next = state.get("next").cloned().ok_or(Control::Error(EvalError::DictFieldMissing { field: "next".into(), span }))?;
                match invoke_value(&Frame::new(ctx.root_scope()), &next, vec![], span, ctx).await? {
                    Value::Dict(next_state) => state = next_state,
                    _ => break,
                }
            }
            Ok(out)
        }
        other => Err(Control::Error(EvalError::type_mismatch("list or iterator", other.type_name(), span))),
    }
}

async fn apply_collection_body(frame: &Frame, body: &CollectionBody, element: Value, acc: Option<Value>, span: Span, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    match body {
        CollectionBody::InlineClosure(def) => {
            let closure = Rc::new(Closure::from_def(def, Rc::clone(&frame.scope)));
            let mut args = vec![element];
            if let Some(a) = acc {
                args.push(a);
            }
            invoke_closure(frame, &closure, args, def.span, ctx).await
        }
        CollectionBody::Block(block) => eval_block(&frame.with_pipe(element), block, ctx).await,
        CollectionBody::Grouped(chain) => eval_pipe_chain(&frame.with_pipe(element).child(), chain, ctx).await,
        CollectionBody::Variable(v) => {
            let callee = eval_variable(frame, v, ctx).await?;
            let mut args = vec![element];
            if let Some(a) = acc {
                args.push(a);
            }
            invoke_value(frame, &callee, args, v.span, ctx).await
        }
        CollectionBody::HostCallName(name) => {
            let func = ctx.functions.get(name).ok_or_else(|| Control::Error(EvalError::UndefinedVariable { name: name.clone(), span }))?;
            let mut args = vec![element];
            if let Some(a) = acc {
                args.push(a);
            }
            func.func.clone()(args, Rc::clone(ctx)).await.map_err(Control::Error)
        }
        CollectionBody::Spread => Ok(element),
    }
}

async fn eval_each(frame: &Frame, e: &EachExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let cap = ctx.defaults.iteration_cap;
    let elements = collect_elements(&frame.pipe, cap, e.span, ctx).await?;
    match &e.init {
        None => {
            let mut out = Vec::with_capacity(elements.len());
            for el in elements {
                out.push(apply_collection_body(frame, &e.body, el, None, e.span, ctx).await?);
            }
            Ok(Value::list(out))
        }
        Some(init) => {
            let mut acc = eval_expr(frame, init, ctx).await?;
            let mut out = Vec::with_capacity(elements.len());
            for el in elements {
                acc = apply_collection_body(frame, &e.body, el, Some(acc), e.span, ctx).await?;
                out.push(acc.clone());
            }
            Ok(Value::list(out))
        }
    }
}

async fn eval_fold(frame: &Frame, e: &FoldExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let cap = ctx.defaults.iteration_cap;
    let elements = collect_elements(&frame.pipe, cap, e.span, ctx).await?;
    let mut acc = match &e.init {
        Some(init) => eval_expr(frame, init, ctx).await?,
        None => Value::Null,
    };
    for el in elements {
        acc = apply_collection_body(frame, &e.body, el, Some(acc), e.span, ctx).await?;
    }
    Ok(acc)
}

async fn eval_map(frame: &Frame, e: &MapExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let cap = ctx.defaults.iteration_cap;
    let elements = collect_elements(&frame.pipe, cap, e.span, ctx).await?;
    let limit = frame.concurrency_limit(ctx.defaults.concurrency_limit).max(1);
    let mut out = Vec::with_capacity(elements.len());
    for chunk in elements.chunks(limit) {
        check_abort(ctx, e.span)?;
        let futures = chunk.iter().cloned().map(|el| apply_collection_body(frame, &e.body, el, None, e.span, ctx));
        for result in futures::future::join_all(futures).await {
            out.push(result?);
        }
    }
    Ok(Value::list(out))
}

async fn eval_filter(frame: &Frame, e: &FilterExpr, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let cap = ctx.defaults.iteration_cap;
    let elements = collect_elements(&frame.pipe, cap, e.span, ctx).await?;
    let limit = frame.concurrency_limit(ctx.defaults.concurrency_limit).max(1);
    let mut kept = Vec::with_capacity(elements.len());
    for chunk in elements.chunks(limit) {
        check_abort(ctx, e.span)?;
        let futures = chunk.iter().cloned().map(|el| {
            let el_for_result = el.clone();
            async move {
                let keep = apply_collection_body(frame, &e.body, el, None, e.span, ctx).await?;
                Ok::<(Value, bool), Control>((el_for_result, keep.is_truthy()))
            }
        });
        for result in futures::future::join_all(futures).await {
            let (el, keep) = result?;
            if keep {
                kept.push(el);
            }
        }
    }
    Ok(Value::list(kept))
}

// ---- destructure / slice ----------------------------------------------------

fn eval_destructure(frame: &Frame, d: &Destructure) -> Result<(), Control> {
    let elements = match &frame.pipe {
        Value::List(items) => (**items).clone(),
        Value::Tuple(t) => t.positional.clone(),
        other => return Err(Control::Error(EvalError::type_mismatch("list or tuple", other.type_name(), d.span))),
    };
    bind_destructure_patterns(frame, &d.patterns, &elements, d.span)
}

fn bind_destructure_patterns(frame: &Frame, patterns: &[DestructurePattern], elements: &[Value], span: Span) -> Result<(), Control> {
    for (i, pattern) in patterns.iter().enumerate() {
        match pattern {
            DestructurePattern::Skip => {}
            DestructurePattern::Bind { name, .. } => {
                let value = elements.get(i).cloned().unwrap_or(Value::Null);
                frame.scope.capture(name, value, span)?;
            }
            DestructurePattern::Nested(nested) => {
                let value = elements.get(i).cloned().unwrap_or(Value::Null);
                let inner = match value {
                    Value::List(items) => (*items).clone(),
                    Value::Tuple(t) => t.positional.clone(),
                    _ => vec![],
                };
                bind_destructure_patterns(frame, &nested.patterns, &inner, nested.span)?;
            }
        }
    }
    Ok(())
}

async fn eval_slice(frame: &Frame, s: &Slice, ctx: &Rc<RuntimeContext>) -> Result<Value, Control> {
    let start = match &s.start {
        Some(e) => Some(as_index(eval_expr(frame, e, ctx).await?, s.span)?),
        None => None,
    };
    let stop = match &s.stop {
        Some(e) => Some(as_index(eval_expr(frame, e, ctx).await?, s.span)?),
        None => None,
    };
    let step = match &s.step {
        Some(e) => as_index(eval_expr(frame, e, ctx).await?, s.span)?,
        None => 1,
    };
    match &frame.pipe {
        Value::List(items) => Ok(Value::list(python_slice(items, start, stop, step))),
        Value::Tuple(t) => Ok(Value::list(python_slice(&t.positional, start, stop, step))),
        Value::String(text) => {
            let chars: Vec<Value> = text.chars().map(|c| Value::String(c.to_string())).collect();
            let sliced = python_slice(&chars, start, stop, step);
            let joined: String = sliced.into_iter().map(|v| v.to_string()).collect();
            Ok(Value::String(joined))
        }
        other => Err(Control::Error(EvalError::type_mismatch("list, tuple, or string", other.type_name(), s.span))),
    }
}

fn as_index(value: Value, span: Span) -> Result<i64, Control> {
    match value {
        Value::Number(n) => Ok(n as i64),
        other => Err(Control::Error(EvalError::type_mismatch("number", other.type_name(), span))),
    }
}

/// Python-style slicing: negative indices count from the end, a negative
/// step reverses (§4.2 "Destructure / slice / spread").
fn python_slice(items: &[Value], start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<Value> {
    let len = items.len() as i64;
    if step == 0 || len == 0 {
        return Vec::new();
    }
    let normalize = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(-1)
        } else {
            i.min(len)
        }
    };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map(normalize).unwrap_or(0).max(0);
        let stop = stop.map(normalize).unwrap_or(len).min(len);
        while i < stop {
            if let Some(v) = items.get(i as usize) {
                out.push(v.clone());
            }
            i += step;
        }
    } else {
        let mut i = start.map(normalize).unwrap_or(len - 1).min(len - 1);
        let stop = stop.map(normalize).unwrap_or(-1);
        while i > stop {
            if i >= 0 {
                if let Some(v) = items.get(i as usize) {
                    out.push(v.clone());
                }
            }
            i += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use crate::lexer::Lexer;
    use crate::parser::{split_frontmatter, Parser};

    fn eval_source(source: &str) -> Result<Value, EvalError> {
        let (frontmatter, rest) = split_frontmatter(source);
        let tokens = Lexer::tokenize(rest).unwrap();
        let script = Parser::parse(tokens, frontmatter).unwrap();
        let ctx = RuntimeContext::create(ContextOptions::default());
        block_on(execute(&script, ctx)).map(|r| r.value)
    }

    fn eval_source_with(source: &str, options: ContextOptions) -> Result<Value, EvalError> {
        let (frontmatter, rest) = split_frontmatter(source);
        let tokens = Lexer::tokenize(rest).unwrap();
        let script = Parser::parse(tokens, frontmatter).unwrap();
        let ctx = RuntimeContext::create(options);
        block_on(execute(&script, ctx)).map(|r| r.value)
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    }

    #[test]
    fn uppercase_method_pipe() {
        assert_eq!(eval_source(r#""hello" -> .upper"#).unwrap(), Value::String("HELLO".into()));
    }

    #[test]
    fn map_doubles_each_element() {
        let result = eval_source("[1,2,3] -> map |x|($x*2)").unwrap();
        assert_eq!(result, Value::list(vec![Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]));
    }

    #[test]
    fn capture_then_interpolate() {
        assert_eq!(eval_source("\"x\" => $v\n\"val:{$v}\"").unwrap(), Value::String("val:x".into()));
    }

    #[test]
    fn piped_conditional_picks_branch() {
        assert_eq!(eval_source(r#"5 -> ($>3) ? "big" ! "small""#).unwrap(), Value::String("big".into()));
    }

    #[test]
    fn dict_dispatch_with_default() {
        assert_eq!(eval_source(r#""c" -> [a: "one", b: "two"] ?? "other""#).unwrap(), Value::String("other".into()));
        assert_eq!(eval_source(r#""b" -> [a: "one", b: "two"] ?? "other""#).unwrap(), Value::String("two".into()));
    }

    #[test]
    fn pretest_loop_counts_to_five() {
        assert_eq!(eval_source("0 -> ($<5) @ { $+1 }").unwrap(), Value::Number(5.0));
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let options = ContextOptions { defaults: crate::context::Defaults { iteration_cap: 5, concurrency_limit: 1 }, ..Default::default() };
        let err = eval_source_with("0 -> (true) @ { $+1 }", options).unwrap_err();
        assert!(matches!(err, EvalError::IterationCapExceeded { cap: 5, .. }));
    }

    #[test]
    fn type_lock_rejects_reassignment_to_different_type() {
        let err = eval_source("1 => $x\n\"two\" => $x").unwrap_err();
        assert!(matches!(err, EvalError::TypeLock { .. }));
    }

    #[test]
    fn filter_preserves_order_of_retained_elements() {
        let result = eval_source("[1,2,3,4] -> filter |x|($x>2)").unwrap();
        assert_eq!(result, Value::list(vec![Value::Number(3.0), Value::Number(4.0)]));
    }

    #[test]
    fn undefined_variable_is_a_named_error() {
        let err = eval_source("$missing -> .upper").unwrap_err();
        assert!(matches!(err, EvalError::UndefinedVariable { ref name, .. } if name == "missing"));
    }

    #[test]
    fn fold_reduces_to_a_single_value() {
        let result = eval_source("[1,2,3,4] -> fold(0) |x,acc|($x+$acc)").unwrap();
        assert_eq!(result, Value::Number(10.0));
    }

    #[test]
    fn mid_chain_capture_with_mismatched_type_assertion_errors() {
        let err = eval_source("1 => $x:string\n$x").unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn mid_chain_capture_with_matching_type_assertion_passes_value_through() {
        let result = eval_source("1 => $x:number -> ($x+1)").unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn dict_literal_closure_is_bound_to_self() {
        let result = eval_source("[name: \"rill\", greet: ||(self.name)] => $d\n$d.greet -> $()").unwrap();
        assert_eq!(result, Value::String("rill".into()));
    }
}
