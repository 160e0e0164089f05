// ABOUTME: The cooperative one-statement-at-a-time driver (§4.3.1): a
// `{statements, index, lastValue, done}` state machine built on top of
// `eval::run_statement`, for external control loops (debuggers, UIs).
// Whole-script execution is the thin `run_to_completion` loop over `step`.

use crate::ast::Script;
use crate::context::RuntimeContext;
use crate::error::EvalError;
use crate::eval::{self, Control, ExecutionResult, Frame};
use crate::value::Value;
use std::rc::Rc;
use std::time::Instant;

pub struct Stepper {
    script: Script,
    ctx: Rc<RuntimeContext>,
    index: usize,
    last_value: Value,
    done: bool,
}

impl Stepper {
    pub fn new(script: Script, ctx: Rc<RuntimeContext>) -> Result<Self, EvalError> {
        if let Some(err) = eval::find_recovery_error(&script) {
            return Err(err);
        }
        Ok(Stepper { script, ctx, index: 0, last_value: Value::Null, done: false })
    }

    pub fn total(&self) -> usize {
        self.script.statements.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn context(&self) -> &Rc<RuntimeContext> {
        &self.ctx
    }

    /// Advances by one statement: checks the abort signal, fires
    /// `onStepStart`, evaluates, fires `onStepEnd` with the elapsed
    /// duration, and routes any error through `onError` before marking the
    /// stepper done. Returns the statement's value, or the carried-over
    /// last value once `done` (a no-op once exhausted).
    pub async fn step(&mut self) -> Result<Value, EvalError> {
        if self.done {
            return Ok(self.last_value.clone());
        }
        let stmt = &self.script.statements[self.index];
        if self.ctx.abort_signal.is_set() {
            let err = EvalError::Abort { span: stmt.span };
            if let Some(cb) = &self.ctx.observability.on_error {
                cb(&err, self.index);
            }
            self.done = true;
            return Err(err);
        }
        if let Some(cb) = &self.ctx.observability.on_step_start {
            cb(self.index, self.total(), &self.last_value);
        }
        let start = Instant::now();
        let frame = Frame::new(self.ctx.root_scope());
        let result = eval::run_statement(&frame, stmt, &self.ctx).await;
        let elapsed_ms = start.elapsed().as_millis();

        match result {
            Ok(value) => {
                self.last_value = value.clone();
                if let Some(cb) = &self.ctx.observability.on_step_end {
                    cb(self.index, self.total(), &value, elapsed_ms);
                }
                self.index += 1;
                if self.index >= self.total() {
                    self.done = true;
                }
                Ok(value)
            }
            Err(Control::Return(value, _)) => {
                self.last_value = value.clone();
                if let Some(cb) = &self.ctx.observability.on_step_end {
                    cb(self.index, self.total(), &value, elapsed_ms);
                }
                self.done = true;
                Ok(value)
            }
            Err(other) => {
                let err = other.into_error();
                if let Some(cb) = &self.ctx.observability.on_error {
                    cb(&err, self.index);
                }
                self.done = true;
                Err(err)
            }
        }
    }

    /// Drives the stepper to completion, mirroring "synchronous whole-script
    /// execution is a thin loop that repeatedly calls `step`" (§4.3.1).
    pub async fn run_to_completion(&mut self) -> Result<ExecutionResult, EvalError> {
        while !self.done {
            self.step().await?;
        }
        Ok(self.get_result())
    }

    pub fn get_result(&self) -> ExecutionResult {
        ExecutionResult { value: self.last_value.clone(), variables: self.ctx.root_scope().bindings_snapshot() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;
    use crate::lexer::Lexer;
    use crate::parser::{split_frontmatter, Parser};

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    }

    fn parse(source: &str) -> Script {
        let (frontmatter, rest) = split_frontmatter(source);
        let tokens = Lexer::tokenize(rest).unwrap();
        Parser::parse(tokens, frontmatter).unwrap()
    }

    #[test]
    fn steps_advance_index_and_mark_done() {
        let script = parse("1 => $a\n2 => $b\n$a + $b");
        let ctx = RuntimeContext::create(ContextOptions::default());
        let mut stepper = Stepper::new(script, ctx).unwrap();
        assert!(!stepper.done());
        block_on(stepper.step()).unwrap();
        assert_eq!(stepper.index(), 1);
        block_on(stepper.step()).unwrap();
        let last = block_on(stepper.step()).unwrap();
        assert_eq!(last, Value::Number(3.0));
        assert!(stepper.done());
    }

    #[test]
    fn run_to_completion_matches_step_loop() {
        let script = parse("1 => $a\n2 => $b\n$a + $b");
        let ctx = RuntimeContext::create(ContextOptions::default());
        let mut stepper = Stepper::new(script, ctx).unwrap();
        let result = block_on(stepper.run_to_completion()).unwrap();
        assert_eq!(result.value, Value::Number(3.0));
        assert_eq!(result.variables.get("a"), Some(&Value::Number(1.0)));
    }
}
