// ABOUTME: Crate root: module layout and the public embedding API
// (`parse`, `parse_with_recovery`, `execute`, `create_stepper`) per §6.

pub mod ast;
pub mod builtins;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod eval;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod stepper;
pub mod token;
pub mod value;

use ast::Script;
use error::{EvalError, LexError, ParseError};
use lexer::Lexer;
use parser::Parser;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Parses `source` into a `Script`. Throws (returns `Err`) on the first
/// lexer or parser error, with a span (§6 `parse(source) → Script`).
pub fn parse(source: &str) -> Result<Script, SourceError> {
    let (frontmatter, rest) = parser::split_frontmatter(source);
    let tokens = Lexer::tokenize(rest)?;
    Ok(Parser::parse(tokens, frontmatter)?)
}

/// Parses `source`, never throwing: lexer failures and parser recovery
/// both collapse into `Script.statements` containing `Recovered` nodes
/// plus a flat list of the errors encountered (§6 `parseWithRecovery`).
pub fn parse_with_recovery(source: &str) -> (Script, Vec<ParseError>) {
    let (frontmatter, rest) = parser::split_frontmatter(source);
    match Lexer::tokenize(rest) {
        Ok(tokens) => Parser::parse_with_recovery(tokens, frontmatter),
        Err(lex_err) => {
            let span = lex_err.span();
            let script = Script { frontmatter, statements: vec![], span };
            (script, vec![ParseError::Recovered { message: lex_err.to_string(), text: rest.to_string(), span }])
        }
    }
}

/// Runs `script` to completion against `context` (§6 `execute`).
pub async fn execute(script: &Script, context: Rc<context::RuntimeContext>) -> Result<eval::ExecutionResult, EvalError> {
    eval::execute(script, context).await
}

/// Creates a cooperative stepper over `script` for external control loops
/// (debuggers, UIs) (§6 `createStepper`).
pub fn create_stepper(script: Script, context: Rc<context::RuntimeContext>) -> Result<stepper::Stepper, EvalError> {
    stepper::Stepper::new(script, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextOptions;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    }

    #[test]
    fn parse_then_execute_round_trips() {
        let script = parse("1 + 2").unwrap();
        let ctx = context::RuntimeContext::create(ContextOptions::default());
        let result = block_on(execute(&script, ctx)).unwrap();
        assert_eq!(result.value, value::Value::Number(3.0));
    }

    #[test]
    fn parse_with_recovery_never_throws_on_bad_source() {
        let (script, errors) = parse_with_recovery("$x -> .upper ->");
        assert!(!errors.is_empty() || !script.statements.is_empty());
    }

    #[test]
    fn create_stepper_walks_the_script() {
        let script = parse("1 => $a\n$a + 1").unwrap();
        let ctx = context::RuntimeContext::create(ContextOptions::default());
        let mut stepper = create_stepper(script, ctx).unwrap();
        let result = block_on(stepper.run_to_completion()).unwrap();
        assert_eq!(result.value, value::Value::Number(2.0));
    }
}
