// ABOUTME: The error taxonomy: lexer, parse, and runtime errors, each with a
// stable code, a one-line message, a span, and the process-wide error
// registry used to format diagnostics.

use crate::span::Span;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("invalid escape sequence `\\{escape}`")]
    InvalidEscape { escape: char, span: Span },

    #[error("unexpected character `{ch}`")]
    StrayCharacter { ch: char, span: Span },

    #[error("heredoc syntax (`<<EOF`) is not supported; use a multiline string instead")]
    HeredocNotSupported { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnterminatedString { span }
            | LexError::InvalidEscape { span, .. }
            | LexError::StrayCharacter { span, .. }
            | LexError::HeredocNotSupported { span } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LexError::UnterminatedString { .. } => "E_LEX_UNTERMINATED_STRING",
            LexError::InvalidEscape { .. } => "E_LEX_INVALID_ESCAPE",
            LexError::StrayCharacter { .. } => "E_LEX_STRAY_CHARACTER",
            LexError::HeredocNotSupported { .. } => "E_LEX_HEREDOC",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String, span: Span },

    #[error("missing closing {delimiter}")]
    MissingDelimiter { delimiter: &'static str, span: Span },

    #[error("`:>` is deprecated; use `=>` for capture")]
    DeprecatedCaptureArrow { span: Span },

    #[error("`!` used without a preceding operand")]
    BareNegation { span: Span },

    #[error("ambiguous empty literal; use `[]` for an empty list or `[:]` for an empty dict")]
    EmptyLiteralAmbiguity { span: Span },

    #[error("{message}")]
    Recovered { message: String, text: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::MissingDelimiter { span, .. }
            | ParseError::DeprecatedCaptureArrow { span }
            | ParseError::BareNegation { span }
            | ParseError::EmptyLiteralAmbiguity { span }
            | ParseError::Recovered { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ParseError::UnexpectedToken { .. } => "E_PARSE_UNEXPECTED_TOKEN",
            ParseError::MissingDelimiter { .. } => "E_PARSE_MISSING_DELIMITER",
            ParseError::DeprecatedCaptureArrow { .. } => "E_PARSE_DEPRECATED_CAPTURE_ARROW",
            ParseError::BareNegation { .. } => "E_PARSE_BARE_NEGATION",
            ParseError::EmptyLiteralAmbiguity { .. } => "E_PARSE_EMPTY_LITERAL_AMBIGUITY",
            ParseError::Recovered { .. } => "E_PARSE_RECOVERED",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("script contains unrecovered parse errors")]
    ParseInvalid { span: Span },

    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String, span: Span },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String, span: Span },

    #[error("`{name}` is locked to type `{locked}`; cannot assign a value of type `{actual}`")]
    TypeLock { name: String, locked: String, actual: String, span: Span },

    #[error("dict has no field `{field}`")]
    DictFieldMissing { field: String, span: Span },

    #[error("list index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: i64, length: usize, span: Span },

    #[error("expected a bool in piped conditional, got {actual}")]
    NonBooleanConditional { actual: String, span: Span },

    #[error("block has no statements")]
    EmptyBlock { span: Span },

    #[error("iteration cap of {cap} exceeded")]
    IterationCapExceeded { cap: usize, span: Span },

    #[error("execution aborted")]
    Abort { span: Span },

    #[error("auto-exception: {message}")]
    AutoException { code: String, message: String, span: Span },

    #[error("host function `{name}` failed: {message}")]
    HostFunctionError { name: String, message: String, span: Span },

    #[error("value is not callable")]
    NotCallable { span: Span },

    #[error("arity mismatch for `{name}`: expected {expected}, got {actual}")]
    ArityMismatch { name: String, expected: String, actual: usize, span: Span },

    #[error("`break` used outside a loop")]
    BreakOutsideLoop { span: Span },

    #[error("assertion failed")]
    AssertionFailed { span: Span },

    #[error("{message}")]
    Custom { message: String, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::ParseInvalid { span }
            | EvalError::UndefinedVariable { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::TypeLock { span, .. }
            | EvalError::DictFieldMissing { span, .. }
            | EvalError::IndexOutOfBounds { span, .. }
            | EvalError::NonBooleanConditional { span, .. }
            | EvalError::EmptyBlock { span }
            | EvalError::IterationCapExceeded { span, .. }
            | EvalError::Abort { span }
            | EvalError::AutoException { span, .. }
            | EvalError::HostFunctionError { span, .. }
            | EvalError::NotCallable { span }
            | EvalError::ArityMismatch { span, .. }
            | EvalError::BreakOutsideLoop { span }
            | EvalError::AssertionFailed { span }
            | EvalError::Custom { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EvalError::ParseInvalid { .. } => "E_RUN_PARSE_INVALID",
            EvalError::UndefinedVariable { .. } => "E_RUN_UNDEFINED_VARIABLE",
            EvalError::TypeMismatch { .. } => "E_RUN_TYPE_MISMATCH",
            EvalError::TypeLock { .. } => "E_RUN_TYPE_LOCK",
            EvalError::DictFieldMissing { .. } => "E_RUN_DICT_FIELD_MISSING",
            EvalError::IndexOutOfBounds { .. } => "E_RUN_INDEX_OUT_OF_BOUNDS",
            EvalError::NonBooleanConditional { .. } => "E_RUN_NON_BOOLEAN_CONDITIONAL",
            EvalError::EmptyBlock { .. } => "E_RUN_EMPTY_BLOCK",
            EvalError::IterationCapExceeded { .. } => "E_RUN_ITERATION_CAP_EXCEEDED",
            EvalError::Abort { .. } => "E_RUN_ABORT",
            EvalError::AutoException { .. } => "E_RUN_AUTO_EXCEPTION",
            EvalError::HostFunctionError { .. } => "E_RUN_HOST_FUNCTION_ERROR",
            EvalError::NotCallable { .. } => "E_RUN_NOT_CALLABLE",
            EvalError::ArityMismatch { .. } => "E_RUN_ARITY_MISMATCH",
            EvalError::BreakOutsideLoop { .. } => "E_RUN_BREAK_OUTSIDE_LOOP",
            EvalError::AssertionFailed { .. } => "E_RUN_ASSERTION_FAILED",
            EvalError::Custom { .. } => "E_RUN_CUSTOM",
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>, span: Span) -> Self {
        EvalError::TypeMismatch { expected: expected.into(), actual: actual.into(), span }
    }

    pub fn host_error(name: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        EvalError::HostFunctionError { name: name.into(), message: message.into(), span }
    }
}

/// Documentation for one error code: the only process-wide state in the
/// core, per SPEC_FULL.md §B ("Error registry"). Initialized once, read
/// from any task.
#[derive(Debug, Clone)]
pub struct ErrorDoc {
    pub code: &'static str,
    pub description: &'static str,
    pub likely_cause: &'static str,
    pub resolution: &'static str,
    pub examples: &'static [&'static str],
}

static ERROR_REGISTRY: Lazy<HashMap<&'static str, ErrorDoc>> = Lazy::new(build_registry);

fn entry(
    code: &'static str,
    description: &'static str,
    likely_cause: &'static str,
    resolution: &'static str,
    examples: &'static [&'static str],
) -> (&'static str, ErrorDoc) {
    (code, ErrorDoc { code, description, likely_cause, resolution, examples })
}

fn build_registry() -> HashMap<&'static str, ErrorDoc> {
    HashMap::from([
        entry(
            "E_RUN_UNDEFINED_VARIABLE",
            "A script referenced a variable that was never captured in any enclosing scope.",
            "Typo in the variable name, or the capture (`=> $name`) happens after the read.",
            "Capture the value before reading it, or seed it via the context's `variables`.",
            &["$x -> .upper  # x was never captured"],
        ),
        entry(
            "E_RUN_TYPE_LOCK",
            "A variable already bound to one type was reassigned a value of a different type.",
            "Reusing a variable name across incompatible values within the same scope.",
            "Use a new variable name, or ensure both assignments produce the same type.",
            &["1 => $x\n\"two\" => $x  # type-lock error"],
        ),
        entry(
            "E_RUN_ITERATION_CAP_EXCEEDED",
            "A loop ran to the default iteration cap (10,000) without its condition becoming false.",
            "An unbounded or buggy loop condition.",
            "Fix the loop condition, or raise the cap explicitly with `^(limit: N)`.",
            &["0 -> (true) @ { $+1 }  # never terminates"],
        ),
        entry(
            "E_RUN_NON_BOOLEAN_CONDITIONAL",
            "A piped conditional (`-> ? then ! else`) received a non-bool pipe value.",
            "The upstream pipe stage produced a value that was never asserted or compared to a bool.",
            "Compare explicitly, e.g. `$x > 0 -> ? \"big\" ! \"small\"`.",
            &["5 -> ? \"big\" ! \"small\"  # 5 is a number, not a bool"],
        ),
        entry(
            "E_RUN_HOST_FUNCTION_ERROR",
            "A host function returned an error, which the core wraps and re-raises unchanged.",
            "Depends on the specific host extension.",
            "Check the wrapped message for the host-specific cause.",
            &[],
        ),
        entry(
            "E_PARSE_DEPRECATED_CAPTURE_ARROW",
            "`:>` was used where `=>` is required for capture.",
            "Migrating from an older draft of the language, or a typo of `=>`.",
            "Replace `:>` with `=>`.",
            &["e :> $x  # should be e => $x"],
        ),
    ])
}

/// Looks up documentation for a stable error code. Returns `None` for codes
/// without a registry entry yet (the registry is a diagnostics aid, not an
/// exhaustive requirement for every variant).
pub fn lookup(code: &str) -> Option<&'static ErrorDoc> {
    ERROR_REGISTRY.get(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Position, Span};

    fn span() -> Span {
        Span::point(Position::start())
    }

    #[test]
    fn every_variant_has_a_stable_code() {
        let e = EvalError::UndefinedVariable { name: "x".into(), span: span() };
        assert_eq!(e.code(), "E_RUN_UNDEFINED_VARIABLE");
    }

    #[test]
    fn registry_resolves_documented_codes() {
        let doc = lookup("E_RUN_TYPE_LOCK").expect("registered");
        assert_eq!(doc.code, "E_RUN_TYPE_LOCK");
        assert!(lookup("E_NOT_A_REAL_CODE").is_none());
    }
}
