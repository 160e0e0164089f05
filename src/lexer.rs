// ABOUTME: Hand-written single-pass lexer: turns UTF-8 source into a flat
// token stream (§4.1).

use crate::error::LexError;
use crate::span::{Position, Span};
use crate::token::{keyword, StringPart, Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    byte_offsets: Vec<usize>,
    source_len: usize,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut chars = Vec::new();
        let mut byte_offsets = Vec::new();
        for (offset, ch) in source.char_indices() {
            byte_offsets.push(offset);
            chars.push(ch);
        }
        Lexer { chars, byte_offsets, source_len: source.len(), pos: 0, line: 1, column: 1 }
    }

    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        lexer.run()
    }

    fn run(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_inline_whitespace_and_comments();
            let start = self.position();
            let Some(ch) = self.peek(0) else {
                tokens.push(Token::new(TokenKind::Eof, Span::point(start)));
                break;
            };

            if ch == '\n' {
                self.advance();
                tokens.push(Token::new(TokenKind::Newline, Span::new(start, self.position())));
                continue;
            }

            let kind = if ch.is_ascii_digit() {
                self.lex_number()?
            } else if ch == '"' {
                self.lex_string()?
            } else if is_ident_start(ch) {
                self.lex_identifier()
            } else {
                self.lex_operator(start)?
            };
            let end = self.position();
            tokens.push(Token::new(kind, Span::new(start, end)));
        }
        Ok(tokens)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn position(&self) -> Position {
        let offset = self.byte_offsets.get(self.pos).copied().unwrap_or(self.source_len);
        Position { offset, line: self.line, column: self.column }
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek(0)?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_inline_whitespace_and_comments(&mut self) {
        loop {
            match self.peek(0) {
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        let start_idx = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(0), Some('e') | Some('E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(0), Some('+') | Some('-')) {
                self.advance();
            }
            if self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        Ok(TokenKind::Number(text.parse().expect("lexer only admits valid number grammar")))
    }

    fn lex_identifier(&mut self) -> TokenKind {
        let start_idx = self.pos;
        while self.peek(0).is_some_and(is_ident_continue) {
            self.advance();
        }
        let text: String = self.chars[start_idx..self.pos].iter().collect();
        // `ns::name` namespaces are assembled by the parser from
        // Identifier, DoubleColon, Identifier rather than here, so `::`
        // inside an identifier run never happens — identifiers stop at the
        // first non-ident-continue character, and `:` is not one.
        keyword(&text).unwrap_or(TokenKind::Identifier(text))
    }

    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        let quote_start = self.position();
        self.advance(); // opening quote
        let is_multiline = self.peek(0) == Some('"') && self.peek(1) == Some('"');
        if is_multiline {
            self.advance();
            self.advance();
        }
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek(0) {
                None => return Err(LexError::UnterminatedString { span: Span::point(quote_start) }),
                Some('"') if !is_multiline => {
                    self.advance();
                    break;
                }
                Some('"') if is_multiline && self.peek(1) == Some('"') && self.peek(2) == Some('"') => {
                    self.advance();
                    self.advance();
                    self.advance();
                    break;
                }
                Some('\\') => {
                    let esc_start = self.position();
                    self.advance();
                    let escaped = self.peek(0).ok_or(LexError::UnterminatedString { span: Span::point(quote_start) })?;
                    let decoded = match escaped {
                        'n' => '\n',
                        't' => '\t',
                        '\\' => '\\',
                        '"' => '"',
                        '{' => '{',
                        other => return Err(LexError::InvalidEscape { escape: other, span: Span::point(esc_start) }),
                    };
                    self.advance();
                    literal.push(decoded);
                }
                Some('{') => {
                    if !literal.is_empty() {
                        parts.push(StringPart::Literal(std::mem::take(&mut literal)));
                    }
                    self.advance();
                    let inner_tokens = self.lex_braced_interpolation()?;
                    parts.push(StringPart::Interpolation(inner_tokens));
                }
                Some(c) => {
                    self.advance();
                    literal.push(c);
                }
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(StringPart::Literal(literal));
        }
        Ok(TokenKind::String(parts, is_multiline))
    }

    /// Lexes tokens up to the matching `}` of a string interpolation,
    /// tracking brace depth so nested `{}` (e.g. a dict literal inside the
    /// interpolation) is consumed correctly, then consumes the closing `}`.
    fn lex_braced_interpolation(&mut self) -> Result<Vec<Token>, LexError> {
        let mut depth = 1usize;
        let mut tokens = Vec::new();
        loop {
            self.skip_inline_whitespace_and_comments();
            let start = self.position();
            match self.peek(0) {
                None => return Err(LexError::UnterminatedString { span: Span::point(start) }),
                Some('}') => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        break;
                    }
                    tokens.push(Token::new(TokenKind::RBrace, Span::new(start, self.position())));
                }
                Some('{') => {
                    depth += 1;
                    self.advance();
                    tokens.push(Token::new(TokenKind::LBrace, Span::new(start, self.position())));
                }
                Some('\n') => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::Newline, Span::new(start, self.position())));
                }
                Some(c) if c.is_ascii_digit() => {
                    let kind = self.lex_number()?;
                    tokens.push(Token::new(kind, Span::new(start, self.position())));
                }
                Some('"') => {
                    let kind = self.lex_string()?;
                    tokens.push(Token::new(kind, Span::new(start, self.position())));
                }
                Some(c) if is_ident_start(c) => {
                    let kind = self.lex_identifier();
                    tokens.push(Token::new(kind, Span::new(start, self.position())));
                }
                Some(_) => {
                    let kind = self.lex_operator(start)?;
                    tokens.push(Token::new(kind, Span::new(start, self.position())));
                }
            }
        }
        tokens.push(Token::new(TokenKind::Eof, Span::point(self.position())));
        Ok(tokens)
    }

    fn lex_operator(&mut self, start: Position) -> Result<TokenKind, LexError> {
        let c = self.advance().expect("caller checked peek(0)");
        let kind = match (c, self.peek(0)) {
            ('-', Some('>')) => {
                self.advance();
                TokenKind::Arrow
            }
            ('=', Some('>')) => {
                self.advance();
                TokenKind::CaptureArrow
            }
            ('?', Some('?')) => {
                self.advance();
                TokenKind::NullishCoalesce
            }
            ('/', Some('<')) => {
                self.advance();
                TokenKind::SlashLt
            }
            ('*', Some('<')) => {
                self.advance();
                TokenKind::StarLt
            }
            (':', Some(':')) => {
                self.advance();
                TokenKind::DoubleColon
            }
            ('.', Some('?')) => {
                self.advance();
                TokenKind::QuestionDot
            }
            ('=', Some('=')) => {
                self.advance();
                TokenKind::EqEq
            }
            ('!', Some('=')) => {
                self.advance();
                TokenKind::NotEq
            }
            ('<', Some('=')) => {
                self.advance();
                TokenKind::LtEq
            }
            ('>', Some('=')) => {
                self.advance();
                TokenKind::GtEq
            }
            ('&', Some('&')) => {
                self.advance();
                TokenKind::AndAnd
            }
            ('|', Some('|')) => {
                self.advance();
                TokenKind::OrOr
            }
            ('<', Some('<')) => return Err(LexError::HeredocNotSupported { span: Span::point(start) }),
            ('$', _) => TokenKind::Dollar,
            ('.', _) => TokenKind::Dot,
            (':', _) => TokenKind::Colon,
            (',', _) => TokenKind::Comma,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            ('@', _) => TokenKind::At,
            ('^', _) => TokenKind::Caret,
            ('?', _) => TokenKind::Question,
            ('!', _) => TokenKind::Bang,
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('=', _) => TokenKind::Eq,
            ('|', _) => TokenKind::Pipe,
            (other, _) => return Err(LexError::StrayCharacter { ch: other, span: Span::point(start) }),
        };
        Ok(kind)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Number(42.0), TokenKind::Eof]);
        assert_eq!(kinds("3.5"), vec![TokenKind::Number(3.5), TokenKind::Eof]);
    }

    #[test]
    fn lexes_multi_char_operators_greedily() {
        assert_eq!(kinds("->"), vec![TokenKind::Arrow, TokenKind::Eof]);
        assert_eq!(kinds("=>"), vec![TokenKind::CaptureArrow, TokenKind::Eof]);
        assert_eq!(kinds("??"), vec![TokenKind::NullishCoalesce, TokenKind::Eof]);
    }

    #[test]
    fn colon_gt_tokenizes_as_two_tokens_not_capture_arrow() {
        assert_eq!(kinds(":>"), vec![TokenKind::Colon, TokenKind::Gt, TokenKind::Eof]);
    }

    #[test]
    fn existence_check_dot_is_two_tokens() {
        let ks = kinds(".?name");
        assert_eq!(ks[0], TokenKind::QuestionDot);
        assert!(matches!(ks[1], TokenKind::Identifier(ref s) if s == "name"));
    }

    #[test]
    fn heredoc_is_a_dedicated_lex_error() {
        let err = Lexer::tokenize("<<EOF").unwrap_err();
        assert!(matches!(err, LexError::HeredocNotSupported { .. }));
    }

    #[test]
    fn string_decodes_escapes() {
        let ks = kinds(r#""a\nb""#);
        match &ks[0] {
            TokenKind::String(parts, false) => {
                assert_eq!(parts, &vec![StringPart::Literal("a\nb".to_string())]);
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn string_interpolation_splits_parts() {
        let ks = kinds(r#""val:{$v}""#);
        match &ks[0] {
            TokenKind::String(parts, false) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[0], StringPart::Literal("val:".to_string()));
                assert!(matches!(parts[1], StringPart::Interpolation(_)));
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        assert_eq!(kinds("1 # comment\n2"), vec![
            TokenKind::Number(1.0),
            TokenKind::Newline,
            TokenKind::Number(2.0),
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn keywords_lex_as_keyword_tokens_not_identifiers() {
        assert_eq!(kinds("each"), vec![TokenKind::Each, TokenKind::Eof]);
        assert_eq!(kinds("true"), vec![TokenKind::True, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let err = Lexer::tokenize("\"abc").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }
}
