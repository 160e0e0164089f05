// ABOUTME: Flat token stream types produced by the lexer

use crate::span::Span;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Identifier(String),
    String(Vec<StringPart>, bool /* is_multiline */),
    Number(f64),
    True,
    False,

    // Sigils
    Dollar,        // $
    PipeVar,       // $ used bare as the pipe value (lexed the same as Dollar; parser disambiguates)
    Dot,           // .
    QuestionDot,   // .?  (existence check)
    DoubleColon,   // ::
    Colon,         // :
    Comma,         // ,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Arrow,          // ->
    CaptureArrow,   // =>
    NullishCoalesce, // ??
    SlashLt,        // /<
    StarLt,         // *<
    At,             // @
    Caret,          // ^
    Question,       // ?
    Bang,           // !

    // Keywords
    Each,
    Map,
    Fold,
    Filter,
    Break,
    Return,
    Pass,
    Assert,
    Error,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Not,
    Eq,
    /// `|`, delimiting an inline closure's parameter list (`|x| body`).
    Pipe,

    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Interpolation(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(s) => write!(f, "identifier `{s}`"),
            TokenKind::String(..) => write!(f, "string literal"),
            TokenKind::Number(n) => write!(f, "number `{n}`"),
            TokenKind::True => write!(f, "`true`"),
            TokenKind::False => write!(f, "`false`"),
            TokenKind::Dollar | TokenKind::PipeVar => write!(f, "`$`"),
            TokenKind::Dot => write!(f, "`.`"),
            TokenKind::QuestionDot => write!(f, "`.?`"),
            TokenKind::DoubleColon => write!(f, "`::`"),
            TokenKind::Colon => write!(f, "`:`"),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::LParen => write!(f, "`(`"),
            TokenKind::RParen => write!(f, "`)`"),
            TokenKind::LBracket => write!(f, "`[`"),
            TokenKind::RBracket => write!(f, "`]`"),
            TokenKind::LBrace => write!(f, "`{{`"),
            TokenKind::RBrace => write!(f, "`}}`"),
            TokenKind::Arrow => write!(f, "`->`"),
            TokenKind::CaptureArrow => write!(f, "`=>`"),
            TokenKind::NullishCoalesce => write!(f, "`??`"),
            TokenKind::SlashLt => write!(f, "`/<`"),
            TokenKind::StarLt => write!(f, "`*<`"),
            TokenKind::At => write!(f, "`@`"),
            TokenKind::Caret => write!(f, "`^`"),
            TokenKind::Question => write!(f, "`?`"),
            TokenKind::Bang => write!(f, "`!`"),
            TokenKind::Each => write!(f, "`each`"),
            TokenKind::Map => write!(f, "`map`"),
            TokenKind::Fold => write!(f, "`fold`"),
            TokenKind::Filter => write!(f, "`filter`"),
            TokenKind::Break => write!(f, "`break`"),
            TokenKind::Return => write!(f, "`return`"),
            TokenKind::Pass => write!(f, "`pass`"),
            TokenKind::Assert => write!(f, "`assert`"),
            TokenKind::Error => write!(f, "`error`"),
            TokenKind::Plus => write!(f, "`+`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::Star => write!(f, "`*`"),
            TokenKind::Slash => write!(f, "`/`"),
            TokenKind::Percent => write!(f, "`%`"),
            TokenKind::EqEq => write!(f, "`==`"),
            TokenKind::NotEq => write!(f, "`!=`"),
            TokenKind::Lt => write!(f, "`<`"),
            TokenKind::Gt => write!(f, "`>`"),
            TokenKind::LtEq => write!(f, "`<=`"),
            TokenKind::GtEq => write!(f, "`>=`"),
            TokenKind::AndAnd => write!(f, "`&&`"),
            TokenKind::OrOr => write!(f, "`||`"),
            TokenKind::Not => write!(f, "`!`"),
            TokenKind::Eq => write!(f, "`=`"),
            TokenKind::Pipe => write!(f, "`|`"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// Reserved identifiers that lex to keyword tokens rather than `Identifier`.
pub fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "each" => TokenKind::Each,
        "map" => TokenKind::Map,
        "fold" => TokenKind::Fold,
        "filter" => TokenKind::Filter,
        "break" => TokenKind::Break,
        "return" => TokenKind::Return,
        "pass" => TokenKind::Pass,
        "assert" => TokenKind::Assert,
        "error" => TokenKind::Error,
        _ => return None,
    })
}
