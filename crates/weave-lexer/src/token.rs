use serde::Serialize;
use weave_common::ByteSpan;

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: ByteSpan,
    /// The exact source slice this token was lexed from, kept for error
    /// messages and for re-lexing embedded condition strings in `switch`.
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: ByteSpan, text: impl Into<String>) -> Self {
        Self { kind, span, text: text.into() }
    }
}

/// Every kind of token the Weave lexer produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TokenKind {
    // Literals
    Ident,
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    True,
    False,
    And,
    Or,
    Not,

    // Punctuation
    Colon,
    ColonEq,
    Semi,
    Comma,
    Dot,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // Operators
    PipeGt,
    Pipe,
    Amp,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    Eof,
    /// A byte the lexer could not classify. Carried as data rather than
    /// panicking, so the parser can turn it into a `SyntaxError`.
    Unknown(char),
}

/// Map a lowercased identifier to a keyword token, if it is one.
///
/// Boolean and logical keywords are case-insensitive per the grammar; the
/// caller is expected to have lowercased `ident` already.
pub fn keyword_from_str(ident: &str) -> Option<TokenKind> {
    match ident {
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "and" => Some(TokenKind::And),
        "or" => Some(TokenKind::Or),
        "not" => Some(TokenKind::Not),
        _ => None,
    }
}
