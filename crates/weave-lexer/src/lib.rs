//! Tokenizer for the Weave DSL.
//!
//! The lexer is total: it never panics on arbitrary input. Bytes it cannot
//! classify are emitted as [`TokenKind::Unknown`] tokens and it is up to the
//! parser to turn those into a `SyntaxError`.

mod cursor;
mod token;

use cursor::Cursor;
use weave_common::ByteSpan;

pub use token::{keyword_from_str, Token, TokenKind};

/// Tokenizes `source` into a vector of tokens, including a trailing `Eof`.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

/// The Weave lexer. Implements `Iterator<Item = Token>` so callers can
/// consume tokens lazily or collect them into a `Vec`.
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
    emitted_eof: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { cursor: Cursor::new(source), emitted_eof: false }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.cursor.peek() {
                Some(c) if c.is_whitespace() => {
                    self.cursor.advance();
                }
                Some('#') => {
                    self.cursor.eat_while(|c| c != '\n');
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self, start: u32) -> TokenKind {
        self.cursor.eat_while(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.cursor.peek() == Some('.') && self.cursor.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.cursor.advance();
            self.cursor.eat_while(|c| c.is_ascii_digit());
        }
        let exponent_has_digit = matches!(self.cursor.peek(), Some('e') | Some('E'))
            && match self.cursor.peek_next() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => true,
                _ => false,
            };
        if exponent_has_digit {
            is_float = true;
            self.cursor.advance(); // e/E
            if matches!(self.cursor.peek(), Some('+') | Some('-')) {
                self.cursor.advance();
            }
            self.cursor.eat_while(|c| c.is_ascii_digit());
        }
        let end = self.cursor.pos();
        let text = self.cursor.slice(start, end);
        if is_float {
            text.parse::<f64>().map(TokenKind::Float).unwrap_or(TokenKind::Unknown('?'))
        } else {
            text.parse::<i64>().map(TokenKind::Int).unwrap_or(TokenKind::Unknown('?'))
        }
    }

    fn lex_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        loop {
            match self.cursor.advance() {
                None => break, // unterminated; tolerate and return what we have
                Some(c) if c == quote => break,
                Some('\\') => match self.cursor.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\\') => value.push('\\'),
                    Some(c) if c == quote => value.push(quote),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                Some(c) => value.push(c),
            }
        }
        TokenKind::Str(value)
    }

    fn lex_ident(&mut self, start: u32) -> (TokenKind, String) {
        self.cursor.eat_while(|c| c.is_alphanumeric() || c == '_');
        let end = self.cursor.pos();
        let text = self.cursor.slice(start, end).to_string();
        let lowered = text.to_ascii_lowercase();
        let kind = keyword_from_str(&lowered).unwrap_or(TokenKind::Ident);
        (kind, text)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.skip_trivia();
        let start = self.cursor.pos();

        let Some(c) = self.cursor.peek() else {
            if self.emitted_eof {
                return None;
            }
            self.emitted_eof = true;
            return Some(Token::new(TokenKind::Eof, ByteSpan::new(start, start), ""));
        };

        if c.is_ascii_digit() {
            let kind = self.lex_number(start);
            let end = self.cursor.pos();
            return Some(Token::new(kind, ByteSpan::new(start, end), self.cursor.slice(start, end)));
        }

        if is_ident_start(c) {
            let (kind, text) = self.lex_ident(start);
            let end = self.cursor.pos();
            return Some(Token::new(kind, ByteSpan::new(start, end), text));
        }

        if c == '"' || c == '\'' {
            self.cursor.advance();
            let kind = self.lex_string(c);
            let end = self.cursor.pos();
            return Some(Token::new(kind, ByteSpan::new(start, end), self.cursor.slice(start, end)));
        }

        self.cursor.advance();
        let two_char = |this: &mut Self, expect: char, one: TokenKind, two: TokenKind| {
            if this.cursor.peek() == Some(expect) {
                this.cursor.advance();
                two
            } else {
                one
            }
        };

        let kind = match c {
            ':' => two_char(self, '=', TokenKind::Colon, TokenKind::ColonEq),
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '|' => two_char(self, '>', TokenKind::Pipe, TokenKind::PipeGt),
            '&' => TokenKind::Amp,
            '=' => two_char(self, '=', TokenKind::Unknown('='), TokenKind::EqEq),
            '!' => two_char(self, '=', TokenKind::Unknown('!'), TokenKind::NotEq),
            '<' => two_char(self, '=', TokenKind::Lt, TokenKind::LtEq),
            '>' => two_char(self, '=', TokenKind::Gt, TokenKind::GtEq),
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            other => TokenKind::Unknown(other),
        };
        let end = self.cursor.pos();
        Some(Token::new(kind, ByteSpan::new(start, end), self.cursor.slice(start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_typed_declaration() {
        let kinds = kinds("int:x := 5;");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::Ident,
                TokenKind::ColonEq,
                TokenKind::Int(5),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_pipe_and_comparisons() {
        let kinds = kinds("a |> b >= 1 == true");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::PipeGt,
                TokenKind::Ident,
                TokenKind::GtEq,
                TokenKind::Int(1),
                TokenKind::EqEq,
                TokenKind::True,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        let kinds = kinds("1 # a comment\n+ 2");
        assert_eq!(kinds, vec![TokenKind::Int(1), TokenKind::Plus, TokenKind::Int(2), TokenKind::Eof]);
    }

    #[test]
    fn lexes_float_literal() {
        let kinds = kinds("3.5");
        assert_eq!(kinds, vec![TokenKind::Float(3.5), TokenKind::Eof]);
    }

    #[test]
    fn lexes_quoted_strings_both_kinds() {
        let kinds = kinds(r#""a" 'b'"#);
        assert_eq!(
            kinds,
            vec![TokenKind::Str("a".into()), TokenKind::Str("b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn case_insensitive_bool_keywords() {
        let kinds = kinds("TRUE False");
        assert_eq!(kinds, vec![TokenKind::True, TokenKind::False, TokenKind::Eof]);
    }

    #[test]
    fn never_panics_on_garbage_bytes() {
        let kinds = kinds("@@@ ~ ` \0");
        assert!(kinds.iter().any(|k| matches!(k, TokenKind::Unknown(_))));
    }
}
