//! Recursive-descent / Pratt parser for the Weave DSL.
//!
//! Builds the tagged [`Node`] AST directly rather than going through an
//! intermediate lossless syntax tree -- there is no formatter or language
//! server downstream that would need one, so the parser's event loop
//! closes straight into typed AST nodes.
//!
//! ## Precedence table (normative; lowest to highest)
//!
//! ```text
//! or                      (`or` keyword, `|`)
//! and                     (`and` keyword, `&`)
//! not                     (prefix)
//! pipe                    (`|>`, left-associative)
//! comparison              (`== != > < >= <=`)
//! additive                (`+ -`)
//! multiplicative          (`* / %`)
//! exponent                (`^`, right-associative)
//! unary minus
//! atom
//! ```
//!
//! The ambiguity policy in the spec requires pipe to sit strictly between
//! comparison and `and`/`or`; this table is the one consistent placement
//! picked across the competing grammar drafts in the source repository.

use weave_common::{ByteSpan, LineIndex, Span};
use weave_lexer::{Token, TokenKind};

use crate::ast::{BinOpKind, Node, NodeKind, NumberLit, TypedName, UnaryOpKind};
use crate::error::SyntaxError;

pub struct Parser<'src> {
    tokens: Vec<Token>,
    pos: usize,
    line_index: LineIndex,
    _source: &'src str,
}

type PResult<T> = Result<T, SyntaxError>;

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            tokens: weave_lexer::tokenize(source),
            pos: 0,
            line_index: LineIndex::new(source),
            _source: source,
        }
    }

    /// Parse an entire source file into a root record node.
    pub fn parse_program(mut self) -> PResult<Node> {
        let node = self.parse_record(false)?;
        self.expect_kind(&TokenKind::Eof, "expected end of input")?;
        Ok(node)
    }

    /// Parse a single standalone expression (used to re-parse `switch`
    /// condition strings at evaluation time).
    pub fn parse_standalone_expr(mut self) -> PResult<Node> {
        let node = self.parse_expr()?;
        self.expect_kind(&TokenKind::Eof, "expected end of input")?;
        Ok(node)
    }

    // ── Token stream helpers ────────────────────────────────────────────

    fn tok(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn tok_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or_else(|| self.tokens.last().unwrap())
    }

    fn at(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.tok().kind) == std::mem::discriminant(kind)
    }

    fn at_offset(&self, offset: usize, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.tok_at(offset).kind) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn span_of(&self, byte_span: ByteSpan) -> Span {
        self.line_index.span(byte_span)
    }

    fn current_span(&self) -> Span {
        self.span_of(self.tok().span)
    }

    fn expect_kind(&mut self, kind: &TokenKind, message: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::new(
                format!("{message}, found {:?}", self.tok().kind),
                self.current_span(),
            ))
        }
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.current_span())
    }

    // ── Records ──────────────────────────────────────────────────────────

    /// `{ item (';' item)* ';'? }` or, when `require_braces` is false, the
    /// same sequence without enclosing braces (used at the top level).
    fn parse_record(&mut self, require_braces: bool) -> PResult<Node> {
        let start = self.current_span();
        let braced = self.at(&TokenKind::LBrace);
        if require_braces && !braced {
            return Err(self.err("expected '{'"));
        }
        if braced {
            self.advance();
        }

        let mut items = Vec::new();
        loop {
            if braced && self.at(&TokenKind::RBrace) {
                break;
            }
            if !braced && self.at(&TokenKind::Eof) {
                break;
            }
            // tolerate stray leading/trailing semicolons
            if self.at(&TokenKind::Semi) {
                self.advance();
                continue;
            }
            items.push(self.parse_item()?);
            if self.at(&TokenKind::Semi) {
                self.advance();
            } else if braced && self.at(&TokenKind::RBrace) {
                break;
            } else if !braced && self.at(&TokenKind::Eof) {
                break;
            } else {
                return Err(self.err("expected ';' between record items"));
            }
        }

        let end = if braced {
            let close = self.expect_kind(&TokenKind::RBrace, "expected '}'")?;
            self.span_of(close.span)
        } else {
            start
        };

        Ok(Node::new(NodeKind::Dict(items), start.merge(end)))
    }

    /// A `Type:name` header: `IDENT ':' IDENT`, but only consumed as such
    /// when immediately followed by `:=` or `:` -- otherwise the leading
    /// identifier is just an ordinary mapping key.
    fn looks_like_typed_name(&self) -> bool {
        self.at(&TokenKind::Ident)
            && self.at_offset(1, &TokenKind::Colon)
            && self.at_offset(2, &TokenKind::Ident)
            && (self.at_offset(3, &TokenKind::ColonEq) || self.at_offset(3, &TokenKind::Colon))
    }

    fn parse_typed_name(&mut self) -> PResult<Node> {
        let ty = self.advance();
        self.advance(); // ':'
        let name = self.advance();
        let span = self.span_of(ty.span).merge(self.span_of(name.span));
        Ok(Node::new(NodeKind::TypedVar(name.text, ty.text), span))
    }

    /// A single record item: a typed or untyped declaration, a mapping
    /// pair, or a bare expression statement.
    fn parse_item(&mut self) -> PResult<Node> {
        if self.looks_like_typed_name() {
            let target = self.parse_typed_name()?;
            if self.at(&TokenKind::ColonEq) {
                self.advance();
                let value = if target.declared_type() == Some("function") {
                    self.parse_function_lit_strict()?
                } else {
                    self.parse_expr()?
                };
                let span = target.span.merge(value.span);
                return Ok(Node::new(
                    NodeKind::Declaration { target: Box::new(target), value: Box::new(value) },
                    span,
                ));
            }
            // ':' -- typed mapping key
            self.advance();
            let value = self.parse_expr()?;
            let span = target.span.merge(value.span);
            return Ok(Node::new(NodeKind::Pair(Box::new(target), Box::new(value)), span));
        }

        if self.at(&TokenKind::Ident) && self.at_offset(1, &TokenKind::ColonEq) {
            let name = self.advance();
            self.advance(); // ':='
            let target = Node::new(NodeKind::Var(name.text), self.span_of(name.span));
            let value = self.parse_expr()?;
            let span = target.span.merge(value.span);
            return Ok(Node::new(
                NodeKind::Declaration { target: Box::new(target), value: Box::new(value) },
                span,
            ));
        }

        let key = self.parse_expr()?;
        if self.at(&TokenKind::Colon) {
            self.advance();
            let value = self.parse_expr()?;
            let span = key.span.merge(value.span);
            return Ok(Node::new(NodeKind::Pair(Box::new(key), Box::new(value)), span));
        }
        Ok(key)
    }

    // ── Function literals ───────────────────────────────────────────────

    /// `(params), { body }, (returns)` -- the only accepted shape for a
    /// function literal. The competing "type-prefixed identifier first"
    /// shape from the source repository's alternate grammar draft is
    /// rejected at parse time per the spec's open question.
    fn parse_function_lit_strict(&mut self) -> PResult<Node> {
        let start = self.current_span();
        let params = self.parse_typed_name_tuple()?;
        self.expect_kind(&TokenKind::Comma, "expected ',' after function parameter list")?;
        let body = self.parse_record(true)?;
        self.expect_kind(&TokenKind::Comma, "expected ',' after function body")?;
        let returns = self.parse_typed_name_tuple()?;
        let span = start.merge(body.span);
        Ok(Node::new(
            NodeKind::FunctionLit { params, body: Box::new(body), returns },
            span,
        ))
    }

    fn parse_typed_name_tuple(&mut self) -> PResult<Vec<TypedName>> {
        self.expect_kind(&TokenKind::LParen, "expected '('")?;
        let mut names = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if !self.looks_like_typed_name() {
                return Err(self.err("expected 'Type:name' in parameter/return list"));
            }
            let node = self.parse_typed_name()?;
            if let NodeKind::TypedVar(name, ty) = node.kind {
                names.push((name, ty));
            }
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect_kind(&TokenKind::RParen, "expected ')'")?;
        Ok(names)
    }

    /// Try to parse an inline (anonymous) function literal in expression
    /// position -- same shape as [`parse_function_lit_strict`], used as a
    /// pipe stage or argument. Falls back to a plain tuple/paren atom when
    /// the `, {` continuation isn't present.
    fn try_parse_function_lit_or_tuple(&mut self) -> PResult<Node> {
        let start = self.current_span();
        let checkpoint = self.pos;

        if self.at(&TokenKind::LParen) && self.looks_like_param_tuple_start() {
            if let Ok(params) = self.parse_typed_name_tuple() {
                if self.at(&TokenKind::Comma) && self.at_offset(1, &TokenKind::LBrace) {
                    self.advance(); // ','
                    let body = self.parse_record(true)?;
                    self.expect_kind(&TokenKind::Comma, "expected ',' after function body")?;
                    let returns = self.parse_typed_name_tuple()?;
                    let span = start.merge(body.span);
                    return Ok(Node::new(
                        NodeKind::FunctionLit { params, body: Box::new(body), returns },
                        span,
                    ));
                }
            }
            self.pos = checkpoint;
        }

        self.parse_tuple_or_paren()
    }

    /// Peeks whether `(` opens a `Type:name, ...` parameter list rather
    /// than a general parenthesised expression or tuple.
    fn looks_like_param_tuple_start(&self) -> bool {
        // `()` is an empty parameter list.
        if self.at_offset(1, &TokenKind::RParen) {
            return true;
        }
        self.at_offset(1, &TokenKind::Ident)
            && self.at_offset(2, &TokenKind::Colon)
            && self.at_offset(3, &TokenKind::Ident)
    }

    // ── Expressions ──────────────────────────────────────────────────────
    //
    // Pipe builds an n-ary `Pipe(Vec<Node>)` node rather than a left/right
    // `BinOp`, so the precedence ladder is written as explicit per-level
    // functions instead of a generic Pratt loop. Binary and unary
    // arithmetic/comparison operators still fold left-associatively except
    // `^`, which recurses into itself on the right.

    pub(crate) fn parse_expr(&mut self) -> PResult<Node> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_and()?;
        while self.at(&TokenKind::Or) || self.at(&TokenKind::Pipe) {
            self.advance();
            let rhs = self.parse_and()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Node::new(
                NodeKind::BinOp { op: BinOpKind::Or, left: Box::new(lhs), right: Box::new(rhs) },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_pipe()?;
        while self.at(&TokenKind::And) || self.at(&TokenKind::Amp) {
            self.advance();
            let rhs = self.parse_pipe()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Node::new(
                NodeKind::BinOp { op: BinOpKind::And, left: Box::new(lhs), right: Box::new(rhs) },
                span,
            );
        }
        Ok(lhs)
    }

    /// Pipe sits strictly between `and`/`or` and comparison, per the
    /// chosen precedence placement. A chain of `|>` stages collects into
    /// one flat `Pipe` node rather than nesting.
    fn parse_pipe(&mut self) -> PResult<Node> {
        let first = self.parse_comparison()?;
        if !self.at(&TokenKind::PipeGt) {
            return Ok(first);
        }
        let mut stages = vec![first];
        while self.at(&TokenKind::PipeGt) {
            self.advance();
            stages.push(self.parse_comparison()?);
        }
        let span = stages[0].span.merge(stages.last().unwrap().span);
        Ok(Node::new(NodeKind::Pipe(stages), span))
    }

    fn parse_comparison(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.tok().kind {
                TokenKind::EqEq => BinOpKind::Eq,
                TokenKind::NotEq => BinOpKind::NotEq,
                TokenKind::Lt => BinOpKind::Lt,
                TokenKind::Gt => BinOpKind::Gt,
                TokenKind::LtEq => BinOpKind::LtEq,
                TokenKind::GtEq => BinOpKind::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Node::new(NodeKind::BinOp { op, left: Box::new(lhs), right: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.tok().kind {
                TokenKind::Plus => BinOpKind::Add,
                TokenKind::Minus => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Node::new(NodeKind::BinOp { op, left: Box::new(lhs), right: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.tok().kind {
                TokenKind::Star => BinOpKind::Mul,
                TokenKind::Slash => BinOpKind::Div,
                TokenKind::Percent => BinOpKind::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Node::new(NodeKind::BinOp { op, left: Box::new(lhs), right: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Node> {
        let start = self.current_span();
        match self.tok().kind {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                Ok(Node::new(
                    NodeKind::UnaryOp { op: UnaryOpKind::Not, operand: Box::new(operand) },
                    span,
                ))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                Ok(Node::new(
                    NodeKind::UnaryOp { op: UnaryOpKind::Neg, operand: Box::new(operand) },
                    span,
                ))
            }
            _ => self.parse_exponent(),
        }
    }

    /// Right-associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn parse_exponent(&mut self) -> PResult<Node> {
        let lhs = self.parse_postfix()?;
        if !self.at(&TokenKind::Caret) {
            return Ok(lhs);
        }
        self.advance();
        let rhs = self.parse_unary()?;
        let span = lhs.span.merge(rhs.span);
        Ok(Node::new(
            NodeKind::BinOp { op: BinOpKind::Pow, left: Box::new(lhs), right: Box::new(rhs) },
            span,
        ))
    }

    /// Atom, then any trailing call/field-access chain.
    fn parse_postfix(&mut self) -> PResult<Node> {
        let mut node = self.parse_atom()?;
        loop {
            match &self.tok().kind {
                TokenKind::LParen => {
                    node = self.parse_call(node)?;
                }
                TokenKind::Dot => {
                    self.advance();
                    let field = self.expect_kind(&TokenKind::Ident, "expected field name after '.'")?;
                    let name = match &node.kind {
                        NodeKind::Var(base) => format!("{base}.{}", field.text),
                        _ => return Err(self.err("'.' is only valid after an identifier")),
                    };
                    let span = node.span.merge(self.span_of(field.span));
                    node = Node::new(NodeKind::Var(name), span);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_call(&mut self, callee: Node) -> PResult<Node> {
        self.advance(); // '('
        let mut pos_args = Vec::new();
        let mut kw_args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            if self.at(&TokenKind::Ident) && self.at_offset(1, &TokenKind::Colon) {
                let name = self.advance();
                self.advance(); // ':'
                let value = self.parse_expr()?;
                kw_args.push((name.text, value));
            } else {
                pos_args.push(self.parse_expr()?);
            }
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let close = self.expect_kind(&TokenKind::RParen, "expected ')' to close call")?;
        let span = callee.span.merge(self.span_of(close.span));
        Ok(Node::new(
            NodeKind::Call { callee: Box::new(callee), pos_args, kw_args },
            span,
        ))
    }

    fn parse_atom(&mut self) -> PResult<Node> {
        let start = self.current_span();
        match self.tok().kind.clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Node::new(NodeKind::Number(NumberLit::Int(v)), start))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Node::new(NodeKind::Number(NumberLit::Float(v)), start))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::new(NodeKind::Str(s), start))
            }
            TokenKind::True => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(true), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(false), start))
            }
            TokenKind::Star => {
                self.advance();
                Ok(Node::new(NodeKind::Any, start))
            }
            TokenKind::Ident => {
                let tok = self.advance();
                Ok(Node::new(NodeKind::Var(tok.text), start))
            }
            TokenKind::LBrace => self.parse_record(true),
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LParen => self.try_parse_function_lit_or_tuple(),
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_list(&mut self) -> PResult<Node> {
        let start = self.current_span();
        self.advance(); // '['
        let mut items = Vec::new();
        while !self.at(&TokenKind::RBracket) {
            items.push(self.parse_expr()?);
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let close = self.expect_kind(&TokenKind::RBracket, "expected ']'")?;
        Ok(Node::new(NodeKind::List(items), start.merge(self.span_of(close.span))))
    }

    /// `(expr)` is a parenthesised expression; `(expr, expr, ...)` is a
    /// tuple; `()` is an empty tuple.
    fn parse_tuple_or_paren(&mut self) -> PResult<Node> {
        let start = self.current_span();
        self.advance(); // '('
        let mut items = Vec::new();
        let mut trailing_comma = false;
        while !self.at(&TokenKind::RParen) {
            items.push(self.parse_expr()?);
            if self.at(&TokenKind::Comma) {
                self.advance();
                trailing_comma = true;
            } else {
                trailing_comma = false;
                break;
            }
        }
        let close = self.expect_kind(&TokenKind::RParen, "expected ')'")?;
        let span = start.merge(self.span_of(close.span));
        if items.len() == 1 && !trailing_comma {
            let only = items.into_iter().next().unwrap();
            Ok(Node::new(only.kind, span))
        } else {
            Ok(Node::new(NodeKind::Tuple(items), span))
        }
    }
}

