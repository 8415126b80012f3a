//! atra-par - Parser for the Atra language.
//!
//! A hand-written recursive-descent parser for declarations and
//! statements; expressions go through a Pratt parser (see [`expr::bp`]
//! for the binding-power ladder). The parser consumes the token stream
//! produced by `atra-lex` and builds the AST in [`ast`].
//!
//! There is no error recovery: the first grammar violation raises a
//! [`ParseError`] carrying the offending token's line and column, and
//! parsing stops.
//!
//! Grammar highlights:
//!
//! ```text
//! program     = { function | subroutine | global | import | layout } ;
//! function    = "function" NAME "(" params ")" ":" TYPE
//!               [ "var" locals ] "begin" { stmt } "end" [ "function" ] ;
//! subroutine  = "subroutine" NAME "(" params ")"
//!               [ "var" locals ] "begin" { stmt } "end" [ "subroutine" ] ;
//! global      = ( "var" | "const" ) NAME [ ":" type ] [ ":=" expr ] ;
//! import      = "import" DOTTED_NAME "(" [ TYPE { "," TYPE } ] ")" [ ":" TYPE ] ;
//! layout      = "layout" [ "packed" ] NAME { NAME ":" fieldtype } "end" [ "layout" ] ;
//! ```
//!
//! A parameter group lets comma-separated names share one type
//! (`a, b, c: f64, d: i32`); the group continues across a comma exactly
//! when the comma is followed by an identifier followed by a comma or a
//! colon.

pub mod ast;
pub mod expr;
pub mod items;
pub mod layout;
pub mod stmt;

pub use ast::*;
pub use layout::{FieldMeta, LayoutError, LayoutMeta, LayoutTable};

use atra_lex::{Keyword, Lexer, Op, Punct, Token, TokenKind};
use atra_util::Span;
use thiserror::Error;

/// Syntax error with the source position of the offending token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Result type alias for parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Lex and parse a source string.
///
/// # Example
///
/// ```
/// let program = atra_par::parse("function id(x: f64): f64 begin id := x end").unwrap();
/// assert_eq!(program.decls.len(), 1);
/// ```
pub fn parse(source: &str) -> Result<Program> {
    Parser::new(Lexer::tokenize(source)).parse_program()
}

/// The Atra parser: a token buffer and a position.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Creates a parser over a token stream. The stream is expected to
    /// end with `Eof` (as `Lexer::tokenize` guarantees); a missing
    /// terminator is tolerated and treated as end-of-input.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            tokens.push(Token::new(TokenKind::Eof, Span::DUMMY));
        }
        Self { tokens, pos: 0 }
    }

    /// Parses a whole program (a list of top-level declarations).
    pub fn parse_program(&mut self) -> Result<Program> {
        let mut decls = Vec::new();
        while !self.at_eof() {
            decls.push(self.parse_decl()?);
        }
        Ok(Program { decls })
    }

    // =========================================================================
    // Token access helpers
    // =========================================================================

    /// The current token. The constructor guarantees a trailing `Eof`,
    /// so the position is always in range.
    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    /// The kind of the token `n` positions ahead (Eof past the end).
    pub(crate) fn peek_kind_at(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    /// Consumes and returns the current token.
    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek().kind, TokenKind::Keyword(k) if k == kw)
    }

    pub(crate) fn check_op(&self, op: Op) -> bool {
        matches!(self.peek().kind, TokenKind::Op(o) if o == op)
    }

    pub(crate) fn check_punct(&self, p: Punct) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    pub(crate) fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_op(&mut self, op: Op) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, kw: Keyword) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected `{}`, found `{}`", kw, self.peek().kind)))
        }
    }

    pub(crate) fn expect_punct(&mut self, p: Punct) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected `{}`, found `{}`",
                p.as_str(),
                self.peek().kind
            )))
        }
    }

    pub(crate) fn expect_op(&mut self, op: Op) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected `{}`, found `{}`",
                op.as_str(),
                self.peek().kind
            )))
        }
    }

    /// Consumes an identifier, returning its name and span.
    pub(crate) fn expect_ident(&mut self) -> Result<(String, Span)> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                let span = self.peek().span;
                self.advance();
                Ok((name, span))
            }
            other => Err(self.error_here(format!("expected identifier, found `{}`", other))),
        }
    }

    /// Builds a syntax error at the current token.
    pub(crate) fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            message: message.into(),
            line: token.line(),
            column: token.column(),
        }
    }
}
