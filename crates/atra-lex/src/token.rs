//! Token definitions for the Atra lexer.

use std::fmt;

use atra_util::Span;

use crate::reserved::{Keyword, ValType};

/// Operator tokens.
///
/// Two-character operators are recognized as one token by the lexer;
/// `SlashEq` is the language's not-equal in expression position and
/// divide-assign at statement level (the parser disambiguates).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// `**`
    Pow,
    /// `:=`
    Assign,
    /// `+=`
    PlusAssign,
    /// `-=`
    MinusAssign,
    /// `*=`
    StarAssign,
    /// `/=` - not-equal or divide-assign
    SlashEq,
    /// `==`
    EqEq,
    /// `<=`
    LtEq,
    /// `>=`
    GtEq,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `=`
    Eq,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `~`
    Tilde,
    /// `@`
    At,
}

impl Op {
    /// The source spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Pow => "**",
            Op::Assign => ":=",
            Op::PlusAssign => "+=",
            Op::MinusAssign => "-=",
            Op::StarAssign => "*=",
            Op::SlashEq => "/=",
            Op::EqEq => "==",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::Slash => "/",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
            Op::Amp => "&",
            Op::Pipe => "|",
            Op::Caret => "^",
            Op::Tilde => "~",
            Op::At => "@",
        }
    }
}

/// Punctuation tokens. `;` never reaches the token stream (the lexer
/// skips it like whitespace).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
}

impl Punct {
    pub fn as_str(&self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Comma => ",",
            Punct::Colon => ":",
        }
    }
}

/// A lexical unit.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Numeric literal: raw textual form (without suffix), float flag,
    /// optional explicit type suffix (`_i32` etc.).
    Number {
        text: String,
        is_float: bool,
        suffix: Option<ValType>,
    },
    /// Identifier. May contain interior dots (`math.sin`, `Rec.id`).
    Ident(String),
    /// Reserved word.
    Keyword(Keyword),
    /// Operator.
    Op(Op),
    /// Punctuation.
    Punct(Punct),
    /// End of the token stream.
    Eof,
}

impl TokenKind {
    /// Source text of the token, reconstructed. Used by the relex
    /// stability tests; the suffix is re-attached to numbers.
    pub fn text(&self) -> String {
        match self {
            TokenKind::Number { text, suffix, .. } => match suffix {
                Some(t) => format!("{}_{}", text, t.as_str()),
                None => text.clone(),
            },
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Keyword(kw) => kw.as_str().to_string(),
            TokenKind::Op(op) => op.as_str().to_string(),
            TokenKind::Punct(p) => p.as_str().to_string(),
            TokenKind::Eof => String::new(),
        }
    }
}

/// A token with its source coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Line number (1-based) of the token's first character.
    pub fn line(&self) -> u32 {
        self.span.line
    }

    /// Column number (1-based) of the token's first character.
    pub fn column(&self) -> u32 {
        self.span.column
    }

    /// True for identifiers of the `__INTERP_N__` shape, produced by the
    /// template wiring layer.
    pub fn is_interp_marker(&self) -> bool {
        match &self.kind {
            TokenKind::Ident(name) => is_interp_name(name),
            _ => false,
        }
    }
}

/// True for `__INTERP_N__` where N is one or more digits.
pub fn is_interp_name(name: &str) -> bool {
    name.strip_prefix("__INTERP_")
        .and_then(|rest| rest.strip_suffix("__"))
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Eof => f.write_str("end of input"),
            other => f.write_str(&other.text()),
        }
    }
}
