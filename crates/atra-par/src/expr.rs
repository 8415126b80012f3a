//! Expression parsing using Pratt parsing (top-down operator
//! precedence).
//!
//! # Operator precedence (lowest to highest)
//!
//! | Level | Operators                         | Associativity |
//! |-------|-----------------------------------|---------------|
//! | 1     | `or`                              | Left          |
//! | 2     | `and`                             | Left          |
//! | 3     | `==`, `/=`, `<`, `<=`, `>`, `>=`  | Left          |
//! | 4     | `\|`                              | Left          |
//! | 5     | `^`                               | Left          |
//! | 6     | `&`                               | Left          |
//! | 7     | `<<`, `>>`                        | Left          |
//! | 8     | `+`, `-`                          | Left          |
//! | 9     | `*`, `/`, `mod`                   | Left          |
//! | 10    | `**`                              | Right         |
//!
//! Unary minus, `not`, and `~` bind between `*` and `**`. The
//! right-associativity of `**` falls out of recursing with the
//! operator's own binding power rather than one above it.

use atra_lex::{Keyword, Op, Punct, TokenKind};

use crate::ast::*;
use crate::{Parser, Result};

/// Binding power levels for Pratt parsing.
/// Higher numbers = tighter binding (higher precedence).
#[doc(hidden)]
pub mod bp {
    /// Minimum binding power (start of expression)
    pub const MIN: u8 = 0;

    /// Logical OR: `or`
    pub const OR: u8 = 2;

    /// Logical AND: `and`
    pub const AND: u8 = 4;

    /// Comparison: `==`, `/=`, `<`, `<=`, `>`, `>=`
    pub const COMPARISON: u8 = 6;

    /// Bitwise OR: `|`
    pub const BIT_OR: u8 = 8;

    /// Bitwise XOR: `^`
    pub const BIT_XOR: u8 = 10;

    /// Bitwise AND: `&`
    pub const BIT_AND: u8 = 12;

    /// Shift: `<<`, `>>`
    pub const SHIFT: u8 = 14;

    /// Additive: `+`, `-`
    pub const ADDITIVE: u8 = 16;

    /// Multiplicative: `*`, `/`, `mod`
    pub const MULTIPLICATIVE: u8 = 18;

    /// Prefix operators: unary minus, `not`, `~`
    pub const UNARY: u8 = 21;

    /// Power: `**` (right-associative)
    pub const POWER: u8 = 22;
}

impl Parser {
    /// Main expression entry point.
    pub(crate) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_bp(bp::MIN)
    }

    /// Pratt parser core: parses an expression consuming only operators
    /// whose left binding power is at least `min_bp`.
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut lhs = self.parse_prefix()?;

        while let Some((op, lbp, rbp)) = self.infix_binding_power() {
            if lbp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(rbp)?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }

        Ok(lhs)
    }

    /// Binding powers of the current token viewed as an infix operator.
    ///
    /// Left-associative operators get `rbp = lbp + 1`; the
    /// right-associative `**` gets `rbp = lbp`.
    fn infix_binding_power(&self) -> Option<(BinOp, u8, u8)> {
        let (op, lbp) = match self.peek().kind {
            TokenKind::Keyword(Keyword::Or) => (BinOp::Or, bp::OR),
            TokenKind::Keyword(Keyword::And) => (BinOp::And, bp::AND),
            TokenKind::Op(Op::EqEq) => (BinOp::Eq, bp::COMPARISON),
            TokenKind::Op(Op::SlashEq) => (BinOp::Ne, bp::COMPARISON),
            TokenKind::Op(Op::Lt) => (BinOp::Lt, bp::COMPARISON),
            TokenKind::Op(Op::LtEq) => (BinOp::Le, bp::COMPARISON),
            TokenKind::Op(Op::Gt) => (BinOp::Gt, bp::COMPARISON),
            TokenKind::Op(Op::GtEq) => (BinOp::Ge, bp::COMPARISON),
            TokenKind::Op(Op::Pipe) => (BinOp::BitOr, bp::BIT_OR),
            TokenKind::Op(Op::Caret) => (BinOp::BitXor, bp::BIT_XOR),
            TokenKind::Op(Op::Amp) => (BinOp::BitAnd, bp::BIT_AND),
            TokenKind::Op(Op::Shl) => (BinOp::Shl, bp::SHIFT),
            TokenKind::Op(Op::Shr) => (BinOp::Shr, bp::SHIFT),
            TokenKind::Op(Op::Plus) => (BinOp::Add, bp::ADDITIVE),
            TokenKind::Op(Op::Minus) => (BinOp::Sub, bp::ADDITIVE),
            TokenKind::Op(Op::Star) => (BinOp::Mul, bp::MULTIPLICATIVE),
            TokenKind::Op(Op::Slash) => (BinOp::Div, bp::MULTIPLICATIVE),
            TokenKind::Keyword(Keyword::Mod) => (BinOp::Mod, bp::MULTIPLICATIVE),
            TokenKind::Op(Op::Pow) => return Some((BinOp::Pow, bp::POWER, bp::POWER)),
            _ => return None,
        };
        Some((op, lbp, lbp + 1))
    }

    /// Prefix position: literals, identifiers (with call/index
    /// postfix), unary operators, parenthesized expressions, `@name`,
    /// and the expression-position `if (c) then a else b`.
    fn parse_prefix(&mut self) -> Result<Expr> {
        let span = self.peek().span;
        match self.peek().kind.clone() {
            TokenKind::Number {
                text,
                is_float,
                suffix,
            } => {
                self.advance();
                Ok(Expr::Number {
                    text,
                    is_float,
                    suffix,
                    span,
                })
            }

            TokenKind::Op(Op::Minus) => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    span: span.merge(operand.span()),
                    operand: Box::new(operand),
                })
            }

            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    span: span.merge(operand.span()),
                    operand: Box::new(operand),
                })
            }

            TokenKind::Op(Op::Tilde) => {
                self.advance();
                let operand = self.parse_expr_bp(bp::UNARY)?;
                Ok(Expr::Unary {
                    op: UnOp::BitNot,
                    span: span.merge(operand.span()),
                    operand: Box::new(operand),
                })
            }

            TokenKind::Op(Op::At) => {
                self.advance();
                let (name, name_span) = self.expect_ident()?;
                Ok(Expr::FuncRef {
                    name,
                    span: span.merge(name_span),
                })
            }

            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                self.expect_keyword(Keyword::Then)?;
                let then_val = self.parse_expr()?;
                self.expect_keyword(Keyword::Else)?;
                let else_val = self.parse_expr()?;
                Ok(Expr::Ternary {
                    span: span.merge(else_val.span()),
                    cond: Box::new(cond),
                    then_val: Box::new(then_val),
                    else_val: Box::new(else_val),
                })
            }

            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(inner)
            }

            TokenKind::Ident(name) => {
                self.advance();

                if self.eat_punct(Punct::LParen) {
                    let args = self.parse_args()?;
                    self.expect_punct(Punct::RParen)?;
                    return Ok(Expr::Call { name, args, span });
                }

                if self.eat_punct(Punct::LBracket) {
                    let mut indices = vec![self.parse_expr()?];
                    while self.eat_punct(Punct::Comma) {
                        indices.push(self.parse_expr()?);
                    }
                    self.expect_punct(Punct::RBracket)?;
                    return Ok(Expr::Index {
                        name,
                        indices,
                        span,
                    });
                }

                Ok(Expr::Ident { name, span })
            }

            other => Err(self.error_here(format!("expected expression, found `{}`", other))),
        }
    }
}
