//! Statement parsing.
//!
//! Statement lists stop (without consuming) at whatever keyword closes
//! the enclosing block: `end` for most blocks, `else` inside the then
//! branch of an `if`, `while` for the body of a `do`.

use atra_lex::{Keyword, Op, Punct, TokenKind};

use crate::ast::*;
use crate::{Parser, Result};

impl Parser {
    /// Parses statements until one of `stops` (or `else`, which always
    /// terminates a list so that `if` bodies close properly).
    pub(crate) fn parse_stmts(&mut self, stops: &[Keyword]) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            if self.at_eof() {
                return Err(self.error_here("unexpected end of input inside block"));
            }
            if let TokenKind::Keyword(kw) = self.peek().kind {
                if stops.contains(&kw) || kw == Keyword::Else {
                    return Ok(stmts);
                }
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    /// Parses a single statement.
    pub(crate) fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::If) => self.parse_if(true),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::Break) => {
                let span = self.peek().span;
                self.advance();
                Ok(Stmt::Break { span })
            }
            TokenKind::Keyword(Keyword::Call) => self.parse_call_stmt(),
            TokenKind::Keyword(Keyword::Tailcall) => self.parse_tailcall(),
            TokenKind::Ident(_) => self.parse_assign(),
            _ => Err(self.error_here(format!(
                "expected statement, found `{}`",
                self.peek().kind
            ))),
        }
    }

    /// `if (cond) then stmts [else stmts | else if ...] end if`.
    ///
    /// Only the outermost `if` of an else-if chain consumes the single
    /// `end if`; nested ones are parsed with `consume_end` false.
    fn parse_if(&mut self, consume_end: bool) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::If)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        self.expect_keyword(Keyword::Then)?;

        let then_body = self.parse_stmts(&[Keyword::End])?;

        let else_body = if self.eat_keyword(Keyword::Else) {
            if self.check_keyword(Keyword::If) {
                // else-if: the nested if shares our `end if`.
                Some(vec![self.parse_if(false)?])
            } else {
                Some(self.parse_stmts(&[Keyword::End])?)
            }
        } else {
            None
        };

        if consume_end {
            self.expect_keyword(Keyword::End)?;
            self.expect_keyword(Keyword::If)?;
        }

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            span,
        })
    }

    /// `for id := start, end [, step] stmts end for`.
    fn parse_for(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::For)?;
        let (var, _) = self.expect_ident()?;
        self.expect_op(Op::Assign)?;
        let start = self.parse_expr()?;
        self.expect_punct(Punct::Comma)?;
        let end = self.parse_expr()?;
        let step = if self.eat_punct(Punct::Comma) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let body = self.parse_stmts(&[Keyword::End])?;
        self.expect_keyword(Keyword::End)?;
        self.expect_keyword(Keyword::For)?;

        Ok(Stmt::For {
            var,
            start,
            end,
            step,
            body,
            span,
        })
    }

    /// `while (cond) stmts end while`.
    fn parse_while(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;

        let body = self.parse_stmts(&[Keyword::End])?;
        self.expect_keyword(Keyword::End)?;
        self.expect_keyword(Keyword::While)?;

        Ok(Stmt::While { cond, body, span })
    }

    /// `do stmts while (cond)`.
    fn parse_do_while(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::Do)?;
        let body = self.parse_stmts(&[Keyword::While])?;
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;

        Ok(Stmt::DoWhile { body, cond, span })
    }

    /// `call name(args)`; `call return(expr)` / `call return()` is an
    /// early return.
    fn parse_call_stmt(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::Call)?;
        let (name, _) = self.expect_ident()?;
        self.expect_punct(Punct::LParen)?;
        let args = self.parse_args()?;
        self.expect_punct(Punct::RParen)?;

        if name == "return" {
            if args.len() > 1 {
                return Err(self.error_here("`call return` takes at most one value"));
            }
            return Ok(Stmt::Return {
                value: args.into_iter().next(),
                span,
            });
        }

        Ok(Stmt::Call { name, args, span })
    }

    /// `tailcall name(args)`.
    fn parse_tailcall(&mut self) -> Result<Stmt> {
        let span = self.peek().span;
        self.expect_keyword(Keyword::Tailcall)?;
        let (name, _) = self.expect_ident()?;
        self.expect_punct(Punct::LParen)?;
        let args = self.parse_args()?;
        self.expect_punct(Punct::RParen)?;
        Ok(Stmt::TailCall { name, args, span })
    }

    /// Assignment or array store. At statement level `/=` is compound
    /// divide-assign, not the not-equal comparison.
    fn parse_assign(&mut self) -> Result<Stmt> {
        let (target, span) = self.expect_ident()?;

        if self.eat_punct(Punct::LBracket) {
            let mut indices = vec![self.parse_expr()?];
            while self.eat_punct(Punct::Comma) {
                indices.push(self.parse_expr()?);
            }
            self.expect_punct(Punct::RBracket)?;
            self.expect_op(Op::Assign)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Store {
                array: target,
                indices,
                value,
                span,
            });
        }

        let op = match self.peek().kind {
            TokenKind::Op(Op::Assign) => AssignOp::Set,
            TokenKind::Op(Op::PlusAssign) => AssignOp::Add,
            TokenKind::Op(Op::MinusAssign) => AssignOp::Sub,
            TokenKind::Op(Op::StarAssign) => AssignOp::Mul,
            TokenKind::Op(Op::SlashEq) => AssignOp::Div,
            _ => {
                return Err(self.error_here(format!(
                    "expected assignment operator after `{target}`"
                )))
            }
        };
        self.advance();
        let value = self.parse_expr()?;

        Ok(Stmt::Assign {
            target,
            op,
            value,
            span,
        })
    }

    /// Comma-separated call arguments (the closing paren is not
    /// consumed).
    pub(crate) fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.check_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat_punct(Punct::Comma) {
                return Ok(args);
            }
        }
    }
}
