//! Declaration parsing: functions, subroutines, globals, imports,
//! layouts, and the shared parameter-group machinery.

use atra_lex::{Keyword, Op, Punct, TokenKind, ValType};

use crate::ast::*;
use crate::{Parser, Result};

/// What a parameter-group type annotation resolved to.
#[derive(Debug, Clone)]
struct TypeSpec {
    ty: ValType,
    is_array: bool,
    dims: Option<Vec<u32>>,
    fn_sig: Option<FnSig>,
    layout: Option<String>,
}

impl Parser {
    /// Parses one top-level declaration.
    pub(crate) fn parse_decl(&mut self) -> Result<Decl> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Function) => self.parse_func(true).map(Decl::Function),
            TokenKind::Keyword(Keyword::Subroutine) => self.parse_func(false).map(Decl::Function),
            TokenKind::Keyword(Keyword::Var) => self.parse_global(true).map(Decl::Global),
            TokenKind::Keyword(Keyword::Const) => self.parse_global(false).map(Decl::Global),
            TokenKind::Keyword(Keyword::Import) => self.parse_import().map(Decl::Import),
            TokenKind::Keyword(Keyword::Layout) => self.parse_layout().map(Decl::Layout),
            _ => Err(self.error_here(format!(
                "expected declaration, found `{}`",
                self.peek().kind
            ))),
        }
    }

    /// `function NAME(params): TYPE [var locals] begin stmts end` or the
    /// subroutine form without the return type.
    fn parse_func(&mut self, is_function: bool) -> Result<FuncDecl> {
        let start = self.peek().span;
        self.advance(); // `function` / `subroutine`

        let (name, _) = self.expect_ident()?;
        self.expect_punct(Punct::LParen)?;
        let params = self.parse_param_groups(GroupEnd::Paren)?;
        self.expect_punct(Punct::RParen)?;

        let ret = if is_function {
            self.expect_punct(Punct::Colon)?;
            Some(self.parse_type_name()?)
        } else {
            None
        };

        let locals = if self.eat_keyword(Keyword::Var) {
            self.parse_param_groups(GroupEnd::Begin)?
        } else {
            Vec::new()
        };

        self.expect_keyword(Keyword::Begin)?;
        let body = self.parse_stmts(&[Keyword::End])?;
        self.expect_keyword(Keyword::End)?;
        let tail = if is_function {
            Keyword::Function
        } else {
            Keyword::Subroutine
        };
        self.eat_block_tail(tail);

        let span = start.merge(self.peek().span);
        Ok(FuncDecl {
            name,
            params,
            ret,
            locals,
            body,
            span,
        })
    }

    /// Consumes an optional `function`/`subroutine`/`layout` word after
    /// `end`, taking care not to swallow the start of the next
    /// declaration (which is the same keyword followed by a name).
    fn eat_block_tail(&mut self, tail: Keyword) {
        if self.check_keyword(tail) && !matches!(self.peek_kind_at(1), TokenKind::Ident(_)) {
            self.advance();
        }
    }

    /// `var NAME [: type] [:= expr]` / `const NAME [: type] := expr`.
    fn parse_global(&mut self, mutable: bool) -> Result<GlobalDecl> {
        let start = self.peek().span;
        self.advance(); // `var` / `const`

        let (name, name_span) = self.expect_ident()?;

        let mut ty = None;
        let mut fn_sig = None;
        if self.eat_punct(Punct::Colon) {
            if self.check_keyword(Keyword::Function) || self.check_keyword(Keyword::Subroutine) {
                fn_sig = Some(self.parse_fn_sig()?);
            } else {
                ty = Some(self.parse_type_name()?);
            }
        }

        let init = if self.eat_op(Op::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        if ty.is_none() && fn_sig.is_none() && init.is_none() {
            return Err(self.error_here(format!(
                "global `{name}` needs a type annotation or an initializer"
            )));
        }

        Ok(GlobalDecl {
            name,
            ty,
            fn_sig,
            mutable,
            init,
            span: start.merge(name_span),
        })
    }

    /// `import mod.field(T, ...) [: T]` - the dotted identifier splits at
    /// its first dot into module and field name.
    fn parse_import(&mut self) -> Result<ImportDecl> {
        let start = self.peek().span;
        self.advance(); // `import`

        let (dotted, name_span) = self.expect_ident()?;
        let Some((module, field)) = dotted.split_once('.') else {
            return Err(self.error_here(format!(
                "import name `{dotted}` must be of the form `module.field`"
            )));
        };
        let (module, field) = (module.to_string(), field.to_string());

        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::RParen) {
            loop {
                params.push(self.parse_type_name()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;

        let ret = if self.eat_punct(Punct::Colon) {
            Some(self.parse_type_name()?)
        } else {
            None
        };

        Ok(ImportDecl {
            module,
            field,
            params,
            ret,
            span: start.merge(name_span),
        })
    }

    /// `layout [packed] NAME field: type ... end [layout]`.
    fn parse_layout(&mut self) -> Result<LayoutDecl> {
        let start = self.peek().span;
        self.advance(); // `layout`

        let packed = self.eat_keyword(Keyword::Packed);
        let (name, _) = self.expect_ident()?;

        let mut fields = Vec::new();
        while !self.check_keyword(Keyword::End) {
            if self.at_eof() {
                return Err(self.error_here(format!("unterminated layout `{name}`")));
            }
            let (field_name, field_span) = self.expect_ident()?;
            self.expect_punct(Punct::Colon)?;
            let ty = self.parse_field_type()?;
            fields.push(LayoutFieldDecl {
                name: field_name,
                ty,
                span: field_span,
            });
        }
        self.expect_keyword(Keyword::End)?;
        self.eat_block_tail(Keyword::Layout);

        Ok(LayoutDecl {
            name,
            packed,
            fields,
            span: start,
        })
    }

    /// A layout field type: primitive, layout name, or `TYPE[N]`.
    fn parse_field_type(&mut self) -> Result<FieldType> {
        let (name, _) = self.expect_ident()?;
        match ValType::from_str(&name) {
            Some(ty) if self.check_punct(Punct::LBracket) => {
                self.advance();
                let count = self.parse_dim()?;
                self.expect_punct(Punct::RBracket)?;
                Ok(FieldType::Array(ty, count))
            }
            Some(ty) => Ok(FieldType::Prim(ty)),
            None => Ok(FieldType::Layout(name)),
        }
    }

    // =========================================================================
    // Parameter groups
    // =========================================================================

    /// Parses parameter groups until the closing token. Used both for
    /// parameter lists (ending at `)`) and local blocks (ending at
    /// `begin`).
    fn parse_param_groups(&mut self, end: GroupEnd) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        loop {
            if end.reached(self) {
                break;
            }

            // Names sharing this group's type. A comma continues the
            // group exactly when followed by an identifier that is
            // itself followed by a comma or colon.
            let mut names = vec![self.expect_ident()?];
            while self.check_punct(Punct::Comma)
                && matches!(self.peek_kind_at(1), TokenKind::Ident(_))
                && matches!(
                    self.peek_kind_at(2),
                    TokenKind::Punct(Punct::Comma) | TokenKind::Punct(Punct::Colon)
                )
            {
                self.advance(); // comma
                names.push(self.expect_ident()?);
            }

            self.expect_punct(Punct::Colon)?;
            let spec = self.parse_type_spec()?;

            for (name, span) in names {
                params.push(Param {
                    name,
                    ty: spec.ty,
                    is_array: spec.is_array,
                    dims: spec.dims.clone(),
                    fn_sig: spec.fn_sig.clone(),
                    layout: spec.layout.clone(),
                    span,
                });
            }

            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// The annotation after `name:` - a primitive/vector type, an array
    /// (`array [(dims)] TYPE`), a function signature, or a layout name.
    fn parse_type_spec(&mut self) -> Result<TypeSpec> {
        if self.eat_keyword(Keyword::Array) {
            let dims = if self.eat_punct(Punct::LParen) {
                let mut dims = vec![self.parse_dim()?];
                while self.eat_punct(Punct::Comma) {
                    dims.push(self.parse_dim()?);
                }
                self.expect_punct(Punct::RParen)?;
                Some(dims)
            } else {
                None
            };
            let ty = self.parse_type_name()?;
            return Ok(TypeSpec {
                ty,
                is_array: true,
                dims,
                fn_sig: None,
                layout: None,
            });
        }

        if self.check_keyword(Keyword::Function) || self.check_keyword(Keyword::Subroutine) {
            let fn_sig = self.parse_fn_sig()?;
            return Ok(TypeSpec {
                ty: ValType::I32,
                is_array: false,
                dims: None,
                fn_sig: Some(fn_sig),
                layout: None,
            });
        }

        let (name, _) = self.expect_ident()?;
        match ValType::from_str(&name) {
            Some(ty) => Ok(TypeSpec {
                ty,
                is_array: false,
                dims: None,
                fn_sig: None,
                layout: None,
            }),
            // Any other name is a layout-typed parameter; the code
            // generator rejects unknown layouts.
            None => Ok(TypeSpec {
                ty: ValType::I32,
                is_array: false,
                dims: None,
                fn_sig: None,
                layout: Some(name),
            }),
        }
    }

    /// `function(T, ...) [: T]` or `subroutine(T, ...)` in type position.
    fn parse_fn_sig(&mut self) -> Result<FnSig> {
        let is_function = self.check_keyword(Keyword::Function);
        self.advance(); // `function` / `subroutine`

        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if !self.check_punct(Punct::RParen) {
            loop {
                params.push(self.parse_type_name()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;

        let ret = if is_function {
            self.expect_punct(Punct::Colon)?;
            Some(self.parse_type_name()?)
        } else {
            None
        };

        Ok(FnSig { params, ret })
    }

    /// A value type name in type position.
    pub(crate) fn parse_type_name(&mut self) -> Result<ValType> {
        match &self.peek().kind {
            TokenKind::Ident(name) => match ValType::from_str(name) {
                Some(ty) => {
                    self.advance();
                    Ok(ty)
                }
                None => Err(self.error_here(format!("unknown type `{name}`"))),
            },
            other => Err(self.error_here(format!("expected type, found `{}`", other))),
        }
    }

    /// An array dimension: a plain unsigned integer literal.
    fn parse_dim(&mut self) -> Result<u32> {
        match &self.peek().kind {
            TokenKind::Number {
                text,
                is_float: false,
                suffix: None,
            } => match text.parse::<u32>() {
                Ok(n) => {
                    self.advance();
                    Ok(n)
                }
                Err(_) => Err(self.error_here(format!("invalid dimension `{text}`"))),
            },
            other => Err(self.error_here(format!("expected dimension, found `{}`", other))),
        }
    }
}

/// Terminator for a parameter-group list.
#[derive(Clone, Copy)]
enum GroupEnd {
    /// The `)` closing a parameter list.
    Paren,
    /// The `begin` ending a local block.
    Begin,
}

impl GroupEnd {
    fn reached(self, parser: &Parser) -> bool {
        match self {
            GroupEnd::Paren => parser.check_punct(Punct::RParen),
            GroupEnd::Begin => parser.check_keyword(Keyword::Begin),
        }
    }
}
