//! Module emission (pass 5).
//!
//! Writes the magic number and version, then each section if non-empty,
//! strictly in the order Type(1), Import(2), Function(3), Table(4),
//! Memory(5), Global(6), Export(7), Element(9), Code(10).

use atra_lex::ValType;
use atra_par::{Decl, Expr, GlobalDecl, UnOp};

use crate::body;
use crate::encoder::Encoder;
use crate::error::{GenError, Result};
use crate::opcodes as op;
use crate::scan::ModuleCtx;

/// `\0asm`
pub const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
/// Version 1.
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

pub(crate) fn emit_module(ctx: &ModuleCtx) -> Result<Vec<u8>> {
    let mut out = Encoder::new();
    out.raw(&MAGIC);
    out.raw(&VERSION);

    // Fallible content is built up front; the section closures below
    // only copy bytes.
    let globals = build_globals(ctx)?;
    let bodies = build_bodies(ctx)?;

    if !ctx.sig_types.is_empty() {
        out.section(op::SEC_TYPE, |s| {
            s.uleb(ctx.sig_types.len() as u64);
            for sig in &ctx.sig_types {
                s.byte(op::TYPE_FUNC);
                s.uleb(sig.params.len() as u64);
                for param in &sig.params {
                    s.byte(op::type_code(*param));
                }
                match sig.ret {
                    Some(ret) => {
                        s.uleb(1);
                        s.byte(op::type_code(ret));
                    }
                    None => s.uleb(0),
                }
            }
        });
    }

    if !ctx.imports.is_empty() || ctx.import_memory {
        out.section(op::SEC_IMPORT, |s| {
            let count = ctx.imports.len() + usize::from(ctx.import_memory);
            s.uleb(count as u64);
            for import in &ctx.imports {
                s.name(&import.module);
                s.name(&import.field);
                s.byte(op::KIND_FUNC);
                s.uleb(import.sig_index as u64);
            }
            if ctx.import_memory {
                // One page minimum, no maximum.
                s.name("env");
                s.name("memory");
                s.byte(op::KIND_MEMORY);
                s.byte(0x00);
                s.uleb(1);
            }
        });
    }

    if !ctx.local_decls.is_empty() {
        out.section(op::SEC_FUNCTION, |s| {
            s.uleb(ctx.local_decls.len() as u64);
            for decl in &ctx.local_decls {
                s.uleb(ctx.funcs[&decl.name].sig_index as u64);
            }
        });
    }

    if let Some(table) = &ctx.table {
        out.section(op::SEC_TABLE, |s| {
            s.uleb(1);
            s.byte(op::TYPE_FUNCREF);
            s.byte(0x00);
            s.uleb(table.len() as u64);
        });
    }

    if ctx.needs_memory && !ctx.import_memory {
        out.section(op::SEC_MEMORY, |s| {
            s.uleb(1);
            s.byte(0x00);
            s.uleb(1); // one 64 KiB page, no maximum
        });
    }

    if let Some(globals) = globals {
        out.section(op::SEC_GLOBAL, |s| s.raw(&globals));
    }

    let own_memory = ctx.needs_memory && !ctx.import_memory;
    if !ctx.local_decls.is_empty() || own_memory {
        out.section(op::SEC_EXPORT, |s| {
            let count = ctx.local_decls.len() + usize::from(own_memory);
            s.uleb(count as u64);
            for decl in &ctx.local_decls {
                s.name(&decl.name);
                s.byte(op::KIND_FUNC);
                s.uleb(ctx.funcs[&decl.name].index as u64);
            }
            if own_memory {
                s.name("memory");
                s.byte(op::KIND_MEMORY);
                s.uleb(0);
            }
        });
    }

    if ctx.table.is_some() {
        let indices = ctx.table_func_indices();
        out.section(op::SEC_ELEMENT, |s| {
            s.uleb(1);
            // Active segment in table zero at offset zero.
            s.uleb(0);
            s.byte(op::I32_CONST);
            s.sleb32(0);
            s.byte(op::END);
            s.uleb(indices.len() as u64);
            for index in indices {
                s.uleb(index as u64);
            }
        });
    }

    if !bodies.is_empty() {
        out.section(op::SEC_CODE, |s| {
            s.uleb(bodies.len() as u64);
            for entry in &bodies {
                s.uleb(entry.len() as u64);
                s.raw(entry);
            }
        });
    }

    Ok(out.into_bytes())
}

fn build_bodies(ctx: &ModuleCtx) -> Result<Vec<Vec<u8>>> {
    let mut bodies = Vec::with_capacity(ctx.local_decls.len());
    for decl in &ctx.local_decls {
        bodies.push(body::emit_function_body(ctx, decl)?);
    }
    Ok(bodies)
}

/// The global-section content, or `None` when there are no globals.
fn build_globals(ctx: &ModuleCtx) -> Result<Option<Vec<u8>>> {
    if ctx.globals.is_empty() {
        return Ok(None);
    }

    let mut s = Encoder::new();
    s.uleb(ctx.globals.len() as u64);
    for decl in &ctx.program.decls {
        let Decl::Global(g) = decl else { continue };
        let info = &ctx.globals[&g.name];
        if info.ty.is_vector() {
            return Err(GenError::UnsupportedGlobalType(g.name.clone(), info.ty));
        }
        s.byte(op::type_code(info.ty));
        s.byte(u8::from(info.mutable));
        const_init(&mut s, g, info.ty)?;
        s.byte(op::END);
    }
    Ok(Some(s.into_bytes()))
}

/// Constant initializer: a literal or unary-minus-of-literal; anything
/// more complex is rejected. A missing initializer is a typed zero.
fn const_init(s: &mut Encoder, g: &GlobalDecl, ty: ValType) -> Result<()> {
    let value = match &g.init {
        None => ConstValue::Int(0),
        Some(expr) => {
            const_value(expr).ok_or_else(|| GenError::NonConstantGlobal(g.name.clone()))?
        }
    };

    match ty {
        ValType::I32 => {
            s.byte(op::I32_CONST);
            s.sleb32(value.as_i64() as i32);
        }
        ValType::I64 => {
            s.byte(op::I64_CONST);
            s.sleb64(value.as_i64());
        }
        ValType::F32 => {
            s.byte(op::F32_CONST);
            s.f32le(value.as_f64() as f32);
        }
        ValType::F64 => {
            s.byte(op::F64_CONST);
            s.f64le(value.as_f64());
        }
        other => return Err(GenError::UnsupportedGlobalType(g.name.clone(), other)),
    }
    Ok(())
}

enum ConstValue {
    Int(i64),
    Float(f64),
}

impl ConstValue {
    fn as_i64(&self) -> i64 {
        match self {
            ConstValue::Int(v) => *v,
            ConstValue::Float(v) => *v as i64,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            ConstValue::Int(v) => *v as f64,
            ConstValue::Float(v) => *v,
        }
    }
}

fn const_value(expr: &Expr) -> Option<ConstValue> {
    match expr {
        Expr::Number { text, is_float, .. } => {
            if *is_float {
                text.parse::<f64>().ok().map(ConstValue::Float)
            } else {
                match text.parse::<i64>() {
                    Ok(v) => Some(ConstValue::Int(v)),
                    Err(_) => text.parse::<f64>().ok().map(ConstValue::Float),
                }
            }
        }
        Expr::Unary {
            op: UnOp::Neg,
            operand,
            ..
        } => match const_value(operand)? {
            ConstValue::Int(v) => Some(ConstValue::Int(-v)),
            ConstValue::Float(v) => Some(ConstValue::Float(-v)),
        },
        _ => None,
    }
}
