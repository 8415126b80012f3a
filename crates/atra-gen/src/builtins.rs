//! Native builtin expansion.
//!
//! Builtins never become calls: each expands to an inline instruction
//! sequence. Covered here are the fixed builtin list (`sqrt`, `min`,
//! `memory_grow`, ...), the scalar conversions and lane constructors
//! (`i32(x)`, `f64x2(a, b)`), the SIMD-namespaced methods
//! (`f64x2.splat`, `i32x4.extract_lane`, ...), and the `wasm.*` escape
//! hatch for instructions the surface language does not spell
//! (unsigned compares and divides, reinterpret casts, saturating
//! truncations, sign extensions).

use atra_lex::ValType;
use atra_par::Expr;

use crate::body::FuncCtx;
use crate::error::{GenError, Result};
use crate::opcodes as op;

/// Emits the builtin `name`; returns the type it leaves on the stack,
/// if any.
pub(crate) fn emit(
    ctx: &mut FuncCtx,
    name: &str,
    args: &[Expr],
    expected: Option<ValType>,
) -> Result<Option<ValType>> {
    if let Some(ty) = ValType::from_str(name) {
        return convert_or_construct(ctx, ty, name, args).map(Some);
    }

    if let Some(rest) = name.strip_prefix("wasm.") {
        return wasm_escape(ctx, name, rest, args, expected);
    }

    if let Some((vec_name, method)) = name.split_once('.') {
        if let Some(vec) = ValType::from_str(vec_name).filter(|t| t.is_vector()) {
            return simd_method(ctx, vec, method, name, args);
        }
    }

    match name {
        "sqrt" | "abs" | "floor" | "ceil" | "trunc" | "nearest" => {
            float_unary(ctx, name, args, expected).map(Some)
        }
        "copysign" | "min" | "max" => float_binary(ctx, name, args, expected).map(Some),
        "select" => {
            arity(name, 3, args)?;
            let ty = expected.unwrap_or_else(|| ctx.infer(&args[0]));
            ctx.expr(&args[0], Some(ty))?;
            ctx.expr(&args[1], Some(ty))?;
            ctx.condition(&args[2])?;
            ctx.code.byte(op::SELECT);
            Ok(Some(ty))
        }
        "clz" | "ctz" | "popcnt" => {
            arity(name, 1, args)?;
            let ty = int_operand_ty(ctx, expected, &args[0]);
            ctx.expr(&args[0], Some(ty))?;
            let opcode = match (name, ty) {
                ("clz", ValType::I32) => op::I32_CLZ,
                ("ctz", ValType::I32) => op::I32_CTZ,
                ("popcnt", ValType::I32) => op::I32_POPCNT,
                ("clz", _) => op::I64_CLZ,
                ("ctz", _) => op::I64_CTZ,
                _ => op::I64_POPCNT,
            };
            ctx.code.byte(opcode);
            Ok(Some(ty))
        }
        "rotl" | "rotr" => {
            arity(name, 2, args)?;
            let ty = int_operand_ty(ctx, expected, &args[0]);
            ctx.expr(&args[0], Some(ty))?;
            ctx.expr(&args[1], Some(ty))?;
            let opcode = match (name, ty) {
                ("rotl", ValType::I32) => op::I32_ROTL,
                ("rotr", ValType::I32) => op::I32_ROTR,
                ("rotl", _) => op::I64_ROTL,
                _ => op::I64_ROTR,
            };
            ctx.code.byte(opcode);
            Ok(Some(ty))
        }
        "memory_size" => {
            arity(name, 0, args)?;
            ctx.code.byte(op::MEMORY_SIZE);
            ctx.code.byte(0x00);
            Ok(Some(ValType::I32))
        }
        "memory_grow" => {
            arity(name, 1, args)?;
            ctx.expr(&args[0], Some(ValType::I32))?;
            ctx.code.byte(op::MEMORY_GROW);
            ctx.code.byte(0x00);
            Ok(Some(ValType::I32))
        }
        "memory_copy" => {
            arity(name, 3, args)?;
            for arg in args {
                ctx.expr(arg, Some(ValType::I32))?;
            }
            ctx.code.byte(op::MISC_PREFIX);
            ctx.code.uleb(op::MISC_MEMORY_COPY as u64);
            ctx.code.byte(0x00);
            ctx.code.byte(0x00);
            Ok(None)
        }
        "memory_fill" => {
            arity(name, 3, args)?;
            for arg in args {
                ctx.expr(arg, Some(ValType::I32))?;
            }
            ctx.code.byte(op::MISC_PREFIX);
            ctx.code.uleb(op::MISC_MEMORY_FILL as u64);
            ctx.code.byte(0x00);
            Ok(None)
        }
        _ => Err(GenError::UndefinedFunction(name.to_string())),
    }
}

/// `i32(x)` converts; `f64x2(a, b)` constructs by lanes (or splats a
/// single argument).
fn convert_or_construct(
    ctx: &mut FuncCtx,
    ty: ValType,
    name: &str,
    args: &[Expr],
) -> Result<ValType> {
    if !ty.is_vector() || args.len() == 1 {
        arity(name, 1, args)?;
        ctx.expr(&args[0], Some(ty))?;
        return Ok(ty);
    }

    let lanes = ty.lane_count() as usize;
    arity(name, lanes, args)?;
    let lane = ty.lane();

    ctx.expr(&args[0], Some(lane))?;
    ctx.splat(ty)?;

    let replace = format!("{}.replace_lane", ty.as_str());
    let replace_op = op::simd_opcode(&replace)
        .ok_or_else(|| GenError::UnknownSimdOp(replace.clone()))?;
    for (index, arg) in args.iter().enumerate().skip(1) {
        ctx.expr(arg, Some(lane))?;
        ctx.code.byte(op::SIMD_PREFIX);
        ctx.code.uleb(replace_op as u64);
        ctx.code.byte(index as u8);
    }
    Ok(ty)
}

fn float_unary(
    ctx: &mut FuncCtx,
    name: &str,
    args: &[Expr],
    expected: Option<ValType>,
) -> Result<ValType> {
    arity(name, 1, args)?;
    let ty = float_operand_ty(ctx, expected, &args[0]);
    ctx.expr(&args[0], Some(ty))?;

    match ty {
        ValType::F32 => {
            let opcode = match name {
                "sqrt" => op::F32_SQRT,
                "abs" => op::F32_ABS,
                "floor" => op::F32_FLOOR,
                "ceil" => op::F32_CEIL,
                "trunc" => op::F32_TRUNC,
                _ => op::F32_NEAREST,
            };
            ctx.code.byte(opcode);
        }
        ValType::F64 => {
            let opcode = match name {
                "sqrt" => op::F64_SQRT,
                "abs" => op::F64_ABS,
                "floor" => op::F64_FLOOR,
                "ceil" => op::F64_CEIL,
                "trunc" => op::F64_TRUNC,
                _ => op::F64_NEAREST,
            };
            ctx.code.byte(opcode);
        }
        vec => {
            let full = format!("{}.{}", vec.as_str(), name);
            let code = op::simd_opcode(&full).ok_or(GenError::UnknownSimdOp(full))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
        }
    }
    Ok(ty)
}

fn float_binary(
    ctx: &mut FuncCtx,
    name: &str,
    args: &[Expr],
    expected: Option<ValType>,
) -> Result<ValType> {
    arity(name, 2, args)?;
    let ty = float_operand_ty(ctx, expected, &args[0]);
    ctx.expr(&args[0], Some(ty))?;
    ctx.expr(&args[1], Some(ty))?;

    match ty {
        ValType::F32 => {
            let opcode = match name {
                "copysign" => op::F32_COPYSIGN,
                "min" => op::F32_MIN,
                _ => op::F32_MAX,
            };
            ctx.code.byte(opcode);
        }
        ValType::F64 => {
            let opcode = match name {
                "copysign" => op::F64_COPYSIGN,
                "min" => op::F64_MIN,
                _ => op::F64_MAX,
            };
            ctx.code.byte(opcode);
        }
        vec => {
            let full = format!("{}.{}", vec.as_str(), name);
            let code = op::simd_opcode(&full).ok_or(GenError::UnknownSimdOp(full))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
        }
    }
    Ok(ty)
}

/// SIMD-namespaced methods: `f64x2.splat(x)`,
/// `f64x2.extract_lane(v, 0)`, `f64x2.replace_lane(v, 0, x)`, and the
/// named arithmetic forms.
fn simd_method(
    ctx: &mut FuncCtx,
    vec: ValType,
    method: &str,
    full: &str,
    args: &[Expr],
) -> Result<Option<ValType>> {
    match method {
        "splat" => {
            arity(full, 1, args)?;
            ctx.expr(&args[0], Some(vec.lane()))?;
            ctx.splat(vec)?;
            Ok(Some(vec))
        }
        "extract_lane" => {
            arity(full, 2, args)?;
            ctx.expr(&args[0], Some(vec))?;
            let lane = lane_literal(full, &args[1], vec)?;
            let code = op::simd_opcode(full)
                .ok_or_else(|| GenError::UnknownSimdOp(full.to_string()))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
            ctx.code.byte(lane);
            Ok(Some(vec.lane()))
        }
        "replace_lane" => {
            arity(full, 3, args)?;
            ctx.expr(&args[0], Some(vec))?;
            let lane = lane_literal(full, &args[1], vec)?;
            ctx.expr(&args[2], Some(vec.lane()))?;
            let code = op::simd_opcode(full)
                .ok_or_else(|| GenError::UnknownSimdOp(full.to_string()))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
            ctx.code.byte(lane);
            Ok(Some(vec))
        }
        "any_true" => {
            arity(full, 1, args)?;
            ctx.expr(&args[0], Some(vec))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(83); // v128.any_true
            Ok(Some(ValType::I32))
        }
        "all_true" => {
            arity(full, 1, args)?;
            ctx.expr(&args[0], Some(vec))?;
            let code = op::simd_opcode(full)
                .ok_or_else(|| GenError::UnknownSimdOp(full.to_string()))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
            Ok(Some(ValType::I32))
        }
        // Named unary and binary vector operations.
        "neg" | "abs" | "sqrt" => {
            arity(full, 1, args)?;
            ctx.expr(&args[0], Some(vec))?;
            let code = op::simd_opcode(full)
                .ok_or_else(|| GenError::UnknownSimdOp(full.to_string()))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
            Ok(Some(vec))
        }
        _ => {
            let code = op::simd_opcode(full)
                .ok_or_else(|| GenError::UnknownSimdOp(full.to_string()))?;
            arity(full, 2, args)?;
            ctx.expr(&args[0], Some(vec))?;
            ctx.expr(&args[1], Some(vec))?;
            ctx.code.byte(op::SIMD_PREFIX);
            ctx.code.uleb(code as u64);
            Ok(Some(vec))
        }
    }
}

/// `wasm.*`: instructions the surface language does not spell. Bare
/// names resolve against the operand type; type-changing conversions
/// are fully spelled.
fn wasm_escape(
    ctx: &mut FuncCtx,
    full: &str,
    rest: &str,
    args: &[Expr],
    expected: Option<ValType>,
) -> Result<Option<ValType>> {
    use ValType::*;

    match rest {
        "div_u" | "rem_u" | "shr_u" => {
            arity(full, 2, args)?;
            let ty = int_operand_ty(ctx, expected, &args[0]);
            ctx.expr(&args[0], Some(ty))?;
            ctx.expr(&args[1], Some(ty))?;
            let opcode = match (rest, ty) {
                ("div_u", I32) => op::I32_DIV_U,
                ("rem_u", I32) => op::I32_REM_U,
                ("shr_u", I32) => op::I32_SHR_U,
                ("div_u", _) => op::I64_DIV_U,
                ("rem_u", _) => op::I64_REM_U,
                _ => op::I64_SHR_U,
            };
            ctx.code.byte(opcode);
            Ok(Some(ty))
        }

        "lt_u" | "le_u" | "gt_u" | "ge_u" => {
            arity(full, 2, args)?;
            let ty = int_operand_ty(ctx, None, &args[0]);
            ctx.expr(&args[0], Some(ty))?;
            ctx.expr(&args[1], Some(ty))?;
            let opcode = match (rest, ty) {
                ("lt_u", I32) => op::I32_LT_U,
                ("le_u", I32) => op::I32_LE_U,
                ("gt_u", I32) => op::I32_GT_U,
                ("ge_u", I32) => op::I32_GE_U,
                ("lt_u", _) => op::I64_LT_U,
                ("le_u", _) => op::I64_LE_U,
                ("gt_u", _) => op::I64_GT_U,
                _ => op::I64_GE_U,
            };
            ctx.code.byte(opcode);
            Ok(Some(I32))
        }

        "extend8_s" | "extend16_s" => {
            arity(full, 1, args)?;
            let ty = int_operand_ty(ctx, expected, &args[0]);
            ctx.expr(&args[0], Some(ty))?;
            let opcode = match (rest, ty) {
                ("extend8_s", I32) => op::I32_EXTEND8_S,
                ("extend16_s", I32) => op::I32_EXTEND16_S,
                ("extend8_s", _) => op::I64_EXTEND8_S,
                _ => op::I64_EXTEND16_S,
            };
            ctx.code.byte(opcode);
            Ok(Some(ty))
        }

        "extend32_s" => {
            arity(full, 1, args)?;
            ctx.expr(&args[0], Some(I64))?;
            ctx.code.byte(op::I64_EXTEND32_S);
            Ok(Some(I64))
        }

        "i32_reinterpret_f32" => reinterpret(ctx, full, args, F32, op::I32_REINTERPRET_F32, I32),
        "i64_reinterpret_f64" => reinterpret(ctx, full, args, F64, op::I64_REINTERPRET_F64, I64),
        "f32_reinterpret_i32" => reinterpret(ctx, full, args, I32, op::F32_REINTERPRET_I32, F32),
        "f64_reinterpret_i64" => reinterpret(ctx, full, args, I64, op::F64_REINTERPRET_I64, F64),

        "i32_trunc_sat_f32_s" => trunc_sat(ctx, full, args, F32, op::MISC_I32_TRUNC_SAT_F32_S, I32),
        "i32_trunc_sat_f32_u" => trunc_sat(ctx, full, args, F32, op::MISC_I32_TRUNC_SAT_F32_U, I32),
        "i32_trunc_sat_f64_s" => trunc_sat(ctx, full, args, F64, op::MISC_I32_TRUNC_SAT_F64_S, I32),
        "i32_trunc_sat_f64_u" => trunc_sat(ctx, full, args, F64, op::MISC_I32_TRUNC_SAT_F64_U, I32),
        "i64_trunc_sat_f32_s" => trunc_sat(ctx, full, args, F32, op::MISC_I64_TRUNC_SAT_F32_S, I64),
        "i64_trunc_sat_f32_u" => trunc_sat(ctx, full, args, F32, op::MISC_I64_TRUNC_SAT_F32_U, I64),
        "i64_trunc_sat_f64_s" => trunc_sat(ctx, full, args, F64, op::MISC_I64_TRUNC_SAT_F64_S, I64),
        "i64_trunc_sat_f64_u" => trunc_sat(ctx, full, args, F64, op::MISC_I64_TRUNC_SAT_F64_U, I64),

        _ => Err(GenError::UnknownWasmOp(full.to_string())),
    }
}

fn reinterpret(
    ctx: &mut FuncCtx,
    full: &str,
    args: &[Expr],
    from: ValType,
    opcode: u8,
    to: ValType,
) -> Result<Option<ValType>> {
    arity(full, 1, args)?;
    ctx.expr(&args[0], Some(from))?;
    ctx.code.byte(opcode);
    Ok(Some(to))
}

fn trunc_sat(
    ctx: &mut FuncCtx,
    full: &str,
    args: &[Expr],
    from: ValType,
    subop: u32,
    to: ValType,
) -> Result<Option<ValType>> {
    arity(full, 1, args)?;
    ctx.expr(&args[0], Some(from))?;
    ctx.code.byte(op::MISC_PREFIX);
    ctx.code.uleb(subop as u64);
    Ok(Some(to))
}

/// Inferred result type of a builtin call, for expression inference.
pub(crate) fn infer(ctx: &FuncCtx, name: &str, args: &[Expr]) -> Option<ValType> {
    if let Some(rest) = name.strip_prefix("wasm.") {
        return Some(match rest {
            "lt_u" | "le_u" | "gt_u" | "ge_u" => ValType::I32,
            "extend32_s" => ValType::I64,
            _ if rest.starts_with("i32_") => ValType::I32,
            _ if rest.starts_with("i64_") => ValType::I64,
            _ if rest.starts_with("f32_") => ValType::F32,
            _ if rest.starts_with("f64_") => ValType::F64,
            _ => int_operand_ty(ctx, None, args.first()?),
        });
    }

    if let Some((vec_name, method)) = name.split_once('.') {
        let vec = ValType::from_str(vec_name).filter(|t| t.is_vector())?;
        return Some(match method {
            "extract_lane" => vec.lane(),
            "any_true" | "all_true" => ValType::I32,
            _ => vec,
        });
    }

    match name {
        "sqrt" | "abs" | "floor" | "ceil" | "trunc" | "nearest" | "copysign" | "min" | "max" => {
            Some(float_operand_ty(ctx, None, args.first()?))
        }
        "select" => Some(ctx.infer(args.first()?)),
        "clz" | "ctz" | "popcnt" | "rotl" | "rotr" => {
            Some(int_operand_ty(ctx, None, args.first()?))
        }
        "memory_size" | "memory_grow" => Some(ValType::I32),
        _ => None,
    }
}

/// The float type a float builtin works in: the expected type when it
/// is float, the operand's own type when float or vector, f64
/// otherwise.
fn float_operand_ty(ctx: &FuncCtx, expected: Option<ValType>, arg: &Expr) -> ValType {
    if let Some(ty) = expected.filter(|t| t.is_float()) {
        return ty;
    }
    let ty = ctx.infer(arg);
    if ty.is_float() || ty.is_vector() {
        ty
    } else {
        ValType::F64
    }
}

/// The integer type an integer builtin works in, defaulting to i32.
fn int_operand_ty(ctx: &FuncCtx, expected: Option<ValType>, arg: &Expr) -> ValType {
    if let Some(ty) = expected.filter(|t| matches!(t, ValType::I32 | ValType::I64)) {
        return ty;
    }
    match ctx.infer(arg) {
        ty @ (ValType::I32 | ValType::I64) => ty,
        _ => ValType::I32,
    }
}

/// Lane immediates must be constant integer literals in range.
fn lane_literal(name: &str, expr: &Expr, vec: ValType) -> Result<u8> {
    match expr {
        Expr::Number {
            text,
            is_float: false,
            ..
        } => {
            let lane: u32 = text
                .parse()
                .map_err(|_| GenError::LaneIndexNotConstant(name.to_string()))?;
            if lane >= vec.lane_count() {
                return Err(GenError::LaneIndexNotConstant(name.to_string()));
            }
            Ok(lane as u8)
        }
        _ => Err(GenError::LaneIndexNotConstant(name.to_string())),
    }
}

fn arity(name: &str, expected: usize, args: &[Expr]) -> Result<()> {
    if args.len() != expected {
        return Err(GenError::ArityMismatch {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}
