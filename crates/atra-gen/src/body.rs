//! Function-body emission.
//!
//! One [`FuncCtx`] per function body owns the local slot table, the
//! break-target stack, and the output buffer. Expression emission takes
//! an optional expected type and uses it to choose the typed
//! instruction variant; when the produced type disagrees with the
//! expected one, the numeric conversion is inserted on the spot.
//!
//! Local slot layout: parameters first in order (arrays and layout
//! pointers as i32), declared locals next, and for value-returning
//! functions a hidden `$_return` local at the end that accumulates
//! assignments to the function's own name.

use atra_lex::ValType;
use atra_par::{AssignOp, BinOp, Expr, FnSig, FuncDecl, Stmt, UnOp};
use indexmap::IndexMap;

use crate::builtins;
use crate::encoder::Encoder;
use crate::error::{GenError, Result};
use crate::opcodes as op;
use crate::scan::ModuleCtx;

/// One local slot (parameter, declared local, or `$_return`).
pub(crate) struct LocalInfo {
    pub slot: u32,
    /// The wasm-level type of the slot.
    pub ty: ValType,
    /// Element type for array parameters (equals `ty` otherwise).
    pub elem: ValType,
    pub is_array: bool,
    pub dims: Option<Vec<u32>>,
    pub fn_sig: Option<FnSig>,
    pub layout: Option<String>,
}

/// Emission context for one function body.
pub(crate) struct FuncCtx<'a, 'p> {
    pub module: &'a ModuleCtx<'p>,
    pub decl: &'a FuncDecl,
    pub locals: IndexMap<String, LocalInfo>,
    pub ret_slot: Option<u32>,
    pub code: Encoder,
    /// Number of currently open blocks.
    depth: u32,
    /// For each enclosing loop, the block depth its break block lives
    /// at.
    break_targets: Vec<u32>,
}

/// Emits one code-section entry (local declarations + instructions +
/// `end`), without the size prefix.
pub(crate) fn emit_function_body(module: &ModuleCtx, decl: &FuncDecl) -> Result<Vec<u8>> {
    let mut ctx = FuncCtx::new(module, decl);

    for stmt in &decl.body {
        ctx.stmt(stmt)?;
    }

    // A function leaves its accumulated return value; a subroutine
    // leaves nothing.
    if let Some(slot) = ctx.ret_slot {
        ctx.code.byte(op::LOCAL_GET);
        ctx.code.uleb(slot as u64);
    }
    ctx.code.byte(op::END);

    // Local declarations use run-length compression (count, type).
    let mut body = Encoder::new();
    let runs = ctx.local_runs();
    body.uleb(runs.len() as u64);
    for (count, ty) in runs {
        body.uleb(count as u64);
        body.byte(op::type_code(ty));
    }
    body.raw(ctx.code.as_slice());
    Ok(body.into_bytes())
}

impl<'a, 'p> FuncCtx<'a, 'p> {
    fn new(module: &'a ModuleCtx<'p>, decl: &'a FuncDecl) -> Self {
        let mut locals = IndexMap::new();
        let mut slot = 0u32;
        for param in decl.params.iter().chain(&decl.locals) {
            locals.insert(
                param.name.clone(),
                LocalInfo {
                    slot,
                    ty: param.wasm_ty(),
                    elem: param.ty,
                    is_array: param.is_array,
                    dims: param.dims.clone(),
                    fn_sig: param.fn_sig.clone(),
                    layout: param.layout.clone(),
                },
            );
            slot += 1;
        }

        let ret_slot = decl.ret.map(|_| slot);

        FuncCtx {
            module,
            decl,
            locals,
            ret_slot,
            code: Encoder::new(),
            depth: 0,
            break_targets: Vec::new(),
        }
    }

    /// Declared (non-parameter) local types in slot order, run-length
    /// compressed.
    fn local_runs(&self) -> Vec<(u32, ValType)> {
        let mut types: Vec<ValType> = self
            .locals
            .values()
            .skip(self.decl.params.len())
            .map(|l| l.ty)
            .collect();
        if let Some(ret) = self.decl.ret {
            types.push(ret);
        }

        let mut runs: Vec<(u32, ValType)> = Vec::new();
        for ty in types {
            match runs.last_mut() {
                Some((count, last)) if *last == ty => *count += 1,
                _ => runs.push((1, ty)),
            }
        }
        runs
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign {
                target,
                op: assign_op,
                value,
                span,
            } => {
                // Compound assignment reads the target, applies the
                // operator, and stores back.
                let value = match assign_op {
                    AssignOp::Set => value.clone(),
                    other => {
                        let bin = match other {
                            AssignOp::Add => BinOp::Add,
                            AssignOp::Sub => BinOp::Sub,
                            AssignOp::Mul => BinOp::Mul,
                            _ => BinOp::Div,
                        };
                        Expr::Binary {
                            op: bin,
                            lhs: Box::new(Expr::Ident {
                                name: target.clone(),
                                span: *span,
                            }),
                            rhs: Box::new(value.clone()),
                            span: *span,
                        }
                    }
                };
                self.assign(target, &value)
            }

            Stmt::Store {
                array,
                indices,
                value,
                ..
            } => self.array_store(array, indices, value),

            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.condition(cond)?;
                self.code.byte(op::IF);
                self.code.byte(op::BLOCK_VOID);
                self.depth += 1;
                for s in then_body {
                    self.stmt(s)?;
                }
                if let Some(else_body) = else_body {
                    self.code.byte(op::ELSE);
                    for s in else_body {
                        self.stmt(s)?;
                    }
                }
                self.code.byte(op::END);
                self.depth -= 1;
                Ok(())
            }

            Stmt::For {
                var,
                start,
                end,
                step,
                body,
                ..
            } => self.counted_for(var, start, end, step.as_ref(), body),

            Stmt::While { cond, body, .. } => {
                self.code.byte(op::BLOCK);
                self.code.byte(op::BLOCK_VOID);
                self.depth += 1;
                self.break_targets.push(self.depth);
                self.code.byte(op::LOOP);
                self.code.byte(op::BLOCK_VOID);
                self.depth += 1;

                self.condition(cond)?;
                self.code.byte(op::I32_EQZ);
                self.code.byte(op::BR_IF);
                self.code.uleb(1);

                for s in body {
                    self.stmt(s)?;
                }
                self.code.byte(op::BR);
                self.code.uleb(0);

                self.code.byte(op::END);
                self.depth -= 1;
                self.code.byte(op::END);
                self.depth -= 1;
                self.break_targets.pop();
                Ok(())
            }

            Stmt::DoWhile { body, cond, .. } => {
                self.code.byte(op::BLOCK);
                self.code.byte(op::BLOCK_VOID);
                self.depth += 1;
                self.break_targets.push(self.depth);
                self.code.byte(op::LOOP);
                self.code.byte(op::BLOCK_VOID);
                self.depth += 1;

                for s in body {
                    self.stmt(s)?;
                }
                self.condition(cond)?;
                self.code.byte(op::BR_IF);
                self.code.uleb(0);

                self.code.byte(op::END);
                self.depth -= 1;
                self.code.byte(op::END);
                self.depth -= 1;
                self.break_targets.pop();
                Ok(())
            }

            Stmt::Break { .. } => {
                let target = self
                    .break_targets
                    .last()
                    .copied()
                    .ok_or_else(|| GenError::BreakOutsideLoop(self.decl.name.clone()))?;
                self.code.byte(op::BR);
                self.code.uleb((self.depth - target) as u64);
                Ok(())
            }

            Stmt::Call { name, args, .. } => {
                let produced = self.call(name, args, None)?;
                if produced.is_some() {
                    self.code.byte(op::DROP);
                }
                Ok(())
            }

            Stmt::Return { value, .. } => {
                match (self.ret_slot, value) {
                    (Some(slot), Some(value)) => {
                        let ret = self.decl.ret.unwrap_or(ValType::F64);
                        self.expr(value, Some(ret))?;
                        self.code.byte(op::LOCAL_SET);
                        self.code.uleb(slot as u64);
                        self.code.byte(op::LOCAL_GET);
                        self.code.uleb(slot as u64);
                        self.code.byte(op::RETURN);
                    }
                    (None, None) => {
                        self.code.byte(op::RETURN);
                    }
                    _ => return Err(GenError::ReturnArity(self.decl.name.clone())),
                }
                Ok(())
            }

            Stmt::TailCall { name, args, .. } => self.tail_call(name, args),
        }
    }

    fn assign(&mut self, target: &str, value: &Expr) -> Result<()> {
        // The function's own name is the hidden return local.
        if target == self.decl.name {
            if let Some(slot) = self.ret_slot {
                let ret = self.decl.ret.unwrap_or(ValType::F64);
                self.expr(value, Some(ret))?;
                self.code.byte(op::LOCAL_SET);
                self.code.uleb(slot as u64);
                return Ok(());
            }
        }

        if let Some((slot, ty)) = self.locals.get(target).map(|l| (l.slot, l.ty)) {
            self.expr(value, Some(ty))?;
            self.code.byte(op::LOCAL_SET);
            self.code.uleb(slot as u64);
            return Ok(());
        }

        if let Some((index, ty)) = self
            .module
            .globals
            .get(target)
            .map(|g| (g.index, g.ty))
        {
            self.expr(value, Some(ty))?;
            self.code.byte(op::GLOBAL_SET);
            self.code.uleb(index as u64);
            return Ok(());
        }

        // `p.field` through a layout-typed parameter.
        if let Some((slot, offset, ty)) = self.resolve_field(target) {
            self.code.byte(op::LOCAL_GET);
            self.code.uleb(slot as u64);
            if offset != 0 {
                self.code.byte(op::I32_CONST);
                self.code.sleb32(offset as i32);
                self.code.byte(op::I32_ADD);
            }
            self.expr(value, Some(ty))?;
            self.typed_store(ty);
            return Ok(());
        }

        Err(GenError::UndefinedVariable(target.to_string()))
    }

    fn array_store(&mut self, array: &str, indices: &[Expr], value: &Expr) -> Result<()> {
        // Storing through a plain i32 pointer takes its element type
        // from the stored value.
        let fallback = self.infer(value);
        let (elem, dims) = self.array_base(array, || fallback)?;
        self.linear_index(array, indices, dims.as_ref())?;
        self.code.byte(op::I32_CONST);
        self.code.sleb32(elem.size() as i32);
        self.code.byte(op::I32_MUL);
        self.code.byte(op::I32_ADD);
        self.expr(value, Some(elem))?;
        self.typed_store(elem);
        Ok(())
    }

    /// Pushes the base pointer of `array` and returns its element type
    /// and declared dimensions. Plain i32 values are indexable; their
    /// element type falls back to the caller's choice.
    fn array_base(
        &mut self,
        array: &str,
        fallback_elem: impl FnOnce() -> ValType,
    ) -> Result<(ValType, Option<Vec<u32>>)> {
        if let Some(local) = self.locals.get(array) {
            if local.ty != ValType::I32 {
                return Err(GenError::UndefinedArray(array.to_string()));
            }
            let elem = if local.is_array {
                local.elem
            } else {
                fallback_elem()
            };
            let dims = local.dims.clone();
            let slot = local.slot;
            self.code.byte(op::LOCAL_GET);
            self.code.uleb(slot as u64);
            return Ok((elem, dims));
        }
        if let Some(global) = self.module.globals.get(array) {
            if global.ty != ValType::I32 {
                return Err(GenError::UndefinedArray(array.to_string()));
            }
            let index = global.index;
            let elem = fallback_elem();
            self.code.byte(op::GLOBAL_GET);
            self.code.uleb(index as u64);
            return Ok((elem, None));
        }
        Err(GenError::UndefinedArray(array.to_string()))
    }

    /// Emits the linear element index (an i32) for an access.
    ///
    /// One index is used as-is. Two indices need declared dimensions
    /// and use row-major order with the declared row stride. Three
    /// indices are the explicit-stride form `a[row, stride, col]`.
    fn linear_index(
        &mut self,
        array: &str,
        indices: &[Expr],
        dims: Option<&Vec<u32>>,
    ) -> Result<()> {
        match indices {
            [index] => {
                self.expr(index, Some(ValType::I32))?;
            }
            [row, col] => {
                let stride = dims
                    .and_then(|d| d.get(1).copied())
                    .ok_or_else(|| GenError::UnsupportedIndexPattern(array.to_string()))?;
                self.expr(row, Some(ValType::I32))?;
                self.code.byte(op::I32_CONST);
                self.code.sleb32(stride as i32);
                self.code.byte(op::I32_MUL);
                self.expr(col, Some(ValType::I32))?;
                self.code.byte(op::I32_ADD);
            }
            [row, stride, col] => {
                self.expr(row, Some(ValType::I32))?;
                self.expr(stride, Some(ValType::I32))?;
                self.code.byte(op::I32_MUL);
                self.expr(col, Some(ValType::I32))?;
                self.code.byte(op::I32_ADD);
            }
            _ => return Err(GenError::UnsupportedIndexPattern(array.to_string())),
        }
        Ok(())
    }

    fn typed_store(&mut self, ty: ValType) {
        match op::store_op(ty) {
            (Some(opcode), align) => {
                self.code.byte(opcode);
                self.code.uleb(align as u64);
                self.code.uleb(0);
            }
            (None, align) => {
                self.code.byte(op::SIMD_PREFIX);
                self.code.uleb(11); // v128.store
                self.code.uleb(align as u64);
                self.code.uleb(0);
            }
        }
    }

    fn typed_load(&mut self, ty: ValType) {
        match op::load_op(ty) {
            (Some(opcode), align) => {
                self.code.byte(opcode);
                self.code.uleb(align as u64);
                self.code.uleb(0);
            }
            (None, align) => {
                self.code.byte(op::SIMD_PREFIX);
                self.code.uleb(0); // v128.load
                self.code.uleb(align as u64);
                self.code.uleb(0);
            }
        }
    }

    /// Counted for-loop. Shape: init store, outer block, inner loop,
    /// exit test, body, increment, branch back.
    fn counted_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<()> {
        let (slot, counter) = self
            .locals
            .get(var)
            .map(|l| (l.slot, l.ty))
            .ok_or_else(|| GenError::UndefinedVariable(var.to_string()))?;

        self.expr(start, Some(counter))?;
        self.code.byte(op::LOCAL_SET);
        self.code.uleb(slot as u64);

        self.code.byte(op::BLOCK);
        self.code.byte(op::BLOCK_VOID);
        self.depth += 1;
        self.break_targets.push(self.depth);
        self.code.byte(op::LOOP);
        self.code.byte(op::BLOCK_VOID);
        self.depth += 1;

        // Continue test: `end >= i` for an upward loop, `end <= i` when
        // the step is a negative literal; inverted with eqz to branch
        // out.
        let downward = step.map_or(false, is_negative_literal);
        self.expr(end, Some(counter))?;
        self.code.byte(op::LOCAL_GET);
        self.code.uleb(slot as u64);
        self.continue_cmp(counter, downward)?;
        self.code.byte(op::I32_EQZ);
        self.code.byte(op::BR_IF);
        self.code.uleb(1);

        for s in body {
            self.stmt(s)?;
        }

        // Increment.
        self.code.byte(op::LOCAL_GET);
        self.code.uleb(slot as u64);
        match step {
            Some(step) => {
                self.expr(step, Some(counter))?;
            }
            None => self.const_one(counter)?,
        }
        self.add_op(counter)?;
        self.code.byte(op::LOCAL_SET);
        self.code.uleb(slot as u64);

        self.code.byte(op::BR);
        self.code.uleb(0);
        self.code.byte(op::END);
        self.depth -= 1;
        self.code.byte(op::END);
        self.depth -= 1;
        self.break_targets.pop();
        Ok(())
    }

    fn continue_cmp(&mut self, ty: ValType, downward: bool) -> Result<()> {
        let opcode = match (ty, downward) {
            (ValType::I32, false) => op::I32_GE_S,
            (ValType::I32, true) => op::I32_LE_S,
            (ValType::I64, false) => op::I64_GE_S,
            (ValType::I64, true) => op::I64_LE_S,
            (ValType::F32, false) => op::F32_GE,
            (ValType::F32, true) => op::F32_LE,
            (ValType::F64, false) => op::F64_GE,
            (ValType::F64, true) => op::F64_LE,
            _ => {
                return Err(GenError::UnsupportedOp {
                    op: "for",
                    ty,
                })
            }
        };
        self.code.byte(opcode);
        Ok(())
    }

    fn const_one(&mut self, ty: ValType) -> Result<()> {
        match ty {
            ValType::I32 => {
                self.code.byte(op::I32_CONST);
                self.code.sleb32(1);
            }
            ValType::I64 => {
                self.code.byte(op::I64_CONST);
                self.code.sleb64(1);
            }
            ValType::F32 => {
                self.code.byte(op::F32_CONST);
                self.code.f32le(1.0);
            }
            ValType::F64 => {
                self.code.byte(op::F64_CONST);
                self.code.f64le(1.0);
            }
            _ => return Err(GenError::UnsupportedOp { op: "for", ty }),
        }
        Ok(())
    }

    fn add_op(&mut self, ty: ValType) -> Result<()> {
        let opcode = match ty {
            ValType::I32 => op::I32_ADD,
            ValType::I64 => op::I64_ADD,
            ValType::F32 => op::F32_ADD,
            ValType::F64 => op::F64_ADD,
            _ => return Err(GenError::UnsupportedOp { op: "for", ty }),
        };
        self.code.byte(opcode);
        Ok(())
    }

    fn tail_call(&mut self, name: &str, args: &[Expr]) -> Result<()> {
        // Through a function-typed variable: return_call_indirect.
        if let Some(sig) = self.fn_typed_sig(name) {
            if sig.ret != self.decl.ret {
                return Err(GenError::TailCallTypeMismatch {
                    caller: self.decl.name.clone(),
                    caller_ret: self.decl.ret,
                    callee: name.to_string(),
                    callee_ret: sig.ret,
                });
            }
            self.check_arity(name, sig.params.len(), args.len())?;
            for (arg, ty) in args.iter().zip(sig.params.clone()) {
                self.expr(arg, Some(ty))?;
            }
            let sig_index = self.sig_index_of(&sig)?;
            self.push_var(name)?;
            self.code.byte(op::RETURN_CALL_INDIRECT);
            self.code.uleb(sig_index as u64);
            self.code.byte(0x00);
            return Ok(());
        }

        let Some(info) = self.module.funcs.get(name).cloned() else {
            return Err(GenError::UndefinedFunction(name.to_string()));
        };
        if info.ret != self.decl.ret {
            return Err(GenError::TailCallTypeMismatch {
                caller: self.decl.name.clone(),
                caller_ret: self.decl.ret,
                callee: name.to_string(),
                callee_ret: info.ret,
            });
        }
        self.check_arity(name, info.params.len(), args.len())?;
        for (arg, ty) in args.iter().zip(&info.params) {
            self.expr(arg, Some(*ty))?;
        }
        self.code.byte(op::RETURN_CALL);
        self.code.uleb(info.index as u64);
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Emits `expr`, coercing the produced value to `expected` when one
    /// is given. Returns the type left on the stack.
    pub(crate) fn expr(&mut self, expr: &Expr, expected: Option<ValType>) -> Result<ValType> {
        let actual = self.expr_raw(expr, expected)?;
        match expected {
            Some(want) if want != actual => {
                self.coerce(actual, want)?;
                Ok(want)
            }
            _ => Ok(actual),
        }
    }

    fn expr_raw(&mut self, expr: &Expr, expected: Option<ValType>) -> Result<ValType> {
        match expr {
            Expr::Number {
                text,
                is_float,
                suffix,
                ..
            } => {
                let ty = suffix.or(expected).unwrap_or(ValType::F64);
                self.number_const(text, *is_float, ty)
            }

            Expr::Ident { name, .. } => self.ident(name),

            Expr::FuncRef { name, .. } => {
                let slot = self
                    .module
                    .table
                    .as_ref()
                    .and_then(|t| t.get(name))
                    .copied()
                    .ok_or_else(|| GenError::UndefinedFunction(name.clone()))?;
                self.code.byte(op::I32_CONST);
                self.code.sleb32(slot as i32);
                Ok(ValType::I32)
            }

            Expr::Call { name, args, .. } => match self.call(name, args, expected)? {
                Some(ty) => Ok(ty),
                None => Err(GenError::VoidValue(name.clone())),
            },

            Expr::Index { name, indices, .. } => {
                let fallback = expected.unwrap_or(ValType::F64);
                let (elem, dims) = self.array_base(name, || fallback)?;
                self.linear_index(name, indices, dims.as_ref())?;
                self.code.byte(op::I32_CONST);
                self.code.sleb32(elem.size() as i32);
                self.code.byte(op::I32_MUL);
                self.code.byte(op::I32_ADD);
                self.typed_load(elem);
                Ok(elem)
            }

            Expr::Binary { op, lhs, rhs, .. } => self.binary(*op, lhs, rhs, expected),

            Expr::Unary { op, operand, .. } => self.unary(*op, operand, expected),

            Expr::Ternary {
                cond,
                then_val,
                else_val,
                ..
            } => {
                let ty = expected.unwrap_or_else(|| self.infer(then_val));
                self.condition(cond)?;
                self.code.byte(op::IF);
                self.code.byte(op::type_code(ty));
                self.depth += 1;
                self.expr(then_val, Some(ty))?;
                self.code.byte(op::ELSE);
                self.expr(else_val, Some(ty))?;
                self.code.byte(op::END);
                self.depth -= 1;
                Ok(ty)
            }
        }
    }

    /// A numeric constant of the requested type.
    fn number_const(&mut self, text: &str, is_float: bool, ty: ValType) -> Result<ValType> {
        if ty.is_vector() {
            // A bare literal in vector position splats.
            let lane = ty.lane();
            self.number_const(text, is_float, lane)?;
            self.splat(ty)?;
            return Ok(ty);
        }

        let float_value = || text.parse::<f64>().unwrap_or(0.0);
        let int_value = || {
            if is_float {
                float_value() as i64
            } else {
                text.parse::<i64>().unwrap_or_else(|_| float_value() as i64)
            }
        };

        match ty {
            ValType::I32 => {
                self.code.byte(op::I32_CONST);
                self.code.sleb32(int_value() as i32);
            }
            ValType::I64 => {
                self.code.byte(op::I64_CONST);
                self.code.sleb64(int_value());
            }
            ValType::F32 => {
                self.code.byte(op::F32_CONST);
                self.code.f32le(float_value() as f32);
            }
            ValType::F64 => {
                self.code.byte(op::F64_CONST);
                self.code.f64le(float_value());
            }
            _ => unreachable!("vector handled above"),
        }
        Ok(ty)
    }

    fn ident(&mut self, name: &str) -> Result<ValType> {
        if name == self.decl.name {
            if let Some(slot) = self.ret_slot {
                self.code.byte(op::LOCAL_GET);
                self.code.uleb(slot as u64);
                return Ok(self.decl.ret.unwrap_or(ValType::F64));
            }
        }

        if let Some((slot, ty)) = self.locals.get(name).map(|l| (l.slot, l.ty)) {
            self.code.byte(op::LOCAL_GET);
            self.code.uleb(slot as u64);
            return Ok(ty);
        }

        if let Some((index, ty)) = self.module.globals.get(name).map(|g| (g.index, g.ty)) {
            self.code.byte(op::GLOBAL_GET);
            self.code.uleb(index as u64);
            return Ok(ty);
        }

        // `Rec.field`, `Rec.__size`, `Rec.__align` are integer
        // constants.
        if let Some(value) = self.layout_constant(name) {
            self.code.byte(op::I32_CONST);
            self.code.sleb32(value as i32);
            return Ok(ValType::I32);
        }

        // `p.field` through a layout-typed parameter loads the field.
        if let Some((slot, offset, ty)) = self.resolve_field(name) {
            self.code.byte(op::LOCAL_GET);
            self.code.uleb(slot as u64);
            if offset != 0 {
                self.code.byte(op::I32_CONST);
                self.code.sleb32(offset as i32);
                self.code.byte(op::I32_ADD);
            }
            self.typed_load(ty);
            return Ok(ty);
        }

        Err(GenError::UndefinedVariable(name.to_string()))
    }

    /// Resolves `Layout.path` to an integer constant.
    fn layout_constant(&self, name: &str) -> Option<u32> {
        let (layout, path) = name.split_once('.')?;
        let mut meta = self.module.layouts.get(layout)?;
        let mut offset = 0u32;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if last {
                return match *segment {
                    "__size" => Some(meta.size),
                    "__align" => Some(meta.align),
                    field => meta.fields.get(field).map(|f| offset + f.offset()),
                };
            }
            match meta.fields.get(*segment)? {
                atra_par::FieldMeta::Record {
                    offset: field_offset,
                    layout,
                    ..
                } => {
                    offset += field_offset;
                    meta = self.module.layouts.get(layout)?;
                }
                _ => return None,
            }
        }
        None
    }

    /// Resolves `p.path` through a layout-typed local to a scalar
    /// field: (base slot, byte offset, field type).
    fn resolve_field(&self, name: &str) -> Option<(u32, u32, ValType)> {
        let (base, path) = name.split_once('.')?;
        let local = self.locals.get(base)?;
        let mut meta = self.module.layouts.get(local.layout.as_deref()?)?;
        let mut offset = 0u32;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            match meta.fields.get(*segment)? {
                atra_par::FieldMeta::Scalar {
                    offset: field_offset,
                    ty,
                } if last => return Some((local.slot, offset + field_offset, *ty)),
                atra_par::FieldMeta::Record {
                    offset: field_offset,
                    layout,
                    ..
                } if !last => {
                    offset += field_offset;
                    meta = self.module.layouts.get(layout)?;
                }
                _ => return None,
            }
        }
        None
    }

    fn binary(
        &mut self,
        bin: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        expected: Option<ValType>,
    ) -> Result<ValType> {
        match bin {
            BinOp::Pow => self.power(lhs, rhs, expected),

            BinOp::And | BinOp::Or => {
                self.condition(lhs)?;
                self.condition(rhs)?;
                self.code.byte(if bin == BinOp::And {
                    op::I32_AND
                } else {
                    op::I32_OR
                });
                Ok(ValType::I32)
            }

            _ if bin.is_comparison() => {
                let ty = self.unify(lhs, rhs);
                self.expr(lhs, Some(ty))?;
                self.expr(rhs, Some(ty))?;
                self.comparison(bin, ty)
            }

            _ => {
                let ty = expected.unwrap_or_else(|| self.unify(lhs, rhs));
                self.expr(lhs, Some(ty))?;
                self.expr(rhs, Some(ty))?;
                self.arith(bin, ty)?;
                Ok(ty)
            }
        }
    }

    /// `**`: a literal 0.5 exponent is a square root in the base's
    /// type; anything else calls pow on f64 (demoted afterwards when
    /// f32 is expected).
    fn power(&mut self, lhs: &Expr, rhs: &Expr, expected: Option<ValType>) -> Result<ValType> {
        if rhs.is_literal_text(&["0.5", ".5"]) {
            let ty = match expected {
                Some(t) if t.is_float() => t,
                _ => {
                    let t = self.infer(lhs);
                    if t.is_float() {
                        t
                    } else {
                        ValType::F64
                    }
                }
            };
            self.expr(lhs, Some(ty))?;
            match ty {
                ValType::F32 => self.code.byte(op::F32_SQRT),
                ValType::F64 => self.code.byte(op::F64_SQRT),
                vec => {
                    let name = format!("{}.sqrt", vec.as_str());
                    let code = op::simd_opcode(&name)
                        .ok_or(GenError::UnknownSimdOp(name))?;
                    self.code.byte(op::SIMD_PREFIX);
                    self.code.uleb(code as u64);
                }
            }
            return Ok(ty);
        }

        self.expr(lhs, Some(ValType::F64))?;
        self.expr(rhs, Some(ValType::F64))?;
        let pow = self
            .module
            .funcs
            .get("pow")
            .ok_or_else(|| GenError::Internal("pow import missing".into()))?;
        self.code.byte(op::CALL);
        self.code.uleb(pow.index as u64);
        if expected == Some(ValType::F32) {
            self.code.byte(op::F32_DEMOTE_F64);
            return Ok(ValType::F32);
        }
        Ok(ValType::F64)
    }

    fn comparison(&mut self, bin: BinOp, ty: ValType) -> Result<ValType> {
        use BinOp::*;
        if ty.is_vector() {
            // Integer vectors compare signed; float vectors use the
            // un-suffixed comparison. The result is a lane mask.
            let suffix = match (bin, ty.is_float()) {
                (Eq, true) => "eq",
                (Ne, true) => "ne",
                (Lt, true) => "lt",
                (Le, true) => "le",
                (Gt, true) => "gt",
                (Ge, true) => "ge",
                (Eq, false) => "eq",
                (Ne, false) => "ne",
                (Lt, false) => "lt_s",
                (Le, false) => "le_s",
                (Gt, false) => "gt_s",
                (Ge, false) => "ge_s",
                _ => return Err(GenError::UnsupportedOp { op: "compare", ty }),
            };
            let name = format!("{}.{}", ty.as_str(), suffix);
            let code = op::simd_opcode(&name).ok_or(GenError::UnknownSimdOp(name))?;
            self.code.byte(op::SIMD_PREFIX);
            self.code.uleb(code as u64);
            return Ok(ty);
        }

        let opcode = match (bin, ty) {
            (Eq, ValType::I32) => op::I32_EQ,
            (Ne, ValType::I32) => op::I32_NE,
            (Lt, ValType::I32) => op::I32_LT_S,
            (Le, ValType::I32) => op::I32_LE_S,
            (Gt, ValType::I32) => op::I32_GT_S,
            (Ge, ValType::I32) => op::I32_GE_S,
            (Eq, ValType::I64) => op::I64_EQ,
            (Ne, ValType::I64) => op::I64_NE,
            (Lt, ValType::I64) => op::I64_LT_S,
            (Le, ValType::I64) => op::I64_LE_S,
            (Gt, ValType::I64) => op::I64_GT_S,
            (Ge, ValType::I64) => op::I64_GE_S,
            (Eq, ValType::F32) => op::F32_EQ,
            (Ne, ValType::F32) => op::F32_NE,
            (Lt, ValType::F32) => op::F32_LT,
            (Le, ValType::F32) => op::F32_LE,
            (Gt, ValType::F32) => op::F32_GT,
            (Ge, ValType::F32) => op::F32_GE,
            (Eq, ValType::F64) => op::F64_EQ,
            (Ne, ValType::F64) => op::F64_NE,
            (Lt, ValType::F64) => op::F64_LT,
            (Le, ValType::F64) => op::F64_LE,
            (Gt, ValType::F64) => op::F64_GT,
            (Ge, ValType::F64) => op::F64_GE,
            _ => return Err(GenError::UnsupportedOp { op: "compare", ty }),
        };
        self.code.byte(opcode);
        Ok(ValType::I32)
    }

    fn arith(&mut self, bin: BinOp, ty: ValType) -> Result<()> {
        use BinOp::*;
        use ValType::*;

        if ty.is_vector() {
            let suffix = match bin {
                Add => "add",
                Sub => "sub",
                Mul => "mul",
                Div if ty.is_float() => "div",
                BitAnd | BitOr | BitXor => {
                    let name = match bin {
                        BitAnd => "v128.and",
                        BitOr => "v128.or",
                        _ => "v128.xor",
                    };
                    let code = op::simd_opcode(name)
                        .ok_or_else(|| GenError::UnknownSimdOp(name.into()))?;
                    self.code.byte(op::SIMD_PREFIX);
                    self.code.uleb(code as u64);
                    return Ok(());
                }
                _ => {
                    return Err(GenError::UnsupportedOp {
                        op: op_name(bin),
                        ty,
                    })
                }
            };
            let name = format!("{}.{}", ty.as_str(), suffix);
            let code = op::simd_opcode(&name).ok_or(GenError::UnknownSimdOp(name))?;
            self.code.byte(op::SIMD_PREFIX);
            self.code.uleb(code as u64);
            return Ok(());
        }

        let opcode = match (bin, ty) {
            (Add, I32) => op::I32_ADD,
            (Sub, I32) => op::I32_SUB,
            (Mul, I32) => op::I32_MUL,
            (Div, I32) => op::I32_DIV_S,
            (Mod, I32) => op::I32_REM_S,
            (BitAnd, I32) => op::I32_AND,
            (BitOr, I32) => op::I32_OR,
            (BitXor, I32) => op::I32_XOR,
            (Shl, I32) => op::I32_SHL,
            (Shr, I32) => op::I32_SHR_S,
            (Add, I64) => op::I64_ADD,
            (Sub, I64) => op::I64_SUB,
            (Mul, I64) => op::I64_MUL,
            (Div, I64) => op::I64_DIV_S,
            (Mod, I64) => op::I64_REM_S,
            (BitAnd, I64) => op::I64_AND,
            (BitOr, I64) => op::I64_OR,
            (BitXor, I64) => op::I64_XOR,
            (Shl, I64) => op::I64_SHL,
            (Shr, I64) => op::I64_SHR_S,
            (Add, F32) => op::F32_ADD,
            (Sub, F32) => op::F32_SUB,
            (Mul, F32) => op::F32_MUL,
            (Div, F32) => op::F32_DIV,
            (Add, F64) => op::F64_ADD,
            (Sub, F64) => op::F64_SUB,
            (Mul, F64) => op::F64_MUL,
            (Div, F64) => op::F64_DIV,
            _ => {
                return Err(GenError::UnsupportedOp {
                    op: op_name(bin),
                    ty,
                })
            }
        };
        self.code.byte(opcode);
        Ok(())
    }

    fn unary(&mut self, un: UnOp, operand: &Expr, expected: Option<ValType>) -> Result<ValType> {
        match un {
            UnOp::Not => {
                self.condition(operand)?;
                self.code.byte(op::I32_EQZ);
                Ok(ValType::I32)
            }
            UnOp::Neg => {
                let ty = expected.unwrap_or_else(|| self.infer(operand));
                match ty {
                    ValType::I32 => {
                        self.code.byte(op::I32_CONST);
                        self.code.sleb32(0);
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::I32_SUB);
                    }
                    ValType::I64 => {
                        self.code.byte(op::I64_CONST);
                        self.code.sleb64(0);
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::I64_SUB);
                    }
                    ValType::F32 => {
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::F32_NEG);
                    }
                    ValType::F64 => {
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::F64_NEG);
                    }
                    vec => {
                        self.expr(operand, Some(vec))?;
                        let name = format!("{}.neg", vec.as_str());
                        let code = op::simd_opcode(&name)
                            .ok_or(GenError::UnknownSimdOp(name))?;
                        self.code.byte(op::SIMD_PREFIX);
                        self.code.uleb(code as u64);
                    }
                }
                Ok(ty)
            }
            UnOp::BitNot => {
                let ty = expected.unwrap_or_else(|| self.infer(operand));
                match ty {
                    ValType::I32 => {
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::I32_CONST);
                        self.code.sleb32(-1);
                        self.code.byte(op::I32_XOR);
                    }
                    ValType::I64 => {
                        self.expr(operand, Some(ty))?;
                        self.code.byte(op::I64_CONST);
                        self.code.sleb64(-1);
                        self.code.byte(op::I64_XOR);
                    }
                    vec if vec.is_vector() => {
                        self.expr(operand, Some(vec))?;
                        self.code.byte(op::SIMD_PREFIX);
                        self.code.uleb(77); // v128.not
                    }
                    other => return Err(GenError::UnsupportedOp { op: "~", ty: other }),
                }
                Ok(ty)
            }
        }
    }

    /// Emits `expr` as an i32 truthiness value for control flow.
    pub(crate) fn condition(&mut self, expr: &Expr) -> Result<()> {
        let ty = self.expr(expr, None)?;
        match ty {
            ValType::I32 => {}
            ValType::I64 => {
                // value != 0, via double eqz.
                self.code.byte(op::I64_EQZ);
                self.code.byte(op::I32_EQZ);
            }
            ValType::F32 => {
                self.code.byte(op::F32_CONST);
                self.code.f32le(0.0);
                self.code.byte(op::F32_NE);
            }
            ValType::F64 => {
                self.code.byte(op::F64_CONST);
                self.code.f64le(0.0);
                self.code.byte(op::F64_NE);
            }
            _ => {
                self.code.byte(op::SIMD_PREFIX);
                self.code.uleb(83); // v128.any_true
            }
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Emits a call; returns the type it leaves on the stack, if any.
    pub(crate) fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        expected: Option<ValType>,
    ) -> Result<Option<ValType>> {
        // A function-typed variable calls indirectly through the table.
        if let Some(sig) = self.fn_typed_sig(name) {
            self.check_arity(name, sig.params.len(), args.len())?;
            for (arg, ty) in args.iter().zip(sig.params.clone()) {
                self.expr(arg, Some(ty))?;
            }
            let sig_index = self.sig_index_of(&sig)?;
            self.push_var(name)?;
            self.code.byte(op::CALL_INDIRECT);
            self.code.uleb(sig_index as u64);
            self.code.byte(0x00);
            return Ok(sig.ret);
        }

        if atra_lex::is_native_builtin(name) {
            return builtins::emit(self, name, args, expected);
        }

        let Some(info) = self.module.funcs.get(name).cloned() else {
            return Err(GenError::UndefinedFunction(name.to_string()));
        };
        self.check_arity(name, info.params.len(), args.len())?;
        for (arg, ty) in args.iter().zip(&info.params) {
            self.expr(arg, Some(*ty))?;
        }
        self.code.byte(op::CALL);
        self.code.uleb(info.index as u64);
        Ok(info.ret)
    }

    /// The embedded signature of a function-typed parameter, local, or
    /// global named `name`.
    fn fn_typed_sig(&self, name: &str) -> Option<FnSig> {
        if let Some(local) = self.locals.get(name) {
            return local.fn_sig.clone();
        }
        self.module
            .globals
            .get(name)
            .and_then(|g| g.fn_sig.clone())
    }

    /// Pushes the value of a local or global holding a table index.
    fn push_var(&mut self, name: &str) -> Result<()> {
        if let Some(slot) = self.locals.get(name).map(|l| l.slot) {
            self.code.byte(op::LOCAL_GET);
            self.code.uleb(slot as u64);
            return Ok(());
        }
        if let Some(index) = self.module.globals.get(name).map(|g| g.index) {
            self.code.byte(op::GLOBAL_GET);
            self.code.uleb(index as u64);
            return Ok(());
        }
        Err(GenError::UndefinedVariable(name.to_string()))
    }

    fn sig_index_of(&self, sig: &FnSig) -> Result<u32> {
        self.module
            .existing_sig(sig)
            .ok_or_else(|| GenError::Internal("signature not registered".into()))
    }

    fn check_arity(&self, name: &str, expected: usize, found: usize) -> Result<()> {
        if expected != found {
            return Err(GenError::ArityMismatch {
                name: name.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Inserts the conversion from `from` to `to`.
    pub(crate) fn coerce(&mut self, from: ValType, to: ValType) -> Result<()> {
        use ValType::*;
        if from == to {
            return Ok(());
        }
        if to.is_vector() && !from.is_vector() {
            self.coerce(from, to.lane())?;
            self.splat(to)?;
            return Ok(());
        }
        let opcode = match (from, to) {
            (I32, I64) => op::I64_EXTEND_I32_S,
            (I32, F32) => op::F32_CONVERT_I32_S,
            (I32, F64) => op::F64_CONVERT_I32_S,
            (I64, I32) => op::I32_WRAP_I64,
            (I64, F32) => op::F32_CONVERT_I64_S,
            (I64, F64) => op::F64_CONVERT_I64_S,
            (F32, I32) => op::I32_TRUNC_F32_S,
            (F32, I64) => op::I64_TRUNC_F32_S,
            (F32, F64) => op::F64_PROMOTE_F32,
            (F64, I32) => op::I32_TRUNC_F64_S,
            (F64, I64) => op::I64_TRUNC_F64_S,
            (F64, F32) => op::F32_DEMOTE_F64,
            _ => return Err(GenError::UnsupportedConversion { from, to }),
        };
        self.code.byte(opcode);
        Ok(())
    }

    /// Splat the scalar on the stack into the given vector type.
    pub(crate) fn splat(&mut self, ty: ValType) -> Result<()> {
        let name = format!("{}.splat", ty.as_str());
        let code = op::simd_opcode(&name).ok_or(GenError::UnknownSimdOp(name))?;
        self.code.byte(op::SIMD_PREFIX);
        self.code.uleb(code as u64);
        Ok(())
    }

    /// Shape-directed type inference with an f64 default.
    pub(crate) fn infer(&self, expr: &Expr) -> ValType {
        match expr {
            Expr::Number { suffix, .. } => suffix.unwrap_or(ValType::F64),

            Expr::Ident { name, .. } => {
                if name == &self.decl.name {
                    if let Some(ret) = self.decl.ret {
                        return ret;
                    }
                }
                if let Some(local) = self.locals.get(name) {
                    return local.ty;
                }
                if let Some(global) = self.module.globals.get(name) {
                    return global.ty;
                }
                if self.layout_constant(name).is_some() {
                    return ValType::I32;
                }
                if let Some((_, _, ty)) = self.resolve_field(name) {
                    return ty;
                }
                ValType::F64
            }

            Expr::FuncRef { .. } => ValType::I32,

            Expr::Call { name, args, .. } => self.infer_call(name, args),

            Expr::Index { name, .. } => self
                .locals
                .get(name)
                .filter(|l| l.is_array)
                .map(|l| l.elem)
                .unwrap_or(ValType::F64),

            Expr::Binary { op, lhs, rhs, .. } => {
                if op.is_comparison() {
                    let ty = self.unify(lhs, rhs);
                    return if ty.is_vector() { ty } else { ValType::I32 };
                }
                match op {
                    BinOp::And | BinOp::Or => ValType::I32,
                    BinOp::Pow => ValType::F64,
                    _ => self.unify(lhs, rhs),
                }
            }

            Expr::Unary { op, operand, .. } => match op {
                UnOp::Not => ValType::I32,
                _ => self.infer(operand),
            },

            Expr::Ternary { then_val, .. } => self.infer(then_val),
        }
    }

    fn infer_call(&self, name: &str, args: &[Expr]) -> ValType {
        if let Some(sig) = self.fn_typed_sig(name) {
            return sig.ret.unwrap_or(ValType::F64);
        }
        if let Some(ty) = ValType::from_str(name) {
            return ty;
        }
        if let Some(ty) = builtins::infer(self, name, args) {
            return ty;
        }
        if let Some(info) = self.module.funcs.get(name) {
            return info.ret.unwrap_or(ValType::F64);
        }
        ValType::F64
    }

    /// The common operand type of a binary operation. A bare literal
    /// adopts the other side's type.
    fn unify(&self, lhs: &Expr, rhs: &Expr) -> ValType {
        if is_bare_literal(lhs) && !is_bare_literal(rhs) {
            self.infer(rhs)
        } else {
            self.infer(lhs)
        }
    }
}

/// True for a literal (or negated literal) without a type suffix.
fn is_bare_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Number { suffix: None, .. } => true,
        Expr::Unary {
            op: UnOp::Neg,
            operand,
            ..
        } => is_bare_literal(operand),
        _ => false,
    }
}

/// True for `-literal`, which flips the counted-for exit direction.
fn is_negative_literal(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Unary {
            op: UnOp::Neg,
            operand,
            ..
        } if matches!(operand.as_ref(), Expr::Number { .. })
    )
}

fn op_name(bin: BinOp) -> &'static str {
    match bin {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "mod",
        BinOp::Pow => "**",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        _ => "compare",
    }
}
