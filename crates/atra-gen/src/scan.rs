//! Pre-passes over the AST.
//!
//! The code generator runs five passes; the first four live here and
//! produce a [`ModuleCtx`] owning every table the emission pass needs:
//!
//! 1. **Collection** - partition declarations, assign global indices,
//!    register the signatures of explicit imports and of every
//!    function-typed parameter, local, and global.
//! 2. **Call discovery** - walk all function bodies recording called
//!    names; `**` with a non-`0.5` exponent requires `pow`.
//! 3. **Auto-import synthesis** - every discovered call that is neither
//!    a local function, a builtin, nor an explicit import must be a
//!    known math name (module `math`) or a caller-provided host
//!    function (module `host`); anything else is a "no such function"
//!    error.
//! 4. **Reference discovery** - find `@name` occurrences and decide
//!    whether a funcref table is needed; assign table slots in function
//!    index order.
//!
//! All tables are owned by one compilation; nothing is reused.

use atra_lex::{is_native_builtin, ValType};
use atra_par::{
    Decl, Expr, FnSig, FuncDecl, Param, Program, Stmt,
};
use atra_par::LayoutTable;
use atra_util::FxHashSet;
use indexmap::{IndexMap, IndexSet};

use crate::error::{GenError, Result};
use crate::HostSigs;

/// The auto-importable math names and their arities. All take and
/// return f64.
pub(crate) const MATH_IMPORTS: &[(&str, usize)] = &[
    ("sin", 1),
    ("cos", 1),
    ("ln", 1),
    ("exp", 1),
    ("pow", 2),
    ("atan2", 2),
];

/// A deduplicated function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SigType {
    pub params: Vec<ValType>,
    pub ret: Option<ValType>,
}

/// One entry of the import section, in registration order.
#[derive(Debug, Clone)]
pub(crate) struct ImportEntry {
    pub module: String,
    pub field: String,
    /// The name call sites use (`module.field` for explicit imports,
    /// the bare name for auto-imports).
    pub source_name: String,
    pub sig_index: u32,
}

/// A callable known to the module: import or local function.
#[derive(Debug, Clone)]
pub(crate) struct FuncInfo {
    /// Index in the function index space (imports first).
    pub index: u32,
    pub sig_index: u32,
    /// Wasm-level parameter types (arrays and layouts flatten to i32).
    pub params: Vec<ValType>,
    pub ret: Option<ValType>,
    pub is_import: bool,
}

/// A module-level global.
#[derive(Debug, Clone)]
pub(crate) struct GlobalInfo {
    pub index: u32,
    pub ty: ValType,
    pub mutable: bool,
    pub fn_sig: Option<FnSig>,
}

/// Everything the emission pass needs, owned by one compilation.
pub(crate) struct ModuleCtx<'a> {
    pub program: &'a Program,
    pub layouts: LayoutTable,
    pub globals: IndexMap<String, GlobalInfo>,
    pub sig_types: Vec<SigType>,
    sig_index: IndexMap<String, u32>,
    pub imports: Vec<ImportEntry>,
    pub funcs: IndexMap<String, FuncInfo>,
    pub local_decls: Vec<&'a FuncDecl>,
    /// Table slots by function name, present when a table is required.
    pub table: Option<IndexMap<String, u32>>,
    /// Names that hold function references (params, locals, globals).
    pub fn_typed_vars: FxHashSet<String>,
    pub needs_memory: bool,
    pub import_memory: bool,
}

impl<'a> ModuleCtx<'a> {
    pub fn build(program: &'a Program, host: &HostSigs, import_memory: bool) -> Result<Self> {
        let mut ctx = ModuleCtx {
            program,
            layouts: LayoutTable::compute(program)?,
            globals: IndexMap::new(),
            sig_types: Vec::new(),
            sig_index: IndexMap::new(),
            imports: Vec::new(),
            funcs: IndexMap::new(),
            local_decls: Vec::new(),
            table: None,
            fn_typed_vars: FxHashSet::default(),
            needs_memory: false,
            import_memory,
        };

        let scan = ctx.collect()?;
        ctx.synthesize_imports(&scan, host)?;
        ctx.assign_indices()?;
        ctx.build_table(&scan)?;

        Ok(ctx)
    }

    /// Interns a signature, returning its type-section index. Two
    /// functions sharing parameter and return types share an index.
    pub fn sig_of(&mut self, params: Vec<ValType>, ret: Option<ValType>) -> u32 {
        let key = sig_key(&params, ret);
        if let Some(&index) = self.sig_index.get(&key) {
            return index;
        }
        let index = self.sig_types.len() as u32;
        self.sig_types.push(SigType { params, ret });
        self.sig_index.insert(key, index);
        index
    }

    /// The interned index of an embedded function signature.
    pub fn sig_of_fn_sig(&mut self, sig: &FnSig) -> u32 {
        self.sig_of(sig.params.clone(), sig.ret)
    }

    /// Looks up an already-interned signature. Every embedded signature
    /// is registered during collection, so body emission only reads.
    pub fn existing_sig(&self, sig: &FnSig) -> Option<u32> {
        self.sig_index.get(&sig_key(&sig.params, sig.ret)).copied()
    }

    /// Pass 1 (collection) and pass 2 (call discovery).
    fn collect(&mut self) -> Result<Scan> {
        let program = self.program;
        for decl in &program.decls {
            match decl {
                Decl::Global(g) => {
                    let ty = if g.fn_sig.is_some() {
                        ValType::I32
                    } else {
                        g.ty.or_else(|| g.init.as_ref().and_then(literal_type))
                            .unwrap_or(ValType::F64)
                    };
                    if let Some(sig) = &g.fn_sig {
                        self.sig_of_fn_sig(sig);
                        self.fn_typed_vars.insert(g.name.clone());
                    }
                    let index = self.globals.len() as u32;
                    let previous = self.globals.insert(
                        g.name.clone(),
                        GlobalInfo {
                            index,
                            ty,
                            mutable: g.mutable,
                            fn_sig: g.fn_sig.clone(),
                        },
                    );
                    if previous.is_some() {
                        return Err(GenError::DuplicateGlobal(g.name.clone()));
                    }
                }
                Decl::Function(f) => {
                    for param in f.params.iter().chain(&f.locals) {
                        self.note_var(param)?;
                    }
                    self.local_decls.push(f);
                }
                Decl::Import(i) => {
                    let sig_index = self.sig_of(i.params.clone(), i.ret);
                    self.imports.push(ImportEntry {
                        module: i.module.clone(),
                        field: i.field.clone(),
                        source_name: i.source_name(),
                        sig_index,
                    });
                }
                Decl::Layout(_) => {}
            }
        }

        // Pass 2: walk every body.
        let mut scan = Scan::default();
        for f in &self.local_decls {
            for stmt in &f.body {
                walk_stmt(stmt, &mut scan);
            }
        }
        Ok(scan)
    }

    /// Registers the side tables a parameter or local contributes to:
    /// embedded signatures and the memory requirement. Layout-typed
    /// parameters must name a declared layout.
    fn note_var(&mut self, param: &Param) -> Result<()> {
        if let Some(sig) = param.fn_sig.clone() {
            self.sig_of_fn_sig(&sig);
            self.fn_typed_vars.insert(param.name.clone());
        }
        if let Some(layout) = &param.layout {
            if self.layouts.get(layout).is_none() {
                return Err(GenError::UnknownParamType {
                    param: param.name.clone(),
                    ty: layout.clone(),
                });
            }
        }
        if param.is_array || param.layout.is_some() {
            self.needs_memory = true;
        }
        Ok(())
    }

    /// Pass 3: auto-import synthesis.
    fn synthesize_imports(&mut self, scan: &Scan, host: &HostSigs) -> Result<()> {
        if scan.touches_memory {
            self.needs_memory = true;
        }

        let local_names: FxHashSet<String> = self
            .local_decls
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let explicit: FxHashSet<String> =
            self.imports.iter().map(|i| i.source_name.clone()).collect();

        for name in &scan.called {
            if local_names.contains(name)
                || explicit.contains(name)
                || is_native_builtin(name)
                || self.fn_typed_vars.contains(name)
            {
                continue;
            }
            if let Some((_, arity)) = MATH_IMPORTS.iter().find(|(n, _)| *n == name.as_str()) {
                let sig_index = self.sig_of(vec![ValType::F64; *arity], Some(ValType::F64));
                self.imports.push(ImportEntry {
                    module: "math".into(),
                    field: name.clone(),
                    source_name: name.clone(),
                    sig_index,
                });
            } else if let Some(&arity) = host.get(name) {
                let sig_index = self.sig_of(vec![ValType::F64; arity], Some(ValType::F64));
                self.imports.push(ImportEntry {
                    module: "host".into(),
                    field: name.clone(),
                    source_name: name.clone(),
                    sig_index,
                });
            } else {
                return Err(GenError::UndefinedFunction(name.clone()));
            }
        }
        Ok(())
    }

    /// Function index space: imports first, in registration order, then
    /// local functions in source order.
    fn assign_indices(&mut self) -> Result<()> {
        for (index, import) in self.imports.iter().enumerate() {
            let sig = &self.sig_types[import.sig_index as usize];
            let info = FuncInfo {
                index: index as u32,
                sig_index: import.sig_index,
                params: sig.params.clone(),
                ret: sig.ret,
                is_import: true,
            };
            if self.funcs.insert(import.source_name.clone(), info).is_some() {
                return Err(GenError::DuplicateFunction(import.source_name.clone()));
            }
        }

        let base = self.imports.len() as u32;
        let decls: Vec<&FuncDecl> = self.local_decls.clone();
        for (offset, f) in decls.iter().enumerate() {
            let params: Vec<ValType> = f.params.iter().map(|p| p.wasm_ty()).collect();
            let sig_index = self.sig_of(params.clone(), f.ret);
            let info = FuncInfo {
                index: base + offset as u32,
                sig_index,
                params,
                ret: f.ret,
                is_import: false,
            };
            if self.funcs.insert(f.name.clone(), info).is_some() {
                return Err(GenError::DuplicateFunction(f.name.clone()));
            }
        }
        Ok(())
    }

    /// Pass 4: reference discovery and table-slot assignment.
    fn build_table(&mut self, scan: &Scan) -> Result<()> {
        for name in &scan.refs {
            if !self.funcs.contains_key(name) {
                return Err(GenError::UndefinedFunction(name.clone()));
            }
        }

        let needed = !self.fn_typed_vars.is_empty() || !scan.refs.is_empty();
        if !needed {
            return Ok(());
        }

        // Every explicit import and every local function is always in
        // the table; auto-imports only when explicitly referenced.
        let explicit_count = self
            .program
            .decls
            .iter()
            .filter(|d| matches!(d, Decl::Import(_)))
            .count();
        let mut members: Vec<(&String, &FuncInfo)> = self
            .funcs
            .iter()
            .filter(|(name, info)| {
                if !info.is_import {
                    return true;
                }
                if (info.index as usize) < explicit_count {
                    return true;
                }
                scan.refs.contains(*name)
            })
            .collect();
        members.sort_by_key(|(_, info)| info.index);

        let mut table = IndexMap::new();
        for (slot, (name, _)) in members.into_iter().enumerate() {
            table.insert(name.clone(), slot as u32);
        }
        self.table = Some(table);
        Ok(())
    }

    /// The function indices backing the element segment, in table-slot
    /// order.
    pub fn table_func_indices(&self) -> Vec<u32> {
        match &self.table {
            Some(table) => table.keys().map(|name| self.funcs[name].index).collect(),
            None => Vec::new(),
        }
    }
}

/// Signature dedup key: parameter types joined, `:`, return type.
fn sig_key(params: &[ValType], ret: Option<ValType>) -> String {
    let params: Vec<&str> = params.iter().map(|t| t.as_str()).collect();
    match ret {
        Some(r) => format!("{}:{}", params.join(","), r.as_str()),
        None => format!("{}:", params.join(",")),
    }
}

/// The type of a constant initializer expression, if it is one.
fn literal_type(expr: &Expr) -> Option<ValType> {
    match expr {
        Expr::Number { suffix, .. } => Some(suffix.unwrap_or(ValType::F64)),
        Expr::Unary {
            op: atra_par::UnOp::Neg,
            operand,
            ..
        } => literal_type(operand),
        _ => None,
    }
}

/// What the body walks found.
#[derive(Default)]
pub(crate) struct Scan {
    /// Called names, in discovery order.
    pub called: IndexSet<String>,
    /// `@name` references, in discovery order.
    pub refs: IndexSet<String>,
    /// Any indexed access or memory builtin seen.
    pub touches_memory: bool,
}

fn walk_stmt(stmt: &Stmt, scan: &mut Scan) {
    match stmt {
        Stmt::Assign { value, .. } => walk_expr(value, scan),
        Stmt::Store { indices, value, .. } => {
            scan.touches_memory = true;
            for index in indices {
                walk_expr(index, scan);
            }
            walk_expr(value, scan);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            walk_expr(cond, scan);
            for s in then_body {
                walk_stmt(s, scan);
            }
            if let Some(else_body) = else_body {
                for s in else_body {
                    walk_stmt(s, scan);
                }
            }
        }
        Stmt::For {
            start,
            end,
            step,
            body,
            ..
        } => {
            walk_expr(start, scan);
            walk_expr(end, scan);
            if let Some(step) = step {
                walk_expr(step, scan);
            }
            for s in body {
                walk_stmt(s, scan);
            }
        }
        Stmt::While { cond, body, .. } | Stmt::DoWhile { cond, body, .. } => {
            walk_expr(cond, scan);
            for s in body {
                walk_stmt(s, scan);
            }
        }
        Stmt::Break { .. } => {}
        Stmt::Call { name, args, .. } | Stmt::TailCall { name, args, .. } => {
            note_call(name, scan);
            for arg in args {
                walk_expr(arg, scan);
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                walk_expr(value, scan);
            }
        }
    }
}

fn walk_expr(expr: &Expr, scan: &mut Scan) {
    match expr {
        Expr::Number { .. } | Expr::Ident { .. } => {}
        Expr::FuncRef { name, .. } => {
            scan.refs.insert(name.clone());
        }
        Expr::Call { name, args, .. } => {
            note_call(name, scan);
            for arg in args {
                walk_expr(arg, scan);
            }
        }
        Expr::Index { indices, .. } => {
            scan.touches_memory = true;
            for index in indices {
                walk_expr(index, scan);
            }
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            // `x ** 0.5` lowers to sqrt; any other exponent needs pow.
            if *op == atra_par::BinOp::Pow && !rhs.is_literal_text(&["0.5", ".5"]) {
                scan.called.insert("pow".into());
            }
            walk_expr(lhs, scan);
            walk_expr(rhs, scan);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, scan),
        Expr::Ternary {
            cond,
            then_val,
            else_val,
            ..
        } => {
            walk_expr(cond, scan);
            walk_expr(then_val, scan);
            walk_expr(else_val, scan);
        }
    }
}

fn note_call(name: &str, scan: &mut Scan) {
    if name.starts_with("memory_") {
        scan.touches_memory = true;
    }
    scan.called.insert(name.to_string());
}
