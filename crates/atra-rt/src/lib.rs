//! atra-rt - Module wiring and instantiation glue.
//!
//! The compiler proper stops at wasm bytes; this crate wires those
//! bytes into a running instance on the wasmi embedder:
//!
//! - `math.sin`, `math.cos`, `math.ln`, `math.exp`, `math.pow`, and
//!   `math.atan2` bind to their standard-library equivalents.
//! - `host.<name>` binds from the caller's [`Imports`] mapping (nested
//!   mappings flatten with dot-joined keys).
//! - `host.__INTERP_i__` binds from template interpolation slots.
//! - `env.memory` binds when the caller supplied a memory.
//!
//! Instantiation errors from the embedder surface to the caller
//! unchanged; a rejected module is a code-generator bug, a missing
//! import is a caller bug.

mod error;
mod exports;
mod imports;
mod template;

pub use error::{Result, RtError};
pub use exports::{ExportTree, Instance, Value};
pub use imports::{HostFunc, ImportValue, Imports, MemorySpec, RESERVED_KEYS};
pub use template::{render, TemplateValue};

use atra_gen::{GenOptions, Output};
use wasmi::core::ValType;
use wasmi::{Config, Engine, Func, FuncType, Linker, Memory, MemoryType, Store, Val};

/// Compiles and instantiates a source string against the given
/// imports.
///
/// # Example
///
/// ```no_run
/// use atra_rt::{run, Imports};
///
/// let mut instance = run(
///     "function add(a, b: f64): f64 begin add := a + b end",
///     &Imports::new(),
/// )
/// .unwrap();
/// assert_eq!(instance.call_f64("add", &[2.0, 3.5]).unwrap(), 5.5);
/// ```
pub fn run(source: &str, imports: &Imports) -> Result<Instance> {
    let program = atra_par::parse(source)?;
    let options = GenOptions {
        host: imports.host_sigs(),
        import_memory: imports.memory_pages().is_some(),
    };
    let output = atra_gen::generate_with(&program, &options)?;
    instantiate(&output, imports)
}

/// The interpolated-template form: literal parts with values spliced
/// between them, plus any extra imports (which win on name conflicts).
pub fn run_template(
    parts: &[&str],
    values: Vec<TemplateValue>,
    extra: Imports,
) -> Result<Instance> {
    let (source, interp) = template::render(parts, values);
    let merged = interp.merge(extra);
    run(&source, &merged)
}

/// Instantiates already-compiled output against the given imports.
pub fn instantiate(output: &Output, imports: &Imports) -> Result<Instance> {
    let mut config = Config::default();
    config.wasm_tail_call(true);
    let engine = Engine::new(&config);

    let module = wasmi::Module::new(&engine, &output.bytes[..])?;
    let mut store = Store::new(&engine, ());
    let mut linker = Linker::new(&engine);

    define_math(&mut linker)?;
    define_host(&mut store, &mut linker, imports)?;

    let imported_memory = match imports.memory_pages() {
        Some(pages) => {
            let memory = Memory::new(&mut store, MemoryType::new(pages, None))
                .map_err(|e| RtError::Instantiation(e.to_string()))?;
            linker.define("env", "memory", memory)?;
            Some(memory)
        }
        None => None,
    };

    let instance = linker
        .instantiate(&mut store, &module)?
        .ensure_no_start(&mut store)
        .map_err(|e| RtError::Instantiation(e.to_string()))?;

    Ok(Instance::new(
        store,
        instance,
        imported_memory,
        output.table.clone(),
        output.layouts.clone(),
    ))
}

/// The auto-importable math builtins, bound to the Rust float
/// intrinsics.
fn define_math(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap("math", "sin", |x: f64| -> f64 { x.sin() })?;
    linker.func_wrap("math", "cos", |x: f64| -> f64 { x.cos() })?;
    linker.func_wrap("math", "ln", |x: f64| -> f64 { x.ln() })?;
    linker.func_wrap("math", "exp", |x: f64| -> f64 { x.exp() })?;
    linker.func_wrap("math", "pow", |a: f64, b: f64| -> f64 { a.powf(b) })?;
    linker.func_wrap("math", "atan2", |y: f64, x: f64| -> f64 { y.atan2(x) })?;
    Ok(())
}

/// Every user- or interpolation-supplied callable, under module
/// `host`.
fn define_host(store: &mut Store<()>, linker: &mut Linker<()>, imports: &Imports) -> Result<()> {
    for (name, host_fn) in imports.flatten() {
        let ty = FuncType::new(
            std::iter::repeat(ValType::F64).take(host_fn.arity()),
            [ValType::F64],
        );
        let func = Func::new(
            &mut *store,
            ty,
            move |_caller, params: &[Val], results: &mut [Val]| {
                let args: Vec<f64> = params
                    .iter()
                    .map(|v| match v {
                        Val::I32(v) => *v as f64,
                        Val::I64(v) => *v as f64,
                        Val::F32(v) => f32::from(*v) as f64,
                        Val::F64(v) => f64::from(*v),
                        _ => 0.0,
                    })
                    .collect();
                let out = host_fn.call(&args);
                if let Some(slot) = results.first_mut() {
                    *slot = Val::F64(out.into());
                }
                Ok(())
            },
        );
        linker.define("host", &name, func)?;
    }
    Ok(())
}
