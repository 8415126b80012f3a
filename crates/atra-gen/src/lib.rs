//! atra-gen - WebAssembly code generation for the Atra language.
//!
//! The generator turns one parsed [`Program`] into a conformant wasm
//! 1.0 binary using the SIMD128 and tail-call extensions. There is no
//! intermediate representation: five passes over the AST (collection,
//! call discovery, auto-import synthesis, reference discovery,
//! emission) feed a set of name-to-index tables, and emission writes
//! the sections directly through the [`Encoder`].
//!
//! All state lives in one [`scan::ModuleCtx`] per compilation. Nothing
//! is cached or shared across compilations; `generate` is a pure
//! function from AST to bytes.
//!
//! ```
//! let program = atra_par::parse(
//!     "function add(a, b: f64): f64 begin add := a + b end",
//! )
//! .unwrap();
//! let output = atra_gen::generate(&program).unwrap();
//! assert_eq!(&output.bytes[0..4], b"\0asm");
//! ```

mod body;
mod builtins;
mod emit;
mod scan;

pub mod encoder;
pub mod error;
pub mod opcodes;

pub use emit::{MAGIC, VERSION};
pub use encoder::Encoder;
pub use error::{GenError, Result};

use atra_par::{LayoutTable, Program};
use indexmap::IndexMap;

/// Host function signatures visible to auto-import synthesis: a
/// flattened mapping from dot-joined name to arity. Every host function
/// takes and returns f64.
pub type HostSigs = IndexMap<String, usize>;

/// Knobs the embedding layer sets for one compilation.
#[derive(Debug, Clone, Default)]
pub struct GenOptions {
    /// Caller-provided host functions, for auto-import synthesis.
    pub host: HostSigs,
    /// When the caller supplies a memory, the module imports
    /// `env.memory` instead of declaring its own.
    pub import_memory: bool,
}

/// One compilation's output: the module bytes, the table-slot map when
/// a funcref table was produced, and the layout metadata.
#[derive(Debug, Clone)]
pub struct Output {
    pub bytes: Vec<u8>,
    pub table: Option<IndexMap<String, u32>>,
    pub layouts: LayoutTable,
}

/// Compiles a program with no host imports and an owned memory.
pub fn generate(program: &Program) -> Result<Output> {
    generate_with(program, &GenOptions::default())
}

/// Compiles a program against the given embedding options.
pub fn generate_with(program: &Program, options: &GenOptions) -> Result<Output> {
    let ctx = scan::ModuleCtx::build(program, &options.host, options.import_memory)?;
    let bytes = emit::emit_module(&ctx)?;
    Ok(Output {
        bytes,
        table: ctx.table,
        layouts: ctx.layouts,
    })
}
