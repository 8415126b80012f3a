//! atra-drv - Compiler driver.
//!
//! The narrow interface everything outside the core consumes:
//!
//! - [`parse`] - source to AST (used by tests and tooling).
//! - [`compile`] / [`compile_with`] - source to wasm bytes plus the
//!   table-slot map and layout metadata, without instantiating.
//! - [`dump`] - compile and hex-format the bytes.
//! - [`run`] - compile and instantiate on the embedder.
//! - [`run_template`] - the interpolated-template form.
//!
//! The pipeline is strictly linear: lexer, parser, code generator,
//! wiring. There is no back-edge between stages and no state kept
//! across calls.

use thiserror::Error;

pub use atra_gen::Output as CompiledModule;
pub use atra_par::Program;
pub use atra_rt::{
    ExportTree, HostFunc, ImportValue, Imports, Instance, MemorySpec, RtError, TemplateValue,
    Value,
};

/// Error type of the driver surface: the three failure kinds of the
/// pipeline (syntax, generation, instantiation), unchanged.
#[derive(Debug, Error)]
pub enum AtraError {
    #[error(transparent)]
    Parse(#[from] atra_par::ParseError),

    #[error(transparent)]
    Gen(#[from] atra_gen::GenError),

    #[error(transparent)]
    Rt(#[from] atra_rt::RtError),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, AtraError>;

/// Parses a source string to its AST.
pub fn parse(source: &str) -> Result<Program> {
    Ok(atra_par::parse(source)?)
}

/// Compiles without instantiating: no host functions, owned memory.
pub fn compile(source: &str) -> Result<CompiledModule> {
    let program = atra_par::parse(source)?;
    tracing::debug!(decls = program.decls.len(), "parsed");
    let output = atra_gen::generate(&program)?;
    tracing::debug!(bytes = output.bytes.len(), "generated");
    Ok(output)
}

/// Compiles against a caller-supplied import mapping (host function
/// arities and the imported-memory decision come from it).
pub fn compile_with(source: &str, imports: &Imports) -> Result<CompiledModule> {
    let program = atra_par::parse(source)?;
    let options = atra_gen::GenOptions {
        host: imports.host_sigs(),
        import_memory: imports.memory_pages().is_some(),
    };
    Ok(atra_gen::generate_with(&program, &options)?)
}

/// Compiles and hex-formats the module bytes, sixteen to a line.
pub fn dump(source: &str) -> Result<String> {
    let output = compile(source)?;
    let mut text = String::with_capacity(output.bytes.len() * 3);
    for (index, byte) in output.bytes.iter().enumerate() {
        if index > 0 {
            text.push(if index % 16 == 0 { '\n' } else { ' ' });
        }
        text.push_str(&format!("{byte:02x}"));
    }
    Ok(text)
}

/// Compiles and instantiates on the embedder.
pub fn run(source: &str, imports: &Imports) -> Result<Instance> {
    tracing::debug!(len = source.len(), "compile and instantiate");
    Ok(atra_rt::run(source, imports)?)
}

/// The interpolated-template form: literal parts, tagged values, and
/// extra imports.
pub fn run_template(
    parts: &[&str],
    values: Vec<TemplateValue>,
    extra: Imports,
) -> Result<Instance> {
    Ok(atra_rt::run_template(parts, values, extra)?)
}
