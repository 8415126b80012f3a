//! Runtime wiring errors.
//!
//! Compilation errors pass through unchanged; embedder (wasmi) errors
//! are surfaced to the caller as-is, wrapped only for type purposes.

use thiserror::Error;

/// Error type for module wiring and instantiation.
#[derive(Debug, Error)]
pub enum RtError {
    /// Lexical/parsing failure.
    #[error(transparent)]
    Parse(#[from] atra_par::ParseError),

    /// Code generation failure.
    #[error(transparent)]
    Gen(#[from] atra_gen::GenError),

    /// Embedder failure (validation, trap, call-type mismatch).
    #[error(transparent)]
    Wasm(#[from] wasmi::Error),

    /// Import definition failure.
    #[error(transparent)]
    Linker(#[from] wasmi::errors::LinkerError),

    /// Instantiation was rejected by the embedder.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// Call of an export the module does not have.
    #[error("unknown export `{0}`")]
    UnknownExport(String),

    /// Call with the wrong number of arguments.
    #[error("export `{name}` expects {expected} argument(s), found {found}")]
    CallArity {
        name: String,
        expected: usize,
        found: usize,
    },

    /// Export has a parameter or result the host boundary cannot carry
    /// (vector values stay inside the module).
    #[error("export `{0}` has a type the host cannot supply")]
    UnsupportedHostType(String),

    /// Memory access without a memory.
    #[error("module has no memory")]
    NoMemory,

    /// Out-of-bounds or otherwise failed memory access.
    #[error("memory access failed: {0}")]
    MemoryAccess(String),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RtError>;
