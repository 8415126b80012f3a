//! Error types for wasm code generation.
//!
//! Every variant carries the offending name so the message can point at
//! the source construct. The generator recovers from nothing: the first
//! error aborts the compilation.

use atra_lex::ValType;
use atra_par::LayoutError;
use thiserror::Error;

/// Error type for code generation.
#[derive(Debug, Error)]
pub enum GenError {
    /// Use of a name that is neither a parameter, local, global, nor
    /// layout constant.
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    /// Call of a name that is not a function, import, builtin, or
    /// host-provided function.
    #[error("no such function `{0}`")]
    UndefinedFunction(String),

    /// Indexing a name that is not indexable.
    #[error("undefined array `{0}`")]
    UndefinedArray(String),

    /// Global initializers accept a literal or unary-minus-of-literal
    /// only.
    #[error("global `{0}` has a non-constant initializer")]
    NonConstantGlobal(String),

    /// Globals are scalar-typed.
    #[error("global `{0}` has unsupported type `{1}`")]
    UnsupportedGlobalType(String, ValType),

    /// Two globals with the same name.
    #[error("duplicate global `{0}`")]
    DuplicateGlobal(String),

    /// Two functions (or imports) with the same name.
    #[error("duplicate function `{0}`")]
    DuplicateFunction(String),

    /// Unknown SIMD-namespaced operation.
    #[error("unknown SIMD operation `{0}`")]
    UnknownSimdOp(String),

    /// Unknown `wasm.*` escape-hatch operation.
    #[error("unknown wasm operation `{0}`")]
    UnknownWasmOp(String),

    /// Lane indices must be integer literals.
    #[error("lane index of `{0}` must be a constant integer")]
    LaneIndexNotConstant(String),

    /// A parameter or local annotated with a name that is neither a
    /// type nor a declared layout.
    #[error("parameter `{param}` has unknown type `{ty}`")]
    UnknownParamType { param: String, ty: String },

    /// Conversion with no corresponding wasm instruction.
    #[error("unsupported conversion from `{from}` to `{to}`")]
    UnsupportedConversion { from: ValType, to: ValType },

    /// Operator applied to a type that has no instruction for it.
    #[error("operator `{op}` is not supported for type `{ty}`")]
    UnsupportedOp { op: &'static str, ty: ValType },

    /// `break` outside of any loop.
    #[error("`break` outside of a loop in `{0}`")]
    BreakOutsideLoop(String),

    /// `call return(x)` in a subroutine or `call return()` in a
    /// function.
    #[error("wrong `return` arity in `{0}`")]
    ReturnArity(String),

    /// Tail calls require the callee's return type to equal the
    /// caller's exactly.
    #[error("tail call to `{callee}` returns {callee_ret:?} but `{caller}` returns {caller_ret:?}")]
    TailCallTypeMismatch {
        caller: String,
        caller_ret: Option<ValType>,
        callee: String,
        callee_ret: Option<ValType>,
    },

    /// Index forms are one index, two with declared dimensions, or the
    /// explicit-stride three-index form.
    #[error("unsupported index pattern on `{0}`")]
    UnsupportedIndexPattern(String),

    /// Call with the wrong number of arguments.
    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A subroutine (or void import) used where a value is needed.
    #[error("`{0}` returns no value")]
    VoidValue(String),

    /// Layout resolution failure.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Internal error - indicates a bug in the generator.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for code generation operations.
pub type Result<T> = std::result::Result<T, GenError>;
