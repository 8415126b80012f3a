//! User-supplied imports.
//!
//! The caller hands the runtime one nested mapping from name to host
//! function (or to another mapping); nesting flattens with dot-joined
//! keys, so `physics -> { gravity }` becomes the import
//! `host.physics.gravity`. The top-level keys `memory`, `__memory`,
//! and `__table` are plumbing, not names the generated module can
//! import: a supplied memory lives in the same mapping under `memory`
//! or `__memory` (the former is promoted when both are present), and
//! `__table` is where the table-slot map appears on the export side.
//! The reservation applies only to the mapping handed to `run`; a
//! nested entry such as `physics.memory` is an ordinary host function.
//!
//! Every host function takes and returns f64; its arity is carried
//! explicitly so auto-import synthesis can declare the wasm signature.

use std::fmt;
use std::sync::Arc;

use atra_gen::HostSigs;
use indexmap::IndexMap;

/// Top-level keys the generated module can never import as functions.
pub const RESERVED_KEYS: &[&str] = &["memory", "__memory", "__table"];

/// A host function: an f64-in/f64-out callable with a declared arity.
#[derive(Clone)]
pub struct HostFunc {
    arity: usize,
    func: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl HostFunc {
    pub fn new(arity: usize, func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            arity,
            func: Arc::new(func),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[f64]) -> f64 {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("arity", &self.arity).finish()
    }
}

/// A supplied memory, as it appears under the reserved `memory` /
/// `__memory` keys: the statically-typed stand-in for handing the
/// embedder an existing memory object. The wiring layer imports
/// `env.memory` with this minimum page count (at least one page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySpec {
    pub min_pages: u32,
}

/// One entry of the user-import mapping.
#[derive(Debug, Clone)]
pub enum ImportValue {
    Func(HostFunc),
    Nested(Imports),
    /// Only meaningful under the reserved top-level keys.
    Memory(MemorySpec),
}

/// The user-import mapping handed to `run`.
///
/// # Example
///
/// ```
/// use atra_rt::Imports;
///
/// let imports = Imports::new()
///     .func("log2", 1, |args| args[0].log2())
///     .nested("physics", Imports::new().func("gravity", 0, |_| 9.81))
///     .with_memory(1);
/// let flat = imports.flatten();
/// assert!(flat.contains_key("log2"));
/// assert!(flat.contains_key("physics.gravity"));
/// assert_eq!(imports.memory_pages(), Some(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Imports {
    entries: IndexMap<String, ImportValue>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host function under `name`.
    pub fn func(
        mut self,
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.entries
            .insert(name.into(), ImportValue::Func(HostFunc::new(arity, func)));
        self
    }

    /// Adds a pre-built host function under `name`.
    pub fn host_func(mut self, name: impl Into<String>, func: HostFunc) -> Self {
        self.entries.insert(name.into(), ImportValue::Func(func));
        self
    }

    /// Adds a nested mapping under `name`; its entries flatten with
    /// dot-joined keys.
    pub fn nested(mut self, name: impl Into<String>, imports: Imports) -> Self {
        self.entries
            .insert(name.into(), ImportValue::Nested(imports));
        self
    }

    /// Adds an arbitrary entry. Useful for placing a [`MemorySpec`]
    /// under the fallback `__memory` key.
    pub fn value(mut self, name: impl Into<String>, value: ImportValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// Supplies an imported memory with the given minimum page count;
    /// sugar for writing a [`MemorySpec`] under the reserved `memory`
    /// key. The module then imports `env.memory` instead of declaring
    /// its own.
    pub fn with_memory(self, pages: u32) -> Self {
        self.value("memory", ImportValue::Memory(MemorySpec { min_pages: pages }))
    }

    /// The supplied memory's minimum page count, read from the
    /// reserved keys: `memory` is promoted over `__memory` when both
    /// are present. Never below one page.
    pub fn memory_pages(&self) -> Option<u32> {
        for key in ["memory", "__memory"] {
            if let Some(ImportValue::Memory(spec)) = self.entries.get(key) {
                return Some(spec.min_pages.max(1));
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattens nested mappings into dot-joined keys. The reserved
    /// plumbing keys are skipped at the top level only; nested names
    /// like `physics.memory` are ordinary host functions.
    pub fn flatten(&self) -> IndexMap<String, HostFunc> {
        let mut flat = IndexMap::new();
        for (key, value) in &self.entries {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match value {
                ImportValue::Func(func) => {
                    flat.insert(key.clone(), func.clone());
                }
                ImportValue::Nested(nested) => nested.flatten_into(key, &mut flat),
                ImportValue::Memory(_) => {}
            }
        }
        flat
    }

    fn flatten_into(&self, prefix: &str, flat: &mut IndexMap<String, HostFunc>) {
        for (key, value) in &self.entries {
            let name = format!("{prefix}.{key}");
            match value {
                ImportValue::Func(func) => {
                    flat.insert(name, func.clone());
                }
                ImportValue::Nested(nested) => nested.flatten_into(&name, flat),
                // A memory below the top level is not a callable and
                // not plumbing; there is nothing to bind.
                ImportValue::Memory(_) => {}
            }
        }
    }

    /// The signature view the code generator needs (name to arity).
    pub fn host_sigs(&self) -> HostSigs {
        self.flatten()
            .into_iter()
            .map(|(name, func)| (name, func.arity()))
            .collect()
    }

    /// Merges `other` into `self`; `other`'s entries win on conflicts.
    /// A memory supplied by either side rides along under its reserved
    /// key.
    pub fn merge(mut self, other: Imports) -> Self {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
        self
    }
}
