//! The instantiated-module wrapper.
//!
//! Exports are callable by their flat source name; names containing
//! dots are additionally reassembled into a nested tree, so
//! `physics.gravity` is reachable both as the flat string and as
//! `physics -> gravity` in the tree. The table-slot map and the layout
//! metadata from the parse ride along.

use atra_par::LayoutTable;
use indexmap::IndexMap;
use wasmi::core::ValType;
use wasmi::Val;

use crate::error::{Result, RtError};

/// A scalar value crossing the host boundary. Vector values never
/// cross: they are produced and consumed inside the module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The value widened to f64.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::I32(v) => *v as f64,
            Value::I64(v) => *v as f64,
            Value::F32(v) => *v as f64,
            Value::F64(v) => *v,
        }
    }

    fn to_val(self) -> Val {
        match self {
            Value::I32(v) => Val::I32(v),
            Value::I64(v) => Val::I64(v),
            Value::F32(v) => Val::F32(v.into()),
            Value::F64(v) => Val::F64(v.into()),
        }
    }

    fn from_val(val: &Val) -> Option<Value> {
        Some(match val {
            Val::I32(v) => Value::I32(*v),
            Val::I64(v) => Value::I64(*v),
            Val::F32(v) => Value::F32(f32::from(*v)),
            Val::F64(v) => Value::F64(f64::from(*v)),
            _ => return None,
        })
    }

    /// An f64 argument narrowed to the declared parameter type.
    fn f64_as(ty: &ValType, x: f64) -> Option<Val> {
        Some(match ty {
            ValType::I32 => Val::I32(x as i32),
            ValType::I64 => Val::I64(x as i64),
            ValType::F32 => Val::F32((x as f32).into()),
            ValType::F64 => Val::F64(x.into()),
            _ => return None,
        })
    }

    fn zero(ty: &ValType) -> Option<Val> {
        Self::f64_as(ty, 0.0)
    }
}

/// Dotted export names reassembled into a tree. Leaves carry the flat
/// export name, which is what `Instance::call` takes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportTree {
    Leaf(String),
    Node(IndexMap<String, ExportTree>),
}

impl ExportTree {
    /// Builds the tree from flat export names.
    pub fn build(names: impl IntoIterator<Item = String>) -> ExportTree {
        let mut root = IndexMap::new();
        for name in names {
            insert_path(&mut root, &name);
        }
        ExportTree::Node(root)
    }

    /// Looks up a child of a tree node.
    pub fn get(&self, key: &str) -> Option<&ExportTree> {
        match self {
            ExportTree::Node(children) => children.get(key),
            ExportTree::Leaf(_) => None,
        }
    }

    /// The flat export name of a leaf.
    pub fn flat_name(&self) -> Option<&str> {
        match self {
            ExportTree::Leaf(name) => Some(name),
            ExportTree::Node(_) => None,
        }
    }
}

fn insert_path(node: &mut IndexMap<String, ExportTree>, name: &str) {
    let mut current = node;
    let segments: Vec<&str> = name.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if i + 1 == segments.len() {
            current.insert(segment.to_string(), ExportTree::Leaf(name.to_string()));
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| ExportTree::Node(IndexMap::new()));
        if let ExportTree::Leaf(_) = entry {
            *entry = ExportTree::Node(IndexMap::new());
        }
        let ExportTree::Node(children) = entry else {
            unreachable!("leaf replaced above");
        };
        current = children;
    }
}

/// A compiled and instantiated module together with its table-slot map
/// and layout metadata.
pub struct Instance {
    store: wasmi::Store<()>,
    instance: wasmi::Instance,
    /// The memory we created for an `env.memory` import, if any.
    imported_memory: Option<wasmi::Memory>,
    table: Option<IndexMap<String, u32>>,
    layouts: LayoutTable,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").finish_non_exhaustive()
    }
}

impl Instance {
    pub(crate) fn new(
        store: wasmi::Store<()>,
        instance: wasmi::Instance,
        imported_memory: Option<wasmi::Memory>,
        table: Option<IndexMap<String, u32>>,
        layouts: LayoutTable,
    ) -> Self {
        Self {
            store,
            instance,
            imported_memory,
            table,
            layouts,
        }
    }

    /// Calls an export by its flat name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>> {
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| RtError::UnknownExport(name.to_string()))?;
        let ty = func.ty(&self.store);

        if ty.params().len() != args.len() {
            return Err(RtError::CallArity {
                name: name.to_string(),
                expected: ty.params().len(),
                found: args.len(),
            });
        }

        let call_args: Vec<Val> = args.iter().map(|a| a.to_val()).collect();
        let mut results: Vec<Val> = ty
            .results()
            .iter()
            .map(Value::zero)
            .collect::<Option<_>>()
            .ok_or_else(|| RtError::UnsupportedHostType(name.to_string()))?;

        func.call(&mut self.store, &call_args, &mut results)?;

        match results.first() {
            None => Ok(None),
            Some(val) => Value::from_val(val)
                .map(Some)
                .ok_or_else(|| RtError::UnsupportedHostType(name.to_string())),
        }
    }

    /// Calls an export with f64 arguments narrowed to the declared
    /// parameter types; the result widens back to f64 (0.0 for a
    /// subroutine).
    pub fn call_f64(&mut self, name: &str, args: &[f64]) -> Result<f64> {
        let func = self
            .instance
            .get_func(&self.store, name)
            .ok_or_else(|| RtError::UnknownExport(name.to_string()))?;
        let ty = func.ty(&self.store);

        if ty.params().len() != args.len() {
            return Err(RtError::CallArity {
                name: name.to_string(),
                expected: ty.params().len(),
                found: args.len(),
            });
        }

        let call_args: Vec<Val> = ty
            .params()
            .iter()
            .zip(args)
            .map(|(ty, &x)| Value::f64_as(ty, x))
            .collect::<Option<_>>()
            .ok_or_else(|| RtError::UnsupportedHostType(name.to_string()))?;
        let mut results: Vec<Val> = ty
            .results()
            .iter()
            .map(Value::zero)
            .collect::<Option<_>>()
            .ok_or_else(|| RtError::UnsupportedHostType(name.to_string()))?;

        func.call(&mut self.store, &call_args, &mut results)?;

        Ok(results
            .first()
            .and_then(Value::from_val)
            .map(|v| v.as_f64())
            .unwrap_or(0.0))
    }

    /// Flat export names, in module order.
    pub fn export_names(&self) -> Vec<String> {
        self.instance
            .exports(&self.store)
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Dotted export names reassembled into a nested tree.
    pub fn export_tree(&self) -> ExportTree {
        ExportTree::build(self.export_names())
    }

    /// The table-slot map, when the module produced a funcref table.
    pub fn table_map(&self) -> Option<&IndexMap<String, u32>> {
        self.table.as_ref()
    }

    /// Layout metadata computed by the parser: field offsets plus the
    /// `__size`/`__align` pseudo-fields.
    pub fn layouts(&self) -> &LayoutTable {
        &self.layouts
    }

    /// The module's linear memory: the caller-supplied one when it was
    /// imported, the exported `"memory"` otherwise.
    pub fn memory(&self) -> Result<wasmi::Memory> {
        if let Some(memory) = self.imported_memory {
            return Ok(memory);
        }
        self.instance
            .get_memory(&self.store, "memory")
            .ok_or(RtError::NoMemory)
    }

    pub fn write_memory(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let memory = self.memory()?;
        memory
            .write(&mut self.store, offset, bytes)
            .map_err(|e| RtError::MemoryAccess(e.to_string()))
    }

    pub fn read_memory(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let memory = self.memory()?;
        memory
            .read(&self.store, offset, buf)
            .map_err(|e| RtError::MemoryAccess(e.to_string()))
    }

    /// Writes f64 values at `offset` in little-endian order.
    pub fn write_f64s(&mut self, offset: usize, values: &[f64]) -> Result<()> {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.write_memory(offset, &bytes)
    }

    /// Reads one f64 at `offset`.
    pub fn read_f64(&self, offset: usize) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_memory(offset, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}
