//! Layout offset computation.
//!
//! A layout is a named record whose fields live in linear memory at
//! statically known offsets. Packed layouts use no padding (alignment
//! 1). Non-packed layouts align each field to `min(field_size, 8)` and
//! take the maximum field alignment as the record alignment; the record
//! size is the end of the last field rounded up to the record
//! alignment.
//!
//! In source, `Name.field` resolves to the field offset and the
//! pseudo-fields `Name.__size` / `Name.__align` to the record size and
//! alignment.

use atra_lex::ValType;
use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::{FieldType, LayoutDecl, Program};

/// Error raised while computing layout offsets.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("duplicate layout `{0}`")]
    DuplicateLayout(String),

    #[error("duplicate field `{field}` in layout `{layout}`")]
    DuplicateField { layout: String, field: String },

    /// Layouts may embed other layouts, but only ones declared earlier.
    #[error("unknown layout `{referenced}` in layout `{layout}`")]
    UnknownLayout { layout: String, referenced: String },

    #[error("layout `{layout}` field `{field}` has zero-size array")]
    ZeroSizeArray { layout: String, field: String },
}

/// One resolved field of a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMeta {
    /// Scalar or vector field.
    Scalar { offset: u32, ty: ValType },
    /// Embedded record field.
    Record {
        offset: u32,
        layout: String,
        size: u32,
    },
    /// Fixed-size array field; descriptors carry offset, element count,
    /// and element size.
    Array {
        offset: u32,
        elem: ValType,
        count: u32,
        elem_size: u32,
    },
}

impl FieldMeta {
    /// The field's offset from the start of the record.
    pub fn offset(&self) -> u32 {
        match self {
            FieldMeta::Scalar { offset, .. }
            | FieldMeta::Record { offset, .. }
            | FieldMeta::Array { offset, .. } => *offset,
        }
    }

    /// The loadable value type of the field, if it has one.
    pub fn scalar_ty(&self) -> Option<ValType> {
        match self {
            FieldMeta::Scalar { ty, .. } => Some(*ty),
            _ => None,
        }
    }
}

/// A resolved layout: size, alignment, and per-field metadata in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMeta {
    pub size: u32,
    pub align: u32,
    pub packed: bool,
    pub fields: IndexMap<String, FieldMeta>,
}

impl LayoutMeta {
    /// Resolve a field or pseudo-field to its integer value, the way
    /// `Name.field` / `Name.__size` / `Name.__align` read in source.
    pub fn constant(&self, field: &str) -> Option<u32> {
        match field {
            "__size" => Some(self.size),
            "__align" => Some(self.align),
            _ => self.fields.get(field).map(|f| f.offset()),
        }
    }
}

/// All layouts of a program, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutTable {
    layouts: IndexMap<String, LayoutMeta>,
}

impl LayoutTable {
    /// Computes offsets for every layout declared in `program`.
    /// Declaration order matters: a layout may embed only layouts
    /// declared before it.
    pub fn compute(program: &Program) -> Result<LayoutTable, LayoutError> {
        let mut table = LayoutTable::default();
        for decl in program.layouts() {
            let meta = table.resolve(decl)?;
            if table.layouts.insert(decl.name.clone(), meta).is_some() {
                return Err(LayoutError::DuplicateLayout(decl.name.clone()));
            }
        }
        Ok(table)
    }

    /// Look up a layout by name.
    pub fn get(&self, name: &str) -> Option<&LayoutMeta> {
        self.layouts.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Iterate layouts in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LayoutMeta)> {
        self.layouts.iter()
    }

    fn resolve(&self, decl: &LayoutDecl) -> Result<LayoutMeta, LayoutError> {
        let mut fields: IndexMap<String, FieldMeta> = IndexMap::new();
        let mut cursor = 0u32;
        let mut record_align = 1u32;

        for field in &decl.fields {
            let (size, meta_for) = match &field.ty {
                FieldType::Prim(ty) => {
                    let size = ty.size();
                    (size, FieldKind::Scalar(*ty))
                }
                FieldType::Layout(name) => {
                    let inner = self.layouts.get(name).ok_or_else(|| {
                        LayoutError::UnknownLayout {
                            layout: decl.name.clone(),
                            referenced: name.clone(),
                        }
                    })?;
                    (inner.size, FieldKind::Record(name.clone()))
                }
                FieldType::Array(elem, count) => {
                    if *count == 0 {
                        return Err(LayoutError::ZeroSizeArray {
                            layout: decl.name.clone(),
                            field: field.name.clone(),
                        });
                    }
                    (elem.size() * count, FieldKind::Array(*elem, *count))
                }
            };

            let align = if decl.packed { 1 } else { size.min(8).max(1) };
            record_align = record_align.max(align);
            let offset = align_up(cursor, align);
            cursor = offset + size;

            let meta = match meta_for {
                FieldKind::Scalar(ty) => FieldMeta::Scalar { offset, ty },
                FieldKind::Record(layout) => FieldMeta::Record {
                    offset,
                    layout,
                    size,
                },
                FieldKind::Array(elem, count) => FieldMeta::Array {
                    offset,
                    elem,
                    count,
                    elem_size: elem.size(),
                },
            };

            if fields.insert(field.name.clone(), meta).is_some() {
                return Err(LayoutError::DuplicateField {
                    layout: decl.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(LayoutMeta {
            size: align_up(cursor, record_align),
            align: record_align,
            packed: decl.packed,
            fields,
        })
    }
}

enum FieldKind {
    Scalar(ValType),
    Record(String),
    Array(ValType, u32),
}

fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn table(source: &str) -> LayoutTable {
        LayoutTable::compute(&parse(source).unwrap()).unwrap()
    }

    #[test]
    fn test_basic_offsets() {
        let table = table("layout Rec id: i32 value: f64 end layout");
        let rec = table.get("Rec").unwrap();
        assert_eq!(rec.constant("id"), Some(0));
        assert_eq!(rec.constant("value"), Some(8));
        assert_eq!(rec.constant("__size"), Some(16));
        assert_eq!(rec.constant("__align"), Some(8));
    }

    #[test]
    fn test_packed_offsets() {
        let table = table("layout packed Rec id: i32 value: f64 end layout");
        let rec = table.get("Rec").unwrap();
        assert_eq!(rec.constant("id"), Some(0));
        assert_eq!(rec.constant("value"), Some(4));
        assert_eq!(rec.constant("__size"), Some(12));
        assert_eq!(rec.constant("__align"), Some(1));
    }

    #[test]
    fn test_braces_are_tolerated() {
        // Braces are skipped by the lexer, so this C-flavored spelling
        // lexes to the same declaration.
        let table = table("layout Rec { id: i32; value: f64; end }");
        let rec = table.get("Rec").unwrap();
        assert_eq!(rec.constant("id"), Some(0));
        assert_eq!(rec.constant("value"), Some(8));
    }

    #[test]
    fn test_array_field_descriptor() {
        let table = table("layout Buf n: i32 data: f64[4] end");
        let buf = table.get("Buf").unwrap();
        match buf.fields.get("data").unwrap() {
            FieldMeta::Array {
                offset,
                count,
                elem_size,
                ..
            } => {
                assert_eq!(*offset, 8);
                assert_eq!(*count, 4);
                assert_eq!(*elem_size, 8);
            }
            other => panic!("expected array field, got {:?}", other),
        }
        assert_eq!(buf.size, 40);
    }

    #[test]
    fn test_nested_layout() {
        let table = table(
            "layout Inner a: i32 end layout \
             layout Outer pre: i32 inner: Inner end layout",
        );
        let outer = table.get("Outer").unwrap();
        assert_eq!(outer.constant("inner"), Some(4));
        assert_eq!(outer.size, 8);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let program = parse(
            "layout Outer inner: Inner end layout \
             layout Inner a: i32 end layout",
        )
        .unwrap();
        let err = LayoutTable::compute(&program).unwrap_err();
        assert!(matches!(err, LayoutError::UnknownLayout { .. }));
    }

    #[test]
    fn test_vector_field_alignment() {
        // v128 fields are 16 bytes but alignment caps at 8.
        let table = table("layout V tag: i32 v: f64x2 end");
        let v = table.get("V").unwrap();
        assert_eq!(v.constant("v"), Some(8));
        assert_eq!(v.constant("__align"), Some(8));
        assert_eq!(v.constant("__size"), Some(24));
    }
}
