//! Wasm opcode constants, type codes, section ids, and the SIMD
//! sub-opcode map.
//!
//! SIMD instructions are encoded as the `0xfd` prefix followed by an
//! unsigned-LEB sub-opcode; the misc prefix `0xfc` carries the
//! saturating truncations and bulk-memory operations.

use atra_lex::ValType;

// Section ids, in the order sections must be emitted.
pub const SEC_TYPE: u8 = 1;
pub const SEC_IMPORT: u8 = 2;
pub const SEC_FUNCTION: u8 = 3;
pub const SEC_TABLE: u8 = 4;
pub const SEC_MEMORY: u8 = 5;
pub const SEC_GLOBAL: u8 = 6;
pub const SEC_EXPORT: u8 = 7;
pub const SEC_ELEMENT: u8 = 9;
pub const SEC_CODE: u8 = 10;

// Type codes.
pub const TYPE_I32: u8 = 0x7f;
pub const TYPE_I64: u8 = 0x7e;
pub const TYPE_F32: u8 = 0x7d;
pub const TYPE_F64: u8 = 0x7c;
pub const TYPE_V128: u8 = 0x7b;
pub const TYPE_FUNCREF: u8 = 0x70;
pub const TYPE_FUNC: u8 = 0x60;
/// Block type for blocks producing no value.
pub const BLOCK_VOID: u8 = 0x40;

/// The single-byte wasm type code for a value type.
pub fn type_code(ty: ValType) -> u8 {
    match ty {
        ValType::I32 => TYPE_I32,
        ValType::I64 => TYPE_I64,
        ValType::F32 => TYPE_F32,
        ValType::F64 => TYPE_F64,
        _ => TYPE_V128,
    }
}

// Import/export kinds.
pub const KIND_FUNC: u8 = 0x00;
pub const KIND_MEMORY: u8 = 0x02;

// Control.
pub const BLOCK: u8 = 0x02;
pub const LOOP: u8 = 0x03;
pub const IF: u8 = 0x04;
pub const ELSE: u8 = 0x05;
pub const END: u8 = 0x0b;
pub const BR: u8 = 0x0c;
pub const BR_IF: u8 = 0x0d;
pub const RETURN: u8 = 0x0f;
pub const CALL: u8 = 0x10;
pub const CALL_INDIRECT: u8 = 0x11;
pub const RETURN_CALL: u8 = 0x12;
pub const RETURN_CALL_INDIRECT: u8 = 0x13;
pub const DROP: u8 = 0x1a;
pub const SELECT: u8 = 0x1b;

// Variables.
pub const LOCAL_GET: u8 = 0x20;
pub const LOCAL_SET: u8 = 0x21;
pub const LOCAL_TEE: u8 = 0x22;
pub const GLOBAL_GET: u8 = 0x23;
pub const GLOBAL_SET: u8 = 0x24;

// Memory.
pub const I32_LOAD: u8 = 0x28;
pub const I64_LOAD: u8 = 0x29;
pub const F32_LOAD: u8 = 0x2a;
pub const F64_LOAD: u8 = 0x2b;
pub const I32_STORE: u8 = 0x36;
pub const I64_STORE: u8 = 0x37;
pub const F32_STORE: u8 = 0x38;
pub const F64_STORE: u8 = 0x39;
pub const MEMORY_SIZE: u8 = 0x3f;
pub const MEMORY_GROW: u8 = 0x40;

// Constants.
pub const I32_CONST: u8 = 0x41;
pub const I64_CONST: u8 = 0x42;
pub const F32_CONST: u8 = 0x43;
pub const F64_CONST: u8 = 0x44;

// i32 comparisons.
pub const I32_EQZ: u8 = 0x45;
pub const I32_EQ: u8 = 0x46;
pub const I32_NE: u8 = 0x47;
pub const I32_LT_S: u8 = 0x48;
pub const I32_LT_U: u8 = 0x49;
pub const I32_GT_S: u8 = 0x4a;
pub const I32_GT_U: u8 = 0x4b;
pub const I32_LE_S: u8 = 0x4c;
pub const I32_LE_U: u8 = 0x4d;
pub const I32_GE_S: u8 = 0x4e;
pub const I32_GE_U: u8 = 0x4f;

// i64 comparisons.
pub const I64_EQZ: u8 = 0x50;
pub const I64_EQ: u8 = 0x51;
pub const I64_NE: u8 = 0x52;
pub const I64_LT_S: u8 = 0x53;
pub const I64_LT_U: u8 = 0x54;
pub const I64_GT_S: u8 = 0x55;
pub const I64_GT_U: u8 = 0x56;
pub const I64_LE_S: u8 = 0x57;
pub const I64_LE_U: u8 = 0x58;
pub const I64_GE_S: u8 = 0x59;
pub const I64_GE_U: u8 = 0x5a;

// f32 comparisons.
pub const F32_EQ: u8 = 0x5b;
pub const F32_NE: u8 = 0x5c;
pub const F32_LT: u8 = 0x5d;
pub const F32_GT: u8 = 0x5e;
pub const F32_LE: u8 = 0x5f;
pub const F32_GE: u8 = 0x60;

// f64 comparisons.
pub const F64_EQ: u8 = 0x61;
pub const F64_NE: u8 = 0x62;
pub const F64_LT: u8 = 0x63;
pub const F64_GT: u8 = 0x64;
pub const F64_LE: u8 = 0x65;
pub const F64_GE: u8 = 0x66;

// i32 arithmetic.
pub const I32_CLZ: u8 = 0x67;
pub const I32_CTZ: u8 = 0x68;
pub const I32_POPCNT: u8 = 0x69;
pub const I32_ADD: u8 = 0x6a;
pub const I32_SUB: u8 = 0x6b;
pub const I32_MUL: u8 = 0x6c;
pub const I32_DIV_S: u8 = 0x6d;
pub const I32_DIV_U: u8 = 0x6e;
pub const I32_REM_S: u8 = 0x6f;
pub const I32_REM_U: u8 = 0x70;
pub const I32_AND: u8 = 0x71;
pub const I32_OR: u8 = 0x72;
pub const I32_XOR: u8 = 0x73;
pub const I32_SHL: u8 = 0x74;
pub const I32_SHR_S: u8 = 0x75;
pub const I32_SHR_U: u8 = 0x76;
pub const I32_ROTL: u8 = 0x77;
pub const I32_ROTR: u8 = 0x78;

// i64 arithmetic.
pub const I64_CLZ: u8 = 0x79;
pub const I64_CTZ: u8 = 0x7a;
pub const I64_POPCNT: u8 = 0x7b;
pub const I64_ADD: u8 = 0x7c;
pub const I64_SUB: u8 = 0x7d;
pub const I64_MUL: u8 = 0x7e;
pub const I64_DIV_S: u8 = 0x7f;
pub const I64_DIV_U: u8 = 0x80;
pub const I64_REM_S: u8 = 0x81;
pub const I64_REM_U: u8 = 0x82;
pub const I64_AND: u8 = 0x83;
pub const I64_OR: u8 = 0x84;
pub const I64_XOR: u8 = 0x85;
pub const I64_SHL: u8 = 0x86;
pub const I64_SHR_S: u8 = 0x87;
pub const I64_SHR_U: u8 = 0x88;
pub const I64_ROTL: u8 = 0x89;
pub const I64_ROTR: u8 = 0x8a;

// f32 arithmetic.
pub const F32_ABS: u8 = 0x8b;
pub const F32_NEG: u8 = 0x8c;
pub const F32_CEIL: u8 = 0x8d;
pub const F32_FLOOR: u8 = 0x8e;
pub const F32_TRUNC: u8 = 0x8f;
pub const F32_NEAREST: u8 = 0x90;
pub const F32_SQRT: u8 = 0x91;
pub const F32_ADD: u8 = 0x92;
pub const F32_SUB: u8 = 0x93;
pub const F32_MUL: u8 = 0x94;
pub const F32_DIV: u8 = 0x95;
pub const F32_MIN: u8 = 0x96;
pub const F32_MAX: u8 = 0x97;
pub const F32_COPYSIGN: u8 = 0x98;

// f64 arithmetic.
pub const F64_ABS: u8 = 0x99;
pub const F64_NEG: u8 = 0x9a;
pub const F64_CEIL: u8 = 0x9b;
pub const F64_FLOOR: u8 = 0x9c;
pub const F64_TRUNC: u8 = 0x9d;
pub const F64_NEAREST: u8 = 0x9e;
pub const F64_SQRT: u8 = 0x9f;
pub const F64_ADD: u8 = 0xa0;
pub const F64_SUB: u8 = 0xa1;
pub const F64_MUL: u8 = 0xa2;
pub const F64_DIV: u8 = 0xa3;
pub const F64_MIN: u8 = 0xa4;
pub const F64_MAX: u8 = 0xa5;
pub const F64_COPYSIGN: u8 = 0xa6;

// Conversions.
pub const I32_WRAP_I64: u8 = 0xa7;
pub const I32_TRUNC_F32_S: u8 = 0xa8;
pub const I32_TRUNC_F32_U: u8 = 0xa9;
pub const I32_TRUNC_F64_S: u8 = 0xaa;
pub const I32_TRUNC_F64_U: u8 = 0xab;
pub const I64_EXTEND_I32_S: u8 = 0xac;
pub const I64_EXTEND_I32_U: u8 = 0xad;
pub const I64_TRUNC_F32_S: u8 = 0xae;
pub const I64_TRUNC_F32_U: u8 = 0xaf;
pub const I64_TRUNC_F64_S: u8 = 0xb0;
pub const I64_TRUNC_F64_U: u8 = 0xb1;
pub const F32_CONVERT_I32_S: u8 = 0xb2;
pub const F32_CONVERT_I32_U: u8 = 0xb3;
pub const F32_CONVERT_I64_S: u8 = 0xb4;
pub const F32_CONVERT_I64_U: u8 = 0xb5;
pub const F32_DEMOTE_F64: u8 = 0xb6;
pub const F64_CONVERT_I32_S: u8 = 0xb7;
pub const F64_CONVERT_I32_U: u8 = 0xb8;
pub const F64_CONVERT_I64_S: u8 = 0xb9;
pub const F64_CONVERT_I64_U: u8 = 0xba;
pub const F64_PROMOTE_F32: u8 = 0xbb;
pub const I32_REINTERPRET_F32: u8 = 0xbc;
pub const I64_REINTERPRET_F64: u8 = 0xbd;
pub const F32_REINTERPRET_I32: u8 = 0xbe;
pub const F64_REINTERPRET_I64: u8 = 0xbf;

// Sign extensions.
pub const I32_EXTEND8_S: u8 = 0xc0;
pub const I32_EXTEND16_S: u8 = 0xc1;
pub const I64_EXTEND8_S: u8 = 0xc2;
pub const I64_EXTEND16_S: u8 = 0xc3;
pub const I64_EXTEND32_S: u8 = 0xc4;

// Prefixes.
pub const MISC_PREFIX: u8 = 0xfc;
pub const SIMD_PREFIX: u8 = 0xfd;

// Misc (0xfc) sub-opcodes.
pub const MISC_I32_TRUNC_SAT_F32_S: u32 = 0;
pub const MISC_I32_TRUNC_SAT_F32_U: u32 = 1;
pub const MISC_I32_TRUNC_SAT_F64_S: u32 = 2;
pub const MISC_I32_TRUNC_SAT_F64_U: u32 = 3;
pub const MISC_I64_TRUNC_SAT_F32_S: u32 = 4;
pub const MISC_I64_TRUNC_SAT_F32_U: u32 = 5;
pub const MISC_I64_TRUNC_SAT_F64_S: u32 = 6;
pub const MISC_I64_TRUNC_SAT_F64_U: u32 = 7;
pub const MISC_MEMORY_COPY: u32 = 10;
pub const MISC_MEMORY_FILL: u32 = 11;

/// SIMD (0xfd) sub-opcodes, keyed by the dotted source-level name. This
/// is the opcode map shared by the code generator and the builtin
/// expander; only operations reachable from the language surface are
/// listed.
pub const SIMD_OPCODES: &[(&str, u32)] = &[
    ("v128.load", 0),
    ("v128.store", 11),
    ("v128.const", 12),
    ("i32x4.splat", 17),
    ("i64x2.splat", 18),
    ("f32x4.splat", 19),
    ("f64x2.splat", 20),
    ("i32x4.extract_lane", 27),
    ("i32x4.replace_lane", 28),
    ("i64x2.extract_lane", 29),
    ("i64x2.replace_lane", 30),
    ("f32x4.extract_lane", 31),
    ("f32x4.replace_lane", 32),
    ("f64x2.extract_lane", 33),
    ("f64x2.replace_lane", 34),
    ("i32x4.eq", 55),
    ("i32x4.ne", 56),
    ("i32x4.lt_s", 57),
    ("i32x4.gt_s", 59),
    ("i32x4.le_s", 61),
    ("i32x4.ge_s", 63),
    ("f32x4.eq", 65),
    ("f32x4.ne", 66),
    ("f32x4.lt", 67),
    ("f32x4.gt", 68),
    ("f32x4.le", 69),
    ("f32x4.ge", 70),
    ("f64x2.eq", 71),
    ("f64x2.ne", 72),
    ("f64x2.lt", 73),
    ("f64x2.gt", 74),
    ("f64x2.le", 75),
    ("f64x2.ge", 76),
    ("v128.not", 77),
    ("v128.and", 78),
    ("v128.or", 80),
    ("v128.xor", 81),
    ("v128.bitselect", 82),
    ("v128.any_true", 83),
    ("i32x4.abs", 160),
    ("i32x4.neg", 161),
    ("i32x4.all_true", 163),
    ("i32x4.add", 174),
    ("i32x4.sub", 177),
    ("i32x4.mul", 181),
    ("i32x4.min_s", 182),
    ("i32x4.max_s", 184),
    ("i64x2.abs", 192),
    ("i64x2.neg", 193),
    ("i64x2.all_true", 195),
    ("i64x2.add", 206),
    ("i64x2.sub", 209),
    ("i64x2.mul", 213),
    ("i64x2.eq", 214),
    ("i64x2.ne", 215),
    ("i64x2.lt_s", 216),
    ("i64x2.gt_s", 217),
    ("i64x2.le_s", 218),
    ("i64x2.ge_s", 219),
    ("f32x4.abs", 224),
    ("f32x4.neg", 225),
    ("f32x4.sqrt", 227),
    ("f32x4.add", 228),
    ("f32x4.sub", 229),
    ("f32x4.mul", 230),
    ("f32x4.div", 231),
    ("f32x4.min", 232),
    ("f32x4.max", 233),
    ("f64x2.abs", 236),
    ("f64x2.neg", 237),
    ("f64x2.sqrt", 239),
    ("f64x2.add", 240),
    ("f64x2.sub", 241),
    ("f64x2.mul", 242),
    ("f64x2.div", 243),
    ("f64x2.min", 244),
    ("f64x2.max", 245),
];

/// Looks up a SIMD sub-opcode by its dotted name (e.g. `f64x2.add`).
pub fn simd_opcode(name: &str) -> Option<u32> {
    SIMD_OPCODES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

/// The load opcode and alignment exponent for a value type.
pub fn load_op(ty: ValType) -> (Option<u8>, u32) {
    match ty {
        ValType::I32 => (Some(I32_LOAD), 2),
        ValType::I64 => (Some(I64_LOAD), 3),
        ValType::F32 => (Some(F32_LOAD), 2),
        ValType::F64 => (Some(F64_LOAD), 3),
        // Vector loads go through the SIMD prefix.
        _ => (None, 4),
    }
}

/// The store opcode and alignment exponent for a value type.
pub fn store_op(ty: ValType) -> (Option<u8>, u32) {
    match ty {
        ValType::I32 => (Some(I32_STORE), 2),
        ValType::I64 => (Some(I64_STORE), 3),
        ValType::F32 => (Some(F32_STORE), 2),
        ValType::F64 => (Some(F64_STORE), 3),
        _ => (None, 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simd_map_lookup() {
        assert_eq!(simd_opcode("f64x2.add"), Some(240));
        assert_eq!(simd_opcode("f64x2.extract_lane"), Some(33));
        assert_eq!(simd_opcode("i32x4.mul"), Some(181));
        assert_eq!(simd_opcode("f64x2.madd"), None);
    }

    #[test]
    fn test_simd_map_has_no_duplicates() {
        for (i, (name, _)) in SIMD_OPCODES.iter().enumerate() {
            assert!(
                !SIMD_OPCODES[i + 1..].iter().any(|(n, _)| n == name),
                "duplicate simd entry {name}"
            );
        }
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(type_code(ValType::I32), 0x7f);
        assert_eq!(type_code(ValType::I64), 0x7e);
        assert_eq!(type_code(ValType::F32), 0x7d);
        assert_eq!(type_code(ValType::F64), 0x7c);
        assert_eq!(type_code(ValType::F64x2), 0x7b);
        assert_eq!(type_code(ValType::I32x4), 0x7b);
    }
}
