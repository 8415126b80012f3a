//! Code generator integration tests: section layout, index spaces,
//! auto-imports, and the semantic error surface.

use atra_gen::{generate, generate_with, GenError, GenOptions, HostSigs, MAGIC, VERSION};
use atra_par::parse;

fn compile(source: &str) -> atra_gen::Output {
    generate(&parse(source).expect("parse")).expect("generate")
}

fn compile_err(source: &str) -> GenError {
    generate(&parse(source).expect("parse")).expect_err("expected generation failure")
}

/// Walks the emitted binary into (section id, content) pairs.
fn sections(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    assert_eq!(&bytes[0..4], &MAGIC);
    assert_eq!(&bytes[4..8], &VERSION);
    let mut out = Vec::new();
    let mut pos = 8;
    while pos < bytes.len() {
        let id = bytes[pos];
        pos += 1;
        let mut cursor = std::io::Cursor::new(&bytes[pos..]);
        let len = leb128::read::unsigned(&mut cursor).unwrap() as usize;
        pos += cursor.position() as usize;
        out.push((id, bytes[pos..pos + len].to_vec()));
        pos += len;
    }
    out
}

fn section(bytes: &[u8], id: u8) -> Option<Vec<u8>> {
    sections(bytes)
        .into_iter()
        .find(|(sid, _)| *sid == id)
        .map(|(_, content)| content)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn uleb(&mut self) -> u64 {
        let mut cursor = std::io::Cursor::new(&self.bytes[self.pos..]);
        let value = leb128::read::unsigned(&mut cursor).unwrap();
        self.pos += cursor.position() as usize;
        value
    }

    fn byte(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        b
    }

    fn name(&mut self) -> String {
        let len = self.uleb() as usize;
        let s = String::from_utf8(self.bytes[self.pos..self.pos + len].to_vec()).unwrap();
        self.pos += len;
        s
    }
}

/// Export-section entries as (name, kind, index).
fn exports(bytes: &[u8]) -> Vec<(String, u8, u32)> {
    let content = section(bytes, 7).expect("export section");
    let mut r = Reader::new(&content);
    let count = r.uleb();
    (0..count)
        .map(|_| {
            let name = r.name();
            let kind = r.byte();
            let index = r.uleb() as u32;
            (name, kind, index)
        })
        .collect()
}

/// Import-section entries as (module, field).
fn imports(bytes: &[u8]) -> Vec<(String, String)> {
    let Some(content) = section(bytes, 2) else {
        return Vec::new();
    };
    let mut r = Reader::new(&content);
    let count = r.uleb();
    (0..count)
        .map(|_| {
            let module = r.name();
            let field = r.name();
            let kind = r.byte();
            match kind {
                0x00 => {
                    r.uleb();
                }
                0x02 => {
                    let flags = r.byte();
                    r.uleb();
                    if flags == 0x01 {
                        r.uleb();
                    }
                }
                other => panic!("unexpected import kind {other}"),
            }
            (module, field)
        })
        .collect()
}

const ADD: &str = "function add(a, b: f64): f64 begin add := a + b end";

const GCD: &str = "function gcd(a, b: i32): i32 begin \
    if (b == 0) then gcd := a else tailcall gcd(b, a mod b) end if end";

#[test]
fn test_header_and_validity() {
    let output = compile(ADD);
    assert_eq!(&output.bytes[0..8], b"\0asm\x01\0\0\0");
    wasmparser::Validator::new()
        .validate_all(&output.bytes)
        .expect("module should validate");
}

#[test]
fn test_section_order_strictly_increasing() {
    let source = "
        import host.tick(): f64
        var counter: i32 := 0
        function apply(f: function(f64): f64, x: f64): f64 begin apply := f(x) end
        function sum(arr: i32, n: i32): f64
            var s: f64, i: i32
        begin
            s := 0
            for i := 0, n s := s + arr[i] end for
            sum := s
        end
        function double(x: f64): f64 begin double := x * 2 end
        subroutine bump() begin counter += 1 end
    ";
    let output = compile(source);

    let ids: Vec<u8> = sections(&output.bytes).iter().map(|(id, _)| *id).collect();
    // Strictly increasing implies in id order and never twice.
    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1], "sections out of order: {ids:?}");
    }
    // This module exercises every section we emit.
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 9, 10]);

    // Cross-check with a conformant reader.
    let mut seen = Vec::new();
    for payload in wasmparser::Parser::new(0).parse_all(&output.bytes) {
        use wasmparser::Payload::*;
        match payload.expect("parse") {
            TypeSection(_) => seen.push(1u8),
            ImportSection(_) => seen.push(2),
            FunctionSection(_) => seen.push(3),
            TableSection(_) => seen.push(4),
            MemorySection(_) => seen.push(5),
            GlobalSection(_) => seen.push(6),
            ExportSection(_) => seen.push(7),
            ElementSection(_) => seen.push(9),
            CodeSectionStart { .. } => seen.push(10),
            _ => {}
        }
    }
    assert_eq!(seen, ids);
}

#[test]
fn test_signature_dedup() {
    let source = "
        function f(a, b: f64): f64 begin f := a end
        function g(a, b: f64): f64 begin g := b end
        function h(n: i32): i32 begin h := n end
    ";
    let output = compile(source);
    let content = section(&output.bytes, 1).expect("type section");
    let mut r = Reader::new(&content);
    // f and g share a signature; h has its own.
    assert_eq!(r.uleb(), 2);
}

#[test]
fn test_function_index_space() {
    let source = "
        function a(x: f64): f64 begin a := sin(x) end
        function b(x: f64): f64 begin b := cos(x) end
    ";
    let output = compile(source);

    // Two imports first (sin, cos in discovery order), then the two
    // local functions in source order.
    assert_eq!(
        imports(&output.bytes),
        vec![
            ("math".to_string(), "sin".to_string()),
            ("math".to_string(), "cos".to_string()),
        ]
    );
    let exports = exports(&output.bytes);
    assert_eq!(exports[0], ("a".to_string(), 0x00, 2));
    assert_eq!(exports[1], ("b".to_string(), 0x00, 3));
}

#[test]
fn test_pow_half_is_sqrt() {
    let output = compile("function f(x: f64): f64 begin f := x ** 0.5 end");
    // No pow import at all.
    assert!(imports(&output.bytes).is_empty());
    let code = section(&output.bytes, 10).expect("code section");
    assert!(code.contains(&0x9f), "expected f64.sqrt in body");
}

#[test]
fn test_pow_other_exponent_calls_pow() {
    let output = compile("function f(x: f64): f64 begin f := x ** 3 end");
    assert_eq!(
        imports(&output.bytes),
        vec![("math".to_string(), "pow".to_string())]
    );
}

#[test]
fn test_leading_dot_half_is_sqrt_too() {
    let output = compile("function f(x: f64): f64 begin f := x ** .5 end");
    assert!(imports(&output.bytes).is_empty());
}

#[test]
fn test_tailcall_emits_return_call() {
    let output = compile(GCD);
    let code = section(&output.bytes, 10).expect("code section");
    // return_call to function index 0.
    assert!(
        code.windows(2).any(|w| w == [0x12, 0x00]),
        "expected return_call in body"
    );
}

#[test]
fn test_tailcall_type_mismatch_fails() {
    let source = "
        function wide(n: i32): f64 begin wide := n end
        function narrow(n: i32): i32 begin tailcall wide(n) end
    ";
    let err = compile_err(source);
    assert!(matches!(err, GenError::TailCallTypeMismatch { .. }), "{err}");
}

#[test]
fn test_fortran_name_hidden_local() {
    let output = compile(ADD);
    let code = section(&output.bytes, 10).expect("code section");
    let mut r = Reader::new(&code);
    assert_eq!(r.uleb(), 1); // one body
    r.uleb(); // body size
    assert_eq!(r.uleb(), 1); // one local run: the hidden return slot
    assert_eq!(r.uleb(), 1);
    assert_eq!(r.byte(), 0x7c); // f64
}

#[test]
fn test_table_and_element_for_references() {
    let source = "
        function double(x: f64): f64 begin double := x * 2 end
        function pick(): i32 begin pick := @double end
    ";
    let output = compile(source);
    let table = output.table.expect("table map");
    assert_eq!(table.get("double"), Some(&0));
    assert_eq!(table.get("pick"), Some(&1));
    assert!(section(&output.bytes, 4).is_some(), "table section");
    assert!(section(&output.bytes, 9).is_some(), "element section");
}

#[test]
fn test_no_table_without_references() {
    let output = compile(ADD);
    assert!(output.table.is_none());
    assert!(section(&output.bytes, 4).is_none());
    assert!(section(&output.bytes, 9).is_none());
}

#[test]
fn test_auto_import_in_table_only_when_referenced() {
    let with_ref = compile(
        "function f(x: f64): f64 begin f := sin(x) end
         function g(): i32 begin g := @sin end",
    );
    let table = with_ref.table.expect("table map");
    // sin (index 0) precedes the local functions in slot order.
    assert_eq!(table.get("sin"), Some(&0));
    assert_eq!(table.get("f"), Some(&1));

    let without_ref = compile(
        "function f(x: f64): f64 begin f := sin(x) end
         function g(): i32 begin g := @f end",
    );
    let table = without_ref.table.expect("table map");
    assert!(!table.contains_key("sin"));
}

#[test]
fn test_memory_for_array_parameters() {
    let source = "function first(arr: array f64): f64 begin first := arr[0] end";
    let output = compile(source);
    assert!(section(&output.bytes, 5).is_some(), "memory section");
    assert!(exports(&output.bytes)
        .iter()
        .any(|(name, kind, _)| name == "memory" && *kind == 0x02));
}

#[test]
fn test_imported_memory_option() {
    let program = parse("function first(arr: array f64): f64 begin first := arr[0] end").unwrap();
    let options = GenOptions {
        import_memory: true,
        ..Default::default()
    };
    let output = generate_with(&program, &options).unwrap();
    assert!(section(&output.bytes, 5).is_none(), "no own memory");
    assert_eq!(
        imports(&output.bytes),
        vec![("env".to_string(), "memory".to_string())]
    );
    assert!(!exports(&output.bytes)
        .iter()
        .any(|(name, _, _)| name == "memory"));
}

#[test]
fn test_host_function_auto_import() {
    let program = parse("function f(x: f64): f64 begin f := log2(x) end").unwrap();

    // Without a host mapping the call is refused.
    let err = generate(&program).unwrap_err();
    assert!(matches!(err, GenError::UndefinedFunction(name) if name == "log2"));

    // With one it becomes a host import.
    let mut host = HostSigs::new();
    host.insert("log2".to_string(), 1);
    let options = GenOptions {
        host,
        ..Default::default()
    };
    let output = generate_with(&program, &options).unwrap();
    assert_eq!(
        imports(&output.bytes),
        vec![("host".to_string(), "log2".to_string())]
    );
}

#[test]
fn test_global_section() {
    let source = "
        const scale := 2.5
        var count: i32 := -3
        function get(): f64 begin get := scale end
    ";
    let output = compile(source);
    let content = section(&output.bytes, 6).expect("global section");
    let mut r = Reader::new(&content);
    assert_eq!(r.uleb(), 2);
    assert_eq!(r.byte(), 0x7c); // f64
    assert_eq!(r.byte(), 0x00); // immutable
}

#[test]
fn test_semantic_errors() {
    assert!(matches!(
        compile_err("function f(x: f64): f64 begin f := y end"),
        GenError::UndefinedVariable(name) if name == "y"
    ));
    assert!(matches!(
        compile_err("function f(x: f64): f64 begin f := nothere(x) end"),
        GenError::UndefinedFunction(name) if name == "nothere"
    ));
    assert!(matches!(
        compile_err("subroutine s() begin break end"),
        GenError::BreakOutsideLoop(_)
    ));
    assert!(matches!(
        compile_err("var g := 1 + 2"),
        GenError::NonConstantGlobal(name) if name == "g"
    ));
    assert!(matches!(
        compile_err("function f(v: f64x2): f64x2 begin f := f64x2.wobble(v) end"),
        GenError::UnknownSimdOp(_)
    ));
    assert!(matches!(
        compile_err("function f(x: i32): i32 begin f := wasm.frobnicate(x) end"),
        GenError::UnknownWasmOp(_)
    ));
    assert!(matches!(
        compile_err("function f(x: f64): f64 begin call return() end"),
        GenError::ReturnArity(_)
    ));
    assert!(matches!(
        compile_err(
            "subroutine s(a: array f64, i: i32, j: i32) begin a[i, j] := 0 end"
        ),
        GenError::UnsupportedIndexPattern(_)
    ));
    assert!(matches!(
        compile_err("function f(x: nosuch): f64 begin f := 1 end"),
        GenError::UnknownParamType { ty, .. } if ty == "nosuch"
    ));
}

#[test]
fn test_simd_module_emits_prefixed_opcodes() {
    let source = "function add4(a, b: f64x2): f64x2 begin add4 := a + b end";
    let output = compile(source);
    let code = section(&output.bytes, 10).expect("code section");
    // f64x2.add is 0xfd 0xf0 0x01 (leb for 240).
    assert!(
        code.windows(3).any(|w| w == [0xfd, 0xf0, 0x01]),
        "expected f64x2.add"
    );
}

#[test]
fn test_compilations_share_no_state() {
    let a = compile(ADD);
    let b = compile(ADD);
    assert_eq!(a.bytes, b.bytes);
}
