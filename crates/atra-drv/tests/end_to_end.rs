//! End-to-end scenarios: compile, instantiate on wasmi, and call the
//! exports.

use atra_drv::{run, run_template, Imports, TemplateValue, Value};

#[test]
fn test_add() {
    let mut instance = run(
        "function add(a, b: f64): f64 begin add := a + b end",
        &Imports::new(),
    )
    .unwrap();
    assert_eq!(instance.call_f64("add", &[2.0, 3.5]).unwrap(), 5.5);
}

#[test]
fn test_factorial_counted_loop() {
    let source = "
        function fact(n: i32): i32
            var i: i32
        begin
            fact := 1
            for i := 1, n
                fact := fact * i
            end for
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("fact", &[5.0]).unwrap(), 120.0);
    assert_eq!(instance.call_f64("fact", &[0.0]).unwrap(), 1.0);

    let result = instance.call("fact", &[Value::I32(6)]).unwrap();
    assert_eq!(result, Some(Value::I32(720)));
}

#[test]
fn test_sum_through_imported_memory() {
    let source = "
        function sumX(arr: i32, n: i32): f64
            var s: f64, i: i32
        begin
            s := 0
            for i := 0, n
                s := s + arr[i]
            end for
            sumX := s
        end
    ";
    let imports = Imports::new().with_memory(1);
    let mut instance = run(source, &imports).unwrap();
    instance.write_f64s(0, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(instance.call_f64("sumX", &[0.0, 3.0]).unwrap(), 6.0);
}

#[test]
fn test_hyp_pow_half() {
    let mut instance = run(
        "function hyp(x, y: f64): f64 begin hyp := (x*x + y*y) ** 0.5 end",
        &Imports::new(),
    )
    .unwrap();
    assert_eq!(instance.call_f64("hyp", &[3.0, 4.0]).unwrap(), 5.0);
}

#[test]
fn test_simd_vector_add_lanes() {
    let source = "
        function add4(a, b: f64x2): f64x2 begin add4 := a + b end
        function lane0(ax, ay, bx, by: f64): f64
        begin
            lane0 := f64x2.extract_lane(add4(f64x2(ax, ay), f64x2(bx, by)), 0)
        end
        function lane1(ax, ay, bx, by: f64): f64
        begin
            lane1 := f64x2.extract_lane(add4(f64x2(ax, ay), f64x2(bx, by)), 1)
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    let args = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(instance.call_f64("lane0", &args).unwrap(), 4.0);
    assert_eq!(instance.call_f64("lane1", &args).unwrap(), 6.0);
}

#[test]
fn test_tail_recursive_gcd() {
    let source = "
        function gcd(a, b: i32): i32
        begin
            if (b == 0) then
                gcd := a
            else
                tailcall gcd(b, a mod b)
            end if
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("gcd", &[462.0, 1071.0]).unwrap(), 21.0);
    assert_eq!(instance.call_f64("gcd", &[48.0, 18.0]).unwrap(), 6.0);
}

#[test]
fn test_math_auto_imports() {
    let source = "
        function lnexp(x: f64): f64 begin lnexp := ln(exp(x)) end
        function polar(y, x: f64): f64 begin polar := atan2(y, x) end
        function cube(x: f64): f64 begin cube := x ** 3 end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    let lnexp = instance.call_f64("lnexp", &[2.5]).unwrap();
    assert!((lnexp - 2.5).abs() < 1e-12);
    let polar = instance.call_f64("polar", &[1.0, 1.0]).unwrap();
    assert!((polar - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    assert_eq!(instance.call_f64("cube", &[2.0]).unwrap(), 8.0);
}

#[test]
fn test_host_functions_nested_and_flat() {
    let source = "
        function f(x: f64): f64 begin f := log2(x) end
        function g(): f64 begin g := physics.gravity() end
    ";
    let imports = Imports::new()
        .func("log2", 1, |args| args[0].log2())
        .nested("physics", Imports::new().func("gravity", 0, |_| 9.81));
    let mut instance = run(source, &imports).unwrap();
    assert_eq!(instance.call_f64("f", &[8.0]).unwrap(), 3.0);
    assert_eq!(instance.call_f64("g", &[]).unwrap(), 9.81);
}

#[test]
fn test_dotted_exports_reassemble() {
    let source = "
        function physics.gravity(): f64 begin physics.gravity := 9.81 end
        function plain(): f64 begin plain := 1 end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();

    // Flat access keeps working.
    assert_eq!(instance.call_f64("physics.gravity", &[]).unwrap(), 9.81);

    // And the nested tree points at the same export.
    let tree = instance.export_tree();
    let flat = tree
        .get("physics")
        .and_then(|p| p.get("gravity"))
        .and_then(|leaf| leaf.flat_name())
        .expect("nested leaf")
        .to_string();
    assert_eq!(instance.call_f64(&flat, &[]).unwrap(), 9.81);
}

#[test]
fn test_function_references_and_call_indirect() {
    let source = "
        function double(x: f64): f64 begin double := x * 2 end
        function triple(x: f64): f64 begin triple := x * 3 end
        function apply(f: function(f64): f64, x: f64): f64 begin apply := f(x) end
        function pick(sel: i32, x: f64): f64
        begin
            pick := apply(if (sel == 0) then @double else @triple, x)
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("pick", &[0.0, 5.0]).unwrap(), 10.0);
    assert_eq!(instance.call_f64("pick", &[1.0, 5.0]).unwrap(), 15.0);

    // The table map mirrors the slot assignment, in function-index
    // order.
    let table = instance.table_map().expect("table");
    assert_eq!(table.get("double"), Some(&0));
    assert_eq!(table.get("triple"), Some(&1));
}

#[test]
fn test_globals_and_subroutines() {
    let source = "
        const scale := 2.0
        var counter: i32 := 0
        subroutine bump() begin counter += 1 end
        function scaled_count(): f64 begin scaled_count := counter * scale end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call("bump", &[]).unwrap(), None);
    instance.call("bump", &[]).unwrap();
    instance.call("bump", &[]).unwrap();
    assert_eq!(instance.call_f64("scaled_count", &[]).unwrap(), 6.0);
}

#[test]
fn test_fortran_name_accumulates() {
    let source = "function last(): f64 begin last := 1 last := 2.5 end";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("last", &[]).unwrap(), 2.5);
}

#[test]
fn test_early_return() {
    let source = "
        function clamp0(x: f64): f64
        begin
            if (x < 0) then call return(0) end if
            clamp0 := x
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("clamp0", &[-5.0]).unwrap(), 0.0);
    assert_eq!(instance.call_f64("clamp0", &[3.0]).unwrap(), 3.0);
}

#[test]
fn test_while_do_while_and_break() {
    let source = "
        function count_down(n: i32): i32
            var steps: i32
        begin
            steps := 0
            while (n > 0)
                n -= 1
                steps += 1
            end while
            count_down := steps
        end
        function capped(n: i32): i32
            var total: i32
        begin
            total := 0
            do
                total += n
                n -= 1
                if (total > 100) then break end if
            while (n > 0)
            capped := total
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("count_down", &[7.0]).unwrap(), 7.0);
    // 50 + 49 + 48 = 147 > 100, so the break fires after three rounds.
    assert_eq!(instance.call_f64("capped", &[50.0]).unwrap(), 147.0);
}

#[test]
fn test_downward_for_loop() {
    let source = "
        function sum_down(n: i32): i32
            var i: i32
        begin
            sum_down := 0
            for i := n, 1, -1
                sum_down := sum_down + i
            end for
        end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("sum_down", &[4.0]).unwrap(), 10.0);
}

#[test]
fn test_conversions_and_unsigned_escape() {
    let source = "
        function toi(x: f64): i32 begin toi := i32(x) end
        function tof(n: i32): f64 begin tof := f64(n) end
        function du(a, b: i32): i32 begin du := wasm.div_u(a, b) end
        function small(a, b: i32): i32 begin small := wasm.lt_u(a, b) end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("toi", &[3.7]).unwrap(), 3.0);
    assert_eq!(instance.call_f64("tof", &[9.0]).unwrap(), 9.0);
    assert_eq!(instance.call_f64("du", &[7.0, 2.0]).unwrap(), 3.0);

    // -1 is u32::MAX unsigned, so nothing is below it.
    let r = instance
        .call("small", &[Value::I32(-1), Value::I32(5)])
        .unwrap();
    assert_eq!(r, Some(Value::I32(0)));
    let r = instance
        .call("small", &[Value::I32(5), Value::I32(-1)])
        .unwrap();
    assert_eq!(r, Some(Value::I32(1)));
}

#[test]
fn test_ternary_and_builtins() {
    let source = "
        function mx(a, b: f64): f64 begin mx := if (a > b) then a else b end
        function away(x: f64): f64 begin away := copysign(ceil(abs(x)), x) end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    assert_eq!(instance.call_f64("mx", &[2.0, 3.0]).unwrap(), 3.0);
    assert_eq!(instance.call_f64("away", &[-1.25]).unwrap(), -2.0);
}

#[test]
fn test_layout_constants_and_field_access() {
    let source = "
        layout Rec
            id: i32
            value: f64
        end layout
        subroutine put(p: Rec, id: i32, value: f64)
        begin
            p.id := id
            p.value := value
        end
        function get_value(p: Rec): f64 begin get_value := p.value end
        function rec_size(): i32 begin rec_size := Rec.__size end
        function value_offset(): i32 begin value_offset := Rec.value end
    ";
    let imports = Imports::new().with_memory(1);
    let mut instance = run(source, &imports).unwrap();

    assert_eq!(instance.call_f64("rec_size", &[]).unwrap(), 16.0);
    assert_eq!(instance.call_f64("value_offset", &[]).unwrap(), 8.0);

    instance.call_f64("put", &[32.0, 7.0, 1.25]).unwrap();
    assert_eq!(instance.call_f64("get_value", &[32.0]).unwrap(), 1.25);

    // The layout metadata rides along with the instance.
    let layouts = instance.layouts();
    let rec = layouts.get("Rec").expect("Rec layout");
    assert_eq!(rec.constant("id"), Some(0));
    assert_eq!(rec.constant("value"), Some(8));
    assert_eq!(rec.constant("__size"), Some(16));
    assert_eq!(rec.constant("__align"), Some(8));
}

#[test]
fn test_declared_dims_row_major() {
    let source = "
        function at(m: array(3, 4) f64, r: i32, c: i32): f64
        begin
            at := m[r, c]
        end
    ";
    let imports = Imports::new().with_memory(1);
    let mut instance = run(source, &imports).unwrap();
    let values: Vec<f64> = (0..12).map(f64::from).collect();
    instance.write_f64s(0, &values).unwrap();
    // Row-major with the declared row stride of 4.
    assert_eq!(instance.call_f64("at", &[0.0, 2.0, 3.0]).unwrap(), 11.0);
    assert_eq!(instance.call_f64("at", &[0.0, 1.0, 0.0]).unwrap(), 4.0);
}

#[test]
fn test_explicit_stride_three_index_form() {
    let source = "
        function at(m: i32, r: i32, stride: i32, c: i32): f64
        begin
            at := m[r, stride, c]
        end
    ";
    let imports = Imports::new().with_memory(1);
    let mut instance = run(source, &imports).unwrap();
    let values: Vec<f64> = (0..10).map(f64::from).collect();
    instance.write_f64s(0, &values).unwrap();
    assert_eq!(
        instance.call_f64("at", &[0.0, 1.0, 5.0, 2.0]).unwrap(),
        7.0
    );
}

#[test]
fn test_template_form() {
    let mut instance = run_template(
        &[
            "function scaled(x: f64): f64 begin scaled := ",
            "(x) * ",
            " end",
        ],
        vec![
            TemplateValue::callable(1, |args| args[0] + 1.0),
            TemplateValue::Number(10.0),
        ],
        Imports::new(),
    )
    .unwrap();
    // (3 + 1) * 10
    assert_eq!(instance.call_f64("scaled", &[3.0]).unwrap(), 40.0);
}

#[test]
fn test_template_text_inclusion() {
    let library = "function halve(x: f64): f64 begin halve := x / 2 end";
    let mut instance = run_template(
        &["", "\nfunction quarter(x: f64): f64 begin quarter := halve(halve(x)) end"],
        vec![TemplateValue::Text(library.to_string())],
        Imports::new(),
    )
    .unwrap();
    assert_eq!(instance.call_f64("quarter", &[8.0]).unwrap(), 2.0);
}

#[test]
fn test_memory_builtins() {
    let source = "
        function pages(): i32 begin pages := memory_size() end
        function grow(n: i32): i32 begin grow := memory_grow(n) end
        subroutine fill(at: i32, v: i32, n: i32) begin call memory_fill(at, v, n) end
        function peek(arr: i32): f64 begin peek := arr[0] end
    ";
    let imports = Imports::new().with_memory(1);
    let mut instance = run(source, &imports).unwrap();
    assert_eq!(instance.call_f64("pages", &[]).unwrap(), 1.0);
    // Growing returns the old page count.
    assert_eq!(instance.call_f64("grow", &[1.0]).unwrap(), 1.0);
    assert_eq!(instance.call_f64("pages", &[]).unwrap(), 2.0);
}

#[test]
fn test_instantiation_error_on_missing_host_import() {
    let err = run(
        "function f(x: f64): f64 begin f := mystery(x) end",
        &Imports::new(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("mystery"));
}

#[test]
fn test_unknown_export() {
    let mut instance = run(
        "function f(x: f64): f64 begin f := x end",
        &Imports::new(),
    )
    .unwrap();
    assert!(instance.call_f64("g", &[1.0]).is_err());
}

#[test]
fn test_integer_literal_suffixes() {
    let source = "
        function big(): i64 begin big := 4294967296_i64 + 1 end
        function small(): f32 begin small := 1.5_f32 end
    ";
    let mut instance = run(source, &Imports::new()).unwrap();
    let big = instance.call("big", &[]).unwrap();
    assert_eq!(big, Some(Value::I64(4294967297)));
    assert_eq!(instance.call_f64("small", &[]).unwrap(), 1.5);
}
