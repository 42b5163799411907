//! End-to-end scenarios exercising the decoder, validator and interpreter
//! together through the public `Context::call` boundary.

use assert_matches::assert_matches;
use wasmling::{decode, Context, StackLimits, TrapCode, Value};

fn wat2wasm(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).unwrap()
}

fn call(wat: &str, export: &str, args: &[Value]) -> wasmling::error::Result<Vec<Value>> {
    let wasm = wat2wasm(wat);
    let module = decode(&wasm).unwrap();
    let mut ctx = Context::new(&module, StackLimits::default()).unwrap();
    let idx = module.export_by_name(export).unwrap().index;
    ctx.call(idx, args)
}

#[test]
fn bitwise_and() {
    let wat = r#"
        (module
            (func (export "and") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.and))
    "#;
    let results = call(wat, "and", &[Value::I32(0xFF), Value::I32(0x0F)]).unwrap();
    assert_eq!(results, [Value::I32(0x0F)]);
}

#[test]
fn i64_leading_zeros() {
    let wat = r#"
        (module
            (func (export "clz") (param i64) (result i64)
                local.get 0
                i64.clz))
    "#;
    let results = call(wat, "clz", &[Value::I64(0x0000_0000_0000_00FF)]).unwrap();
    assert_eq!(results, [Value::I64(56)]);
}

#[test]
fn f64_nearest_rounds_half_to_even() {
    let wat = r#"
        (module
            (func (export "nearest") (param f64) (result f64)
                local.get 0
                f64.nearest))
    "#;
    let cases = [(2.5, 2.0), (3.5, 4.0), (-2.5, -2.0), (-3.5, -4.0)];
    for (input, expected) in cases {
        let results = call(wat, "nearest", &[Value::F64(input)]).unwrap();
        assert_eq!(results, [Value::F64(expected)], "nearest({input})");
    }
}

#[test]
fn signed_division_and_its_traps() {
    let wat = r#"
        (module
            (func (export "div_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.div_s))
    "#;
    let ok = call(wat, "div_s", &[Value::I32(20), Value::I32(4)]).unwrap();
    assert_eq!(ok, [Value::I32(5)]);

    let by_zero = call(wat, "div_s", &[Value::I32(42), Value::I32(0)]).unwrap_err();
    assert_matches!(by_zero.as_trap_code(), Some(TrapCode::DivisionByZero));

    let overflow = call(wat, "div_s", &[Value::I32(i32::MIN), Value::I32(-1)]).unwrap_err();
    assert_matches!(overflow.as_trap_code(), Some(TrapCode::IntegerOverflow));
}

#[test]
fn rem_s_int_min_by_minus_one_is_zero_not_a_trap() {
    let wat = r#"
        (module
            (func (export "rem_s") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.rem_s))
    "#;
    let results = call(wat, "rem_s", &[Value::I32(i32::MIN), Value::I32(-1)]).unwrap();
    assert_eq!(results, [Value::I32(0)]);
}

#[test]
fn looping_sum() {
    let wat = r#"
        (module
            (func (export "sum") (param i32) (result i32)
                (local i32 i32)
                (local.set 1 (i32.const 0))
                (local.set 2 (i32.const 0))
                (block $done
                    (loop $again
                        (br_if $done (i32.ge_s (local.get 2) (local.get 0)))
                        (local.set 1 (i32.add (local.get 1) (local.get 2)))
                        (local.set 2 (i32.add (local.get 2) (i32.const 1)))
                        (br $again)))
                local.get 1))
    "#;
    assert_eq!(call(wat, "sum", &[Value::I32(4)]).unwrap(), [Value::I32(6)]);
    assert_eq!(call(wat, "sum", &[Value::I32(0)]).unwrap(), [Value::I32(0)]);
}

#[test]
fn memory_store_reload_out_of_bounds_and_grow() {
    let wat = r#"
        (module
            (memory (export "mem") 1 2)
            (func (export "store_and_reload") (param i32) (result i32)
                local.get 0
                i32.const 0xDEADBEEF
                i32.store
                local.get 0
                i32.load)
            (func (export "store_at") (param i32)
                local.get 0
                i32.const 1
                i32.store)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow))
    "#;
    let wasm = wat2wasm(wat);
    let module = decode(&wasm).unwrap();
    let mut ctx = Context::new(&module, StackLimits::default()).unwrap();

    let reload = module.export_by_name("store_and_reload").unwrap().index;
    let results = ctx.call(reload, &[Value::I32(1024)]).unwrap();
    assert_eq!(results, [Value::I32(0xDEADBEEFu32 as i32)]);

    let store_at = module.export_by_name("store_at").unwrap().index;
    let page_size = 65536;
    let err = ctx
        .call(store_at, &[Value::I32(page_size - 2)])
        .unwrap_err();
    assert_matches!(err.as_trap_code(), Some(TrapCode::MemoryOutOfBounds));

    let grow = module.export_by_name("grow").unwrap().index;
    let grown = ctx.call(grow, &[Value::I32(1)]).unwrap();
    assert_eq!(grown, [Value::I32(1)]);
    let grown_again = ctx.call(grow, &[Value::I32(1)]).unwrap();
    assert_eq!(grown_again, [Value::I32(-1)]);
}

#[test]
fn call_indirect_through_a_table() {
    let wat = r#"
        (module
            (type $unary (func (param i32) (result i32)))
            (type $binary (func (param i32 i32) (result i32)))
            (func $inc (type $unary) (param i32) (result i32)
                local.get 0
                i32.const 1
                i32.add)
            (func $dec (type $unary) (param i32) (result i32)
                local.get 0
                i32.const 1
                i32.sub)
            (func $add (type $binary) (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add)
            (table 3 funcref)
            (elem (i32.const 0) $inc $dec $add)
            (func (export "call_it") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                call_indirect (type $unary)))
    "#;
    assert_eq!(
        call(wat, "call_it", &[Value::I32(10), Value::I32(0)]).unwrap(),
        [Value::I32(11)]
    );
    assert_eq!(
        call(wat, "call_it", &[Value::I32(10), Value::I32(1)]).unwrap(),
        [Value::I32(9)]
    );

    let out_of_bounds = call(wat, "call_it", &[Value::I32(10), Value::I32(5)]).unwrap_err();
    assert_matches!(out_of_bounds.as_trap_code(), Some(TrapCode::TableOutOfBounds));

    let type_mismatch = call(wat, "call_it", &[Value::I32(10), Value::I32(2)]).unwrap_err();
    assert_matches!(
        type_mismatch.as_trap_code(),
        Some(TrapCode::IndirectCallTypeMismatch)
    );
}

#[test]
fn imported_function_traps_when_invoked() {
    let wat = r#"
        (module
            (import "host" "log" (func $log (param i32)))
            (func (export "call_log") (param i32)
                local.get 0
                call $log))
    "#;
    let err = call(wat, "call_log", &[Value::I32(1)]).unwrap_err();
    assert_matches!(err.as_trap_code(), Some(TrapCode::UnresolvedImport));
}

#[test]
fn decode_rejects_bad_magic() {
    let err = decode(&[0, 0, 0, 0, 1, 0, 0, 0]).unwrap_err();
    assert_matches!(err.kind(), wasmling::ErrorKind::Malformed(_));
}

#[test]
fn decode_rejects_duplicate_export_names() {
    let wat = r#"
        (module
            (func (export "f") (result i32) (i32.const 0))
            (func (export "f") (result i32) (i32.const 1)))
    "#;
    let wasm = wat2wasm(wat);
    let err = decode(&wasm).unwrap_err();
    assert_matches!(err.kind(), wasmling::ErrorKind::Validation(_));
}
