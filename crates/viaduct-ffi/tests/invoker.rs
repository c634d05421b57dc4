//! Downcall integration tests
//!
//! Exercises the generic invoker against local `extern "C"` functions so
//! every supported shape round-trips through a real native call without
//! depending on any system library.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;
use viaduct_ffi::{memory, CallError, CallInterface, ExternFunction, NativeType, SymbolAddress, Value};

extern "C" fn nat_forty_two() -> i32 {
    42
}

extern "C" fn nat_add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn nat_add_i64(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

extern "C" fn nat_echo_u32(v: u32) -> u32 {
    v
}

extern "C" fn nat_echo_u64(v: u64) -> u64 {
    v
}

extern "C" fn nat_echo_ptr(p: *const c_void) -> *const c_void {
    p
}

extern "C" fn nat_sum6(a: i64, b: i64, c: i64, d: i64, e: i64, f: i64) -> i64 {
    a + b + c + d + e + f
}

extern "C" fn nat_strlen(s: *const c_char) -> u64 {
    unsafe { CStr::from_ptr(s) }.to_bytes().len() as u64
}

extern "C" fn nat_first_byte(data: *const u8, len: u64) -> i32 {
    if len == 0 {
        -1
    } else {
        unsafe { *data as i32 }
    }
}

extern "C" fn nat_store_i64(out: *mut i64, value: i64) {
    unsafe { *out = value }
}

static GREETING: &[u8] = b"native greeting\0";

extern "C" fn nat_version() -> *const c_char {
    GREETING.as_ptr() as *const c_char
}

fn func(addr: usize, ret: NativeType, params: &[NativeType]) -> ExternFunction {
    let interface = Arc::new(CallInterface::build(ret, params).unwrap());
    unsafe { ExternFunction::new(SymbolAddress::from_raw(addr), interface) }
}

#[test]
fn nullary_int_result() {
    let f = func(nat_forty_two as usize, NativeType::Int32, &[]);
    assert_eq!(unsafe { f.call(&[]) }.unwrap(), Value::Int32(42));
    assert_eq!(unsafe { f.call_i32(&[]) }.unwrap(), 42);
}

#[rstest]
#[case(0, 0)]
#[case(10, 20)]
#[case(-5, 5)]
#[case(i32::MAX, 1)]
fn add_i32_round_trip(#[case] a: i32, #[case] b: i32) {
    let f = func(
        nat_add_i32 as usize,
        NativeType::Int32,
        &[NativeType::Int32, NativeType::Int32],
    );
    let result = unsafe { f.call(&[Value::Int32(a), Value::Int32(b)]) }.unwrap();
    assert_eq!(result, Value::Int32(a.wrapping_add(b)));
}

#[test]
fn unsigned_results_come_back_verbatim() {
    let f = func(nat_echo_u32 as usize, NativeType::UInt32, &[NativeType::UInt32]);
    assert_eq!(
        unsafe { f.call(&[Value::UInt32(u32::MAX)]) }.unwrap(),
        Value::UInt32(u32::MAX)
    );

    let f = func(nat_echo_u64 as usize, NativeType::UInt64, &[NativeType::UInt64]);
    assert_eq!(
        unsafe { f.call(&[Value::UInt64(u64::MAX)]) }.unwrap(),
        Value::UInt64(u64::MAX)
    );
}

#[test]
fn pointer_echo_is_lossless_and_opaque() {
    let f = func(nat_echo_ptr as usize, NativeType::Pointer, &[NativeType::Pointer]);
    let result = unsafe { f.call(&[Value::Ptr(0xABCD)]) }.unwrap();
    assert_eq!(result, Value::Ptr(0xABCD));
    assert_eq!(unsafe { f.call_ptr(&[Value::Ptr(0x1234)]) }.unwrap(), 0x1234);
}

#[test]
fn six_argument_shape() {
    let f = func(nat_sum6 as usize, NativeType::Int64, &[NativeType::Int64; 6]);
    let args: Vec<Value> = (1..=6i64).map(|v| Value::Int64(v << 32)).collect();
    let expected: i64 = (1..=6i64).map(|v| v << 32).sum();
    assert_eq!(unsafe { f.call_i64(&args) }.unwrap(), expected);
}

#[test]
fn string_argument_marshals_nul_terminated() {
    let f = func(nat_strlen as usize, NativeType::UInt64, &[NativeType::Pointer]);
    let result = unsafe { f.call(&[Value::Str("hello world".into())]) }.unwrap();
    assert_eq!(result, Value::UInt64(11));

    // Empty string still gets a terminator.
    let result = unsafe { f.call(&[Value::Str(String::new())]) }.unwrap();
    assert_eq!(result, Value::UInt64(0));
}

#[test]
fn string_with_interior_nul_is_rejected_before_the_call() {
    let f = func(nat_strlen as usize, NativeType::UInt64, &[NativeType::Pointer]);
    let result = unsafe { f.call(&[Value::Str("he\0llo".into())]) };
    assert!(matches!(result, Err(CallError::Marshal(_))));
}

#[test]
fn byte_buffer_argument_is_pinned_for_the_call() {
    let f = func(
        nat_first_byte as usize,
        NativeType::Int32,
        &[NativeType::Pointer, NativeType::UInt64],
    );
    let payload = vec![0x5Au8, 1, 2, 3];
    let len = payload.len() as u64;
    let result = unsafe { f.call(&[Value::Bytes(payload), Value::UInt64(len)]) }.unwrap();
    assert_eq!(result, Value::Int32(0x5A));
}

#[test]
fn void_return_with_out_parameter() {
    let f = func(
        nat_store_i64 as usize,
        NativeType::Void,
        &[NativeType::Pointer, NativeType::Int64],
    );
    let mut slot = 0i64;
    let out = &mut slot as *mut i64 as usize;
    unsafe { f.call_void(&[Value::Ptr(out), Value::Int64(-99)]) }.unwrap();
    assert_eq!(slot, -99);
    assert_eq!(unsafe { memory::read_i64(out) }, -99);
}

#[test]
fn pointer_result_read_as_text() {
    let f = func(nat_version as usize, NativeType::Pointer, &[]);
    let addr = unsafe { f.call_ptr(&[]) }.unwrap();
    let text = unsafe { memory::read_utf8(addr) }.unwrap();
    assert_eq!(text, "native greeting");
}

#[test]
fn identical_interfaces_are_interchangeable() {
    let shape = [NativeType::Int32, NativeType::Int32];
    let a = Arc::new(CallInterface::build(NativeType::Int32, &shape).unwrap());
    let b = Arc::new(CallInterface::build(NativeType::Int32, &shape).unwrap());

    let addr = SymbolAddress::from_raw(nat_add_i32 as usize);
    let fa = unsafe { ExternFunction::new(addr, a) };
    let fb = unsafe { ExternFunction::new(addr, b) };

    let args = [Value::Int32(2), Value::Int32(3)];
    assert_eq!(
        unsafe { fa.call(&args) }.unwrap(),
        unsafe { fb.call(&args) }.unwrap()
    );
}

#[test]
fn one_interface_serves_many_functions() {
    let interface = Arc::new(
        CallInterface::build(NativeType::Int64, &[NativeType::Int64, NativeType::Int64]).unwrap(),
    );
    let add = unsafe {
        ExternFunction::new(
            SymbolAddress::from_raw(nat_add_i64 as usize),
            Arc::clone(&interface),
        )
    };
    let args = [Value::Int64(40), Value::Int64(2)];
    assert_eq!(unsafe { add.call_i64(&args) }.unwrap(), 42);
    assert_eq!(Arc::strong_count(&interface), 2);
}

proptest! {
    #[test]
    fn prop_add_i64_round_trip(a: i64, b: i64) {
        let f = func(
            nat_add_i64 as usize,
            NativeType::Int64,
            &[NativeType::Int64, NativeType::Int64],
        );
        let result = unsafe { f.call_i64(&[Value::Int64(a), Value::Int64(b)]) }.unwrap();
        prop_assert_eq!(result, a.wrapping_add(b));
    }

    #[test]
    fn prop_echo_u64_is_lossless(v: u64) {
        let f = func(nat_echo_u64 as usize, NativeType::UInt64, &[NativeType::UInt64]);
        let result = unsafe { f.call(&[Value::UInt64(v)]) }.unwrap();
        prop_assert_eq!(result, Value::UInt64(v));
    }

    #[test]
    fn prop_strlen_matches_managed_length(s in "[a-zA-Z0-9 ]{0,64}") {
        let f = func(nat_strlen as usize, NativeType::UInt64, &[NativeType::Pointer]);
        let expected = s.len() as u64;
        let result = unsafe { f.call(&[Value::Str(s)]) }.unwrap();
        prop_assert_eq!(result, Value::UInt64(expected));
    }
}
