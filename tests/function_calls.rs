//! End-to-end FFI: direct calls and closure trampolines through parsed
//! function descriptors.

mod common;

use std::ffi::c_void;
use std::mem;

use anyhow::Result;
use common::read_at;
use dynfi::{json, ArgMeta, DynFunction, DynType};

extern "C" fn add_doubles(a: f64, b: f64) -> f64 {
    a + b
}

extern "C" fn sub_ints(a: i32, b: i32) -> i32 {
    a - b
}

#[repr(C)]
struct Point {
    x: f64,
    y: f64,
}

extern "C" fn point_norm1(p: Point) -> f64 {
    p.x.abs() + p.y.abs()
}

extern "C" fn fill_point(out: *mut Point) {
    unsafe {
        (*out).x = 3.0;
        (*out).y = 4.0;
    }
}

#[test]
fn direct_call_with_doubles() -> Result<()> {
    let func = DynFunction::parse("add(DD)D", None)?;
    let mut a = 2.0f64;
    let mut b = 40.0f64;
    let mut ret = 0.0f64;
    let mut args = [
        (&mut a as *mut f64).cast::<c_void>(),
        (&mut b as *mut f64).cast::<c_void>(),
    ];
    let fp: extern "C" fn(f64, f64) -> f64 = add_doubles;
    unsafe {
        func.call(
            fp as *const c_void,
            (&mut ret as *mut f64).cast(),
            &mut args,
        )?;
    }
    assert_eq!(ret, 42.0);
    Ok(())
}

#[test]
fn direct_call_with_subword_return() -> Result<()> {
    let func = DynFunction::parse("sub(II)I", None)?;
    let mut a = 50i32;
    let mut b = 8i32;
    let mut ret = 0i32;
    let mut args = [
        (&mut a as *mut i32).cast::<c_void>(),
        (&mut b as *mut i32).cast::<c_void>(),
    ];
    let fp: extern "C" fn(i32, i32) -> i32 = sub_ints;
    unsafe {
        func.call(
            fp as *const c_void,
            (&mut ret as *mut i32).cast(),
            &mut args,
        )?;
    }
    assert_eq!(ret, 42);
    Ok(())
}

#[test]
fn struct_argument_passed_by_value() -> Result<()> {
    let func = DynFunction::parse("norm({DD x y})D", None)?;
    let ty = DynType::parse("{DD x y}")?;
    let inst = json::deserialize(&ty, br#"{"x":-1.5,"y":2.5}"#)?;
    let mut args = [inst.as_ptr()];
    let mut ret = 0.0f64;
    let fp: extern "C" fn(Point) -> f64 = point_norm1;
    unsafe {
        func.call(
            fp as *const c_void,
            (&mut ret as *mut f64).cast(),
            &mut args,
        )?;
    }
    assert_eq!(ret, 4.0);
    Ok(())
}

#[test]
fn pre_allocated_output_argument() -> Result<()> {
    let func = DynFunction::parse("fill(#am=pre;*{DD x y})V", None)?;
    assert_eq!(
        func.argument(0).unwrap().meta(),
        ArgMeta::PreAllocatedOutput
    );
    assert!(!func.has_return());

    let ty = DynType::parse("{DD x y}")?;
    let out = ty.alloc()?;
    let mut out_ptr = out.as_ptr();
    let mut args = [(&mut out_ptr as *mut *mut c_void).cast::<c_void>()];
    let fp: extern "C" fn(*mut Point) = fill_point;
    unsafe {
        func.call(fp as *const c_void, std::ptr::null_mut(), &mut args)?;
    }
    assert_eq!(common::field::<f64>(&out, "x"), 3.0);
    assert_eq!(common::field::<f64>(&out, "y"), 4.0);
    Ok(())
}

#[test]
fn argument_slot_count_is_checked() {
    let func = DynFunction::parse("add(DD)D", None).unwrap();
    let mut a = 1.0f64;
    let mut args = [(&mut a as *mut f64).cast::<c_void>()];
    let fp: extern "C" fn(f64, f64) -> f64 = add_doubles;
    let err = unsafe {
        func.call(fp as *const c_void, std::ptr::null_mut(), &mut args)
    }
    .unwrap_err();
    assert!(err.to_string().contains("argument slots"));
}

#[test]
fn closure_dispatches_to_rust_callback() -> Result<()> {
    let mut func = DynFunction::parse("mul(II)I", None)?;
    let code = func.create_closure(Box::new(|args, ret| unsafe {
        let a = read_at::<i32>(args[0]);
        let b = read_at::<i32>(args[1]);
        // sub-word integral results are widened to a full ffi_arg slot
        *(ret as *mut isize) = (a * b) as isize;
    }))?;
    assert_eq!(func.fn_pointer()?, code);

    // call the trampoline directly as a C function pointer
    let fp: extern "C" fn(i32, i32) -> i32 = unsafe { mem::transmute(code) };
    assert_eq!(fp(6, 7), 42);
    assert_eq!(fp(-3, 3), -9);

    // and through the prepared signature itself
    let mut a = 5i32;
    let mut b = 5i32;
    let mut ret = 0i32;
    let mut args = [
        (&mut a as *mut i32).cast::<c_void>(),
        (&mut b as *mut i32).cast::<c_void>(),
    ];
    unsafe {
        func.call(code, (&mut ret as *mut i32).cast(), &mut args)?;
    }
    assert_eq!(ret, 25);

    // a second closure on the same function is refused
    assert!(func.create_closure(Box::new(|_, _| {})).is_err());
    Ok(())
}

#[test]
fn closure_with_captured_state() -> Result<()> {
    let mut func = DynFunction::parse("count(J)V", None)?;
    let code = func.create_closure(Box::new(move |args, _ret| unsafe {
        // accumulate into a thread-local so the callback stays FnMut-safe
        SEEN.with(|seen| seen.set(seen.get() + read_at::<i64>(args[0])));
    }))?;

    thread_local! {
        static SEEN: std::cell::Cell<i64> = const { std::cell::Cell::new(0) };
    }

    let fp: extern "C" fn(i64) = unsafe { mem::transmute(code) };
    fp(40);
    fp(2);
    assert_eq!(SEEN.with(|s| s.get()), 42);
    Ok(())
}
