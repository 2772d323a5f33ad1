//! Type-handle API: introspection, raw setters, ownership transfer and the
//! diagnostic trail.

mod common;

use std::ffi::c_void;

use anyhow::Result;
use common::*;
use dynfi::{trail, DfiError, DynType, Instance, SimpleKind, TypeClass, TypePool};

#[test]
fn introspection_walks_the_graph() -> Result<()> {
    let ty = DynType::parse("{t[I{DD x y} name scores point}")?;
    let root = ty.root();
    assert_eq!(root.class(), TypeClass::Complex);
    assert_eq!(root.field_count(), 3);
    assert_eq!(root.field_name_at(1), Some("scores"));
    assert_eq!(root.field_index("point"), Some(2));

    let scores = root.field_type_at(1)?;
    assert_eq!(scores.class(), TypeClass::Sequence);
    assert_eq!(scores.item_type()?.simple_kind(), Some(SimpleKind::Int32));

    let point = root.field_type_at(2)?;
    assert_eq!(point.field_count(), 2);
    assert!(point.field_offset_at(1)? >= 8);

    assert!(root.field_type_at(9).is_err());
    assert!(scores.field_type_at(0).is_err());
    assert!(root.item_type().is_err());
    assert!(root.pointee_type().is_err());
    Ok(())
}

#[test]
fn raw_setters_copy_bits() -> Result<()> {
    let ty = DynType::parse("{ID a b}")?;
    let inst = ty.alloc()?;
    let root = ty.root();
    let a = 77i32;
    let b = 2.5f64;
    unsafe {
        root.set_field_value_at(0, inst.as_ptr(), (&a as *const i32).cast())?;
        root.set_field_value_at(1, inst.as_ptr(), (&b as *const f64).cast())?;
    }
    assert_eq!(field::<i32>(&inst, "a"), 77);
    assert_eq!(field::<f64>(&inst, "b"), 2.5);

    let scalar = DynType::parse("J")?;
    let slot = scalar.alloc()?;
    let v = -9i64;
    unsafe {
        scalar
            .root()
            .simple_set_value(slot.as_ptr(), (&v as *const i64).cast());
        assert_eq!(read_at::<i64>(slot.as_ptr()), -9);
    }
    Ok(())
}

#[test]
fn instance_ownership_can_be_released_and_readopted() -> Result<()> {
    let ty = DynType::parse("{t name}")?;
    let inst = dynfi::json::deserialize(&ty, br#"{"name":"release me"}"#)?;
    let raw: *mut c_void = inst.into_raw();
    // re-adopt; the drop of `back` releases the string and the image
    let back = unsafe { Instance::from_raw(&ty, raw)? };
    assert_eq!(field_str(&back, "name").as_deref(), Some("release me"));
    Ok(())
}

#[test]
fn pool_lookup_is_by_name() -> Result<()> {
    let mut pool = TypePool::new();
    pool.add(DynType::parse_named("{DD x y}", "Point")?);
    pool.add(DynType::parse_named("t", "Label")?);
    assert_eq!(pool.len(), 2);
    assert!(pool.find("Point").is_some());
    assert!(pool.find("point").is_none());

    let ty = DynType::parse_with_pool("{lPoint;lLabel; at tag}", None, &pool)?;
    assert_eq!(
        ty.root().field_type_at(1)?.resolved().class(),
        TypeClass::Text
    );
    Ok(())
}

#[test]
fn printed_diagnostics_cover_the_whole_tree() -> Result<()> {
    let ty = DynType::parse("Tleaf={ts name age};{Lleaf;[D t owner values tag}")?;
    let text = ty.to_string();
    assert!(text.contains("type 'leaf': complex type"));
    assert!(text.contains("main type:"));
    assert!(text.contains("typed pointer"));
    assert!(text.contains("sequence"));
    Ok(())
}

#[test]
fn failed_operations_leave_a_diagnostic_trail() {
    trail::reset();
    let err = DynType::parse("{Lmissing; x}").unwrap_err();
    assert!(matches!(err, DfiError::Parse(_)));
    assert!(trail::count() > 0);
    let last = trail::pop_last().unwrap();
    assert!(!last.is_empty());
    trail::reset();
    assert_eq!(trail::count(), 0);
}

#[test]
fn zero_sized_types_cannot_be_instantiated() {
    let void = DynType::parse("V").unwrap();
    assert!(matches!(void.alloc(), Err(DfiError::IllegalArgument(_))));
}

#[test]
fn cloned_types_are_independent() -> Result<()> {
    let ty = DynType::parse("{It id name}")?;
    let copy = ty.clone();
    let inst = dynfi::json::deserialize(&copy, br#"{"id":1,"name":"copy"}"#)?;
    drop(ty);
    assert_eq!(field_str(&inst, "name").as_deref(), Some("copy"));
    Ok(())
}
