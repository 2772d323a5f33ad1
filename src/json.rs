//! JSON codec: walk a type graph against a JSON document, producing or
//! consuming a native-layout instance.
//!
//! Records map to objects keyed by field name (every named field must be
//! present on input; unnamed fields are rejected), sequences map to arrays,
//! enums map to their symbol strings, text and typed pointers accept `null`
//! for a null pointer. Pointer-to-pointer shapes and the untyped pointer
//! `P` have no JSON mapping and fail in both directions.

use std::ffi::{c_void, CStr};
use std::os::raw::c_int;

use serde_json::{Map, Value};

use crate::error::{DfiError, Result};
use crate::types::{DynType, Instance, TypeView};

/// Parse a JSON byte slice into a freshly allocated instance of `ty`.
pub fn deserialize<'t>(ty: &'t DynType, input: &[u8]) -> Result<Instance<'t>> {
    let root: Value = serde_json::from_slice(input).map_err(|e| {
        DfiError::decode(format!(
            "error parsing json input '{}': {e}",
            excerpt(input)
        ))
    })?;
    deserialize_value(ty, &root).map_err(|e| {
        crate::error::trail::push(format!(
            "cannot deserialize json, input is '{}'",
            excerpt(input)
        ));
        e
    })
}

/// Parse a JSON document node into a freshly allocated instance of `ty`.
pub fn deserialize_value<'t>(ty: &'t DynType, value: &Value) -> Result<Instance<'t>> {
    let inst = ty.alloc()?;
    // On failure the partially built instance is deep-freed by its drop.
    unsafe {
        parse_any(ty.root(), inst.as_ptr(), value)?;
    }
    Ok(inst)
}

/// Render an instance as a compact JSON string.
pub fn serialize(inst: &Instance<'_>) -> Result<String> {
    serialize_value(inst).map(|v| v.to_string())
}

/// Render an instance as a JSON document node.
pub fn serialize_value(inst: &Instance<'_>) -> Result<Value> {
    unsafe { write_any(inst.root(), inst.as_ptr()) }
}

/// Render a raw instance image of `ty` as a compact JSON string.
///
/// # Safety
/// `loc` must be a valid image of `ty`.
pub unsafe fn serialize_raw(ty: &DynType, loc: *const c_void) -> Result<String> {
    write_any(ty.root(), loc as *mut c_void).map(|v| v.to_string())
}

fn excerpt(input: &[u8]) -> String {
    const MAX: usize = 64;
    let text = String::from_utf8_lossy(input);
    if text.len() <= MAX {
        text.into_owned()
    } else {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

fn expect_i64(view: TypeView<'_>, val: &Value) -> Result<i64> {
    val.as_i64()
        .or_else(|| val.as_u64().map(|v| v as i64))
        .ok_or_else(|| {
            DfiError::decode(format!(
                "expected json integer for type '{}' got {val}",
                view.descriptor_char()
            ))
        })
}

fn expect_f64(view: TypeView<'_>, val: &Value) -> Result<f64> {
    val.as_f64().ok_or_else(|| {
        DfiError::decode(format!(
            "expected json number for type '{}' got {val}",
            view.descriptor_char()
        ))
    })
}

/// Whether a pointee collapses to a plain pointer on the wire, which makes
/// the enclosing typed pointer unrepresentable in JSON.
fn pointer_like(view: TypeView<'_>) -> bool {
    matches!(view.resolved().descriptor(), b'*' | b'P' | b't')
}

unsafe fn parse_any(view: TypeView<'_>, loc: *mut c_void, val: &Value) -> Result<()> {
    match view.descriptor() {
        b'Z' => {
            let v = val.as_bool().ok_or_else(|| {
                DfiError::decode(format!("expected json boolean got {val}"))
            })?;
            *(loc as *mut bool) = v;
        }
        b'F' => *(loc as *mut f32) = expect_f64(view, val)? as f32,
        b'D' => *(loc as *mut f64) = expect_f64(view, val)?,
        b'B' => *(loc as *mut i8) = expect_i64(view, val)? as i8,
        b'S' => *(loc as *mut i16) = expect_i64(view, val)? as i16,
        b'I' => *(loc as *mut i32) = expect_i64(view, val)? as i32,
        b'J' => *(loc as *mut i64) = expect_i64(view, val)?,
        b'b' => *(loc as *mut u8) = expect_i64(view, val)? as u8,
        b's' => *(loc as *mut u16) = expect_i64(view, val)? as u16,
        b'i' => *(loc as *mut u32) = expect_i64(view, val)? as u32,
        b'j' => *(loc as *mut u64) = expect_i64(view, val)? as u64,
        b'N' => *(loc as *mut c_int) = expect_i64(view, val)? as c_int,
        b'E' => {
            let symbol = val.as_str().ok_or_else(|| {
                DfiError::decode(format!("expected json string for enum got {val}"))
            })?;
            *(loc as *mut i32) = enum_value_for_symbol(view, symbol)?;
        }
        b't' => {
            if val.is_null() {
                // null string maps to a null pointer
            } else {
                let s = val.as_str().ok_or_else(|| {
                    DfiError::decode(format!("expected json string got {val}"))
                })?;
                view.text_alloc_init(loc, s)?;
            }
        }
        b'[' => {
            let items = val.as_array().ok_or_else(|| {
                DfiError::decode(format!("expected json array got {val}"))
            })?;
            parse_sequence(view, loc, items)?;
        }
        b'{' => {
            let object = val.as_object().ok_or_else(|| {
                DfiError::decode(format!("expected json object got {val}"))
            })?;
            parse_object(view, loc, object)?;
        }
        b'*' => {
            let pointee = view.pointee_type()?;
            if pointer_like(pointee) {
                return Err(DfiError::decode("cannot deserialize pointer to pointer"));
            }
            if !val.is_null() {
                let image = pointee.alloc_raw()?;
                if let Err(e) = parse_any(pointee.resolved(), image, val) {
                    pointee.free(image);
                    return Err(e);
                }
                *(loc as *mut *mut c_void) = image;
            }
        }
        b'l' => parse_any(view.resolved(), loc, val)?,
        c => {
            return Err(DfiError::decode(format!(
                "type '{}' is not supported for json deserialization",
                c as char
            )));
        }
    }
    Ok(())
}

unsafe fn parse_object(
    view: TypeView<'_>,
    loc: *mut c_void,
    object: &Map<String, Value>,
) -> Result<()> {
    for index in 0..view.field_count() {
        let name = view.field_name_at(index).ok_or_else(|| {
            DfiError::decode("record with unnamed fields is not supported for json")
        })?;
        let member = object.get(name).ok_or_else(|| {
            DfiError::decode(format!("missing object member '{name}'"))
        })?;
        let field = view.field_type_at(index)?;
        let floc = view.field_loc(index, loc)?;
        parse_any(field, floc, member)?;
    }
    Ok(())
}

unsafe fn parse_sequence(view: TypeView<'_>, loc: *mut c_void, items: &[Value]) -> Result<()> {
    if items.len() > u32::MAX as usize {
        return Err(DfiError::decode(format!(
            "json array size ({}) is too large for a sequence",
            items.len()
        )));
    }
    view.seq_alloc(loc, items.len() as u32)?;
    let item_type = view.item_type()?;
    for item in items {
        let slot = view.seq_push_loc(loc)?;
        parse_any(item_type, slot, item)?;
    }
    Ok(())
}

fn enum_value_for_symbol(view: TypeView<'_>, symbol: &str) -> Result<i32> {
    for (name, value) in view.metas() {
        if name == symbol {
            return value.parse::<i32>().map_err(|_| {
                DfiError::decode(format!(
                    "enum symbol '{symbol}' maps to a non-integer value '{value}'"
                ))
            });
        }
    }
    Err(DfiError::decode(format!(
        "could not find enum value '{symbol}' in enum type"
    )))
}

fn enum_symbol_for_value<'g>(view: TypeView<'g>, value: i32) -> Result<&'g str> {
    for (name, mapped) in view.metas() {
        if mapped.parse::<i32>() == Ok(value) {
            return Ok(name);
        }
    }
    Err(DfiError::decode(format!(
        "value {value} not in enum type"
    )))
}

unsafe fn write_any(view: TypeView<'_>, loc: *mut c_void) -> Result<Value> {
    let val = match view.descriptor() {
        b'Z' => Value::from(*(loc as *const bool)),
        b'B' => Value::from(*(loc as *const i8)),
        b'S' => Value::from(*(loc as *const i16)),
        b'I' => Value::from(*(loc as *const i32)),
        b'J' => Value::from(*(loc as *const i64)),
        b'b' => Value::from(*(loc as *const u8)),
        b's' => Value::from(*(loc as *const u16)),
        b'i' => Value::from(*(loc as *const u32)),
        b'j' => Value::from(*(loc as *const u64) as i64),
        b'N' => Value::from(*(loc as *const c_int) as i64),
        b'F' => Value::from(*(loc as *const f32) as f64),
        b'D' => Value::from(*(loc as *const f64)),
        b't' => {
            let s = *(loc as *const *const std::ffi::c_char);
            if s.is_null() {
                Value::Null
            } else {
                let text = CStr::from_ptr(s).to_str().map_err(|_| {
                    DfiError::decode("text value is not valid utf-8")
                })?;
                Value::from(text)
            }
        }
        b'E' => Value::from(enum_symbol_for_value(view, *(loc as *const i32))?),
        b'*' => {
            let pointee = view.pointee_type()?;
            if pointer_like(pointee) {
                return Err(DfiError::decode("cannot serialize pointer to pointer"));
            }
            let inner = *(loc as *const *mut c_void);
            if inner.is_null() {
                Value::Null
            } else {
                write_any(pointee.resolved(), inner)?
            }
        }
        b'{' => {
            let mut object = Map::new();
            for index in 0..view.field_count() {
                let name = view.field_name_at(index).ok_or_else(|| {
                    DfiError::decode("record with unnamed fields is not supported for json")
                })?;
                let field = view.field_type_at(index)?;
                let floc = view.field_loc(index, loc)?;
                object.insert(name.to_string(), write_any(field, floc)?);
            }
            Value::Object(object)
        }
        b'[' => {
            let item_type = view.item_type()?;
            let len = view.seq_length(loc);
            let mut items = Vec::with_capacity(len as usize);
            for i in 0..len {
                let slot = view.seq_loc_for_index(loc, i)?;
                items.push(write_any(item_type, slot)?);
            }
            Value::Array(items)
        }
        b'l' => write_any(view.resolved(), loc)?,
        b'P' => {
            return Err(DfiError::decode(
                "untyped pointer is not supported for json serialization",
            ));
        }
        c => {
            return Err(DfiError::decode(format!(
                "type '{}' is not supported for json serialization",
                c as char
            )));
        }
    };
    Ok(val)
}
