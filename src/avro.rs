//! Binary codec: a compact AVRO-style wire format, schema generation and a
//! minimal object-container writer.
//!
//! Integers are zig-zag encoded base-128 varints (at most 10 bytes), floats
//! are IEEE-754 little-endian, strings are length-prefixed without a
//! terminator, records are their fields in declaration order without tags,
//! and sequences are blocked arrays terminated by a zero count. A negative
//! block count carries the item count as its absolute value and is followed
//! by the block byte size, permitting forward skips.

use std::ffi::{c_void, CStr};
use std::os::raw::c_int;
use std::path::Path;

use serde_json::{json, Value};

use crate::error::{DfiError, Result};
use crate::types::{DynType, Instance, TypeView};

const MAX_VARINT_LEN: usize = 10;

// ─── Primitive decoding ─────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let b = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| DfiError::decode("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(DfiError::decode("unexpected end of input"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(DfiError::decode(format!(
                "unexpected value {b:#04x} for boolean"
            ))),
        }
    }

    fn read_long(&mut self) -> Result<i64> {
        let mut uval: u64 = 0;
        let mut offset = 0usize;
        loop {
            if offset == MAX_VARINT_LEN {
                return Err(DfiError::decode("varint too long"));
            }
            let b = self.read_byte()?;
            uval |= ((b & 0x7f) as u64) << (7 * offset);
            offset += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok(((uval >> 1) as i64) ^ -((uval & 1) as i64))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let v = self.read_long()?;
        i32::try_from(v).map_err(|_| DfiError::decode(format!("int value {v} out of range")))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_exact(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_exact(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(arr))
    }

    fn read_string(&mut self) -> Result<&'a str> {
        let len = self.read_long()?;
        if len < 0 {
            return Err(DfiError::decode(format!("negative string length {len}")));
        }
        let len = usize::try_from(len)
            .map_err(|_| DfiError::decode(format!("string length {len} too large")))?;
        let bytes = self.read_exact(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| DfiError::decode("string value is not valid utf-8"))
    }
}

fn narrow<T: TryFrom<i64>>(v: i64, what: &str) -> Result<T> {
    T::try_from(v).map_err(|_| DfiError::decode(format!("{what} value {v} out of range")))
}

// ─── Primitive encoding ─────────────────────────────────────────────────

fn write_bool(out: &mut Vec<u8>, v: bool) {
    out.push(v as u8);
}

fn write_long(out: &mut Vec<u8>, v: i64) {
    let mut uval = ((v as u64) << 1) ^ ((v >> 63) as u64);
    while uval & !0x7f != 0 {
        out.push(((uval & 0x7f) | 0x80) as u8);
        uval >>= 7;
    }
    out.push(uval as u8);
}

fn write_int(out: &mut Vec<u8>, v: i32) {
    write_long(out, v as i64);
}

fn write_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, v: &str) {
    write_long(out, v.len() as i64);
    out.extend_from_slice(v.as_bytes());
}

// ─── Instance serialization ─────────────────────────────────────────────

/// Encode an instance into the binary wire format.
pub fn serialize(inst: &Instance<'_>) -> Result<Vec<u8>> {
    unsafe { serialize_raw(inst.dyn_type(), inst.as_ptr()) }
}

/// Encode a raw instance image of `ty` into the binary wire format.
///
/// # Safety
/// `loc` must be a valid image of `ty`.
pub unsafe fn serialize_raw(ty: &DynType, loc: *const c_void) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_any(ty.root(), loc as *mut c_void, &mut out)?;
    Ok(out)
}

/// Decode the binary wire format into a freshly allocated instance of `ty`.
pub fn deserialize<'t>(ty: &'t DynType, input: &[u8]) -> Result<Instance<'t>> {
    let inst = ty.alloc()?;
    let mut reader = Reader::new(input);
    // On failure the partially built instance is deep-freed by its drop.
    unsafe {
        parse_any(ty.root(), inst.as_ptr(), &mut reader)?;
    }
    Ok(inst)
}

unsafe fn write_any(view: TypeView<'_>, loc: *mut c_void, out: &mut Vec<u8>) -> Result<()> {
    match view.descriptor() {
        b'Z' => write_bool(out, *(loc as *const bool)),
        b'B' => write_int(out, *(loc as *const i8) as i32),
        b'S' => write_int(out, *(loc as *const i16) as i32),
        b'I' => write_int(out, *(loc as *const i32)),
        b'J' => write_long(out, *(loc as *const i64)),
        b'b' => write_int(out, *(loc as *const u8) as i32),
        b's' => write_int(out, *(loc as *const u16) as i32),
        b'i' => write_int(out, *(loc as *const u32) as i32),
        b'j' => write_long(out, *(loc as *const u64) as i64),
        b'N' => write_int(out, *(loc as *const c_int) as i32),
        b'F' => write_f32(out, *(loc as *const f32)),
        b'D' => write_f64(out, *(loc as *const f64)),
        b't' => {
            let s = *(loc as *const *const std::ffi::c_char);
            if s.is_null() {
                return Err(DfiError::illegal_argument("cannot serialize null text"));
            }
            let text = CStr::from_ptr(s)
                .to_str()
                .map_err(|_| DfiError::decode("text value is not valid utf-8"))?;
            write_string(out, text);
        }
        b'E' => {
            let value = *(loc as *const i32);
            write_int(out, enum_index_for_value(view, value)?);
        }
        b'*' => {
            let inner = *(loc as *const *mut c_void);
            if inner.is_null() {
                return Err(DfiError::illegal_argument("cannot serialize null pointer"));
            }
            write_any(view.pointee_type()?.resolved(), inner, out)?;
        }
        b'{' => {
            for index in 0..view.field_count() {
                let field = view.field_type_at(index)?;
                let floc = view.field_loc(index, loc)?;
                write_any(field, floc, out)?;
            }
        }
        b'[' => {
            let item_type = view.item_type()?;
            let len = view.seq_length(loc);
            // one positive block with all items, then the terminator; an
            // empty sequence is the terminator alone
            if len > 0 {
                write_long(out, len as i64);
                for i in 0..len {
                    let slot = view.seq_loc_for_index(loc, i)?;
                    write_any(item_type, slot, out)?;
                }
            }
            write_long(out, 0);
        }
        b'l' => write_any(view.resolved(), loc, out)?,
        b'P' => {
            return Err(DfiError::decode(
                "untyped pointer is not supported for serialization",
            ));
        }
        c => {
            return Err(DfiError::decode(format!(
                "type '{}' is not supported for serialization",
                c as char
            )));
        }
    }
    Ok(())
}

unsafe fn parse_any(view: TypeView<'_>, loc: *mut c_void, r: &mut Reader<'_>) -> Result<()> {
    match view.descriptor() {
        b'Z' => *(loc as *mut bool) = r.read_bool()?,
        b'B' => *(loc as *mut i8) = narrow(r.read_long()?, "int8")?,
        b'S' => *(loc as *mut i16) = narrow(r.read_long()?, "int16")?,
        b'I' => *(loc as *mut i32) = r.read_i32()?,
        b'J' => *(loc as *mut i64) = r.read_long()?,
        b'b' => *(loc as *mut u8) = narrow(r.read_long()?, "uint8")?,
        b's' => *(loc as *mut u16) = narrow(r.read_long()?, "uint16")?,
        // Unsigned 32-bit values travel through their sign-extended 32-bit
        // image, mirroring the encoder.
        b'i' => *(loc as *mut u32) = r.read_i32()? as u32,
        b'j' => *(loc as *mut u64) = r.read_long()? as u64,
        b'N' => *(loc as *mut c_int) = r.read_i32()? as c_int,
        b'F' => *(loc as *mut f32) = r.read_f32()?,
        b'D' => *(loc as *mut f64) = r.read_f64()?,
        b't' => {
            let text = r.read_string()?;
            view.text_alloc_init(loc, text)?;
        }
        b'E' => {
            let index = r.read_i32()?;
            *(loc as *mut i32) = enum_value_at_index(view, index)?;
        }
        b'*' => {
            let pointee = view.pointee_type()?;
            let image = pointee.alloc_raw()?;
            if let Err(e) = parse_any(pointee.resolved(), image, r) {
                pointee.free(image);
                return Err(e);
            }
            *(loc as *mut *mut c_void) = image;
        }
        b'{' => {
            for index in 0..view.field_count() {
                let field = view.field_type_at(index)?;
                let floc = view.field_loc(index, loc)?;
                parse_any(field, floc, r)?;
            }
        }
        b'[' => parse_sequence(view, loc, r)?,
        b'l' => parse_any(view.resolved(), loc, r)?,
        b'P' => {
            return Err(DfiError::decode(
                "untyped pointer is not supported for serialization",
            ));
        }
        c => {
            return Err(DfiError::decode(format!(
                "type '{}' is not supported for serialization",
                c as char
            )));
        }
    }
    Ok(())
}

unsafe fn parse_sequence(view: TypeView<'_>, loc: *mut c_void, r: &mut Reader<'_>) -> Result<()> {
    view.seq_init(loc)?;
    let item_type = view.item_type()?;
    let item_size = item_type.resolved().size() as i64;
    let mut cap: u64 = 0;
    loop {
        let mut block_count = r.read_long()?;
        if block_count == 0 {
            return Ok(());
        }
        if block_count < 0 {
            // Absolute value is the item count, followed by the block byte
            // size.
            block_count = block_count
                .checked_abs()
                .ok_or_else(|| DfiError::decode("invalid sequence block count"))?;
            let block_size = r.read_long()?;
            if block_size % item_size != 0 {
                return Err(DfiError::decode(format!(
                    "block size ({block_size}) is not a multiple of the item size ({item_size})"
                )));
            }
            if block_size / item_size != block_count {
                return Err(DfiError::decode(format!(
                    "block size ({block_size}) does not match the block count ({block_count})"
                )));
            }
        }
        log::debug!("parsing sequence block of {block_count} items");
        cap += block_count as u64;
        let cap32 = u32::try_from(cap)
            .map_err(|_| DfiError::decode(format!("sequence length ({cap}) too large")))?;
        view.seq_reserve(loc, cap32)?;
        for _ in 0..block_count {
            let slot = view.seq_push_loc(loc)?;
            parse_any(item_type, slot, r)?;
        }
    }
}

fn enum_index_for_value(view: TypeView<'_>, value: i32) -> Result<i32> {
    for (index, (_, mapped)) in view.metas().enumerate() {
        if mapped.parse::<i32>() == Ok(value) {
            return Ok(index as i32);
        }
    }
    Err(DfiError::decode(format!(
        "could not find enum value {value} in enum type"
    )))
}

fn enum_value_at_index(view: TypeView<'_>, index: i32) -> Result<i32> {
    if index < 0 {
        return Err(DfiError::decode(format!("negative enum index {index}")));
    }
    match view.metas().nth(index as usize) {
        Some((_, value)) => value.parse::<i32>().map_err(|_| {
            DfiError::decode(format!("enum symbol maps to a non-integer value '{value}'"))
        }),
        None => Err(DfiError::decode(format!(
            "enum index {index} out of range"
        ))),
    }
}

// ─── Schema generation ──────────────────────────────────────────────────

/// Generate an AVRO JSON schema for `ty`. Record and enum names are
/// synthesized (`R1`, `R2`, ...); the counter restarts for every call.
pub fn generate_schema(ty: &DynType) -> Result<String> {
    let mut counter = 1u32;
    let schema = generate_any(ty.root(), &mut counter)?;
    Ok(schema.to_string())
}

fn next_name(counter: &mut u32) -> String {
    let name = format!("R{counter}");
    *counter += 1;
    name
}

fn primitive_schema(name: &str) -> Value {
    json!({ "type": name })
}

fn generate_any(view: TypeView<'_>, counter: &mut u32) -> Result<Value> {
    let schema = match view.descriptor() {
        b'Z' => primitive_schema("boolean"),
        b'B' | b'S' | b'I' | b'b' | b's' | b'i' | b'N' => primitive_schema("int"),
        b'J' | b'j' => primitive_schema("long"),
        b'F' => primitive_schema("float"),
        b'D' => primitive_schema("double"),
        b't' => primitive_schema("string"),
        b'*' => generate_any(view.pointee_type()?.resolved(), counter)?,
        b'{' => {
            let name = next_name(counter);
            let mut fields = Vec::with_capacity(view.field_count());
            for index in 0..view.field_count() {
                let field_name = view.field_name_at(index).ok_or_else(|| {
                    DfiError::decode("record with unnamed fields has no schema")
                })?;
                let sub = generate_any(view.field_type_at(index)?.resolved(), counter)?;
                fields.push(json!({ "name": field_name, "type": sub }));
            }
            json!({ "type": "record", "name": name, "fields": fields })
        }
        b'[' => {
            let items = generate_any(view.item_type()?.resolved(), counter)?;
            json!({ "type": "array", "items": items })
        }
        b'E' => {
            let name = next_name(counter);
            let symbols: Vec<&str> = view.metas().map(|(symbol, _)| symbol).collect();
            json!({ "type": "enum", "name": name, "symbols": symbols })
        }
        b'l' => generate_any(view.resolved(), counter)?,
        b'P' => {
            return Err(DfiError::decode(
                "untyped pointer is not supported for serialization",
            ));
        }
        c => {
            return Err(DfiError::decode(format!(
                "type '{}' is not supported for serialization",
                c as char
            )));
        }
    };
    Ok(schema)
}

// ─── Container file ─────────────────────────────────────────────────────

/// Write a minimal AVRO object-container file: magic, a one-entry metadata
/// map carrying the schema, and a single data block framed by a random sync
/// marker.
pub fn save_file(path: impl AsRef<Path>, schema: &str, payload: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(payload.len() + schema.len() + 64);
    buf.extend_from_slice(b"Obj\x01");
    write_long(&mut buf, 1);
    write_string(&mut buf, "avro.schema");
    write_string(&mut buf, schema);
    write_long(&mut buf, 0);
    let sync: [u8; 16] = rand::random();
    buf.extend_from_slice(&sync);
    write_long(&mut buf, 1);
    write_long(&mut buf, payload.len() as i64);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&sync);
    std::fs::write(path, buf)?;
    Ok(())
}
