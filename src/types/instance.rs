//! Instance images: allocation, deep free and raw access.
//!
//! An instance is a zeroed memory image with the exact platform layout of
//! its type. All pointer-typed slots start out null and sequence headers
//! start out empty, which is what makes deep-freeing a partially built
//! image safe: the free walk only follows what has actually been committed.
//!
//! The raw operations here are the unsafe core; [`Instance`] is the owning
//! wrapper the codecs hand out.

use std::alloc::{alloc_zeroed, dealloc, realloc, Layout as AllocLayout};
use std::ffi::{c_char, c_void, CString};
use std::ptr::{self, NonNull};

use super::layout::Layout;
use super::{Body, DynType, TypeClass, TypeView};
use crate::error::{DfiError, Result};

/// In-memory header of a sequence instance: capacity, length and the item
/// buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct SeqHeader {
    pub cap: u32,
    pub len: u32,
    pub buf: *mut c_void,
}

impl DynType {
    /// Allocate a zeroed instance image of this type.
    pub fn alloc(&self) -> Result<Instance<'_>> {
        let ptr = self.root().alloc_raw()?;
        // alloc_raw never hands out null.
        Ok(Instance {
            ty: self,
            ptr: NonNull::new(ptr).ok_or_else(|| DfiError::oom("allocation returned null"))?,
        })
    }
}

impl<'g> TypeView<'g> {
    /// Allocate a zeroed image of this type. The caller owns the memory and
    /// must release it with [`free`](Self::free).
    pub fn alloc_raw(&self) -> Result<*mut c_void> {
        let real = self.resolved();
        let l = real.node().layout;
        if l.size == 0 {
            return Err(DfiError::illegal_argument(format!(
                "cannot allocate zero-sized type '{}'",
                real.descriptor_char()
            )));
        }
        let al = AllocLayout::from_size_align(l.size, l.align)
            .map_err(|e| DfiError::illegal_argument(e.to_string()))?;
        let p = unsafe { alloc_zeroed(al) };
        if p.is_null() {
            return Err(DfiError::oom(format!(
                "error allocating {} bytes for type '{}'",
                l.size,
                real.descriptor_char()
            )));
        }
        Ok(p.cast())
    }

    /// Deep-free an instance image: owned strings, sequence buffers and
    /// pointees are walked and released, then the image itself.
    ///
    /// # Safety
    /// `loc` must be an image of this type allocated through this crate, in
    /// the committed state the codecs and instance operations maintain.
    pub unsafe fn free(&self, loc: *mut c_void) {
        self.deep_free(loc, true);
    }

    pub(crate) unsafe fn deep_free(&self, loc: *mut c_void, dealloc_self: bool) {
        if loc.is_null() {
            return;
        }
        let real = self.resolved();
        match &real.node().body {
            Body::Complex(c) => {
                for (i, f) in c.fields.iter().enumerate() {
                    let floc = loc.cast::<u8>().add(c.offsets[i]).cast::<c_void>();
                    real.at(f.ty).deep_free(floc, false);
                }
            }
            Body::Sequence(_) => real.free_sequence(loc),
            Body::TypedPointer(p) => {
                let inner = *(loc as *mut *mut c_void);
                real.at(p.pointee).deep_free(inner, true);
            }
            Body::Text(_) => {
                let s = *(loc as *mut *mut c_char);
                if !s.is_null() {
                    drop(CString::from_raw(s));
                }
            }
            Body::Simple(_) | Body::RefByValue(_) => {}
        }
        if dealloc_self {
            let l = real.node().layout;
            if l.size > 0 {
                dealloc(
                    loc.cast(),
                    AllocLayout::from_size_align_unchecked(l.size, l.align),
                );
            }
        }
    }

    unsafe fn free_sequence(&self, loc: *mut c_void) {
        if let Body::Sequence(s) = &self.node().body {
            let hdr = loc as *mut SeqHeader;
            let item = self.at(s.item);
            let il = item.resolved().node().layout;
            let buf = (*hdr).buf;
            if !buf.is_null() {
                for i in 0..(*hdr).len as usize {
                    item.deep_free(buf.cast::<u8>().add(i * il.size).cast(), false);
                }
                let total = il.size * (*hdr).cap as usize;
                if total > 0 {
                    dealloc(
                        buf.cast(),
                        AllocLayout::from_size_align_unchecked(total, il.align),
                    );
                }
            }
        }
    }

    // ─── Record instance access ─────────────────────────────────────────

    /// Address of field `index` inside a record image.
    ///
    /// # Safety
    /// `inst` must be a valid image of this record type.
    pub unsafe fn field_loc(&self, index: usize, inst: *mut c_void) -> Result<*mut c_void> {
        let off = self.field_offset_at(index)?;
        Ok(inst.cast::<u8>().add(off).cast())
    }

    /// Bit-copy a value into field `index`.
    ///
    /// # Safety
    /// `inst` must be a valid image of this record type and `src` must point
    /// at a value of the field's type.
    pub unsafe fn set_field_value_at(
        &self,
        index: usize,
        inst: *mut c_void,
        src: *const c_void,
    ) -> Result<()> {
        let off = self.field_offset_at(index)?;
        let size = self.field_type_at(index)?.size();
        ptr::copy_nonoverlapping(src.cast::<u8>(), inst.cast::<u8>().add(off), size);
        Ok(())
    }

    /// Bit-copy a scalar value into an instance slot.
    ///
    /// # Safety
    /// Both pointers must address values of this type.
    pub unsafe fn simple_set_value(&self, loc: *mut c_void, src: *const c_void) {
        ptr::copy_nonoverlapping(src.cast::<u8>(), loc.cast::<u8>(), self.size());
    }

    // ─── Sequence instance access ───────────────────────────────────────

    fn sequence_parts(&self) -> Result<(TypeView<'g>, Layout)> {
        let real = self.resolved();
        match &real.node().body {
            Body::Sequence(s) => {
                let item = real.at(s.item);
                let il = item.resolved().node().layout;
                if il.size == 0 {
                    return Err(DfiError::illegal_argument(
                        "sequence of zero-sized items is not instantiable",
                    ));
                }
                Ok((item, il))
            }
            _ => Err(DfiError::illegal_argument(
                "sequence operation on a non-sequence type",
            )),
        }
    }

    /// Reset a sequence header to the empty state without touching any
    /// previous buffer.
    ///
    /// # Safety
    /// `loc` must address a sequence header slot.
    pub unsafe fn seq_init(&self, loc: *mut c_void) -> Result<()> {
        self.sequence_parts()?;
        *(loc as *mut SeqHeader) = SeqHeader {
            cap: 0,
            len: 0,
            buf: ptr::null_mut(),
        };
        Ok(())
    }

    /// Allocate a zeroed item buffer of `cap` items; the length starts at 0.
    ///
    /// # Safety
    /// `loc` must address a sequence header slot with no live buffer.
    pub unsafe fn seq_alloc(&self, loc: *mut c_void, cap: u32) -> Result<()> {
        let (_, il) = self.sequence_parts()?;
        let hdr = loc as *mut SeqHeader;
        if cap == 0 {
            return self.seq_init(loc);
        }
        let total = il
            .size
            .checked_mul(cap as usize)
            .ok_or_else(|| DfiError::oom("sequence buffer size overflow"))?;
        let al = AllocLayout::from_size_align(total, il.align)
            .map_err(|_| DfiError::oom("sequence buffer size overflow"))?;
        let buf = alloc_zeroed(al);
        if buf.is_null() {
            (*hdr).cap = 0;
            return Err(DfiError::oom(format!(
                "error allocating sequence buffer of {total} bytes"
            )));
        }
        *hdr = SeqHeader {
            cap,
            len: 0,
            buf: buf.cast(),
        };
        Ok(())
    }

    /// Grow the item buffer to at least `cap` items, zero-filling the new
    /// portion. Shrinking is a no-op.
    ///
    /// # Safety
    /// `loc` must address a valid sequence header of this type.
    pub unsafe fn seq_reserve(&self, loc: *mut c_void, cap: u32) -> Result<()> {
        let (_, il) = self.sequence_parts()?;
        let hdr = loc as *mut SeqHeader;
        if cap <= (*hdr).cap {
            return Ok(());
        }
        let old_total = il.size * (*hdr).cap as usize;
        let new_total = il
            .size
            .checked_mul(cap as usize)
            .ok_or_else(|| DfiError::oom("sequence buffer size overflow"))?;
        let buf = if (*hdr).buf.is_null() {
            let al = AllocLayout::from_size_align(new_total, il.align)
                .map_err(|_| DfiError::oom("sequence buffer size overflow"))?;
            let p = alloc_zeroed(al);
            if p.is_null() {
                return Err(DfiError::oom(format!(
                    "error allocating sequence buffer of {new_total} bytes"
                )));
            }
            p
        } else {
            let old_layout = AllocLayout::from_size_align_unchecked(old_total, il.align);
            let p = realloc((*hdr).buf.cast(), old_layout, new_total);
            if p.is_null() {
                return Err(DfiError::oom(format!(
                    "error growing sequence buffer to {new_total} bytes"
                )));
            }
            ptr::write_bytes(p.add(old_total), 0, new_total - old_total);
            p
        };
        (*hdr).buf = buf.cast();
        (*hdr).cap = cap;
        Ok(())
    }

    /// Current length of a sequence instance.
    ///
    /// # Safety
    /// `loc` must address a valid sequence header.
    pub unsafe fn seq_length(&self, loc: *const c_void) -> u32 {
        (*(loc as *const SeqHeader)).len
    }

    /// Current capacity of a sequence instance.
    ///
    /// # Safety
    /// `loc` must address a valid sequence header.
    pub unsafe fn seq_capacity(&self, loc: *const c_void) -> u32 {
        (*(loc as *const SeqHeader)).cap
    }

    /// Address of item `index`. Fails outside the committed length or the
    /// capacity.
    ///
    /// # Safety
    /// `loc` must address a valid sequence header of this type.
    pub unsafe fn seq_loc_for_index(&self, loc: *const c_void, index: u32) -> Result<*mut c_void> {
        let (_, il) = self.sequence_parts()?;
        let hdr = loc as *const SeqHeader;
        if index >= (*hdr).cap {
            return Err(DfiError::illegal_argument(format!(
                "requested index ({index}) is larger than the capacity ({}) of the sequence",
                (*hdr).cap
            )));
        }
        if index >= (*hdr).len {
            return Err(DfiError::illegal_argument(format!(
                "requested index ({index}) is outside the length ({}) but within the capacity",
                (*hdr).len
            )));
        }
        Ok((*hdr).buf.cast::<u8>().add(index as usize * il.size).cast())
    }

    /// Commit one more item and return its (zeroed) slot, for streaming
    /// appends.
    ///
    /// # Safety
    /// `loc` must address a valid sequence header of this type.
    pub unsafe fn seq_push_loc(&self, loc: *mut c_void) -> Result<*mut c_void> {
        let (_, il) = self.sequence_parts()?;
        let hdr = loc as *mut SeqHeader;
        if (*hdr).len >= (*hdr).cap {
            return Err(DfiError::illegal_argument(format!(
                "cannot increase sequence length beyond capacity ({})",
                (*hdr).cap
            )));
        }
        (*hdr).len += 1;
        let index = (*hdr).len - 1;
        Ok((*hdr).buf.cast::<u8>().add(index as usize * il.size).cast())
    }

    // ─── Text instance access ───────────────────────────────────────────

    /// Deep-copy `value` into a text slot as an owned, NUL-terminated
    /// string.
    ///
    /// # Safety
    /// `loc` must address a text slot holding no live string.
    pub unsafe fn text_alloc_init(&self, loc: *mut c_void, value: &str) -> Result<()> {
        if self.resolved().class() != TypeClass::Text {
            return Err(DfiError::illegal_argument(
                "text operation on a non-text type",
            ));
        }
        let s = CString::new(value).map_err(|_| {
            DfiError::illegal_argument("text value contains an interior NUL byte")
        })?;
        *(loc as *mut *mut c_char) = s.into_raw();
        Ok(())
    }
}

/// An owned instance image; deep-frees itself on drop.
#[derive(Debug)]
pub struct Instance<'t> {
    ty: &'t DynType,
    ptr: NonNull<c_void>,
}

impl<'t> Instance<'t> {
    pub fn dyn_type(&self) -> &'t DynType {
        self.ty
    }

    /// Root view of the instance's type.
    pub fn root(&self) -> TypeView<'t> {
        self.ty.root()
    }

    /// Raw image pointer.
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Address of a named root field.
    pub fn field_loc(&self, name: &str) -> Result<*mut c_void> {
        let root = self.ty.root().resolved();
        let index = root
            .field_index(name)
            .ok_or_else(|| DfiError::illegal_argument(format!("no field named '{name}'")))?;
        unsafe { root.field_loc(index, self.ptr.as_ptr()) }
    }

    /// Release ownership of the image without freeing it.
    pub fn into_raw(self) -> *mut c_void {
        let p = self.ptr.as_ptr();
        std::mem::forget(self);
        p
    }

    /// Re-adopt an image previously released with
    /// [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// `ptr` must be an image of `ty` allocated through this crate.
    pub unsafe fn from_raw(ty: &'t DynType, ptr: *mut c_void) -> Result<Self> {
        Ok(Instance {
            ty,
            ptr: NonNull::new(ptr)
                .ok_or_else(|| DfiError::illegal_argument("null instance pointer"))?,
        })
    }
}

impl Drop for Instance<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ty.root().free(self.ptr.as_ptr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DynType;

    #[test]
    fn alloc_is_zeroed() {
        let t = DynType::parse("{IJD a b c}").unwrap();
        let inst = t.alloc().unwrap();
        unsafe {
            assert_eq!(*(inst.field_loc("a").unwrap() as *const i32), 0);
            assert_eq!(*(inst.field_loc("b").unwrap() as *const i64), 0);
            assert_eq!(*(inst.field_loc("c").unwrap() as *const f64), 0.0);
        }
    }

    #[test]
    fn field_write_and_read() {
        let t = DynType::parse("{IS a b}").unwrap();
        let inst = t.alloc().unwrap();
        unsafe {
            *(inst.field_loc("a").unwrap() as *mut i32) = -7;
            *(inst.field_loc("b").unwrap() as *mut i16) = 42;
            assert_eq!(*(inst.field_loc("a").unwrap() as *const i32), -7);
            assert_eq!(*(inst.field_loc("b").unwrap() as *const i16), 42);
        }
        assert!(inst.field_loc("missing").is_err());
    }

    #[test]
    fn sequence_streaming_append() {
        let t = DynType::parse("[D").unwrap();
        let inst = t.alloc().unwrap();
        let view = t.root();
        unsafe {
            view.seq_alloc(inst.as_ptr(), 3).unwrap();
            assert_eq!(view.seq_length(inst.as_ptr()), 0);
            for i in 0..3 {
                let slot = view.seq_push_loc(inst.as_ptr()).unwrap();
                *(slot as *mut f64) = i as f64 + 1.0;
            }
            assert_eq!(view.seq_length(inst.as_ptr()), 3);
            assert!(view.seq_push_loc(inst.as_ptr()).is_err());
            let second = view.seq_loc_for_index(inst.as_ptr(), 1).unwrap();
            assert_eq!(*(second as *const f64), 2.0);
            assert!(view.seq_loc_for_index(inst.as_ptr(), 3).is_err());
        }
    }

    #[test]
    fn sequence_reserve_grows_and_zero_fills() {
        let t = DynType::parse("[I").unwrap();
        let inst = t.alloc().unwrap();
        let view = t.root();
        unsafe {
            view.seq_alloc(inst.as_ptr(), 2).unwrap();
            *(view.seq_push_loc(inst.as_ptr()).unwrap() as *mut i32) = 5;
            view.seq_reserve(inst.as_ptr(), 8).unwrap();
            assert_eq!(view.seq_capacity(inst.as_ptr()), 8);
            assert_eq!(view.seq_length(inst.as_ptr()), 1);
            let first = view.seq_loc_for_index(inst.as_ptr(), 0).unwrap();
            assert_eq!(*(first as *const i32), 5);
            // new tail slots come back zeroed
            for _ in 1..8 {
                let slot = view.seq_push_loc(inst.as_ptr()).unwrap();
                assert_eq!(*(slot as *const i32), 0);
            }
        }
    }

    #[test]
    fn text_alloc_and_free() {
        let t = DynType::parse("{tt a b}").unwrap();
        let inst = t.alloc().unwrap();
        let root = t.root();
        unsafe {
            // text_alloc_init is only valid on the text view itself
            assert!(root
                .text_alloc_init(inst.field_loc("a").unwrap(), "hello")
                .is_err());
            let text = root.field_type_at(0).unwrap();
            text.text_alloc_init(inst.field_loc("a").unwrap(), "hello")
                .unwrap();
            let p = *(inst.field_loc("a").unwrap() as *const *const c_char);
            assert_eq!(std::ffi::CStr::from_ptr(p).to_str().unwrap(), "hello");
        }
        // field b stays null; drop frees only the committed string
    }

    #[test]
    fn deep_free_walks_pointers() {
        let t = DynType::parse("{*{DD a b} c}").unwrap();
        let inst = t.alloc().unwrap();
        let root = t.root();
        unsafe {
            let sub = root.field_type_at(0).unwrap();
            let pointee = sub.pointee_type().unwrap();
            let image = pointee.alloc_raw().unwrap();
            *(pointee.field_loc(0, image).unwrap() as *mut f64) = 1.5;
            *(inst.field_loc("c").unwrap() as *mut *mut c_void) = image;
        }
        // dropping the instance frees the pointee as well
    }
}
