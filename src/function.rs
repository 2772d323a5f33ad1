//! Function descriptors: FFI signature preparation, direct calls and
//! closures.
//!
//! A function descriptor reads `Name(<arg types>)<return type>`. Parsing
//! prepares a libffi CIF from the argument and return type graphs, after
//! which the function can dispatch direct calls to arbitrary C function
//! pointers and allocate closure trampolines that bounce incoming C calls
//! into a Rust callback.

use std::ffi::c_void;
use std::mem;
use std::os::raw::c_int;
use std::ptr;

use libffi::middle::{Cif, CodePtr, Type};
use libffi::raw;
use ustr::{ustr, Ustr};

use crate::error::{DfiError, Result};
use crate::scanner::Scanner;
use crate::types::{Body, DynType, TypePool, TypeView};

/// Argument classification derived from the `am` meta-property of the
/// argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgMeta {
    #[default]
    Standard,
    /// Opaque service handle (`am=handle`).
    Handle,
    /// Caller-allocated output argument (`am=pre`).
    PreAllocatedOutput,
    /// Callee-allocated output argument (`am=out`).
    Output,
}

/// One parsed argument.
#[derive(Debug)]
pub struct Argument {
    index: usize,
    name: Ustr,
    ty: DynType,
    meta: ArgMeta,
}

impl Argument {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn dyn_type(&self) -> &DynType {
        &self.ty
    }

    pub fn meta(&self) -> ArgMeta {
        self.meta
    }
}

/// Callback dispatched by a closure trampoline: receives the raw argument
/// slots and the raw return slot.
pub type ClosureBind = Box<dyn FnMut(&[*mut c_void], *mut c_void)>;

struct ClosureState {
    nargs: usize,
    bind: ClosureBind,
}

struct Closure {
    closure: *mut raw::ffi_closure,
    code: *const c_void,
    // Pinned behind a box; the trampoline dereferences it.
    _state: Box<ClosureState>,
}

impl Drop for Closure {
    fn drop(&mut self) {
        unsafe {
            raw::ffi_closure_free(self.closure.cast());
        }
    }
}

/// A parsed function descriptor with a prepared FFI call signature.
pub struct DynFunction {
    name: Ustr,
    args: Vec<Argument>,
    ret: DynType,
    cif: Cif,
    closure: Option<Closure>,
}

impl DynFunction {
    /// Parse a `Name(<args>)<return>` descriptor. The whole input must be
    /// consumed.
    pub fn parse(descriptor: &str, pool: Option<&TypePool>) -> Result<Self> {
        let mut sc = Scanner::new(descriptor);
        let func = Self::parse_scanner(&mut sc, pool)?;
        if !sc.at_end() {
            return Err(DfiError::parse(format!(
                "unexpected trailing input at position {} in function descriptor",
                sc.pos()
            )));
        }
        Ok(func)
    }

    pub(crate) fn parse_scanner(sc: &mut Scanner<'_>, pool: Option<&TypePool>) -> Result<Self> {
        let name = sc.parse_name()?;
        sc.eat(b'(')?;
        let mut args = Vec::new();
        loop {
            match sc.peek() {
                None => {
                    return Err(DfiError::parse("unexpected end of function descriptor"));
                }
                Some(b')') => {
                    sc.next();
                    break;
                }
                Some(_) => {
                    let index = args.len();
                    let ty = DynType::parse_scanner(sc, None, pool)?;
                    let meta = match ty.root().meta_value("am") {
                        Some("handle") => ArgMeta::Handle,
                        Some("pre") => ArgMeta::PreAllocatedOutput,
                        Some("out") => ArgMeta::Output,
                        _ => ArgMeta::Standard,
                    };
                    args.push(Argument {
                        index,
                        name: ustr(&format!("arg{index:04}")),
                        ty,
                        meta,
                    });
                }
            }
        }
        let ret = DynType::parse_scanner(sc, None, pool)?;
        let cif = Cif::new(
            args.iter().map(|a| ffi_type_of(a.ty.root())),
            ffi_type_of(ret.root()),
        );
        Ok(DynFunction {
            name: ustr(&name),
            args,
            ret,
            cif,
            closure: None,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn argument_count(&self) -> usize {
        self.args.len()
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.args
    }

    pub fn argument(&self, index: usize) -> Option<&Argument> {
        self.args.get(index)
    }

    pub fn return_type(&self) -> &DynType {
        &self.ret
    }

    /// False iff the return descriptor is `V`.
    pub fn has_return(&self) -> bool {
        self.ret.descriptor() != 'V'
    }

    /// Invoke `fn_ptr` with the prepared signature.
    ///
    /// `arg_slots[i]` must point at a value of argument `i`'s type and
    /// `ret_loc` at writable storage of the return type (it may be null for
    /// a void return). Sub-word integral returns are widened by libffi; the
    /// value lands in the low bytes of the caller's slot.
    ///
    /// # Safety
    /// `fn_ptr` must be a function with exactly this signature, and the
    /// slots must match the prepared layouts.
    pub unsafe fn call(
        &self,
        fn_ptr: *const c_void,
        ret_loc: *mut c_void,
        arg_slots: &mut [*mut c_void],
    ) -> Result<()> {
        if fn_ptr.is_null() {
            return Err(DfiError::illegal_argument("null function pointer"));
        }
        if arg_slots.len() != self.args.len() {
            return Err(DfiError::illegal_argument(format!(
                "expected {} argument slots, got {}",
                self.args.len(),
                arg_slots.len()
            )));
        }
        let code = CodePtr::from_ptr(fn_ptr);
        let ret_size = if self.has_return() { self.ret.size() } else { 0 };
        if ret_size > 0 && ret_size < mem::size_of::<usize>() {
            // libffi widens sub-word integral returns to a full ffi_arg.
            let mut scratch = 0u64;
            raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(*code.as_safe_fun()),
                (&mut scratch as *mut u64).cast(),
                arg_slots.as_mut_ptr(),
            );
            if !ret_loc.is_null() {
                ptr::copy_nonoverlapping(
                    (&scratch as *const u64).cast::<u8>(),
                    ret_loc.cast::<u8>(),
                    ret_size,
                );
            }
        } else {
            raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(*code.as_safe_fun()),
                ret_loc,
                arg_slots.as_mut_ptr(),
            );
        }
        Ok(())
    }

    /// Allocate a closure trampoline dispatching calls of this signature to
    /// `bind`. Returns the C-callable entry point; the function owns the
    /// trampoline and releases it on drop.
    pub fn create_closure(&mut self, bind: ClosureBind) -> Result<*const c_void> {
        if self.closure.is_some() {
            return Err(DfiError::illegal_state("closure already created"));
        }
        let mut state = Box::new(ClosureState {
            nargs: self.args.len(),
            bind,
        });
        let mut code: *mut c_void = ptr::null_mut();
        let closure =
            unsafe { raw::ffi_closure_alloc(mem::size_of::<raw::ffi_closure>(), &mut code) }
                as *mut raw::ffi_closure;
        if closure.is_null() {
            return Err(DfiError::oom("error allocating ffi closure"));
        }
        let status = unsafe {
            raw::ffi_prep_closure_loc(
                closure,
                self.cif.as_raw_ptr(),
                Some(closure_trampoline),
                (&mut *state as *mut ClosureState).cast(),
                code,
            )
        };
        if status != raw::ffi_status_FFI_OK {
            unsafe {
                raw::ffi_closure_free(closure.cast());
            }
            return Err(DfiError::illegal_state(format!(
                "ffi_prep_closure_loc failed ({status})"
            )));
        }
        self.closure = Some(Closure {
            closure,
            code,
            _state: state,
        });
        Ok(code)
    }

    /// Entry point of a previously created closure.
    pub fn fn_pointer(&self) -> Result<*const c_void> {
        self.closure
            .as_ref()
            .map(|c| c.code)
            .ok_or_else(|| DfiError::illegal_state("no closure prepared for this function"))
    }
}

impl std::fmt::Debug for DynFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynFunction")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("ret", &self.ret.descriptor())
            .field("has_closure", &self.closure.is_some())
            .finish()
    }
}

unsafe extern "C" fn closure_trampoline(
    _cif: *mut raw::ffi_cif,
    ret: *mut c_void,
    args: *mut *mut c_void,
    userdata: *mut c_void,
) {
    let state = &mut *(userdata as *mut ClosureState);
    let argv = if state.nargs == 0 || args.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(args, state.nargs)
    };
    (state.bind)(argv, ret);
}

fn native_int_type() -> Type {
    match mem::size_of::<c_int>() {
        2 => Type::i16(),
        8 => Type::i64(),
        _ => Type::i32(),
    }
}

/// Map a type graph onto libffi's type model. Aggregates become structure
/// types; pointers (typed, untyped and text) collapse to the generic
/// pointer.
fn ffi_type_of(view: TypeView<'_>) -> Type {
    let real = view.resolved();
    match &real.node().body {
        Body::Complex(c) => Type::structure(c.fields.iter().map(|f| ffi_type_of(real.at(f.ty)))),
        Body::Sequence(_) => Type::structure([Type::u32(), Type::u32(), Type::pointer()]),
        Body::Text(_) | Body::TypedPointer(_) => Type::pointer(),
        Body::Simple(_) | Body::RefByValue(_) => match real.descriptor() {
            b'Z' | b'b' => Type::u8(),
            b'B' => Type::i8(),
            b'S' => Type::i16(),
            b's' => Type::u16(),
            b'I' | b'E' => Type::i32(),
            b'i' => Type::u32(),
            b'J' => Type::i64(),
            b'j' => Type::u64(),
            b'F' => Type::f32(),
            b'D' => Type::f64(),
            b'N' => native_int_type(),
            b'P' => Type::pointer(),
            _ => Type::void(),
        },
    }
}
