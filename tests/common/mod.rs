#![allow(dead_code)]

use std::ffi::{c_char, c_void, CStr};

use dynfi::{Instance, TypeView};

/// Read a plain value out of a raw instance slot.
pub unsafe fn read_at<T: Copy>(loc: *mut c_void) -> T {
    *(loc as *const T)
}

/// Read a root field of a record instance.
pub fn field<T: Copy>(inst: &Instance<'_>, name: &str) -> T {
    unsafe { read_at(inst.field_loc(name).expect("field lookup")) }
}

/// Read an owned string field; `None` for a null pointer.
pub fn field_str(inst: &Instance<'_>, name: &str) -> Option<String> {
    unsafe {
        let p: *const c_char = read_at(inst.field_loc(name).expect("field lookup"));
        if p.is_null() {
            None
        } else {
            Some(CStr::from_ptr(p).to_str().expect("utf-8").to_string())
        }
    }
}

/// Address of a named field inside a raw record image.
pub unsafe fn field_loc_of(view: TypeView<'_>, image: *mut c_void, name: &str) -> *mut c_void {
    let index = view.field_index(name).expect("field name");
    view.field_loc(index, image).expect("field loc")
}

/// Read a named field out of a raw record image.
pub unsafe fn read_field_of<T: Copy>(view: TypeView<'_>, image: *mut c_void, name: &str) -> T {
    read_at(field_loc_of(view, image, name))
}

/// Read an owned string field out of a raw record image.
pub unsafe fn read_str_of(view: TypeView<'_>, image: *mut c_void, name: &str) -> Option<String> {
    let p: *const c_char = read_field_of(view, image, name);
    if p.is_null() {
        None
    } else {
        Some(CStr::from_ptr(p).to_str().expect("utf-8").to_string())
    }
}
