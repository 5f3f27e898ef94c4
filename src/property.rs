//! Property accessor entry points.
//!
//! Compiler-synthesised accessors call these instead of open-coding
//! the ivar access. Atomic accessors serialise on one process-wide
//! spinlock. Coarse but correct, and properties are not a hot path on
//! the targets this runtime serves.

use core::ffi::c_void;

use spin::Mutex;

use crate::abi::{Id, ObjcSelector, Sel};
use crate::arc;

static PROPERTY_LOCK: Mutex<()> = Mutex::new(());

struct SyncSelector(ObjcSelector);
// SAFETY: points at 'static string data, never mutated.
unsafe impl Sync for SyncSelector {}

static COPY_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"copy\0".as_ptr() as *const core::ffi::c_char,
    types: core::ptr::null(),
});

unsafe fn ivar_slot(obj: Id, offset: isize) -> *mut Id {
    (obj as *mut u8).offset(offset) as *mut Id
}

/// Copy semantics for a stored value: send `copy`, or fall back to a
/// retain (with a warning) when the value does not respond.
unsafe fn copy_value(val: Id) -> Id {
    if val.is_null() {
        return core::ptr::null_mut();
    }
    let sel: Sel = &COPY_SEL.0;
    if crate::message::object_respondsToSelector(val, sel) {
        if let Some(imp) = crate::message::objc_msg_lookup(val, sel) {
            return imp(val, sel);
        }
    }
    crate::kwarn!("copy property: @{:p} does not respond to copy; retaining", val);
    arc::objc_retain(val)
}

/// Read an object-typed property at `offset`, returning it retained
/// and autoreleased so it survives the accessor.
#[no_mangle]
pub unsafe extern "C" fn objc_getProperty(
    obj: Id,
    _cmd: Sel,
    offset: isize,
    atomic: bool,
) -> Id {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    let slot = ivar_slot(obj, offset);
    let val = if atomic {
        let _guard = PROPERTY_LOCK.lock();
        arc::objc_retain(*slot)
    } else {
        arc::objc_retain(*slot)
    };
    arc::objc_autorelease(val)
}

/// Store an object-typed property: retain-or-copy the new value, swap
/// it in (under the lock when atomic), release the old one.
#[no_mangle]
pub unsafe extern "C" fn objc_setProperty(
    obj: Id,
    _cmd: Sel,
    offset: isize,
    arg: Id,
    atomic: bool,
    should_copy: bool,
) {
    if obj.is_null() {
        return;
    }
    let new = if should_copy {
        copy_value(arg)
    } else {
        arc::objc_retain(arg)
    };
    let slot = ivar_slot(obj, offset);
    let old = if atomic {
        let _guard = PROPERTY_LOCK.lock();
        let old = *slot;
        *slot = new;
        old
    } else {
        let old = *slot;
        *slot = new;
        old
    };
    arc::objc_release(old);
}

// Specialised setters the compiler emits when it knows the attributes
// statically. Argument order differs from objc_setProperty.

#[no_mangle]
pub unsafe extern "C" fn objc_setProperty_atomic(obj: Id, cmd: Sel, arg: Id, offset: isize) {
    objc_setProperty(obj, cmd, offset, arg, true, false);
}

#[no_mangle]
pub unsafe extern "C" fn objc_setProperty_atomic_copy(
    obj: Id,
    cmd: Sel,
    arg: Id,
    offset: isize,
) {
    objc_setProperty(obj, cmd, offset, arg, true, true);
}

#[no_mangle]
pub unsafe extern "C" fn objc_setProperty_nonatomic(
    obj: Id,
    cmd: Sel,
    arg: Id,
    offset: isize,
) {
    objc_setProperty(obj, cmd, offset, arg, false, false);
}

#[no_mangle]
pub unsafe extern "C" fn objc_setProperty_nonatomic_copy(
    obj: Id,
    cmd: Sel,
    arg: Id,
    offset: isize,
) {
    objc_setProperty(obj, cmd, offset, arg, false, true);
}

// Struct-typed property support: plain memcpy, serialised when atomic.

unsafe fn property_memcpy(dest: *mut c_void, src: *mut c_void, size: isize, atomic: bool) {
    if dest.is_null() || src.is_null() || size <= 0 {
        return;
    }
    if atomic {
        let _guard = PROPERTY_LOCK.lock();
        core::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, size as usize);
    } else {
        core::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, size as usize);
    }
}

#[no_mangle]
pub unsafe extern "C" fn objc_copyPropertyStruct(
    dest: *mut c_void,
    src: *mut c_void,
    size: isize,
    atomic: bool,
    _strong: bool,
) {
    property_memcpy(dest, src, size, atomic);
}

#[no_mangle]
pub unsafe extern "C" fn objc_getPropertyStruct(
    dest: *mut c_void,
    src: *mut c_void,
    size: isize,
    atomic: bool,
    _strong: bool,
) {
    property_memcpy(dest, src, size, atomic);
}

#[no_mangle]
pub unsafe extern "C" fn objc_setPropertyStruct(
    dest: *mut c_void,
    src: *mut c_void,
    size: isize,
    atomic: bool,
    _strong: bool,
) {
    property_memcpy(dest, src, size, atomic);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_copy_moves_bytes() {
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut dest = [0u8; 8];
        unsafe {
            objc_copyPropertyStruct(
                dest.as_mut_ptr() as *mut c_void,
                src.as_ptr() as *mut c_void,
                8,
                true,
                false,
            );
        }
        assert_eq!(src, dest);
    }

    #[test]
    fn test_struct_copy_rejects_bad_sizes() {
        let src = [9u8; 4];
        let mut dest = [0u8; 4];
        unsafe {
            objc_setPropertyStruct(
                dest.as_mut_ptr() as *mut c_void,
                src.as_ptr() as *mut c_void,
                -1,
                false,
                false,
            );
        }
        assert_eq!(dest, [0u8; 4]);
    }
}
