//! Compiler-visible object-lifetime entry points.
//!
//! These are the functions ARC-emitted (and MRR-emitted) code calls by
//! name. They delegate to the refcount core and the pool layer;
//! `dealloc` goes through message dispatch so classes can override it.
//!
//! The return-value optimisation is modelled as a per-thread handshake
//! flag. Locating the compiler's instruction-stream marker is
//! architecture work the portable runtime does not attempt, so the
//! producer side always takes the plain autorelease path here; the
//! consumer side still honours the flag, and the pair degrades to a
//! retain/autorelease round-trip with identical lifetimes.

use core::ffi::c_char;

use crate::abi::{Id, ObjcSelector, Sel};
use crate::pool;
use crate::refcount;
use crate::tls;

struct SyncSelector(ObjcSelector);
// SAFETY: points at 'static string data, never mutated.
unsafe impl Sync for SyncSelector {}

static DEALLOC_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"dealloc\0".as_ptr() as *const c_char,
    types: core::ptr::null(),
});

/// Send `-dealloc` when a release drops the last reference.
unsafe fn send_dealloc(obj: Id) {
    let sel: Sel = &DEALLOC_SEL.0;
    if let Some(imp) = crate::message::objc_msg_lookup(obj, sel) {
        imp(obj, sel);
    }
}

#[no_mangle]
pub unsafe extern "C" fn objc_retain(obj: Id) -> Id {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    refcount::retain(obj)
}

#[no_mangle]
pub unsafe extern "C" fn objc_release(obj: Id) {
    if obj.is_null() {
        return;
    }
    if refcount::release(obj) {
        send_dealloc(obj);
    }
}

#[no_mangle]
pub unsafe extern "C" fn objc_autorelease(obj: Id) -> Id {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    pool::add_object(obj)
}

/// Atomic-strong-store: retain the new value, store it, release the
/// old one. Storing the value already in place moves no counts.
#[no_mangle]
pub unsafe extern "C" fn objc_storeStrong(location: *mut Id, val: Id) {
    let old = *location;
    if val == old {
        return;
    }
    if !val.is_null() {
        objc_retain(val);
    }
    *location = val;
    if !old.is_null() {
        objc_release(old);
    }
}

#[no_mangle]
pub unsafe extern "C" fn objc_retainAutorelease(obj: Id) -> Id {
    objc_autorelease(objc_retain(obj))
}

// =======================================================================
// Return-value optimisation
// =======================================================================

/// Probe for the compiler-emitted marker in the caller's instruction
/// stream. Architecture-specific; the portable build has no marker and
/// always reports false, which degrades the optimisation to the plain
/// retain/autorelease pair.
fn caller_has_rv_marker() -> bool {
    false
}

/// Internal handshake used by the consumer-side test: pretend the
/// marker was found for the next claim on this thread.
#[cfg(test)]
pub(crate) unsafe fn force_rv_flag() {
    (*tls::current()).rv_flag = true;
}

#[no_mangle]
pub unsafe extern "C" fn objc_autoreleaseReturnValue(obj: Id) -> Id {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    if caller_has_rv_marker() {
        (*tls::current()).rv_flag = true;
        return obj;
    }
    objc_autorelease(obj)
}

#[no_mangle]
pub unsafe extern "C" fn objc_retainAutoreleaseReturnValue(obj: Id) -> Id {
    objc_autorelease(objc_retain(obj))
}

/// Claim a returned value. When the producer set the handshake flag
/// the object was handed over retained; otherwise retain it here.
#[no_mangle]
pub unsafe extern "C" fn objc_retainAutoreleasedReturnValue(obj: Id) -> Id {
    let state = tls::current();
    if (*state).rv_flag {
        (*state).rv_flag = false;
        return obj;
    }
    objc_retain(obj)
}

// =======================================================================
// Weak references: not supported
// =======================================================================

#[no_mangle]
pub unsafe extern "C-unwind" fn objc_storeWeak(_location: *mut Id, _val: Id) -> Id {
    crate::kerror!("__weak is not supported by this runtime");
    panic!("__weak is not supported");
}

#[no_mangle]
pub unsafe extern "C-unwind" fn objc_loadWeakRetained(_location: *mut Id) -> Id {
    crate::kerror!("__weak is not supported by this runtime");
    panic!("__weak is not supported");
}

#[no_mangle]
pub unsafe extern "C-unwind" fn objc_destroyWeak(_location: *mut Id) {
    crate::kerror!("__weak is not supported by this runtime");
    panic!("__weak is not supported");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ObjcClass;
    use core::sync::atomic::AtomicUsize;
    use serial_test::serial;

    #[repr(C)]
    struct Fixture {
        isa: *mut ObjcClass,
        refcount: AtomicUsize,
    }

    #[test]
    #[serial]
    fn test_store_strong_identity_short_circuit() {
        let mut obj = Fixture {
            isa: core::ptr::null_mut(),
            refcount: AtomicUsize::new(1),
        };
        let id = &mut obj as *mut Fixture as Id;
        let mut slot: Id = id;
        unsafe {
            objc_storeStrong(&mut slot, id);
            assert_eq!(refcount::get(id), 1);
        }
    }

    #[test]
    #[serial]
    fn test_rv_handshake_skips_the_retain() {
        let mut obj = Fixture {
            isa: core::ptr::null_mut(),
            refcount: AtomicUsize::new(1),
        };
        let id = &mut obj as *mut Fixture as Id;
        unsafe {
            force_rv_flag();
            let out = objc_retainAutoreleasedReturnValue(id);
            assert_eq!(out, id);
            // Handed over retained: the claim must not add a count.
            assert_eq!(refcount::get(id), 1);
            // Flag is one-shot: the next claim retains normally.
            let out = objc_retainAutoreleasedReturnValue(id);
            assert_eq!(out, id);
            assert_eq!(refcount::get(id), 2);
        }
    }

    #[test]
    #[serial]
    fn test_rv_producer_without_marker_autoreleases() {
        // No pool in place: the object comes back unchanged and the
        // flag stays clear.
        let mut obj = Fixture {
            isa: core::ptr::null_mut(),
            refcount: AtomicUsize::new(1),
        };
        let id = &mut obj as *mut Fixture as Id;
        unsafe {
            let out = objc_autoreleaseReturnValue(id);
            assert_eq!(out, id);
            assert!(!(*tls::current()).rv_flag);
        }
    }
}
