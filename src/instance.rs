//! Instance allocation and disposal.
//!
//! The runtime half of `+alloc` / `-dealloc`: carve out a zeroed block
//! (static pool first, heap after), stamp the header, and later route
//! the block back to whichever allocator owns it. Root-class method
//! bodies live with the application; they call down into these.

use core::ffi::c_void;
use core::sync::atomic::Ordering;

use crate::abi::{Id, ObjcClass, ObjectHeader};
use crate::class;
use crate::heap;
use crate::refcount;

/// Allocate a zeroed instance of `cls` with a reference count of 1.
///
/// Consults the static-pool registry for the class before the heap;
/// returns nil when both are exhausted.
#[no_mangle]
pub unsafe extern "C" fn class_createInstance(cls: *mut ObjcClass) -> Id {
    if cls.is_null() {
        return core::ptr::null_mut();
    }
    class::ensure_resolved(cls);

    let size = ((*cls).instance_size.load(Ordering::Relaxed) as usize)
        .max(core::mem::size_of::<ObjectHeader>());

    #[cfg(feature = "static-pools")]
    let pooled = crate::spool::alloc_for_class((*cls).name);
    #[cfg(not(feature = "static-pools"))]
    let pooled: *mut u8 = core::ptr::null_mut();

    let raw = if pooled.is_null() {
        let block = heap::objc_malloc(size) as *mut u8;
        if block.is_null() {
            crate::kwarn!("class_createInstance: out of memory for {}", (*cls).name_str());
            return core::ptr::null_mut();
        }
        core::ptr::write_bytes(block, 0, size);
        block
    } else {
        // Pool blocks come back zeroed already.
        pooled
    };

    let obj = raw as Id;
    (*obj).isa = cls;
    refcount::set(obj, 1);

    if let Some(ctor) = (*cls).cxx_construct {
        ctor(obj, core::ptr::null());
    }

    obj
}

/// Free an instance's storage: back to the owning slab when a
/// registered pool's address range contains it, to the heap otherwise.
/// The object must already be past its `-dealloc`.
#[no_mangle]
pub unsafe extern "C" fn object_dispose(obj: Id) {
    if obj.is_null() {
        return;
    }
    let cls = (*obj).isa;
    if !cls.is_null() {
        if let Some(dtor) = (*cls).cxx_destruct {
            dtor(obj, core::ptr::null());
        }
    }

    #[cfg(feature = "static-pools")]
    if crate::spool::free_routed(obj as *mut u8) {
        return;
    }

    heap::objc_free(obj as *mut c_void);
}
