//! Block (closure) runtime.
//!
//! Implements the block ABI entry points the compiler emits calls to:
//! `_Block_copy`, `_Block_release`, `_Block_object_assign` and
//! `_Block_object_dispose`, plus the three class-tag symbols. Layouts
//! are fixed by the ABI; the reference count lives in bits 1..15 of
//! the flags word (so +-2 steps the count by one), and captured
//! objects are retained and released through message dispatch so the
//! same helpers serve MRR- and ARC-emitted code.

use core::ffi::{c_char, c_int, c_void};
use core::sync::atomic::{AtomicI32, Ordering};

use crate::abi::{Id, ObjcSelector, Sel};
use crate::heap;

// =======================================================================
// Flag words
// =======================================================================

pub const BLOCK_DEALLOCATING: i32 = 0x0001;
/// Bits 1..15: refcount minus one, in steps of two.
pub const BLOCK_REFCOUNT_MASK: i32 = 0xfffe;
pub const BLOCK_IS_NOESCAPE: i32 = 1 << 23;
/// Heap (malloc) block.
pub const BLOCK_NEEDS_FREE: i32 = 1 << 24;
pub const BLOCK_HAS_COPY_DISPOSE: i32 = 1 << 25;
pub const BLOCK_IS_GLOBAL: i32 = 1 << 28;
pub const BLOCK_HAS_SIGNATURE: i32 = 1 << 30;

/// Captured ObjC object.
pub const BLOCK_FIELD_IS_OBJECT: c_int = 3;
/// Captured block.
pub const BLOCK_FIELD_IS_BLOCK: c_int = 7;
/// `__block` variable box.
pub const BLOCK_FIELD_IS_BYREF: c_int = 8;
/// `__weak` capture marker; unsupported here.
pub const BLOCK_FIELD_IS_WEAK: c_int = 16;
/// Internal: call came from a byref copy/dispose helper.
pub const BLOCK_BYREF_CALLER: c_int = 128;

pub const BLOCK_BYREF_NEEDS_FREE: i32 = 1 << 24;
pub const BLOCK_BYREF_HAS_COPY_DISPOSE: i32 = 1 << 25;
pub const BLOCK_BYREF_REFCOUNT_MASK: i32 = 0xfffe;

// =======================================================================
// ABI layouts
// =======================================================================

/// Always present, pointed to by [`BlockLayout::descriptor`].
#[repr(C)]
pub struct BlockDescriptor1 {
    pub reserved: usize,
    /// sizeof(BlockLayout + captured variables).
    pub size: usize,
}

/// Present after [`BlockDescriptor1`] when BLOCK_HAS_COPY_DISPOSE.
#[repr(C)]
pub struct BlockDescriptor2 {
    pub copy: Option<unsafe extern "C" fn(*mut c_void, *const c_void)>,
    pub dispose: Option<unsafe extern "C" fn(*const c_void)>,
}

/// In-memory representation of a block. Captured variables follow.
#[repr(C)]
pub struct BlockLayout {
    pub isa: *mut c_void,
    pub flags: AtomicI32,
    pub reserved: i32,
    pub invoke: *const c_void,
    pub descriptor: *mut BlockDescriptor1,
}

/// `__block` variable box. The optional copy/dispose helper pair
/// follows when BLOCK_BYREF_HAS_COPY_DISPOSE, then the variable data.
#[repr(C)]
pub struct BlockByref {
    pub isa: *mut c_void,
    pub forwarding: *mut BlockByref,
    pub flags: AtomicI32,
    pub size: u32,
}

#[repr(C)]
pub struct BlockByrefHelpers {
    pub keep: Option<unsafe extern "C" fn(*mut BlockByref, *mut BlockByref)>,
    pub destroy: Option<unsafe extern "C" fn(*mut BlockByref)>,
}

// =======================================================================
// Class-tag symbols
// =======================================================================

// The compiler references these as isa tag values; they only need to
// be unique non-null addresses.
#[no_mangle]
pub static mut _NSConcreteStackBlock: [usize; 1] = [0];
#[no_mangle]
pub static mut _NSConcreteGlobalBlock: [usize; 1] = [0];
#[no_mangle]
pub static mut _NSConcreteMallocBlock: [usize; 1] = [0];

fn malloc_block_tag() -> *mut c_void {
    core::ptr::addr_of_mut!(_NSConcreteMallocBlock) as *mut c_void
}

// =======================================================================
// Capture retain/release via dispatch
// =======================================================================

struct SyncSelector(ObjcSelector);
// SAFETY: points at 'static string data, never mutated.
unsafe impl Sync for SyncSelector {}

static RETAIN_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"retain\0".as_ptr() as *const c_char,
    types: core::ptr::null(),
});

static RELEASE_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"release\0".as_ptr() as *const c_char,
    types: core::ptr::null(),
});

unsafe fn retain_captured(obj: Id) {
    if obj.is_null() {
        return;
    }
    let sel: Sel = &RETAIN_SEL.0;
    if let Some(imp) = crate::message::objc_msg_lookup(obj, sel) {
        imp(obj, sel);
    }
}

unsafe fn release_captured(obj: Id) {
    if obj.is_null() {
        return;
    }
    let sel: Sel = &RELEASE_SEL.0;
    if let Some(imp) = crate::message::objc_msg_lookup(obj, sel) {
        imp(obj, sel);
    }
}

// =======================================================================
// Helpers
// =======================================================================

unsafe fn descriptor2(block: *mut BlockLayout) -> *mut BlockDescriptor2 {
    let base = (*block).descriptor as *mut u8;
    base.add(core::mem::size_of::<BlockDescriptor1>()) as *mut BlockDescriptor2
}

unsafe fn byref_helpers(byref: *mut BlockByref) -> *mut BlockByrefHelpers {
    (byref as *mut u8).add(core::mem::size_of::<BlockByref>()) as *mut BlockByrefHelpers
}

// =======================================================================
// Byref copy/release
// =======================================================================

unsafe fn byref_copy(src: *mut BlockByref) -> *mut BlockByref {
    // Already copied: both forwarding pointers aim at the heap box.
    if (*src).forwarding != src {
        let copy = (*src).forwarding;
        (*copy).flags.fetch_add(2, Ordering::Relaxed);
        return copy;
    }

    let copy = heap::objc_malloc((*src).size as usize) as *mut BlockByref;
    if copy.is_null() {
        return core::ptr::null_mut();
    }
    core::ptr::copy_nonoverlapping(src as *const u8, copy as *mut u8, (*src).size as usize);

    (*copy).forwarding = copy;
    (*src).forwarding = copy;

    // Two references at birth: the heap box itself and the stack
    // scope's pending dispose. Refcount 2 encodes as 4 in bits 1..15.
    let src_flags = (*src).flags.load(Ordering::Relaxed);
    (*copy).flags.store(
        (src_flags & !BLOCK_BYREF_REFCOUNT_MASK) | BLOCK_BYREF_NEEDS_FREE | 4,
        Ordering::Relaxed,
    );

    if src_flags & BLOCK_BYREF_HAS_COPY_DISPOSE != 0 {
        let helpers = byref_helpers(copy);
        if let Some(keep) = (*helpers).keep {
            keep(copy, src);
        }
    }

    copy
}

unsafe fn byref_release(byref: *mut BlockByref) {
    if byref.is_null() {
        return;
    }
    let shared = (*byref).forwarding;
    let flags = (*shared).flags.load(Ordering::Relaxed);
    if flags & BLOCK_BYREF_NEEDS_FREE == 0 {
        return;
    }

    let old = (*shared).flags.fetch_sub(2, Ordering::AcqRel);
    if old & BLOCK_BYREF_REFCOUNT_MASK != 2 {
        return;
    }

    if old & BLOCK_BYREF_HAS_COPY_DISPOSE != 0 {
        let helpers = byref_helpers(shared);
        if let Some(destroy) = (*helpers).destroy {
            destroy(shared);
        }
    }
    heap::objc_free(shared as *mut c_void);
}

// =======================================================================
// Compiler-visible entry points
// =======================================================================

/// Copy a block: global blocks come back as-is, heap blocks gain a
/// reference, stack blocks move to the heap (running the copy helper
/// over the captures).
#[no_mangle]
pub unsafe extern "C" fn _Block_copy(arg: *const c_void) -> *mut c_void {
    if arg.is_null() {
        return core::ptr::null_mut();
    }
    let src = arg as *mut BlockLayout;
    let flags = (*src).flags.load(Ordering::Relaxed);

    if flags & BLOCK_IS_GLOBAL != 0 {
        return src as *mut c_void;
    }
    if flags & BLOCK_NEEDS_FREE != 0 {
        (*src).flags.fetch_add(2, Ordering::Relaxed);
        return src as *mut c_void;
    }

    // Stack block: the descriptor knows the full size including
    // captures.
    let size = (*(*src).descriptor).size;
    let copy = heap::objc_malloc(size) as *mut BlockLayout;
    if copy.is_null() {
        return core::ptr::null_mut();
    }
    core::ptr::copy_nonoverlapping(src as *const u8, copy as *mut u8, size);

    (*copy).isa = malloc_block_tag();
    (*copy).flags.store(
        (flags & !BLOCK_REFCOUNT_MASK) | BLOCK_NEEDS_FREE | 2,
        Ordering::Relaxed,
    );

    if flags & BLOCK_HAS_COPY_DISPOSE != 0 {
        let desc2 = descriptor2(copy);
        if let Some(copy_helper) = (*desc2).copy {
            copy_helper(copy as *mut c_void, src as *const c_void);
        }
    }

    copy as *mut c_void
}

/// Release a heap block. Global and stack blocks are no-ops. The last
/// release runs the dispose helper (once) and frees the storage.
#[no_mangle]
pub unsafe extern "C" fn _Block_release(arg: *const c_void) {
    if arg.is_null() {
        return;
    }
    let block = arg as *mut BlockLayout;
    let flags = (*block).flags.load(Ordering::Relaxed);

    if flags & BLOCK_IS_GLOBAL != 0 {
        return;
    }
    if flags & BLOCK_NEEDS_FREE == 0 {
        return;
    }

    let old = (*block).flags.fetch_sub(2, Ordering::AcqRel);
    if old & BLOCK_REFCOUNT_MASK == 2 {
        if old & BLOCK_HAS_COPY_DISPOSE != 0 {
            let desc2 = descriptor2(block);
            if let Some(dispose) = (*desc2).dispose {
                dispose(block as *const c_void);
            }
        }
        heap::objc_free(block as *mut c_void);
    }
}

/// Called by compiler-emitted copy helpers once per captured field.
#[no_mangle]
pub unsafe extern "C-unwind" fn _Block_object_assign(
    dest_arg: *mut c_void,
    src: *const c_void,
    flags: c_int,
) {
    let dest = dest_arg as *mut *const c_void;
    let kind = flags & 0x1f;
    if kind & BLOCK_FIELD_IS_WEAK != 0 {
        crate::kerror!("__weak block captures are not supported by this runtime");
        panic!("__weak block captures are not supported");
    }
    match kind {
        BLOCK_FIELD_IS_OBJECT => {
            retain_captured(src as Id);
            *dest = src;
        }
        BLOCK_FIELD_IS_BLOCK => {
            *dest = _Block_copy(src);
        }
        BLOCK_FIELD_IS_BYREF => {
            *dest = byref_copy(src as *mut BlockByref) as *const c_void;
        }
        _ => {
            *dest = src;
        }
    }
}

/// Called by compiler-emitted dispose helpers once per captured field.
#[no_mangle]
pub unsafe extern "C-unwind" fn _Block_object_dispose(object: *const c_void, flags: c_int) {
    if object.is_null() {
        return;
    }
    let kind = flags & 0x1f;
    if kind & BLOCK_FIELD_IS_WEAK != 0 {
        crate::kerror!("__weak block captures are not supported by this runtime");
        panic!("__weak block captures are not supported");
    }
    match kind {
        BLOCK_FIELD_IS_OBJECT => release_captured(object as Id),
        BLOCK_FIELD_IS_BLOCK => _Block_release(object),
        BLOCK_FIELD_IS_BYREF => byref_release(object as *mut BlockByref),
        _ => {}
    }
}
