//! Runtime-private heap.
//!
//! Objects, dispatch tables, autorelease pool frames and heap blocks
//! all come from one fixed region carved out of BSS, managed by a
//! first-fit free-list allocator behind a spinlock. Each allocation
//! carries a small header so `objc_free` needs no size from the
//! caller, and so double frees and wild pointers are caught instead of
//! corrupting the free list.

use core::ffi::c_void;
use core::ptr::addr_of_mut;

use linked_list_allocator::Heap;
use spin::Mutex;

use crate::config::HEAP_SIZE;

/// Magic number for heap block validation.
const HEAP_MAGIC: u32 = 0x0B1EC70C;

#[repr(C)]
struct BlockHeader {
    magic: u32,
    size: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

/// All blocks are 8-byte aligned; the ABI structs never need more.
const BLOCK_ALIGN: usize = 8;

static mut HEAP_REGION: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

static HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

/// Initialise the heap region. Idempotent; called from
/// [`crate::objc_runtime_init`].
pub fn init() {
    let mut heap = HEAP.lock();
    if heap.size() != 0 {
        return;
    }
    // SAFETY: HEAP_REGION is a static region handed to the allocator
    // exactly once, guarded by the heap lock.
    unsafe {
        heap.init(addr_of_mut!(HEAP_REGION) as *mut u8, HEAP_SIZE);
    }
    crate::kinfo!("objcore heap: {} bytes", HEAP_SIZE);
}

fn layout_for(size: usize) -> core::alloc::Layout {
    // Unwrap is fine: size is bounded by the heap region and the
    // alignment is a constant power of two.
    core::alloc::Layout::from_size_align(HEADER_SIZE + size, BLOCK_ALIGN).unwrap()
}

/// Allocate `size` bytes from the runtime heap.
///
/// Returns null on exhaustion (or a zero-size request); the caller
/// decides how to degrade, per the allocation-failure policy.
#[no_mangle]
pub extern "C" fn objc_malloc(size: usize) -> *mut c_void {
    if size == 0 {
        return core::ptr::null_mut();
    }
    let mut heap = HEAP.lock();
    let block = match heap.allocate_first_fit(layout_for(size)) {
        Ok(ptr) => ptr.as_ptr(),
        Err(_) => {
            crate::kwarn!("objc_malloc: heap exhausted ({} bytes requested)", size);
            return core::ptr::null_mut();
        }
    };
    // SAFETY: block points at HEADER_SIZE + size writable bytes.
    unsafe {
        let header = block as *mut BlockHeader;
        (*header).magic = HEAP_MAGIC;
        (*header).size = size as u32;
        block.add(HEADER_SIZE) as *mut c_void
    }
}

/// Free a block previously returned by [`objc_malloc`]. Null is a
/// no-op; a pointer that does not carry our header is logged and
/// ignored.
#[no_mangle]
pub extern "C" fn objc_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: a valid objc_malloc block has its header immediately
    // before the user pointer; the magic check rejects anything else
    // before we touch the free list.
    unsafe {
        let block = (ptr as *mut u8).sub(HEADER_SIZE);
        let header = block as *mut BlockHeader;
        if (*header).magic != HEAP_MAGIC {
            crate::kerror!("objc_free: bad block @{:p}", ptr);
            return;
        }
        let size = (*header).size as usize;
        (*header).magic = 0;
        let mut heap = HEAP.lock();
        heap.deallocate(
            core::ptr::NonNull::new_unchecked(block),
            layout_for(size),
        );
    }
}

/// Grow or shrink a block, preserving contents up to the smaller size.
#[no_mangle]
pub extern "C" fn objc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        return objc_malloc(size);
    }
    if size == 0 {
        objc_free(ptr);
        return core::ptr::null_mut();
    }
    // SAFETY: same header contract as objc_free.
    let old_size = unsafe {
        let header = (ptr as *mut u8).sub(HEADER_SIZE) as *const BlockHeader;
        if (*header).magic != HEAP_MAGIC {
            crate::kerror!("objc_realloc: bad block @{:p}", ptr);
            return core::ptr::null_mut();
        }
        (*header).size as usize
    };
    let fresh = objc_malloc(size);
    if fresh.is_null() {
        return core::ptr::null_mut();
    }
    // SAFETY: both blocks are live and at least min(old, new) bytes.
    unsafe {
        core::ptr::copy_nonoverlapping(
            ptr as *const u8,
            fresh as *mut u8,
            old_size.min(size),
        );
    }
    objc_free(ptr);
    fresh
}

/// Bytes currently handed out (headers included). The integration
/// suite uses this as the "heap returns to baseline" probe.
pub fn used_bytes() -> usize {
    HEAP.lock().used()
}

/// Log a one-line heap summary.
#[no_mangle]
pub extern "C" fn objc_print_heap_info() {
    let heap = HEAP.lock();
    crate::kinfo!(
        "heap: {} used / {} free / {} total",
        heap.used(),
        heap.free(),
        heap.size()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_alloc_free_returns_to_baseline() {
        init();
        let baseline = used_bytes();
        let a = objc_malloc(24);
        let b = objc_malloc(100);
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert!(used_bytes() > baseline);
        objc_free(a);
        objc_free(b);
        assert_eq!(used_bytes(), baseline);
    }

    #[test]
    #[serial]
    fn test_zero_size_and_null_are_noops() {
        init();
        assert!(objc_malloc(0).is_null());
        objc_free(core::ptr::null_mut());
    }

    #[test]
    #[serial]
    fn test_double_free_is_rejected() {
        init();
        let baseline = used_bytes();
        let p = objc_malloc(16);
        objc_free(p);
        // The header magic was cleared by the first free.
        objc_free(p);
        assert_eq!(used_bytes(), baseline);
    }

    #[test]
    #[serial]
    fn test_realloc_preserves_contents() {
        init();
        let p = objc_malloc(8) as *mut u8;
        unsafe {
            for i in 0..8 {
                *p.add(i) = i as u8;
            }
        }
        let q = objc_realloc(p as *mut c_void, 64) as *mut u8;
        assert!(!q.is_null());
        unsafe {
            for i in 0..8 {
                assert_eq!(*q.add(i), i as u8);
            }
        }
        objc_free(q as *mut c_void);
    }
}
