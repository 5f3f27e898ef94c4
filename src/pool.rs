//! Autorelease pools.
//!
//! Each thread owns a stack of fixed-capacity pool frames. `push`
//! allocates a frame and makes it current; `autorelease` appends to
//! the current frame; `pop` drains the frame LIFO (each held object
//! receives a `release` message through normal dispatch) and then frees
//! it. Pools are a strict dynamic-extent contract: pops must match
//! pushes in reverse order on the same thread.

use core::ffi::c_char;
use core::ffi::c_void;

use crate::abi::{Id, ObjcSelector, Sel};
use crate::config::AUTORELEASE_POOL_CAPACITY;
use crate::heap;
use crate::tls;

#[repr(C)]
struct PoolFrame {
    objects: [Id; AUTORELEASE_POOL_CAPACITY],
    count: usize,
    parent: *mut PoolFrame,
}

struct SyncSelector(ObjcSelector);
// SAFETY: points at 'static string data, never mutated.
unsafe impl Sync for SyncSelector {}

static RELEASE_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"release\0".as_ptr() as *const c_char,
    types: core::ptr::null(),
});

/// Push a fresh pool onto the calling thread's stack. Returns an
/// opaque token for the matching pop, or null if the heap is dry.
#[no_mangle]
pub extern "C" fn objc_autoreleasePoolPush() -> *mut c_void {
    let frame = heap::objc_malloc(core::mem::size_of::<PoolFrame>()) as *mut PoolFrame;
    if frame.is_null() {
        crate::kerror!("autoreleasePoolPush: out of memory");
        return core::ptr::null_mut();
    }
    let state = tls::current();
    // SAFETY: frame is fresh; state belongs to this thread.
    unsafe {
        (*frame).count = 0;
        (*frame).parent = (*state).pool_top as *mut PoolFrame;
        (*state).pool_top = frame as *mut c_void;
    }
    frame as *mut c_void
}

/// Append `obj` to the calling thread's current pool. With no pool in
/// place the object is returned untouched (and the situation logged);
/// a full frame is a design-time error: raise the capacity or push a
/// nested pool.
///
/// # Safety
/// `obj` must be nil or a managed object.
pub(crate) unsafe fn add_object(obj: Id) -> Id {
    if obj.is_null() {
        return obj;
    }
    let state = tls::current();
    let frame = (*state).pool_top as *mut PoolFrame;
    if frame.is_null() {
        crate::kwarn!("autorelease with no pool in place; object @{:p} leaks", obj);
        return obj;
    }
    if (*frame).count >= AUTORELEASE_POOL_CAPACITY {
        crate::kerror!(
            "autorelease pool overflow ({} objects); object @{:p} leaks",
            AUTORELEASE_POOL_CAPACITY,
            obj
        );
        return obj;
    }
    let index = (*frame).count;
    (*frame).objects[index] = obj;
    (*frame).count = index + 1;
    obj
}

/// Drain one frame in reverse insertion order.
unsafe fn drain(frame: *mut PoolFrame) {
    let sel: Sel = &RELEASE_SEL.0;
    for i in (0..(*frame).count).rev() {
        let obj = (*frame).objects[i];
        if let Some(imp) = crate::message::objc_msg_lookup(obj, sel) {
            imp(obj, sel);
        }
    }
    (*frame).count = 0;
}

/// Scoped pool for Rust-side embedder code: pushes a frame on
/// creation and drains it on every exit path. The C ABI push/pop pair
/// stays available for compiler-emitted code.
pub struct PoolScope {
    token: *mut c_void,
}

impl PoolScope {
    pub fn new() -> Self {
        Self {
            token: objc_autoreleasePoolPush(),
        }
    }
}

impl Default for PoolScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolScope {
    fn drop(&mut self) {
        // SAFETY: the token came from our own push on this thread.
        unsafe { objc_autoreleasePoolPop(self.token) };
    }
}

/// Pop the pool identified by `token`, releasing its contents LIFO.
///
/// Intervening pools still on the stack above the token are drained
/// first; a token that is not on the calling thread's stack is a
/// developer error and is logged and ignored.
#[no_mangle]
pub unsafe extern "C" fn objc_autoreleasePoolPop(token: *mut c_void) {
    if token.is_null() {
        return;
    }
    let state = tls::current();

    // The token must be somewhere on this thread's stack.
    let target = token as *mut PoolFrame;
    let mut probe = (*state).pool_top as *mut PoolFrame;
    let mut found = false;
    while !probe.is_null() {
        if probe == target {
            found = true;
            break;
        }
        probe = (*probe).parent;
    }
    if !found {
        crate::kerror!("autoreleasePoolPop: token @{:p} is not on this thread's stack", token);
        return;
    }

    loop {
        let frame = (*state).pool_top as *mut PoolFrame;
        if frame.is_null() {
            break;
        }
        (*state).pool_top = (*frame).parent as *mut c_void;
        drain(frame);
        let done = frame == target;
        heap::objc_free(frame as *mut c_void);
        if done {
            break;
        }
    }
}
