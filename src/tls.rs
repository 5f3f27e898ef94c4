//! Per-thread runtime state.
//!
//! The runtime never spawns threads; it keys a fixed table of state
//! records by the embedder's thread identifier (see [`crate::host`]).
//! Each record is only ever touched by its own thread, so access is a
//! lock-free id scan plus a CAS to claim a free slot. Threads beyond
//! `MAX_THREADS` share one overflow record (logged, correct, slow).

use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::abi::ObjcSlot;
use crate::config::MAX_THREADS;
use crate::host;

/// State owned by one thread.
pub(crate) struct ThreadState {
    /// Top of this thread's autorelease-pool stack.
    pub pool_top: *mut c_void,
    /// Return-value optimisation handshake flag.
    pub rv_flag: bool,
    /// Scratch slot returned by the super slot-lookup bridge.
    pub super_slot: ObjcSlot,
}

impl ThreadState {
    const fn new() -> Self {
        Self {
            pool_top: core::ptr::null_mut(),
            rv_flag: false,
            super_slot: ObjcSlot::empty(),
        }
    }
}

const SLOT_FREE: usize = usize::MAX;

struct ThreadSlot {
    id: AtomicUsize,
    state: UnsafeCell<ThreadState>,
}

// SAFETY: `state` is only dereferenced by the thread whose id claimed
// the slot (or, for the overflow slot, by callers who accept sharing).
unsafe impl Sync for ThreadSlot {}

impl ThreadSlot {
    const fn new() -> Self {
        Self {
            id: AtomicUsize::new(SLOT_FREE),
            state: UnsafeCell::new(ThreadState::new()),
        }
    }
}

/// One extra slot at the end backs threads past the table capacity.
static THREADS: [ThreadSlot; MAX_THREADS + 1] =
    [const { ThreadSlot::new() }; MAX_THREADS + 1];

static OVERFLOW_LOGGED: AtomicBool = AtomicBool::new(false);

/// State record for the calling thread.
///
/// The returned pointer stays valid for the process lifetime; only the
/// owning thread may dereference it.
pub(crate) fn current() -> *mut ThreadState {
    let tid = host::current_thread_id();
    for slot in THREADS[..MAX_THREADS].iter() {
        let owner = slot.id.load(Ordering::Acquire);
        if owner == tid {
            return slot.state.get();
        }
        if owner == SLOT_FREE
            && slot
                .id
                .compare_exchange(SLOT_FREE, tid, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return slot.state.get();
        }
        // Lost the race; if the winner was us-under-another-scan the
        // next iteration's match check picks it up.
        if slot.id.load(Ordering::Acquire) == tid {
            return slot.state.get();
        }
    }
    if !OVERFLOW_LOGGED.swap(true, Ordering::Relaxed) {
        crate::kerror!("thread table full ({} threads); sharing overflow slot", MAX_THREADS);
    }
    THREADS[MAX_THREADS].state.get()
}
