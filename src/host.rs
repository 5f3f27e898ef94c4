//! Embedder hooks.
//!
//! The runtime reacts to caller threads and owns no devices, so the
//! two places where it must ask the host for something ("which thread
//! is this?" and "where do log lines go?") are plain function
//! pointers registered at bring-up. Both default to safe no-ops: a
//! single-threaded image never has to call in here at all.

use core::sync::atomic::{AtomicPtr, Ordering};

static THREAD_ID_SOURCE: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static CONSOLE_SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Register the host's thread identifier source.
///
/// The returned value only needs to be stable and unique per live
/// thread; a kernel typically passes its TCB address or task id.
pub fn set_thread_id_source(f: fn() -> usize) {
    THREAD_ID_SOURCE.store(f as *mut (), Ordering::Release);
}

/// Register a console sink for log lines (in addition to the ring
/// buffer, which is always written).
pub fn set_console_sink(f: fn(&str)) {
    CONSOLE_SINK.store(f as *mut (), Ordering::Release);
}

/// Identifier of the calling thread, or 0 when no source is installed.
pub(crate) fn current_thread_id() -> usize {
    let raw = THREAD_ID_SOURCE.load(Ordering::Acquire);
    if raw.is_null() {
        return 0;
    }
    // SAFETY: the pointer was stored from a `fn() -> usize` in
    // set_thread_id_source and fn pointers are address-sized.
    let f: fn() -> usize = unsafe { core::mem::transmute(raw) };
    f()
}

pub(crate) fn console_write(line: &str) {
    let raw = CONSOLE_SINK.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    // SAFETY: stored from a `fn(&str)` in set_console_sink.
    let f: fn(&str) = unsafe { core::mem::transmute(raw) };
    f(line);
}
