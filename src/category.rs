//! Category registry.
//!
//! Categories are a pending-work queue: the loader parks them here and
//! the dispatcher drains the queue at the next message send, grafting
//! each category's method lists onto its (resolved) target class and
//! flushing every dispatch cache afterwards. A category's methods are
//! owned by the target class from then on; they live forever.

use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::abi::ObjcCategory;
use crate::class;
use crate::config::CATEGORY_TABLE_SIZE;
use crate::cstr;
use crate::protocol;

struct CategorySlot {
    cat: AtomicPtr<ObjcCategory>,
    applied: AtomicBool,
}

impl CategorySlot {
    const fn empty() -> Self {
        Self {
            cat: AtomicPtr::new(core::ptr::null_mut()),
            applied: AtomicBool::new(false),
        }
    }
}

static CATEGORY_TABLE: [CategorySlot; CATEGORY_TABLE_SIZE] =
    [const { CategorySlot::empty() }; CATEGORY_TABLE_SIZE];

/// Set when a registered category has not been applied yet; checked on
/// every message send, cleared by the drain.
static PENDING: AtomicBool = AtomicBool::new(false);

/// Park a category until the next dispatch drains the queue. Caller
/// holds the runtime lock.
///
/// # Safety
/// `cat` must be a compiler-emitted category record.
pub(crate) unsafe fn register_locked(cat: *mut ObjcCategory) {
    if cat.is_null() || (*cat).name.is_null() || (*cat).class_name.is_null() {
        return;
    }
    for slot in CATEGORY_TABLE.iter() {
        let existing = slot.cat.load(Ordering::Acquire);
        if existing == cat {
            return;
        }
        if existing.is_null() {
            slot.applied.store(false, Ordering::Relaxed);
            slot.cat.store(cat, Ordering::Release);
            if !(*cat).protocols.is_null() {
                protocol::register_list_locked((*cat).protocols);
            }
            PENDING.store(true, Ordering::Release);
            return;
        }
    }
    crate::kerror!(
        "category table full, cannot register {}({})",
        cstr::as_str((*cat).class_name),
        cstr::as_str((*cat).name)
    );
}

/// Cheap pre-dispatch check.
pub(crate) fn pending() -> bool {
    PENDING.load(Ordering::Acquire)
}

unsafe fn apply_locked(cat: *mut ObjcCategory) {
    let cls = class::find_registered((*cat).class_name, false);
    if cls.is_null() {
        crate::kwarn!(
            "category {}({}) targets an unknown class",
            cstr::as_str((*cat).class_name),
            cstr::as_str((*cat).name)
        );
        return;
    }
    class::resolve_locked(cls);

    let mut ml = (*cat).instance_methods;
    while !ml.is_null() {
        class::register_method_list_locked(cls, ml);
        ml = (*ml).next;
    }

    let meta = (*cls).metaclass;
    if !meta.is_null() {
        let mut ml = (*cat).class_methods;
        while !ml.is_null() {
            class::register_method_list_locked(meta, ml);
            ml = (*ml).next;
        }
    }
}

/// Apply every parked category, then invalidate all dispatch caches.
/// Caller holds the runtime lock. Idempotent.
pub(crate) unsafe fn apply_pending_locked() {
    if !PENDING.swap(false, Ordering::AcqRel) {
        return;
    }
    let mut applied_any = false;
    for slot in CATEGORY_TABLE.iter() {
        let cat = slot.cat.load(Ordering::Acquire);
        if cat.is_null() || slot.applied.load(Ordering::Relaxed) {
            continue;
        }
        slot.applied.store(true, Ordering::Relaxed);
        apply_locked(cat);
        applied_any = true;
    }
    if applied_any {
        // Patched implementations must win over anything cached; a
        // full flush is the only way that is race-free.
        #[cfg(feature = "dispatch-cache")]
        crate::dtable::flush_all();
    }
}

pub(crate) fn registered_count() -> usize {
    CATEGORY_TABLE
        .iter()
        .filter(|slot| !slot.cat.load(Ordering::Acquire).is_null())
        .count()
}
