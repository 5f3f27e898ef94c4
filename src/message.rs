//! Message dispatch.
//!
//! `objc_msg_lookup` is the hot path the compiler emits before every
//! send: nil check, pending-category drain, dispatch-cache probe,
//! method-hash walk up the superclass chain, cache fill, one-shot
//! `+initialize`. Unknown selectors are a developer error: they log
//! and return a null IMP for the caller to crash on.

use core::ffi::c_char;

use crate::abi::{ClassFlags, Id, Imp, ObjcClass, ObjcSelector, ObjcSlot, ObjcSuper, Sel};
use crate::category;
use crate::class;
use crate::cstr;
use crate::hash;
use crate::tls;

/// Sentinel implementation for sends to nil: returns the receiver
/// (nil) and touches nothing.
unsafe extern "C" fn nil_imp(receiver: Id, _sel: Sel) -> Id {
    receiver
}

struct SyncSelector(ObjcSelector);
// SAFETY: the selector points at 'static string data and is never
// mutated.
unsafe impl Sync for SyncSelector {}

static INITIALIZE_SEL: SyncSelector = SyncSelector(ObjcSelector {
    name: b"initialize\0".as_ptr() as *const c_char,
    types: core::ptr::null(),
});

/// Hash-walk the chain starting at `cls`: typed lookup first, then
/// name-only, then the superclass.
unsafe fn walk_chain(cls: *mut ObjcClass, sel: Sel) -> Option<Imp> {
    let name = (*sel).name;
    let types = (*sel).types;
    let mut walk = cls;
    while !walk.is_null() {
        if !types.is_null() {
            if let Some(imp) = hash::lookup(walk, name, types) {
                return Some(imp);
            }
        }
        if let Some(imp) = hash::lookup(walk, name, core::ptr::null()) {
            return Some(imp);
        }
        walk = (*walk).superclass;
    }
    None
}

/// Send `+initialize` once per class, parents first.
///
/// The flag is set *before* anything else so a send from inside an
/// `initialize` body cannot recurse. The receiver of the call is the
/// class object, not the metaclass.
unsafe fn send_initialize(meta: *mut ObjcClass) {
    if meta.is_null() {
        return;
    }
    if (*meta).flags().contains(ClassFlags::INITIALIZED) {
        return;
    }
    (*meta).set_flags(ClassFlags::INITIALIZED);

    if !(*meta).superclass.is_null() {
        send_initialize((*meta).superclass);
    }

    let sel: Sel = &INITIALIZE_SEL.0;
    if let Some(imp) = walk_chain(meta, sel) {
        let class_obj = class::find_registered((*meta).name, false);
        let receiver = if class_obj.is_null() {
            meta as Id
        } else {
            class_obj as Id
        };
        imp(receiver, sel);
    }
}

/// Resolve the implementation a send to `receiver` should jump to.
#[no_mangle]
pub unsafe extern "C" fn objc_msg_lookup(receiver: Id, sel: Sel) -> Option<Imp> {
    if receiver.is_null() {
        return Some(nil_imp);
    }
    if sel.is_null() {
        crate::kerror!("objc_msg_lookup: null selector");
        return None;
    }

    if category::pending() {
        class::with_runtime_lock(|| unsafe { category::apply_pending_locked() });
    }

    let cls = (*receiver).isa;
    if cls.is_null() {
        crate::kerror!(
            "objc_msg_lookup: receiver @{:p} has no class (selector={})",
            receiver,
            cstr::as_str((*sel).name)
        );
        return None;
    }
    class::ensure_resolved(cls);

    #[cfg(feature = "dispatch-cache")]
    let cached = crate::dtable::lookup(cls, (*sel).name);
    #[cfg(not(feature = "dispatch-cache"))]
    let cached: Option<Imp> = None;

    let imp = match cached {
        Some(imp) => Some(imp),
        None => {
            let found = walk_chain(cls, sel);
            if let Some(imp) = found {
                #[cfg(feature = "dispatch-cache")]
                crate::dtable::insert(cls, (*sel).name, imp);
            } else {
                crate::kerror!(
                    "objc_msg_lookup: {}[{} {}] cannot send message",
                    if (*cls).is_meta() { '+' } else { '-' },
                    (*cls).name_str(),
                    cstr::as_str((*sel).name)
                );
            }
            found
        }
    };

    // One-shot +initialize before the first send returns.
    let meta = if (*cls).is_meta() {
        cls
    } else {
        (*cls).metaclass
    };
    if !meta.is_null() && !(*meta).flags().contains(ClassFlags::INITIALIZED) {
        send_initialize(meta);
    }

    imp
}

/// Super dispatch: same walk, but starting at the class named in the
/// `{receiver, class}` pair instead of the receiver's own class.
#[no_mangle]
pub unsafe extern "C" fn objc_msg_lookup_super(
    sup: *mut ObjcSuper,
    sel: Sel,
) -> Option<Imp> {
    if sup.is_null() || (*sup).receiver.is_null() || sel.is_null() {
        return None;
    }
    let start = (*sup).class;
    if start.is_null() {
        return None;
    }
    class::ensure_resolved(start);
    let imp = walk_chain(start, sel);
    if imp.is_none() {
        crate::kerror!(
            "objc_msg_lookup_super: {}[{} {}] not found",
            if (*start).is_meta() { '+' } else { '-' },
            (*start).name_str(),
            cstr::as_str((*sel).name)
        );
    }
    imp
}

/// Slot-lookup bridge for compilers that emit super sends as a slot
/// fetch. The record lives in per-thread storage; the caller reads the
/// IMP from its fifth field before the next super send on the same
/// thread.
#[no_mangle]
pub unsafe extern "C" fn objc_slot_lookup_super(
    sup: *mut ObjcSuper,
    sel: Sel,
) -> *mut ObjcSlot {
    let imp = objc_msg_lookup_super(sup, sel);
    let state = tls::current();
    (*state).super_slot = ObjcSlot {
        owner: core::ptr::null_mut(),
        cached_for: core::ptr::null_mut(),
        types: core::ptr::null(),
        version: 0,
        method: imp,
    };
    &mut (*state).super_slot
}

// =======================================================================
// respondsToSelector family
// =======================================================================

#[no_mangle]
pub unsafe extern "C" fn class_respondsToSelector(cls: *mut ObjcClass, sel: Sel) -> bool {
    if cls.is_null() {
        return false;
    }
    if sel.is_null() {
        crate::kwarn!("class_respondsToSelector: null selector");
        return false;
    }
    class::ensure_resolved(cls);
    walk_chain(cls, sel).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn object_respondsToSelector(obj: Id, sel: Sel) -> bool {
    if obj.is_null() {
        return false;
    }
    class_respondsToSelector((*obj).isa, sel)
}

/// Class-side variant: answers for the metaclass even when handed the
/// instance class.
#[no_mangle]
pub unsafe extern "C" fn class_metaclassRespondsToSelector(
    cls: *mut ObjcClass,
    sel: Sel,
) -> bool {
    if cls.is_null() {
        return false;
    }
    let meta = if (*cls).is_meta() {
        cls
    } else {
        (*cls).metaclass
    };
    class_respondsToSelector(meta, sel)
}

#[no_mangle]
pub unsafe extern "C" fn sel_getName(sel: Sel) -> *const c_char {
    if sel.is_null() {
        return core::ptr::null();
    }
    (*sel).name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_receiver_gets_sentinel() {
        unsafe {
            let imp = objc_msg_lookup(core::ptr::null_mut(), core::ptr::null()).unwrap();
            let out = imp(core::ptr::null_mut(), core::ptr::null());
            assert!(out.is_null());
        }
    }

    #[test]
    fn test_super_with_nil_receiver_is_null_imp() {
        unsafe {
            let mut sup = ObjcSuper {
                receiver: core::ptr::null_mut(),
                class: core::ptr::null_mut(),
            };
            assert!(objc_msg_lookup_super(&mut sup, core::ptr::null()).is_none());
        }
    }
}
