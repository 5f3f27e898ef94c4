//! Protocol registry and conformance.
//!
//! Conformance is a reflexive transitive closure: a protocol conforms
//! to itself (or a same-named twin from a separately compiled unit)
//! and to anything its adopted protocols conform to; a class conforms
//! to the union of its own adopted list and its superclass chain.

use core::ffi::c_char;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::abi::{ObjcClass, ObjcProtocol, ObjcProtocolList};
use crate::config::PROTOCOL_TABLE_SIZE;
use crate::cstr;

static PROTOCOL_TABLE: [AtomicPtr<ObjcProtocol>; PROTOCOL_TABLE_SIZE] =
    [const { AtomicPtr::new(core::ptr::null_mut()) }; PROTOCOL_TABLE_SIZE];

/// Register a protocol record and, transitively, everything in its
/// adopted-protocol list. Caller holds the runtime lock.
///
/// # Safety
/// `p` must be a compiler-emitted protocol record.
pub(crate) unsafe fn register_locked(p: *mut ObjcProtocol) {
    if p.is_null() || (*p).name.is_null() {
        return;
    }
    for slot in PROTOCOL_TABLE.iter() {
        let existing = slot.load(Ordering::Acquire);
        if existing == p {
            return;
        }
        if existing.is_null() {
            slot.store(p, Ordering::Release);
            register_list_locked((*p).protocol_list);
            return;
        }
        if cstr::eq((*existing).name, (*p).name) {
            // Separately compiled duplicate record; the first wins.
            return;
        }
    }
    crate::kerror!("protocol table full, cannot register {}", cstr::as_str((*p).name));
}

/// Register every protocol reachable from a protocol-list chain.
/// Caller holds the runtime lock.
///
/// # Safety
/// `list` must be null or a compiler-emitted protocol list.
pub(crate) unsafe fn register_list_locked(list: *mut ObjcProtocolList) {
    let mut list = list;
    while !list.is_null() {
        for &proto in (*list).protocols() {
            if !proto.is_null() {
                register_locked(proto);
            }
        }
        list = (*list).next;
    }
}

pub(crate) fn registered_count() -> usize {
    PROTOCOL_TABLE
        .iter()
        .filter(|slot| !slot.load(Ordering::Acquire).is_null())
        .count()
}

unsafe fn list_conforms(list: *mut ObjcProtocolList, target: *mut ObjcProtocol) -> bool {
    let mut list = list;
    while !list.is_null() {
        for &proto in (*list).protocols() {
            if proto_conformsTo(proto, target) {
                return true;
            }
        }
        list = (*list).next;
    }
    false
}

// =======================================================================
// Compiler-visible entry points
// =======================================================================

#[no_mangle]
pub unsafe extern "C" fn proto_getName(protocol: *mut ObjcProtocol) -> *const c_char {
    if protocol.is_null() {
        return core::ptr::null();
    }
    (*protocol).name
}

/// Protocol-to-protocol conformance: reflexive, name-tolerant,
/// transitive over the adopted-protocol graph.
#[no_mangle]
pub unsafe extern "C" fn proto_conformsTo(
    protocol: *mut ObjcProtocol,
    other: *mut ObjcProtocol,
) -> bool {
    if protocol.is_null() || other.is_null() {
        return false;
    }
    if protocol == other {
        return true;
    }
    if cstr::eq((*protocol).name, (*other).name) {
        return true;
    }
    list_conforms((*protocol).protocol_list, other)
}

/// Class-to-protocol conformance: the class's own adopted list plus
/// the superclass chain.
#[no_mangle]
pub unsafe extern "C" fn class_conformsTo(
    cls: *mut ObjcClass,
    other: *mut ObjcProtocol,
) -> bool {
    if cls.is_null() || other.is_null() {
        return false;
    }
    if list_conforms((*cls).protocols, other) {
        return true;
    }
    let superclass = (*cls).superclass;
    if !superclass.is_null() {
        return class_conformsTo(superclass, other);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_inputs_do_not_conform() {
        unsafe {
            assert!(!proto_conformsTo(core::ptr::null_mut(), core::ptr::null_mut()));
            assert!(!class_conformsTo(core::ptr::null_mut(), core::ptr::null_mut()));
        }
    }
}
