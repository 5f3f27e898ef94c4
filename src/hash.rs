//! Process-wide method hash table.
//!
//! One open-addressed table maps `(class, selector-name, optional
//! type-encoding)` to an implementation pointer. The class resolver
//! inserts every method twice, once with its type encoding and once
//! without, so name-only lookups never pay a secondary comparison.
//!
//! Inserts happen only under the runtime registry lock; lookups are
//! lock-free. A slot is claimed by publishing the class pointer last
//! with release ordering, so a concurrent reader sees either an empty
//! slot or a fully populated entry. Entries are never removed, which
//! keeps probe sequences stable: the path an insert walked is the path
//! every later lookup walks.

use core::ffi::c_char;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::abi::{Imp, ObjcClass};
use crate::config::METHOD_HASH_SIZE;
use crate::cstr;

struct HashEntry {
    cls: AtomicPtr<ObjcClass>,
    name: AtomicPtr<c_char>,
    types: AtomicPtr<c_char>,
    imp: AtomicUsize,
}

impl HashEntry {
    const fn empty() -> Self {
        Self {
            cls: AtomicPtr::new(core::ptr::null_mut()),
            name: AtomicPtr::new(core::ptr::null_mut()),
            types: AtomicPtr::new(core::ptr::null_mut()),
            imp: AtomicUsize::new(0),
        }
    }
}

static HASH_TABLE: [HashEntry; METHOD_HASH_SIZE] =
    [const { HashEntry::empty() }; METHOD_HASH_SIZE];

/// 31-multiply hash over the class name, a metaclass perturbation, the
/// method name and (when present) the type encoding.
///
/// # Safety
/// `cls` must point to a registered class; strings must be valid.
unsafe fn compute_hash(
    cls: *mut ObjcClass,
    name: *const c_char,
    types: *const c_char,
) -> usize {
    let mut hash: usize = 0;
    let mut p = (*cls).name;
    if !p.is_null() {
        while *p != 0 {
            hash = hash.wrapping_mul(31).wrapping_add(*p as u8 as usize);
            p = p.add(1);
        }
    }
    if (*cls).is_meta() {
        hash = hash.wrapping_add(0x10000);
    }
    if !name.is_null() {
        let mut p = name;
        while *p != 0 {
            hash = hash.wrapping_mul(31).wrapping_add(*p as u8 as usize);
            p = p.add(1);
        }
    }
    if !types.is_null() {
        let mut p = types;
        while *p != 0 {
            hash = hash.wrapping_mul(31).wrapping_add(*p as u8 as usize);
            p = p.add(1);
        }
    }
    hash % METHOD_HASH_SIZE
}

/// Entry match rule: class identity plus name equality; a provided
/// type encoding additionally requires an equal entry encoding, while
/// a null one matches any entry with the right name.
unsafe fn entry_matches(
    entry: &HashEntry,
    cls: *mut ObjcClass,
    name: *const c_char,
    types: *const c_char,
) -> bool {
    if entry.cls.load(Ordering::Acquire) != cls {
        return false;
    }
    let entry_name = entry.name.load(Ordering::Acquire);
    if !cstr::eq(entry_name, name) {
        return false;
    }
    if types.is_null() {
        return true;
    }
    let entry_types = entry.types.load(Ordering::Acquire);
    !entry_types.is_null() && cstr::eq(entry_types, types)
}

/// Register one implementation. Replaces the entry on an exact match
/// (how categories override), claims the first free slot otherwise.
///
/// Returns false when the table wrapped without finding room; the
/// failure is logged and non-fatal (dispatch falls back through the
/// superclass chain without the dropped entry).
///
/// Must be called with the runtime registry lock held.
///
/// # Safety
/// `cls`, `name` and (if non-null) `types` must be valid for the
/// process lifetime; metadata strings always are.
pub unsafe fn insert(
    cls: *mut ObjcClass,
    name: *const c_char,
    types: *const c_char,
    imp: Imp,
) -> bool {
    let start = compute_hash(cls, name, types);
    let mut index = start;
    loop {
        let entry = &HASH_TABLE[index];
        if entry.cls.load(Ordering::Acquire).is_null() {
            entry.name.store(name as *mut c_char, Ordering::Relaxed);
            entry.types.store(types as *mut c_char, Ordering::Relaxed);
            entry.imp.store(imp as usize, Ordering::Relaxed);
            // Publishing the class pointer makes the entry visible.
            entry.cls.store(cls, Ordering::Release);
            return true;
        }
        if entry_matches(entry, cls, name, types) {
            entry.imp.store(imp as usize, Ordering::Release);
            return true;
        }
        index = (index + 1) % METHOD_HASH_SIZE;
        if index == start {
            crate::kerror!(
                "method hash full, dropping [{} {}]",
                (*cls).name_str(),
                cstr::as_str(name)
            );
            return false;
        }
    }
}

/// Look up an implementation for exactly this class (no superclass
/// walk; that is the dispatcher's job). Lock-free.
///
/// # Safety
/// `cls` must point to a registered class; strings must be valid.
pub unsafe fn lookup(
    cls: *mut ObjcClass,
    name: *const c_char,
    types: *const c_char,
) -> Option<Imp> {
    let start = compute_hash(cls, name, types);
    let mut index = start;
    loop {
        let entry = &HASH_TABLE[index];
        if entry.cls.load(Ordering::Acquire).is_null() {
            return None;
        }
        if entry_matches(entry, cls, name, types) {
            let imp = entry.imp.load(Ordering::Acquire);
            // SAFETY: non-null imp words only ever come from Imp
            // pointers stored in insert().
            return Some(core::mem::transmute::<usize, Imp>(imp));
        }
        index = (index + 1) % METHOD_HASH_SIZE;
        if index == start {
            return None;
        }
    }
}

/// Occupied slot count, for the table stats dump.
pub fn used_slots() -> usize {
    HASH_TABLE
        .iter()
        .filter(|e| !e.cls.load(Ordering::Acquire).is_null())
        .count()
}
