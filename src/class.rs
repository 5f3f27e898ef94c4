//! Class registry and resolver.
//!
//! Classes are registered by the loader and resolved lazily: the first
//! lookup (or the first message sent to an instance) registers the
//! class's methods in the global hash, wires the metaclass chain,
//! fixes non-fragile ivar offsets and computes the instance size. A
//! class is mutated exactly once, under the process-wide runtime lock;
//! after the RESOLVED flag is visible its layout is frozen for the
//! life of the process.

use core::ffi::{c_char, c_int, c_void};
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

use crate::abi::{ClassFlags, Id, ObjcClass};
use crate::config::CLASS_TABLE_SIZE;
use crate::cstr;
use crate::hash;
use crate::protocol;

static CLASS_TABLE: [AtomicPtr<ObjcClass>; CLASS_TABLE_SIZE] =
    [const { AtomicPtr::new(core::ptr::null_mut()) }; CLASS_TABLE_SIZE];

/// Process-wide registry lock. Held across registration, class
/// resolution and category application; never held while running user
/// code (IMPs, copy helpers).
static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

/// Run `f` with the registry lock held.
pub(crate) fn with_runtime_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = RUNTIME_LOCK.lock();
    f()
}

/// Register a class (or metaclass) record. Caller holds the runtime
/// lock.
///
/// Duplicate names warn unless the pair is the legal metaclass /
/// instance-class twin; re-registering the same record is a no-op.
///
/// # Safety
/// `p` must be a compiler-emitted class record, valid for the process
/// lifetime.
pub(crate) unsafe fn register_locked(p: *mut ObjcClass) {
    if p.is_null() || (*p).name.is_null() {
        return;
    }

    // The compiler encodes "runtime computes the layout" as a negative
    // instance size; normalise so size reads are sane before fixup.
    let size = (*p).instance_size.load(Ordering::Relaxed);
    if size < 0 {
        (*p).instance_size.store(-size, Ordering::Relaxed);
    }

    for slot in CLASS_TABLE.iter() {
        let existing = slot.load(Ordering::Acquire);
        if existing == p {
            return;
        }
        if existing.is_null() {
            slot.store(p, Ordering::Release);
            if !(*p).protocols.is_null() {
                protocol::register_list_locked((*p).protocols);
            }
            return;
        }
        if cstr::eq((*existing).name, (*p).name) {
            let same_kind = (*existing).is_meta() == (*p).is_meta();
            if same_kind {
                crate::kwarn!("duplicate class named {}", (*p).name_str());
            }
        }
    }
    crate::kerror!("class table full, cannot register {}", (*p).name_str());
}

/// Raw scan for a registered class by name. Returns the first match of
/// the requested kind (instance class or metaclass). Lock-free.
pub(crate) fn find_registered(name: *const c_char, meta: bool) -> *mut ObjcClass {
    if name.is_null() {
        return core::ptr::null_mut();
    }
    for slot in CLASS_TABLE.iter() {
        let cls = slot.load(Ordering::Acquire);
        if cls.is_null() {
            continue;
        }
        // SAFETY: non-null table entries are registered class records.
        unsafe {
            if (*cls).is_meta() == meta && cstr::eq((*cls).name, name) {
                return cls;
            }
        }
    }
    core::ptr::null_mut()
}

/// [`find_registered`] for a Rust-side name (config constants).
pub(crate) fn find_registered_str(name: &str, meta: bool) -> *mut ObjcClass {
    for slot in CLASS_TABLE.iter() {
        let cls = slot.load(Ordering::Acquire);
        if cls.is_null() {
            continue;
        }
        // SAFETY: non-null table entries are registered class records.
        unsafe {
            if (*cls).is_meta() == meta && cstr::eq_str((*cls).name, name) {
                return cls;
            }
        }
    }
    core::ptr::null_mut()
}

/// Visit every registered class. Used by the dispatch-cache flush and
/// the stats dump.
pub(crate) fn each_class(mut f: impl FnMut(*mut ObjcClass)) {
    for slot in CLASS_TABLE.iter() {
        let cls = slot.load(Ordering::Acquire);
        if !cls.is_null() {
            f(cls);
        }
    }
}

pub(crate) fn registered_count() -> usize {
    CLASS_TABLE
        .iter()
        .filter(|slot| !slot.load(Ordering::Acquire).is_null())
        .count()
}

/// Register every method of one list under `cls`, with and without the
/// type encoding.
///
/// # Safety
/// Caller holds the runtime lock; `cls` and `ml` are valid metadata.
pub(crate) unsafe fn register_method_list_locked(
    cls: *mut ObjcClass,
    ml: *mut crate::abi::ObjcMethodList,
) {
    if ml.is_null() {
        return;
    }
    for method in (*ml).methods() {
        let imp = match method.imp {
            Some(imp) => imp,
            None => continue,
        };
        if method.selector.is_null() {
            continue;
        }
        let name = (*method.selector).name;
        if name.is_null() {
            continue;
        }
        if !hash::insert(cls, name, method.types, imp) {
            return;
        }
        if !hash::insert(cls, name, core::ptr::null(), imp) {
            return;
        }
    }
}

/// Walk the method-list chain into the hash table and recursively
/// resolve the superclass. Sets RESOLVED up front to break re-entry
/// from category application.
unsafe fn register_methods_locked(p: *mut ObjcClass) {
    if p.is_null() || (*p).is_resolved() {
        return;
    }
    (*p).set_flags(ClassFlags::RESOLVED);

    let mut ml = (*p).methods;
    while !ml.is_null() {
        register_method_list_locked(p, ml);
        ml = (*ml).next;
    }

    if !(*p).superclass.is_null() && !(*p).is_meta() {
        let superclass = (*p).superclass;
        if !(*superclass).is_resolved() {
            resolve_locked(superclass);
        }
    }
}

/// Fix up non-fragile ivar offsets and compute the instance size.
///
/// Offsets start at the superclass instance size, or at the bare
/// header size for immortal classes, whose statically initialised
/// instances must match the layout the compiler assumed. Each ivar is
/// aligned to `min(size, word)` and its offset written through the
/// compiler-emitted global slot.
unsafe fn fixup_ivar_offsets(cls: *mut ObjcClass) {
    if cls.is_null() || (*cls).is_meta() {
        return;
    }

    let mut offset: usize = 0;
    if !(*cls).superclass.is_null() {
        if (*cls).is_immortal() {
            offset = core::mem::size_of::<crate::abi::ObjcObject>();
        } else {
            offset = (*(*cls).superclass).instance_size.load(Ordering::Relaxed) as usize;
        }
    }

    let il = (*cls).ivars;
    if !il.is_null() {
        for ivar in (*il).ivars() {
            let size = ivar.size as usize;
            let mut align = size.min(core::mem::size_of::<*const c_void>());
            if align == 0 {
                align = 1;
            }
            offset = (offset + align - 1) & !(align - 1);
            if !ivar.offset.is_null() {
                *ivar.offset = offset as c_int;
            }
            offset += size;
        }
    }

    (*cls).instance_size.store(offset as isize, Ordering::Relaxed);
}

/// Resolve a class pair in place: methods into the hash, metaclass
/// superclass wired to the superclass's metaclass, ivar offsets fixed.
/// Caller holds the runtime lock.
///
/// # Safety
/// `cls` must be a registered class record.
pub(crate) unsafe fn resolve_locked(cls: *mut ObjcClass) {
    let mut cls = cls;
    if (*cls).is_meta() {
        // Resolving a metaclass resolves the whole pair.
        let instance = find_registered((*cls).name, false);
        if instance.is_null() {
            register_methods_locked(cls);
            return;
        }
        cls = instance;
    }

    let meta = (*cls).metaclass;
    if (*cls).is_resolved() && (meta.is_null() || (*meta).is_resolved()) {
        return;
    }

    register_methods_locked(cls);

    // Wire the metaclass chain before registering metaclass methods so
    // class-side dispatch can walk to the superclass's metaclass.
    if !meta.is_null() && !(*cls).superclass.is_null() {
        (*meta).superclass = (*(*cls).superclass).metaclass;
    }
    if !meta.is_null() {
        register_methods_locked(meta);
    }

    fixup_ivar_offsets(cls);
}

/// Resolve the class `obj`'s dispatch is about to walk. Takes the
/// runtime lock only when resolution is still pending.
pub(crate) fn ensure_resolved(cls: *mut ObjcClass) {
    if cls.is_null() {
        return;
    }
    // SAFETY: dispatch only hands us registered class records.
    unsafe {
        let meta_pending = !(*cls).is_meta()
            && !(*cls).metaclass.is_null()
            && !(*(*cls).metaclass).is_resolved();
        if (*cls).is_resolved() && !meta_pending {
            return;
        }
        with_runtime_lock(|| unsafe { resolve_locked(cls) });
    }
}

// =======================================================================
// Compiler-visible entry points
// =======================================================================

/// Look up a class by name, resolving it on first use. Returns null
/// for unknown names or a null `name`.
#[no_mangle]
pub unsafe extern "C" fn objc_lookup_class(name: *const c_char) -> *mut ObjcClass {
    let cls = find_registered(name, false);
    if cls.is_null() {
        return core::ptr::null_mut();
    }
    ensure_resolved(cls);
    cls
}

/// Like [`objc_lookup_class`] but an unknown name is a developer
/// error: it is logged and null is returned for the caller to crash
/// on.
#[no_mangle]
pub unsafe extern "C" fn objc_get_class(name: *const c_char) -> *mut ObjcClass {
    let cls = objc_lookup_class(name);
    if cls.is_null() {
        crate::kerror!("objc_get_class: class {} not found", cstr::as_str(name));
    }
    cls
}

#[no_mangle]
pub unsafe extern "C" fn class_getName(cls: *mut ObjcClass) -> *const c_char {
    if cls.is_null() {
        return core::ptr::null();
    }
    (*cls).name
}

#[no_mangle]
pub unsafe extern "C" fn object_getClassName(obj: Id) -> *const c_char {
    if obj.is_null() {
        return core::ptr::null();
    }
    class_getName((*obj).isa)
}

#[no_mangle]
pub unsafe extern "C" fn object_getClass(obj: Id) -> *mut ObjcClass {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    (*obj).isa
}

/// Swap an object's class. Refuses null arguments and metaclasses.
#[no_mangle]
pub unsafe extern "C" fn object_setClass(obj: Id, cls: *mut ObjcClass) {
    if obj.is_null() || cls.is_null() {
        crate::kwarn!("object_setClass: null object or class");
        return;
    }
    if (*cls).is_meta() {
        crate::kwarn!("object_setClass: cannot set class to a metaclass");
        return;
    }
    (*obj).isa = cls;
}

#[no_mangle]
pub unsafe extern "C" fn object_isKindOfClass(obj: Id, cls: *mut ObjcClass) -> bool {
    if obj.is_null() || cls.is_null() {
        return false;
    }
    let mut walk = (*obj).isa;
    while !walk.is_null() {
        if walk == cls {
            return true;
        }
        walk = (*walk).superclass;
    }
    false
}

#[no_mangle]
pub unsafe extern "C" fn class_getInstanceSize(cls: *mut ObjcClass) -> usize {
    if cls.is_null() {
        return 0;
    }
    (*cls).instance_size.load(Ordering::Relaxed) as usize
}

#[no_mangle]
pub unsafe extern "C" fn class_getSuperclass(cls: *mut ObjcClass) -> *mut ObjcClass {
    if cls.is_null() {
        return core::ptr::null_mut();
    }
    (*cls).superclass
}

#[no_mangle]
pub unsafe extern "C" fn object_getSuperclass(obj: Id) -> *mut ObjcClass {
    if obj.is_null() {
        return core::ptr::null_mut();
    }
    (*(*obj).isa).superclass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ivar_alignment_rule() {
        // min(size, word) alignment, zero-size ivars align to 1.
        let word = core::mem::size_of::<*const c_void>();
        let align = |size: usize| -> usize {
            let a = size.min(word);
            if a == 0 {
                1
            } else {
                a
            }
        };
        assert_eq!(align(1), 1);
        assert_eq!(align(2), 2);
        assert_eq!(align(4), 4);
        assert_eq!(align(16), word);
        assert_eq!(align(0), 1);

        // Packing: {u8, u32, u8, u32} lays out as 0, 4, 8, 12.
        let mut offsets = [0usize; 4];
        let mut offset = 0usize;
        for (i, size) in [1usize, 4, 1, 4].into_iter().enumerate() {
            let a = align(size);
            offset = (offset + a - 1) & !(a - 1);
            offsets[i] = offset;
            offset += size;
        }
        assert_eq!(offsets, [0, 4, 8, 12]);
        assert_eq!(offset, 16);
    }

    #[test]
    fn test_find_registered_null_name() {
        assert!(find_registered(core::ptr::null(), false).is_null());
    }
}
