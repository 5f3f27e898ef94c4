//! Atomic reference-count core.
//!
//! Every managed object carries its count in the word immediately
//! after the isa pointer (see [`crate::abi::ObjectHeader`]); generated
//! code depends on that offset. Immortal classes short-circuit before
//! the atomic is ever touched.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::abi::{Id, ObjectHeader};

/// # Safety
/// `obj` must be a non-null managed object with the standard header.
unsafe fn count_of(obj: Id) -> &'static AtomicUsize {
    &(*(obj as *mut ObjectHeader)).refcount
}

unsafe fn is_immortal(obj: Id) -> bool {
    let isa = (*obj).isa;
    !isa.is_null() && (*isa).is_immortal()
}

/// Increment the count. No-op for nil and immortal instances.
///
/// # Safety
/// `obj` must be nil or a managed object.
pub unsafe fn retain(obj: Id) -> Id {
    if obj.is_null() || is_immortal(obj) {
        return obj;
    }
    count_of(obj).fetch_add(1, Ordering::Relaxed);
    obj
}

/// Decrement the count. Returns true when it hit zero and the caller
/// must dealloc. No-op (false) for nil and immortal instances.
///
/// # Safety
/// `obj` must be nil or a managed object.
pub unsafe fn release(obj: Id) -> bool {
    if obj.is_null() || is_immortal(obj) {
        return false;
    }
    // fetch_sub returns the previous value; the object is dead when
    // the count goes 1 -> 0.
    count_of(obj).fetch_sub(1, Ordering::Release) == 1
}

/// Current count; 0 for nil.
///
/// # Safety
/// `obj` must be nil or a managed object.
pub unsafe fn get(obj: Id) -> usize {
    if obj.is_null() {
        return 0;
    }
    count_of(obj).load(Ordering::Relaxed)
}

/// Store an initial count. Only instance allocation uses this; it is
/// deliberately not an RMW.
///
/// # Safety
/// `obj` must be a managed object no other thread can see yet.
pub unsafe fn set(obj: Id, value: usize) {
    if !obj.is_null() {
        count_of(obj).store(value, Ordering::Relaxed);
    }
}

/// Owning handle for embedder-side Rust code: holds one reference and
/// releases it on drop, whatever the exit path. Raw `Id`s stay the
/// currency of the C ABI.
pub struct Retained(Id);

impl Retained {
    /// Take shared ownership of a live object.
    ///
    /// # Safety
    /// `obj` must be nil or a managed object.
    pub unsafe fn retaining(obj: Id) -> Self {
        crate::arc::objc_retain(obj);
        Self(obj)
    }

    /// Adopt a reference the caller already owns (e.g. fresh from
    /// allocation).
    ///
    /// # Safety
    /// `obj` must be nil or a managed object the caller owns one
    /// reference to.
    pub unsafe fn from_owned(obj: Id) -> Self {
        Self(obj)
    }

    pub fn as_id(&self) -> Id {
        self.0
    }
}

impl Drop for Retained {
    fn drop(&mut self) {
        // SAFETY: the handle owns exactly one reference.
        unsafe { crate::arc::objc_release(self.0) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ObjcClass;
    use core::sync::atomic::AtomicUsize;

    #[repr(C)]
    struct Fixture {
        isa: *mut ObjcClass,
        refcount: AtomicUsize,
        payload: u32,
    }

    #[test]
    fn test_retain_release_counts() {
        let mut obj = Fixture {
            isa: core::ptr::null_mut(),
            refcount: AtomicUsize::new(1),
            payload: 42,
        };
        let id = &mut obj as *mut Fixture as Id;
        unsafe {
            retain(id);
            retain(id);
            assert_eq!(get(id), 3);
            assert!(!release(id));
            assert!(!release(id));
            assert_eq!(get(id), 1);
            assert!(release(id));
            assert_eq!(get(id), 0);
        }
    }

    #[test]
    fn test_nil_is_inert() {
        unsafe {
            assert!(retain(core::ptr::null_mut()).is_null());
            assert!(!release(core::ptr::null_mut()));
            assert_eq!(get(core::ptr::null_mut()), 0);
            set(core::ptr::null_mut(), 7);
        }
    }

    #[test]
    fn test_set_is_plain_store() {
        let mut obj = Fixture {
            isa: core::ptr::null_mut(),
            refcount: AtomicUsize::new(0),
            payload: 0,
        };
        let id = &mut obj as *mut Fixture as Id;
        unsafe {
            set(id, 5);
            assert_eq!(get(id), 5);
        }
    }
}
