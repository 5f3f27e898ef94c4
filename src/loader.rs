//! Metadata loader.
//!
//! Each translation unit's constructor hands the runtime a
//! [`LoadDescriptor`] pointing at that unit's metadata sections. The
//! loader registers classes (and their metaclasses), parks categories,
//! registers protocols transitively, and patches constant-string isa
//! pointers; everything else is walked for diagnostics only. Loading
//! is idempotent: a consumed descriptor is stamped with the sentinel
//! version and skipped on re-entry.

use crate::abi::{LoadDescriptor, LOAD_VERSION_DONE};
use crate::category;
use crate::class;
use crate::protocol;

/// Number of elements in a half-open metadata range.
unsafe fn range_len<T>(begin: *mut T, end: *mut T) -> usize {
    if begin.is_null() || end.is_null() || end <= begin {
        return 0;
    }
    (end as usize - begin as usize) / core::mem::size_of::<T>()
}

#[cfg(feature = "literals")]
unsafe fn patch_constant_strings(init: *mut LoadDescriptor) {
    use crate::config::CONSTANT_STRING_CLASS;

    let count = range_len((*init).str_begin, (*init).str_end);
    if count == 0 {
        return;
    }
    let string_cls = class::find_registered_str(CONSTANT_STRING_CLASS, false);
    if string_cls.is_null() {
        crate::kwarn!(
            "{} constant strings but class {} is not registered",
            count,
            CONSTANT_STRING_CLASS
        );
        return;
    }
    let mut s = (*init).str_begin;
    while s < (*init).str_end {
        (*s).isa = string_cls;
        s = s.add(1);
    }
    crate::kdebug!("patched {} constant strings", count);
}

/// Consume one load descriptor. Safe to call more than once per
/// descriptor; a version the runtime does not speak is rejected with a
/// log line.
#[no_mangle]
pub unsafe extern "C" fn __objc_load(init: *mut LoadDescriptor) {
    if init.is_null() {
        return;
    }
    if (*init).version == LOAD_VERSION_DONE {
        return;
    }
    if (*init).version != 0 {
        crate::kerror!("__objc_load: unsupported ABI version {}", (*init).version);
        return;
    }

    class::with_runtime_lock(|| unsafe {
        // Selectors are matched by name; no interning pass is needed.
        crate::kdebug!(
            "loading {} selectors, {} classes, {} categories, {} protocols",
            range_len((*init).sel_begin, (*init).sel_end),
            range_len((*init).cls_begin, (*init).cls_end),
            range_len((*init).cat_begin, (*init).cat_end),
            range_len((*init).proto_begin, (*init).proto_end)
        );

        let mut cls = (*init).cls_begin;
        while cls < (*init).cls_end {
            if !(*cls).is_null() {
                class::register_locked(*cls);
                let meta = (**cls).metaclass;
                if !meta.is_null() {
                    class::register_locked(meta);
                }
            }
            cls = cls.add(1);
        }

        let mut cat = (*init).cat_begin;
        while cat < (*init).cat_end {
            if !(*cat).is_null() {
                category::register_locked(*cat);
            }
            cat = cat.add(1);
        }

        let mut proto = (*init).proto_begin;
        while proto < (*init).proto_end {
            if !(*proto).is_null() {
                protocol::register_locked(*proto);
            }
            proto = proto.add(1);
        }

        // Class refs, protocol refs and aliases are link-time
        // artefacts; dynamic aliasing is not supported.
        let refs = range_len((*init).cls_ref_begin, (*init).cls_ref_end)
            + range_len((*init).proto_ref_begin, (*init).proto_ref_end)
            + range_len((*init).alias_begin, (*init).alias_end);
        if refs > 0 {
            crate::kdebug!("skipping {} reference/alias records", refs);
        }

        #[cfg(feature = "literals")]
        patch_constant_strings(init);
    });

    (*init).version = LOAD_VERSION_DONE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        let mut data = [0u64; 4];
        let begin = data.as_mut_ptr();
        unsafe {
            assert_eq!(range_len(begin, begin.add(4)), 4);
            assert_eq!(range_len(begin, begin), 0);
            assert_eq!(range_len::<u64>(core::ptr::null_mut(), core::ptr::null_mut()), 0);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_unsupported_version_is_rejected() {
        let mut init: LoadDescriptor = unsafe { core::mem::zeroed() };
        init.version = 7;
        unsafe { __objc_load(&mut init) };
        // Rejected: the sentinel is only stamped on a successful load.
        assert_eq!(init.version, 7);
    }

    #[test]
    #[serial_test::serial]
    fn test_empty_descriptor_is_idempotent() {
        let mut init: LoadDescriptor = unsafe { core::mem::zeroed() };
        unsafe {
            __objc_load(&mut init);
            assert_eq!(init.version, LOAD_VERSION_DONE);
            __objc_load(&mut init);
            assert_eq!(init.version, LOAD_VERSION_DONE);
        }
    }
}
