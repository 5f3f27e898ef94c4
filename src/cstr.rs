//! NUL-terminated string helpers for compiler-emitted metadata.
//!
//! Every name in the metadata sections (class names, selector names,
//! type encodings) is a C string owned by the image. These helpers do
//! byte-level work on raw pointers so the registries never allocate.

use core::ffi::c_char;

/// Length of a NUL-terminated string, not counting the terminator.
///
/// # Safety
/// `p` must point to a valid NUL-terminated string.
pub unsafe fn len(p: *const c_char) -> usize {
    let mut n = 0;
    while *p.add(n) != 0 {
        n += 1;
    }
    n
}

/// Byte-wise equality of two NUL-terminated strings.
///
/// Null pointers compare equal only to each other.
///
/// # Safety
/// Non-null arguments must point to valid NUL-terminated strings.
pub unsafe fn eq(a: *const c_char, b: *const c_char) -> bool {
    if a.is_null() || b.is_null() {
        return a == b;
    }
    if a == b {
        return true;
    }
    let mut i = 0;
    loop {
        let ca = *a.add(i);
        let cb = *b.add(i);
        if ca != cb {
            return false;
        }
        if ca == 0 {
            return true;
        }
        i += 1;
    }
}

/// Compare a NUL-terminated string against a Rust string.
///
/// # Safety
/// `a` must be null or point to a valid NUL-terminated string.
pub unsafe fn eq_str(a: *const c_char, b: &str) -> bool {
    if a.is_null() {
        return false;
    }
    let bytes = b.as_bytes();
    let mut i = 0;
    loop {
        let ca = *a.add(i) as u8;
        if i == bytes.len() {
            return ca == 0;
        }
        if ca != bytes[i] {
            return false;
        }
        i += 1;
    }
}

/// Borrow a NUL-terminated string as `&str` for log lines.
///
/// Returns a placeholder for null pointers; invalid UTF-8 is replaced
/// byte-for-byte lossily only in the sense that log output may look
/// odd; metadata names are ASCII in practice.
///
/// # Safety
/// Non-null `p` must point to a valid NUL-terminated string that
/// outlives the returned borrow.
pub unsafe fn as_str<'a>(p: *const c_char) -> &'a str {
    if p.is_null() {
        return "(null)";
    }
    let bytes = core::slice::from_raw_parts(p as *const u8, len(p));
    core::str::from_utf8(bytes).unwrap_or("(non-utf8)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_and_eq() {
        let a = b"retain\0";
        let b = b"retain\0";
        let c = b"release\0";
        unsafe {
            assert_eq!(len(a.as_ptr() as *const c_char), 6);
            assert!(eq(a.as_ptr() as *const c_char, b.as_ptr() as *const c_char));
            assert!(!eq(a.as_ptr() as *const c_char, c.as_ptr() as *const c_char));
            assert!(eq(core::ptr::null(), core::ptr::null()));
            assert!(!eq(a.as_ptr() as *const c_char, core::ptr::null()));
        }
    }

    #[test]
    fn test_eq_str_prefix_is_not_equal() {
        let a = b"initialize\0";
        unsafe {
            assert!(eq_str(a.as_ptr() as *const c_char, "initialize"));
            assert!(!eq_str(a.as_ptr() as *const c_char, "init"));
            assert!(!eq_str(a.as_ptr() as *const c_char, "initialized"));
        }
    }

    #[test]
    fn test_as_str_null() {
        unsafe {
            assert_eq!(as_str(core::ptr::null()), "(null)");
        }
    }
}
