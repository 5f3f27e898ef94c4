//! Exception-handling stub.
//!
//! The runtime does not propagate exceptions; the compiler still
//! references an unwind personality symbol, so a no-op one is
//! provided.

use core::ffi::c_int;

/// Personality routine referenced by compiler-emitted unwind tables.
/// Always reports "nothing to do".
#[no_mangle]
pub extern "C" fn __gnu_objc_personality_v0() -> c_int {
    0
}
