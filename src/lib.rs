//! objcore: a minimal Objective-C-style object runtime core for small
//! embedded kernels.
//!
//! The compiler deposits metadata (classes, categories, protocols,
//! selectors, constant strings, per-ivar offset globals) in dedicated
//! linker sections; this crate wires it into live dispatch tables at
//! load time and services message sends, reference counting,
//! autorelease pools, introspection, static per-class pools and block
//! copy/release. All compiler-visible entry points keep their literal
//! ABI names.
//!
//! The host OS is an external collaborator: it supplies a thread-id
//! source and (optionally) a console sink through [`host`], and calls
//! [`objc_runtime_init`] once during bring-up.

#![cfg_attr(not(test), no_std)]

pub mod abi;
pub mod arc;
mod category;
pub mod class;
pub mod config;
mod cstr;
mod eh;
mod hash;
pub mod heap;
pub mod host;
pub mod instance;
pub mod klog;
pub mod loader;
pub mod message;
pub mod pool;
pub mod property;
pub mod protocol;
pub mod refcount;
mod tls;

#[cfg(feature = "blocks")]
pub mod blocks;
#[cfg(feature = "dispatch-cache")]
pub mod dtable;
#[cfg(feature = "static-pools")]
pub mod spool;

pub use abi::{Id, Imp, Sel};

use core::sync::atomic::{AtomicBool, Ordering};

static RUNTIME_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time runtime bring-up: heap region and a log banner. Metadata
/// loading tolerates running first (the registries are statically
/// initialised); anything that allocates needs this to have run.
#[no_mangle]
pub extern "C" fn objc_runtime_init() {
    if RUNTIME_INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }
    heap::init();
    kinfo!("objcore runtime up");
}

/// Log configured size and current use of every internal table.
#[no_mangle]
pub extern "C" fn objc_print_table_stats() {
    kinfo!("=== objcore table stats ===");
    kinfo!(
        "classes:     {:>3} / {}",
        class::registered_count(),
        config::CLASS_TABLE_SIZE
    );
    kinfo!(
        "categories:  {:>3} / {}",
        category::registered_count(),
        config::CATEGORY_TABLE_SIZE
    );
    kinfo!(
        "protocols:   {:>3} / {}",
        protocol::registered_count(),
        config::PROTOCOL_TABLE_SIZE
    );
    kinfo!(
        "method hash: {:>3} / {}",
        hash::used_slots(),
        config::METHOD_HASH_SIZE
    );
    #[cfg(feature = "dispatch-cache")]
    kinfo!(
        "dtable pool: {:>3} / {}",
        dtable::pool_used(),
        config::DISPATCH_CACHE_STATIC_COUNT
    );
    #[cfg(feature = "static-pools")]
    kinfo!(
        "slab pools:  {:>3} / {}",
        spool::registered_count(),
        config::STATIC_POOL_TABLE_SIZE
    );
    heap::objc_print_heap_info();
}

/// Register a per-class dispatch-table size before the class's first
/// message send.
///
/// ```ignore
/// define_dispatch_table!("Sensor", 32);
/// ```
#[cfg(feature = "dispatch-cache")]
#[macro_export]
macro_rules! define_dispatch_table {
    ($class:expr, $entries:expr) => {
        $crate::dtable::register_dtable_size($class, $entries)
    };
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::klog::LogLevel::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::klog::LogLevel::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::klog::LogLevel::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::klog::LogLevel::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::klog::LogLevel::Trace, $($arg)*);
    }};
}
