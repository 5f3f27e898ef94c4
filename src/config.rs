//! Compile-time runtime configuration.
//!
//! All capacities are fixed at build time; there are no environment
//! knobs. A deployment that outgrows a table raises the constant and
//! rebuilds, the same way it would resize a kernel Kconfig value.

/// Maximum number of class records (instance classes and metaclasses
/// both occupy a slot).
pub const CLASS_TABLE_SIZE: usize = 64;

/// Maximum number of category records awaiting application.
pub const CATEGORY_TABLE_SIZE: usize = 16;

/// Maximum number of distinct protocol records.
pub const PROTOCOL_TABLE_SIZE: usize = 32;

/// Slots in the global method hash table. Each method costs two slots
/// (typed and untyped entry), so size this at roughly 4x the method
/// count.
pub const METHOD_HASH_SIZE: usize = 512;

/// Maximum number of registered static per-class pools.
pub const STATIC_POOL_TABLE_SIZE: usize = 16;

/// Entries per dispatch-table cache. Must be a power of two.
pub const DISPATCH_TABLE_SIZE: usize = 8;

/// Dispatch tables pre-reserved in BSS before falling back to the heap.
pub const DISPATCH_CACHE_STATIC_COUNT: usize = 16;

/// Object slots per autorelease pool frame.
pub const AUTORELEASE_POOL_CAPACITY: usize = 64;

/// Size in bytes of the runtime-private heap region.
pub const HEAP_SIZE: usize = 64 * 1024;

/// Size in bytes of the kernel-log ring buffer.
pub const LOG_RINGBUF_SIZE: usize = 4096;

/// Maximum number of threads with live per-thread runtime state
/// (autorelease pool stacks, super-slot, RV flag).
pub const MAX_THREADS: usize = 16;

/// Name of the class that backs compiler-emitted constant strings.
/// The loader patches every literal's isa to this class once it is
/// registered.
#[cfg(feature = "literals")]
pub const CONSTANT_STRING_CLASS: &str = "OCString";
