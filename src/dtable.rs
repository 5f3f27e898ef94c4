//! Per-class dispatch-table caches.
//!
//! Each class owns a small open-addressed table mapping selector-name
//! pointers to implementations, consulted before the global method
//! hash. Tables come from a fixed BSS pool first and the heap after;
//! a table is installed on a class exactly once and reused across
//! flushes.
//!
//! Reads are lock-free. Writers serialise on one spinlock and publish
//! `{imp, name}` in that order with release stores, so a reader sees
//! either an empty slot, or a name with its implementation already
//! visible. Flushing zeroes names first and implementations second;
//! the reader treats a zero implementation as a miss to close the
//! window.

use core::ffi::{c_char, c_void};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use spin::Mutex;

use crate::abi::{Imp, ObjcClass};
use crate::config::{DISPATCH_CACHE_STATIC_COUNT, DISPATCH_TABLE_SIZE};
use crate::cstr;
use crate::heap;

#[repr(C)]
pub struct DtableEntry {
    name: AtomicPtr<c_char>,
    imp: AtomicUsize,
}

impl DtableEntry {
    const fn empty() -> Self {
        Self {
            name: AtomicPtr::new(core::ptr::null_mut()),
            imp: AtomicUsize::new(0),
        }
    }
}

/// Table header: the power-of-two mask immediately precedes the entry
/// array.
#[repr(C)]
pub struct Dtable {
    mask: usize,
    entries: [DtableEntry; 0],
}

impl Dtable {
    unsafe fn entry(&self, index: usize) -> &DtableEntry {
        &*self.entries.as_ptr().add(index)
    }
}

/// Fixed-size pool block. Layout-compatible with [`Dtable`].
#[repr(C)]
struct DtableBlock {
    mask: usize,
    entries: [DtableEntry; DISPATCH_TABLE_SIZE],
}

impl DtableBlock {
    const fn new() -> Self {
        Self {
            mask: DISPATCH_TABLE_SIZE - 1,
            entries: [const { DtableEntry::empty() }; DISPATCH_TABLE_SIZE],
        }
    }
}

/// Tier 1: static pool in BSS.
static DTABLE_POOL: [DtableBlock; DISPATCH_CACHE_STATIC_COUNT] =
    [const { DtableBlock::new() }; DISPATCH_CACHE_STATIC_COUNT];
static DTABLE_POOL_NEXT: AtomicUsize = AtomicUsize::new(0);

/// Serialises inserts, allocations and flushes; lookups never take it.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Per-class table-size overrides registered at compile time via
/// [`crate::define_dispatch_table!`].
struct SizeOverride {
    class_name: &'static str,
    entries: usize,
}

static SIZE_OVERRIDES: Mutex<[Option<SizeOverride>; 8]> =
    Mutex::new([const { None }; 8]);

/// Record a dispatch-table size for a class before its first message
/// send. `entries` is rounded up to a power of two.
pub fn register_dtable_size(class_name: &'static str, entries: usize) {
    let entries = entries.next_power_of_two().max(2);
    let mut overrides = SIZE_OVERRIDES.lock();
    for slot in overrides.iter_mut() {
        if slot.is_none() {
            *slot = Some(SizeOverride {
                class_name,
                entries,
            });
            return;
        }
    }
    crate::kwarn!("dispatch-table override table full for {}", class_name);
}

unsafe fn size_for_class(cls: *mut ObjcClass) -> usize {
    let overrides = SIZE_OVERRIDES.lock();
    for entry in overrides.iter().flatten() {
        if cstr::eq_str((*cls).name, entry.class_name) {
            return entry.entries;
        }
    }
    DISPATCH_TABLE_SIZE
}

#[inline]
fn hash_sel_name(sel_name: *const c_char, mask: usize) -> usize {
    let p = sel_name as usize;
    ((p >> 2) ^ (p >> 11)) & mask
}

/// Allocate a table for `cls`: the BSS pool for default-size tables,
/// the heap otherwise (and once the pool is dry). Write lock held.
unsafe fn alloc_for_class(cls: *mut ObjcClass) -> *mut Dtable {
    let entries = size_for_class(cls);

    if entries == DISPATCH_TABLE_SIZE {
        let index = DTABLE_POOL_NEXT.fetch_add(1, Ordering::Relaxed);
        if index < DISPATCH_CACHE_STATIC_COUNT {
            return &DTABLE_POOL[index] as *const DtableBlock as *mut Dtable;
        }
        DTABLE_POOL_NEXT.store(DISPATCH_CACHE_STATIC_COUNT, Ordering::Relaxed);
        crate::kwarn!("dispatch cache static pool exhausted, falling back to heap");
    }

    let bytes = core::mem::size_of::<usize>()
        + entries * core::mem::size_of::<DtableEntry>();
    let raw = heap::objc_malloc(bytes) as *mut u8;
    if raw.is_null() {
        return core::ptr::null_mut();
    }
    core::ptr::write_bytes(raw, 0, bytes);
    let dt = raw as *mut Dtable;
    (*dt).mask = entries - 1;
    dt
}

/// Lock-free cache probe. A null table or an empty slot is a miss.
///
/// # Safety
/// `cls` must be a registered class; `sel_name` a valid selector name.
pub(crate) unsafe fn lookup(cls: *mut ObjcClass, sel_name: *const c_char) -> Option<Imp> {
    if sel_name.is_null() {
        return None;
    }
    let dt = (*cls).dtable.load(Ordering::Acquire) as *mut Dtable;
    if dt.is_null() {
        return None;
    }
    let mask = (*dt).mask;
    let start = hash_sel_name(sel_name, mask);
    for i in 0..=mask {
        let entry = (*dt).entry((start + i) & mask);
        let name = entry.name.load(Ordering::Acquire);
        if name.is_null() {
            return None;
        }
        if name as *const c_char == sel_name || cstr::eq(name, sel_name) {
            let imp = entry.imp.load(Ordering::Acquire);
            if imp == 0 {
                // Concurrent flush caught mid-zeroing.
                return None;
            }
            return Some(core::mem::transmute::<usize, Imp>(imp));
        }
    }
    None
}

/// Insert a resolved implementation. Allocates the class's table on
/// first use; a full table logs and skips (dispatch stays correct via
/// the method hash).
///
/// # Safety
/// `cls` must be a registered class; `sel_name` must outlive the
/// process (metadata string).
pub(crate) unsafe fn insert(cls: *mut ObjcClass, sel_name: *const c_char, imp: Imp) {
    if sel_name.is_null() {
        return;
    }
    let _guard = WRITE_LOCK.lock();

    let mut dt = (*cls).dtable.load(Ordering::Acquire) as *mut Dtable;
    if dt.is_null() {
        dt = alloc_for_class(cls);
        if dt.is_null() {
            return;
        }
        // Publish the table only after it is fully initialised.
        (*cls).dtable.store(dt as *mut c_void, Ordering::Release);
    }

    let mask = (*dt).mask;
    let start = hash_sel_name(sel_name, mask);
    for i in 0..=mask {
        let entry = (*dt).entry((start + i) & mask);
        let name = entry.name.load(Ordering::Acquire);
        if name.is_null() {
            // Implementation first, then the name that makes the slot
            // visible to readers.
            entry.imp.store(imp as usize, Ordering::Release);
            entry.name.store(sel_name as *mut c_char, Ordering::Release);
            return;
        }
        if name as *const c_char == sel_name || cstr::eq(name, sel_name) {
            entry.imp.store(imp as usize, Ordering::Release);
            return;
        }
    }
    crate::kwarn!("dispatch cache full for class {}", (*cls).name_str());
}

/// Zero a class's cache in place; the table itself is kept.
///
/// # Safety
/// `cls` must be a registered class.
pub(crate) unsafe fn flush(cls: *mut ObjcClass) {
    let dt = (*cls).dtable.load(Ordering::Acquire) as *mut Dtable;
    if dt.is_null() {
        return;
    }
    let mask = (*dt).mask;
    for i in 0..=mask {
        let entry = (*dt).entry(i);
        entry.name.store(core::ptr::null_mut(), Ordering::Release);
        entry.imp.store(0, Ordering::Release);
    }
}

/// Invalidate every class's cache. Called after category application.
pub(crate) fn flush_all() {
    let _guard = WRITE_LOCK.lock();
    crate::class::each_class(|cls| {
        // SAFETY: each_class only yields registered class records.
        unsafe { flush(cls) };
    });
}

/// Static-pool tables handed out so far (stats dump).
pub(crate) fn pool_used() -> usize {
    DTABLE_POOL_NEXT
        .load(Ordering::Relaxed)
        .min(DISPATCH_CACHE_STATIC_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_uses_pointer_bits() {
        let mask = DISPATCH_TABLE_SIZE - 1;
        let a = 0x2000_1000usize as *const c_char;
        let b = 0x2000_1004usize as *const c_char;
        // Nearby selector records land on distinct slots: the low two
        // bits are shifted out, the next bits spread.
        assert_ne!(hash_sel_name(a, mask), hash_sel_name(b, mask));
        assert!(hash_sel_name(a, mask) <= mask);
    }

    #[test]
    fn test_block_and_header_layouts_match() {
        assert_eq!(
            core::mem::offset_of!(DtableBlock, entries),
            core::mem::size_of::<usize>()
        );
        assert_eq!(
            core::mem::offset_of!(Dtable, entries),
            core::mem::size_of::<usize>()
        );
    }
}
