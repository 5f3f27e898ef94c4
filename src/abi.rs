//! Compiler-emitted metadata layouts.
//!
//! Everything in this module is a hard ABI contract: the compiler
//! deposits these records in dedicated linker sections and the runtime
//! wires them up in place. Field order, widths and flag values are
//! fixed; the only liberty taken is wrapping runtime-mutated words in
//! their layout-transparent atomic equivalents so the dispatch path
//! can read them lock-free.
//!
//! The runtime commits to the descriptor-based ABI revision
//! ([`LoadDescriptor`] plus seven metadata section ranges). The older
//! symtab-module revision is rejected by the loader.

use core::ffi::{c_char, c_int, c_long, c_uint, c_void};
use core::sync::atomic::{AtomicIsize, AtomicPtr, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::cstr;

/// A pointer to an instance of a class.
pub type Id = *mut ObjcObject;

/// A pointer to a method selector.
pub type Sel = *const ObjcSelector;

/// A method implementation entry point.
///
/// The compiler casts to the concrete signature at every call site, so
/// the canonical type carries only the two register arguments every
/// method shares.
pub type Imp = unsafe extern "C" fn(Id, Sel) -> Id;

/// Minimal object: an isa pointer and nothing else.
#[repr(C)]
pub struct ObjcObject {
    pub isa: *mut ObjcClass,
}

/// Header prefix of every refcounted object: the class pointer
/// followed by an atomic reference count. Generated client code
/// depends on these offsets.
#[repr(C)]
pub struct ObjectHeader {
    pub isa: *mut ObjcClass,
    pub refcount: AtomicUsize,
}

/// One `{ name, types }` selector record. The compiler emits one per
/// unique (name, type-encoding) pair; the runtime matches by name.
#[repr(C)]
pub struct ObjcSelector {
    pub name: *const c_char,
    pub types: *const c_char,
}

/// `{ imp, selector, types }`; note the field order differs from the
/// legacy revision.
#[repr(C)]
pub struct ObjcMethod {
    pub imp: Option<Imp>,
    pub selector: *const ObjcSelector,
    pub types: *const c_char,
}

/// Singly linked chain of method arrays, so categories prepend without
/// copying.
#[repr(C)]
pub struct ObjcMethodList {
    pub next: *mut ObjcMethodList,
    pub count: c_int,
    /// `sizeof(struct objc_method)`, carried for ABI versioning.
    pub element_size: c_int,
    methods: [ObjcMethod; 0],
}

impl ObjcMethodList {
    /// # Safety
    /// `self` must be a compiler-emitted list whose trailing array
    /// holds `count` methods.
    pub unsafe fn methods(&self) -> &[ObjcMethod] {
        core::slice::from_raw_parts(self.methods.as_ptr(), self.count.max(0) as usize)
    }
}

/// Non-fragile ivar record. `offset` points at the per-ivar global the
/// runtime fills in during class resolution.
#[repr(C)]
pub struct ObjcIvar {
    pub name: *const c_char,
    pub types: *const c_char,
    pub offset: *mut c_int,
    pub size: u32,
    pub flags: u32,
}

#[repr(C)]
pub struct ObjcIvarList {
    pub count: c_int,
    pub element_size: c_int,
    ivars: [ObjcIvar; 0],
}

impl ObjcIvarList {
    /// # Safety
    /// `self` must be a compiler-emitted list whose trailing array
    /// holds `count` ivars.
    pub unsafe fn ivars(&self) -> &[ObjcIvar] {
        core::slice::from_raw_parts(self.ivars.as_ptr(), self.count.max(0) as usize)
    }
}

bitflags! {
    /// Class info word. The low three bits are compiler-visible; the
    /// runtime owns the rest.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClassFlags: usize {
        /// Metaclass marker.
        const META = 1 << 0;
        /// Runtime: methods registered, ivar offsets fixed.
        const RESOLVED = 1 << 1;
        /// Runtime: `+initialize` dispatched.
        const INITIALIZED = 1 << 2;
        /// Instances ignore retain/release and live forever.
        const IMMORTAL = 1 << 3;
    }
}

/// 17-field class record.
///
/// `info`, `instance_size` and `dtable` are runtime-mutated and read
/// from the lock-free dispatch path, so they are declared atomic;
/// their in-memory layout matches the plain words the compiler emits.
#[repr(C)]
pub struct ObjcClass {
    pub metaclass: *mut ObjcClass,
    pub superclass: *mut ObjcClass,
    pub name: *const c_char,
    pub version: c_long,
    pub info: AtomicUsize,
    /// Negative when the compiler asks the runtime to compute the
    /// layout (non-fragile ivars).
    pub instance_size: AtomicIsize,
    pub ivars: *mut ObjcIvarList,
    pub methods: *mut ObjcMethodList,
    /// Dispatch-table cache slot, lazily populated.
    pub dtable: AtomicPtr<c_void>,
    /// C++ ivar constructor hook (null for plain classes).
    pub cxx_construct: Option<Imp>,
    /// C++ ivar destructor hook (null for plain classes).
    pub cxx_destruct: Option<Imp>,
    pub subclass_list: *mut ObjcClass,
    pub sibling_class: *mut ObjcClass,
    pub protocols: *mut ObjcProtocolList,
    pub extra_data: *mut c_void,
    pub abi_version: c_long,
    pub properties: *mut ObjcPropertyList,
}

impl ObjcClass {
    pub fn flags(&self) -> ClassFlags {
        ClassFlags::from_bits_retain(self.info.load(Ordering::Acquire))
    }

    /// Set flag bits. Release ordering so everything written before
    /// (method registration, ivar offsets, instance size) is visible
    /// to any reader that observes the flag.
    pub fn set_flags(&self, flags: ClassFlags) {
        self.info.fetch_or(flags.bits(), Ordering::Release);
    }

    pub fn is_meta(&self) -> bool {
        self.flags().contains(ClassFlags::META)
    }

    pub fn is_resolved(&self) -> bool {
        self.flags().contains(ClassFlags::RESOLVED)
    }

    pub fn is_immortal(&self) -> bool {
        self.flags().contains(ClassFlags::IMMORTAL)
    }

    /// Class name for log lines.
    ///
    /// # Safety
    /// `name` must be null or a valid NUL-terminated string.
    pub unsafe fn name_str(&self) -> &str {
        cstr::as_str(self.name)
    }
}

/// Deferred additive patch to a class, applied at first message send.
#[repr(C)]
pub struct ObjcCategory {
    pub name: *const c_char,
    pub class_name: *const c_char,
    pub instance_methods: *mut ObjcMethodList,
    pub class_methods: *mut ObjcMethodList,
    pub protocols: *mut ObjcProtocolList,
    pub instance_properties: *mut ObjcPropertyList,
    pub class_properties: *mut ObjcPropertyList,
}

#[repr(C)]
pub struct ObjcMethodDescription {
    pub selector: *const ObjcSelector,
    pub types: *const c_char,
}

#[repr(C)]
pub struct ObjcMethodDescriptionList {
    pub count: c_int,
    pub element_size: c_int,
    methods: [ObjcMethodDescription; 0],
}

/// 11-field protocol record. `isa` is a small-integer magic marker the
/// compiler emits, not a class pointer.
#[repr(C)]
pub struct ObjcProtocol {
    pub isa: *mut c_void,
    pub name: *const c_char,
    pub protocol_list: *mut ObjcProtocolList,
    pub required_instance_methods: *mut ObjcMethodDescriptionList,
    pub optional_class_methods: *mut ObjcMethodDescriptionList,
    pub required_class_methods: *mut ObjcMethodDescriptionList,
    pub optional_instance_methods: *mut ObjcMethodDescriptionList,
    pub optional_properties: *mut ObjcPropertyList,
    pub required_properties: *mut ObjcPropertyList,
    pub reserved1: *mut c_void,
    pub reserved2: *mut c_void,
}

#[repr(C)]
pub struct ObjcProtocolList {
    pub next: *mut ObjcProtocolList,
    pub count: usize,
    protocols: [*mut ObjcProtocol; 0],
}

impl ObjcProtocolList {
    /// # Safety
    /// `self` must be a compiler-emitted list whose trailing array
    /// holds `count` protocol pointers.
    pub unsafe fn protocols(&self) -> &[*mut ObjcProtocol] {
        core::slice::from_raw_parts(self.protocols.as_ptr(), self.count)
    }
}

/// Property records are opaque pass-through for this runtime.
#[repr(C)]
pub struct ObjcProperty {
    pub name: *const c_char,
    pub attributes: *const c_char,
}

#[repr(C)]
pub struct ObjcPropertyList {
    pub count: c_int,
    pub element_size: c_int,
    properties: [ObjcProperty; 0],
}

/// Layout of a `@"..."` literal. The compiler cannot know the address
/// of the constant-string class, so the loader patches `isa`.
#[repr(C)]
pub struct ObjcConstantString {
    pub isa: *mut ObjcClass,
    pub flags: u32,
    pub length: u32,
    pub size: u32,
    pub hash: u32,
    pub data: *const c_char,
}

/// Maps an alias name to a class reference slot. Walked for
/// diagnostics only; aliasing is resolved at compile time.
#[repr(C)]
pub struct ObjcClassAlias {
    pub alias_name: *const c_char,
    pub class_ref: *mut *mut ObjcClass,
}

/// Sentinel stored in [`LoadDescriptor::version`] once a descriptor
/// has been consumed.
pub const LOAD_VERSION_DONE: u64 = u64::MAX;

/// Per-translation-unit load descriptor: a version gate and half-open
/// ranges over the metadata sections. Each range may be empty.
#[repr(C)]
pub struct LoadDescriptor {
    pub version: u64,
    pub sel_begin: *mut ObjcSelector,
    pub sel_end: *mut ObjcSelector,
    pub cls_begin: *mut *mut ObjcClass,
    pub cls_end: *mut *mut ObjcClass,
    pub cls_ref_begin: *mut *mut ObjcClass,
    pub cls_ref_end: *mut *mut ObjcClass,
    pub cat_begin: *mut *mut ObjcCategory,
    pub cat_end: *mut *mut ObjcCategory,
    pub proto_begin: *mut *mut ObjcProtocol,
    pub proto_end: *mut *mut ObjcProtocol,
    pub proto_ref_begin: *mut *mut ObjcProtocol,
    pub proto_ref_end: *mut *mut ObjcProtocol,
    pub alias_begin: *mut ObjcClassAlias,
    pub alias_end: *mut ObjcClassAlias,
    pub str_begin: *mut ObjcConstantString,
    pub str_end: *mut ObjcConstantString,
}

/// `{ receiver, starting-class }` pair for super sends.
#[repr(C)]
pub struct ObjcSuper {
    pub receiver: Id,
    pub class: *mut ObjcClass,
}

/// Slot record returned by the super slot-lookup bridge; callers read
/// the IMP from the fifth field.
#[repr(C)]
pub struct ObjcSlot {
    pub owner: *mut ObjcClass,
    pub cached_for: *mut ObjcClass,
    pub types: *const c_char,
    pub version: c_uint,
    pub method: Option<Imp>,
}

impl ObjcSlot {
    pub const fn empty() -> Self {
        Self {
            owner: core::ptr::null_mut(),
            cached_for: core::ptr::null_mut(),
            types: core::ptr::null(),
            version: 0,
            method: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_header_offsets() {
        // Generated code reads the refcount at a fixed offset behind
        // the isa pointer; the header must stay two words, packed.
        assert_eq!(
            core::mem::size_of::<ObjectHeader>(),
            2 * core::mem::size_of::<usize>()
        );
        assert_eq!(core::mem::offset_of!(ObjectHeader, isa), 0);
        assert_eq!(
            core::mem::offset_of!(ObjectHeader, refcount),
            core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_class_record_is_seventeen_words() {
        assert_eq!(
            core::mem::size_of::<ObjcClass>(),
            17 * core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_atomic_fields_are_layout_transparent() {
        assert_eq!(
            core::mem::size_of::<AtomicUsize>(),
            core::mem::size_of::<usize>()
        );
        assert_eq!(
            core::mem::size_of::<AtomicPtr<c_void>>(),
            core::mem::size_of::<*mut c_void>()
        );
        assert_eq!(
            core::mem::size_of::<Option<Imp>>(),
            core::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_constant_string_layout() {
        assert_eq!(core::mem::offset_of!(ObjcConstantString, isa), 0);
        assert_eq!(
            core::mem::offset_of!(ObjcConstantString, data),
            core::mem::size_of::<usize>() + 16
        );
    }
}
