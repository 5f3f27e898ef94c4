//! Shared fixtures: host hooks for the std test environment and
//! builders that assemble compiler-shaped metadata on the heap.
//!
//! Everything built here is deliberately leaked: metadata normally
//! lives in the image for the process lifetime, and the runtime keeps
//! raw pointers into it.

#![allow(dead_code)]

use std::ffi::{c_char, c_int, CString};
use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use objcore::abi::{
    ClassFlags, Id, Imp, LoadDescriptor, ObjcCategory, ObjcClass, ObjcConstantString,
    ObjcIvar, ObjcIvarList, ObjcMethod, ObjcMethodList, ObjcProtocol, ObjcProtocolList,
    ObjcSelector, Sel,
};
use objcore::instance::object_dispose;
use objcore::{arc, host};

// =======================================================================
// Host hooks
// =======================================================================

static NEXT_TID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static TID: usize = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

fn std_thread_id() -> usize {
    TID.with(|t| *t)
}

fn stderr_sink(line: &str) {
    eprint!("{line}");
}

/// Bring the runtime up for a test binary. Idempotent.
pub fn setup() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        host::set_thread_id_source(std_thread_id);
        host::set_console_sink(stderr_sink);
        objcore::objc_runtime_init();
    });
}

// =======================================================================
// Leaked strings and selectors
// =======================================================================

pub fn leak_cstr(s: &str) -> *const c_char {
    let c = CString::new(s).unwrap();
    let p = c.as_ptr();
    std::mem::forget(c);
    p
}

/// Selector records, cached by name so repeat sends share a pointer
/// identity (the dispatch cache's fast path).
pub fn sel(name: &str) -> Sel {
    static CACHE: OnceLock<Mutex<std::collections::HashMap<String, usize>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(std::collections::HashMap::new()));
    let mut cache = cache.lock().unwrap();
    let entry = cache.entry(name.to_string()).or_insert_with(|| {
        Box::into_raw(Box::new(ObjcSelector {
            name: leak_cstr(name),
            types: std::ptr::null(),
        })) as usize
    });
    *entry as Sel
}

/// A fresh, uncached selector with a type encoding (and its own name
/// storage, so pointer identity differs from `sel(name)`).
pub fn sel_typed(name: &str, types: &str) -> Sel {
    Box::into_raw(Box::new(ObjcSelector {
        name: leak_cstr(name),
        types: leak_cstr(types),
    }))
}

// =======================================================================
// Metadata builders
// =======================================================================

/// One method entry for a builder list.
pub struct MethodSpec {
    pub name: &'static str,
    pub types: Option<&'static str>,
    pub imp: Imp,
}

pub fn method(name: &'static str, imp: Imp) -> MethodSpec {
    MethodSpec {
        name,
        types: None,
        imp,
    }
}

pub fn typed_method(name: &'static str, types: &'static str, imp: Imp) -> MethodSpec {
    MethodSpec {
        name,
        types: Some(types),
        imp,
    }
}

/// Assemble a compiler-shaped method list (header + trailing array).
pub fn method_list(specs: &[MethodSpec]) -> *mut ObjcMethodList {
    if specs.is_empty() {
        return std::ptr::null_mut();
    }
    let header = std::mem::size_of::<ObjcMethodList>();
    let stride = std::mem::size_of::<ObjcMethod>();
    let layout =
        std::alloc::Layout::from_size_align(header + specs.len() * stride, 8).unwrap();
    unsafe {
        let raw = std::alloc::alloc_zeroed(layout);
        let list = raw as *mut ObjcMethodList;
        (*list).next = std::ptr::null_mut();
        (*list).count = specs.len() as c_int;
        (*list).element_size = stride as c_int;
        let methods = raw.add(header) as *mut ObjcMethod;
        for (i, spec) in specs.iter().enumerate() {
            let selector = match spec.types {
                Some(t) => sel_typed(spec.name, t),
                None => sel(spec.name),
            };
            std::ptr::write(
                methods.add(i),
                ObjcMethod {
                    imp: Some(spec.imp),
                    selector,
                    types: (*selector).types,
                },
            );
        }
        list
    }
}

/// Assemble an ivar list. Returns the list and the per-ivar offset
/// globals the runtime will fill during resolution.
pub fn ivar_list(specs: &[(&str, &str, u32)]) -> (*mut ObjcIvarList, Vec<*mut c_int>) {
    if specs.is_empty() {
        return (std::ptr::null_mut(), Vec::new());
    }
    let header = std::mem::size_of::<ObjcIvarList>();
    let stride = std::mem::size_of::<ObjcIvar>();
    let layout =
        std::alloc::Layout::from_size_align(header + specs.len() * stride, 8).unwrap();
    let mut offsets = Vec::new();
    unsafe {
        let raw = std::alloc::alloc_zeroed(layout);
        let list = raw as *mut ObjcIvarList;
        (*list).count = specs.len() as c_int;
        (*list).element_size = stride as c_int;
        let ivars = raw.add(header) as *mut ObjcIvar;
        for (i, (name, types, size)) in specs.iter().enumerate() {
            let offset: *mut c_int = Box::into_raw(Box::new(0));
            offsets.push(offset);
            std::ptr::write(
                ivars.add(i),
                ObjcIvar {
                    name: leak_cstr(name),
                    types: leak_cstr(types),
                    offset,
                    size: *size,
                    flags: 0,
                },
            );
        }
        (list, offsets)
    }
}

/// Assemble a protocol list holding the given protocols.
pub fn protocol_list(protos: &[*mut ObjcProtocol]) -> *mut ObjcProtocolList {
    if protos.is_empty() {
        return std::ptr::null_mut();
    }
    let header = std::mem::size_of::<ObjcProtocolList>();
    let stride = std::mem::size_of::<*mut ObjcProtocol>();
    let layout =
        std::alloc::Layout::from_size_align(header + protos.len() * stride, 8).unwrap();
    unsafe {
        let raw = std::alloc::alloc_zeroed(layout);
        let list = raw as *mut ObjcProtocolList;
        (*list).next = std::ptr::null_mut();
        (*list).count = protos.len();
        let slots = raw.add(header) as *mut *mut ObjcProtocol;
        for (i, proto) in protos.iter().enumerate() {
            std::ptr::write(slots.add(i), *proto);
        }
        list
    }
}

/// Build a protocol record adopting `adopted`.
pub fn protocol(name: &str, adopted: &[*mut ObjcProtocol]) -> *mut ObjcProtocol {
    Box::into_raw(Box::new(ObjcProtocol {
        isa: 4usize as *mut std::ffi::c_void,
        name: leak_cstr(name),
        protocol_list: protocol_list(adopted),
        required_instance_methods: std::ptr::null_mut(),
        optional_class_methods: std::ptr::null_mut(),
        required_class_methods: std::ptr::null_mut(),
        optional_instance_methods: std::ptr::null_mut(),
        optional_properties: std::ptr::null_mut(),
        required_properties: std::ptr::null_mut(),
        reserved1: std::ptr::null_mut(),
        reserved2: std::ptr::null_mut(),
    }))
}

fn empty_class(
    name: *const c_char,
    flags: ClassFlags,
    instance_size: isize,
) -> *mut ObjcClass {
    Box::into_raw(Box::new(ObjcClass {
        metaclass: std::ptr::null_mut(),
        superclass: std::ptr::null_mut(),
        name,
        version: 0,
        info: AtomicUsize::new(flags.bits()),
        instance_size: AtomicIsize::new(instance_size),
        ivars: std::ptr::null_mut(),
        methods: std::ptr::null_mut(),
        dtable: AtomicPtr::new(std::ptr::null_mut()),
        cxx_construct: None,
        cxx_destruct: None,
        subclass_list: std::ptr::null_mut(),
        sibling_class: std::ptr::null_mut(),
        protocols: std::ptr::null_mut(),
        extra_data: std::ptr::null_mut(),
        abi_version: 2,
        properties: std::ptr::null_mut(),
    }))
}

/// Everything a test class needs; unset fields keep their defaults.
/// The resolver recomputes the instance size from the superclass size
/// and the ivar list, so the emitted (negative) size is only a hint.
pub struct ClassSpec {
    pub name: &'static str,
    pub superclass: *mut ObjcClass,
    pub instance_size: isize,
    pub flags: ClassFlags,
    pub ivars: *mut ObjcIvarList,
    pub instance_methods: Vec<MethodSpec>,
    pub class_methods: Vec<MethodSpec>,
    pub protocols: Vec<*mut ObjcProtocol>,
}

impl ClassSpec {
    pub fn new(name: &'static str, superclass: *mut ObjcClass) -> Self {
        Self {
            name,
            superclass,
            instance_size: -(std::mem::size_of::<TestObject>() as isize),
            flags: ClassFlags::empty(),
            ivars: std::ptr::null_mut(),
            instance_methods: Vec::new(),
            class_methods: Vec::new(),
            protocols: Vec::new(),
        }
    }
}

/// Build a class/metaclass pair the way the compiler would emit it.
pub fn build_class(spec: ClassSpec) -> *mut ObjcClass {
    let name = leak_cstr(spec.name);
    let meta = empty_class(name, ClassFlags::META, 0);
    let cls = empty_class(name, spec.flags, spec.instance_size);
    unsafe {
        (*cls).metaclass = meta;
        (*cls).superclass = spec.superclass;
        (*cls).ivars = spec.ivars;
        (*cls).methods = method_list(&spec.instance_methods);
        (*cls).protocols = protocol_list(&spec.protocols);
        (*meta).methods = method_list(&spec.class_methods);
        // The metaclass's superclass is left null on purpose: the
        // resolver wires it to the superclass's metaclass.
    }
    cls
}

/// Feed metadata to the loader exactly like a translation unit would.
/// Returns the descriptor so idempotence can be asserted.
pub fn load_full(
    classes: &[*mut ObjcClass],
    categories: &[*mut ObjcCategory],
    protocols: &[*mut ObjcProtocol],
    strings: &[*mut ObjcConstantString],
) -> *mut LoadDescriptor {
    unsafe fn leak_range<T: Copy>(items: &[T]) -> (*mut T, *mut T) {
        if items.is_empty() {
            return (std::ptr::null_mut(), std::ptr::null_mut());
        }
        let slice = Box::leak(items.to_vec().into_boxed_slice());
        let begin = slice.as_mut_ptr();
        (begin, begin.add(slice.len()))
    }
    unsafe {
        let (cls_begin, cls_end) = leak_range(classes);
        let (cat_begin, cat_end) = leak_range(categories);
        let (proto_begin, proto_end) = leak_range(protocols);
        // Constant strings are an inline array in their section.
        let (str_begin, str_end) = if strings.is_empty() {
            (std::ptr::null_mut(), std::ptr::null_mut())
        } else {
            let slice: Vec<ObjcConstantString> =
                strings.iter().map(|s| std::ptr::read(*s)).collect();
            let slice = Box::leak(slice.into_boxed_slice());
            let begin = slice.as_mut_ptr();
            (begin, begin.add(slice.len()))
        };
        let init = Box::into_raw(Box::new(LoadDescriptor {
            version: 0,
            sel_begin: std::ptr::null_mut(),
            sel_end: std::ptr::null_mut(),
            cls_begin,
            cls_end,
            cls_ref_begin: std::ptr::null_mut(),
            cls_ref_end: std::ptr::null_mut(),
            cat_begin,
            cat_end,
            proto_begin,
            proto_end,
            proto_ref_begin: std::ptr::null_mut(),
            proto_ref_end: std::ptr::null_mut(),
            alias_begin: std::ptr::null_mut(),
            alias_end: std::ptr::null_mut(),
            str_begin,
            str_end,
        }));
        objcore::loader::__objc_load(init);
        init
    }
}

pub fn load(
    classes: &[*mut ObjcClass],
    categories: &[*mut ObjcCategory],
    protocols: &[*mut ObjcProtocol],
) {
    load_full(classes, categories, protocols, &[]);
}

/// Build a category record.
pub fn category(
    name: &'static str,
    class_name: &'static str,
    instance_methods: Vec<MethodSpec>,
    class_methods: Vec<MethodSpec>,
) -> *mut ObjcCategory {
    Box::into_raw(Box::new(ObjcCategory {
        name: leak_cstr(name),
        class_name: leak_cstr(class_name),
        instance_methods: method_list(&instance_methods),
        class_methods: method_list(&class_methods),
        protocols: std::ptr::null_mut(),
        instance_properties: std::ptr::null_mut(),
        class_properties: std::ptr::null_mut(),
    }))
}

// =======================================================================
// The root fixture class
// =======================================================================

/// Instance layout every fixture class shares: the mandatory header
/// plus one tag word tests stamp and assert on.
#[repr(C)]
pub struct TestObject {
    pub isa: *mut ObjcClass,
    pub refcount: AtomicUsize,
    pub tag: usize,
}

/// Tags of objects dealloc'd through the root fixture, in order.
pub fn dealloc_log() -> &'static Mutex<Vec<usize>> {
    static LOG: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    &LOG
}

pub unsafe extern "C" fn imp_retain(obj: Id, _sel: Sel) -> Id {
    arc::objc_retain(obj)
}

pub unsafe extern "C" fn imp_release(obj: Id, _sel: Sel) -> Id {
    arc::objc_release(obj);
    std::ptr::null_mut()
}

pub unsafe extern "C" fn imp_autorelease(obj: Id, _sel: Sel) -> Id {
    arc::objc_autorelease(obj)
}

/// Root dealloc: record the tag, then hand the storage back.
pub unsafe extern "C" fn imp_dealloc(obj: Id, _sel: Sel) -> Id {
    let tag = (*(obj as *mut TestObject)).tag;
    dealloc_log().lock().unwrap().push(tag);
    object_dispose(obj);
    std::ptr::null_mut()
}

/// Ivar sizes for the shared fixture layout, word-sized fields.
fn word() -> u32 {
    std::mem::size_of::<usize>() as u32
}

/// The per-binary root class. Built and loaded once; subclasses chain
/// off it. Declares the header fields plus the tag word as ivars, the
/// way a compiler would emit a root class.
pub fn test_root() -> *mut ObjcClass {
    static ROOT: OnceLock<usize> = OnceLock::new();
    *ROOT.get_or_init(|| {
        setup();
        let (ivars, _) = ivar_list(&[
            ("isa", "^v", word()),
            ("_refcount", "L", word()),
            ("tag", "L", word()),
        ]);
        let mut spec = ClassSpec::new("TestRoot", std::ptr::null_mut());
        spec.ivars = ivars;
        spec.instance_methods = vec![
            method("retain", imp_retain),
            method("release", imp_release),
            method("autorelease", imp_autorelease),
            method("dealloc", imp_dealloc),
        ];
        let cls = build_class(spec);
        load(&[cls], &[], &[]);
        cls as usize
    }) as *mut ObjcClass
}

/// Allocate an instance of `cls` and stamp its tag.
pub fn new_tagged(cls: *mut ObjcClass, tag: usize) -> Id {
    unsafe {
        let obj = objcore::instance::class_createInstance(cls);
        assert!(!obj.is_null(), "allocation failed");
        (*(obj as *mut TestObject)).tag = tag;
        obj
    }
}

/// Dispatch `name` to `obj` and return the raw IMP result.
pub fn send(obj: Id, name: &str) -> Id {
    unsafe {
        let s = sel(name);
        let imp = objcore::message::objc_msg_lookup(obj, s)
            .unwrap_or_else(|| panic!("no IMP for {name}"));
        imp(obj, s)
    }
}

/// Send, interpreting the result as a word (fixture IMPs return small
/// integers cast through Id).
pub fn send_usize(obj: Id, name: &str) -> usize {
    send(obj, name) as usize
}
