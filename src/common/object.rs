// Axol compiler object model
// Changelog:
// 2026-03-02: Initial definition of the GC object header and payload kinds;
//            every heap object shares the {mark, kind, size, next} header and is threaded
//            through `next` into the single intrusive list owned by the heap;
//            HeaderOnly gives a type-erased view of the header for list walking and sweeping.
// 2026-03-05: Added Class / Instance / BoundMethod payloads for the object system and the
//            cached FNV-1a hash on StringObj so the intern table never rehashes a key.
// 2026-03-08: Upvalue payload gained `next_open` so the VM can keep the open-upvalue list
//            sorted by stack address without a side table.

use crate::backend::vm::VirtualMachine;
use crate::common::chunk::Chunk;
use crate::common::table::Table;
use crate::common::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

// repr(C)：header 字段的偏移必须在所有 GCObject<T> 之间保持一致，
// 这样 *mut GCObject<T> 才能安全地退化成 *mut GCObject<HeaderOnly>
#[repr(C)]
pub struct GCObject<T> {
    pub mark: bool,
    pub kind: ObjectKind,
    pub size: usize,
    pub next: *mut GCObject<HeaderOnly>,
    pub data: T,
}

/// Zero-sized payload: a `GCObject<HeaderOnly>` is just the header.
pub struct HeaderOnly;

pub struct StringObj {
    pub data: String,
    pub hash: u32,
}

/// 32-bit FNV-1a, computed once when the string object is built.
pub fn hash_string(data: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in data.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

pub struct FunctionObj {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Null for the top-level script.
    pub name: *mut GCObject<StringObj>,
}

impl FunctionObj {
    pub fn new() -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name: std::ptr::null_mut(),
        }
    }
}

impl Default for FunctionObj {
    fn default() -> Self {
        Self::new()
    }
}

pub type NativeFn = fn(&VirtualMachine, &[Value]) -> Value;

pub struct NativeObj {
    pub callback: NativeFn,
}

pub struct UpvalueObj {
    /// Points at a live stack slot while open, at `closed` after closing.
    pub location: *mut Value,
    pub closed: Value,
    pub next_open: *mut GCObject<UpvalueObj>,
}

pub struct ClosureObj {
    pub function: *mut GCObject<FunctionObj>,
    pub upvalues: Vec<*mut GCObject<UpvalueObj>>,
}

pub struct ClassObj {
    pub name: *mut GCObject<StringObj>,
    pub methods: Table,
}

pub struct InstanceObj {
    pub class: *mut GCObject<ClassObj>,
    pub fields: Table,
}

pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: *mut GCObject<ClosureObj>,
}
