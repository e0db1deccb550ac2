// Axol compiler heap
// Changelog:
// 2026-03-04: Initial implementation of the GC heap: every allocation is boxed, leaked into
//            a raw pointer and threaded onto the intrusive all_objects list; the accounted
//            size includes the payload's own container capacities so the trigger heuristic
//            sees real memory pressure, not just header counts.
// 2026-03-07: String interning through the weak intern table: copy_string / take_string both
//            consult it first, equal bytes always resolve to the same object afterwards.
// 2026-03-10: Hard memory ceiling on every allocation path; the VM surfaces the failure as a
//            runtime OutOfMemory error instead of aborting mid-dispatch.
// 2026-03-12: Sweep and shutdown free objects through kind-matched Box::from_raw so payload
//            destructors (string buffers, tables, chunks) actually run.

use crate::common::object::{
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, GCObject, HeaderOnly, InstanceObj,
    NativeObj, ObjectKind, StringObj, UpvalueObj, hash_string,
};
use crate::common::table::{Entry, Table};
use crate::common::value::Value;

pub const HARD_MEMORY_LIMIT: usize = 1024 * 1024 * 512; // 512MB
pub const GC_INITIAL_THRESHOLD: usize = 1024 * 1024; // 1MB
pub const GC_GROW_FACTOR: usize = 2;

pub struct Heap {
    pub all_objects: *mut GCObject<HeaderOnly>,
    /// Intern set; keys are weak, remove_white runs before every sweep.
    pub strings: Table,
    pub gray_stack: Vec<*mut GCObject<HeaderOnly>>,
    pub heap_size: usize,
    pub threshold: usize,
    /// Collect at every allocation site, for shaking out missing roots.
    pub stress: bool,
    // used for debugging and tuning GC parameters, not used in actual GC logic
    pub max_allocated: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            all_objects: std::ptr::null_mut(),
            strings: Table::new(),
            gray_stack: Vec::new(),
            heap_size: 0,
            threshold: GC_INITIAL_THRESHOLD,
            stress: false,
            max_allocated: 0,
        }
    }

    fn alloc_raw<T>(&mut self, data: T, kind: ObjectKind, size: usize) -> Option<*mut GCObject<T>> {
        if self.heap_size + size > HARD_MEMORY_LIMIT {
            return None;
        }

        let boxed = Box::new(GCObject {
            mark: false,
            kind,
            size,
            next: self.all_objects,
            data,
        });
        let ptr = Box::into_raw(boxed);
        self.all_objects = ptr as *mut GCObject<HeaderOnly>;

        self.heap_size += size;
        if self.heap_size > self.max_allocated {
            self.max_allocated = self.heap_size;
        }

        Some(ptr)
    }

    fn allocate_string(&mut self, data: String, hash: u32) -> Option<*mut GCObject<StringObj>> {
        let size = std::mem::size_of::<GCObject<StringObj>>() + data.capacity();
        let ptr = self.alloc_raw(StringObj { data, hash }, ObjectKind::String, size)?;
        self.strings.set(ptr, Value::Nil);
        Some(ptr)
    }

    /// Intern a borrowed string; on a hit nothing is allocated at all.
    pub fn copy_string(&mut self, data: &str) -> Option<*mut GCObject<StringObj>> {
        let hash = hash_string(data);
        let interned = self.strings.find_string(data, hash);
        if !interned.is_null() {
            return Some(interned);
        }

        self.allocate_string(data.to_string(), hash)
    }

    /// Intern an owned buffer; on a hit the candidate buffer is dropped.
    pub fn take_string(&mut self, data: String) -> Option<*mut GCObject<StringObj>> {
        let hash = hash_string(&data);
        let interned = self.strings.find_string(&data, hash);
        if !interned.is_null() {
            return Some(interned);
        }

        self.allocate_string(data, hash)
    }

    pub fn alloc_function(&mut self, data: FunctionObj) -> Option<*mut GCObject<FunctionObj>> {
        let size = std::mem::size_of::<GCObject<FunctionObj>>()
            + data.chunk.code.capacity()
            + data.chunk.lines.capacity() * std::mem::size_of::<usize>()
            + data.chunk.constants.capacity() * std::mem::size_of::<Value>();

        self.alloc_raw(data, ObjectKind::Function, size)
    }

    pub fn alloc_native(&mut self, data: NativeObj) -> Option<*mut GCObject<NativeObj>> {
        let size = std::mem::size_of::<GCObject<NativeObj>>();
        self.alloc_raw(data, ObjectKind::Native, size)
    }

    pub fn alloc_closure(&mut self, data: ClosureObj) -> Option<*mut GCObject<ClosureObj>> {
        let size = std::mem::size_of::<GCObject<ClosureObj>>()
            + data.upvalues.capacity() * std::mem::size_of::<*mut GCObject<UpvalueObj>>();

        self.alloc_raw(data, ObjectKind::Closure, size)
    }

    pub fn alloc_upvalue(&mut self, data: UpvalueObj) -> Option<*mut GCObject<UpvalueObj>> {
        let size = std::mem::size_of::<GCObject<UpvalueObj>>();
        self.alloc_raw(data, ObjectKind::Upvalue, size)
    }

    pub fn alloc_class(&mut self, data: ClassObj) -> Option<*mut GCObject<ClassObj>> {
        let size = std::mem::size_of::<GCObject<ClassObj>>()
            + data.methods.capacity() * std::mem::size_of::<Entry>();

        self.alloc_raw(data, ObjectKind::Class, size)
    }

    pub fn alloc_instance(&mut self, data: InstanceObj) -> Option<*mut GCObject<InstanceObj>> {
        let size = std::mem::size_of::<GCObject<InstanceObj>>()
            + data.fields.capacity() * std::mem::size_of::<Entry>();

        self.alloc_raw(data, ObjectKind::Instance, size)
    }

    pub fn alloc_bound_method(
        &mut self,
        data: BoundMethodObj,
    ) -> Option<*mut GCObject<BoundMethodObj>> {
        let size = std::mem::size_of::<GCObject<BoundMethodObj>>();
        self.alloc_raw(data, ObjectKind::BoundMethod, size)
    }

    pub fn check_gc_condition(&self) -> bool {
        self.stress || self.heap_size > self.threshold
    }

    /* ---------- marking ---------- */

    pub fn mark_object(&mut self, object: *mut GCObject<HeaderOnly>) {
        if object.is_null() || unsafe { (*object).mark } {
            return;
        }

        unsafe {
            (*object).mark = true;
        }
        self.gray_stack.push(object);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Some(header) = value.object_header() {
            self.mark_object(header);
        }
    }

    /// Marks keys and values. Correct for globals, fields and method tables;
    /// the intern set must NOT go through here, its keys are weak.
    pub fn mark_table(&mut self, table: &Table) {
        for entry in &table.entries {
            if !entry.key.is_null() {
                self.mark_object(entry.key as *mut GCObject<HeaderOnly>);
            }
            self.mark_value(entry.value);
        }
    }

    /// Drain the gray stack, blackening one object at a time.
    pub fn trace_references(&mut self) {
        while let Some(object) = self.gray_stack.pop() {
            self.blacken_object(object);
        }
    }

    fn blacken_object(&mut self, object: *mut GCObject<HeaderOnly>) {
        unsafe {
            match (*object).kind {
                ObjectKind::String | ObjectKind::Native => {}

                ObjectKind::Upvalue => {
                    let upvalue = object as *mut GCObject<UpvalueObj>;
                    // 开着的时候栈槽本来就是根，标 closed 就够了
                    self.mark_value((*upvalue).data.closed);
                }

                ObjectKind::Function => {
                    let function = object as *mut GCObject<FunctionObj>;
                    let name = (*function).data.name;
                    if !name.is_null() {
                        self.mark_object(name as *mut GCObject<HeaderOnly>);
                    }
                    for i in 0..(*function).data.chunk.constants.len() {
                        let constant = (&(*function).data.chunk.constants)[i];
                        self.mark_value(constant);
                    }
                }

                ObjectKind::Closure => {
                    let closure = object as *mut GCObject<ClosureObj>;
                    self.mark_object((*closure).data.function as *mut GCObject<HeaderOnly>);
                    for i in 0..(*closure).data.upvalues.len() {
                        let upvalue = (&(*closure).data.upvalues)[i];
                        self.mark_object(upvalue as *mut GCObject<HeaderOnly>);
                    }
                }

                ObjectKind::Class => {
                    let class = object as *mut GCObject<ClassObj>;
                    self.mark_object((*class).data.name as *mut GCObject<HeaderOnly>);
                    let methods = &(*class).data.methods as *const Table;
                    self.mark_table(&*methods);
                }

                ObjectKind::Instance => {
                    let instance = object as *mut GCObject<InstanceObj>;
                    self.mark_object((*instance).data.class as *mut GCObject<HeaderOnly>);
                    let fields = &(*instance).data.fields as *const Table;
                    self.mark_table(&*fields);
                }

                ObjectKind::BoundMethod => {
                    let bound = object as *mut GCObject<BoundMethodObj>;
                    self.mark_value((*bound).data.receiver);
                    self.mark_object((*bound).data.method as *mut GCObject<HeaderOnly>);
                }
            }
        }
    }

    /* ---------- sweeping ---------- */

    /// Free one object through its concrete type so the payload drops too.
    /// Caller already unlinked it from the list.
    unsafe fn free_object(object: *mut GCObject<HeaderOnly>) {
        unsafe {
            match (*object).kind {
                ObjectKind::String => {
                    drop(Box::from_raw(object as *mut GCObject<StringObj>));
                }
                ObjectKind::Function => {
                    drop(Box::from_raw(object as *mut GCObject<FunctionObj>));
                }
                ObjectKind::Native => {
                    drop(Box::from_raw(object as *mut GCObject<NativeObj>));
                }
                ObjectKind::Closure => {
                    drop(Box::from_raw(object as *mut GCObject<ClosureObj>));
                }
                ObjectKind::Upvalue => {
                    drop(Box::from_raw(object as *mut GCObject<UpvalueObj>));
                }
                ObjectKind::Class => {
                    drop(Box::from_raw(object as *mut GCObject<ClassObj>));
                }
                ObjectKind::Instance => {
                    drop(Box::from_raw(object as *mut GCObject<InstanceObj>));
                }
                ObjectKind::BoundMethod => {
                    drop(Box::from_raw(object as *mut GCObject<BoundMethodObj>));
                }
            }
        }
    }

    /// Walk the object list, unlink and free everything left unmarked, clear
    /// the mark on survivors. Returns (objects freed, bytes freed).
    pub fn sweep(&mut self) -> (usize, usize) {
        let mut swept_count = 0;
        let mut swept_bytes = 0;

        unsafe {
            let mut prev: *mut GCObject<HeaderOnly> = std::ptr::null_mut();
            let mut curr = self.all_objects;

            while !curr.is_null() {
                if (*curr).mark {
                    (*curr).mark = false;
                    prev = curr;
                    curr = (*curr).next;
                } else {
                    let next = (*curr).next;
                    if prev.is_null() {
                        self.all_objects = next;
                    } else {
                        (*prev).next = next;
                    }

                    let size = (*curr).size;
                    swept_count += 1;
                    swept_bytes += size;
                    self.heap_size = self.heap_size.saturating_sub(size);

                    Self::free_object(curr);
                    curr = next;
                }
            }
        }

        (swept_count, swept_bytes)
    }

    pub fn expand_threshold(&mut self) {
        self.threshold = self.heap_size * GC_GROW_FACTOR;
        if self.threshold < GC_INITIAL_THRESHOLD {
            self.threshold = GC_INITIAL_THRESHOLD;
        }
    }

    fn free_all_objects(&mut self) {
        unsafe {
            let mut curr = self.all_objects;
            while !curr.is_null() {
                let next = (*curr).next;
                Self::free_object(curr);
                curr = next;
            }
        }

        self.all_objects = std::ptr::null_mut();
        self.heap_size = 0;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.free_all_objects();
    }
}
