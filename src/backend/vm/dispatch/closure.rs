use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{ClosureObj, GCObject, UpvalueObj};
use crate::common::value::Value;

impl VirtualMachine {
    /// CLOSURE: build the closure, then read its upvalue descriptors
    pub fn handle_closure(&mut self) -> Result<(), VmError> {
        let constant = self.read_constant();
        let Value::Function(function) = constant else {
            return Err(self.error(ErrorKind::InternalError(
                "LinkageError: OP_CLOSURE constant is not a function".into(),
            )));
        };

        self.maybe_collect();
        let upvalue_count = unsafe { (*function).data.upvalue_count };
        let closure = self
            .heap
            .alloc_closure(ClosureObj {
                function,
                upvalues: Vec::with_capacity(upvalue_count),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        // 先压栈再捕获，捕获过程中触发回收时 closure 自己是根
        self.stack.push(Value::Closure(closure));

        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;

            let upvalue = if is_local {
                let base = self.frames.last().unwrap().slots;
                self.capture_upvalue(base + index)?
            } else {
                let frame = self.frames.last().unwrap();
                unsafe { (&(*frame.closure).data.upvalues)[index] }
            };

            unsafe {
                (*closure).data.upvalues.push(upvalue);
            }
        }

        Ok(())
    }

    /// CLOSE_UPVALUE: close everything at or above the top slot, then pop it
    pub fn handle_close_upvalue(&mut self) -> Result<(), VmError> {
        let last = self.stack.slot_ptr(self.stack.top - 1);
        self.close_upvalues(last);
        self.stack.pop();
        Ok(())
    }

    /// Find-or-insert in the open-upvalue list, which stays strictly
    /// descending by stack address.
    pub fn capture_upvalue(
        &mut self,
        slot: usize,
    ) -> Result<*mut GCObject<UpvalueObj>, VmError> {
        self.maybe_collect();

        let local = self.stack.slot_ptr(slot);
        let mut prev: *mut GCObject<UpvalueObj> = std::ptr::null_mut();
        let mut upvalue = self.open_upvalues;

        unsafe {
            while !upvalue.is_null() && (*upvalue).data.location > local {
                prev = upvalue;
                upvalue = (*upvalue).data.next_open;
            }

            if !upvalue.is_null() && (*upvalue).data.location == local {
                return Ok(upvalue);
            }
        }

        let created = self
            .heap
            .alloc_upvalue(UpvalueObj {
                location: local,
                closed: Value::Nil,
                next_open: upvalue,
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        unsafe {
            if prev.is_null() {
                self.open_upvalues = created;
            } else {
                (*prev).data.next_open = created;
            }
        }

        Ok(created)
    }

    /// Close every open upvalue at or above `last`: copy the referent into the
    /// object and retarget location at its own storage.
    pub fn close_upvalues(&mut self, last: *mut Value) {
        unsafe {
            while !self.open_upvalues.is_null() && (*self.open_upvalues).data.location >= last {
                let upvalue = self.open_upvalues;
                (*upvalue).data.closed = *(*upvalue).data.location;
                (*upvalue).data.location = &raw mut (*upvalue).data.closed;
                self.open_upvalues = (*upvalue).data.next_open;
            }
        }
    }
}
