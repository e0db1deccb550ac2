use crate::backend::vm::error::{ErrorKind, VmError};
use crate::backend::vm::stack::CallFrame;
use crate::backend::vm::{FRAMES_MAX, VirtualMachine};
use crate::common::object::{ClosureObj, GCObject, InstanceObj};
use crate::common::table::Table;
use crate::common::value::Value;

impl VirtualMachine {
    /// JUMP
    pub fn handle_jump(&mut self) -> Result<(), VmError> {
        let offset = self.read_short() as usize;
        self.frames.last_mut().unwrap().ip += offset;
        Ok(())
    }

    /// JUMP_IF_FALSE：跳转本身不弹栈，条件值留给后面的 POP
    pub fn handle_jump_if_false(&mut self) -> Result<(), VmError> {
        let offset = self.read_short() as usize;
        if !self.stack.peek(0).is_truthy() {
            self.frames.last_mut().unwrap().ip += offset;
        }
        Ok(())
    }

    /// LOOP
    pub fn handle_loop(&mut self) -> Result<(), VmError> {
        let offset = self.read_short() as usize;
        self.frames.last_mut().unwrap().ip -= offset;
        Ok(())
    }

    /// CALL
    pub fn handle_call(&mut self) -> Result<(), VmError> {
        let argc = self.read_byte() as usize;
        let callee = self.stack.peek(argc);
        self.call_value(callee, argc)
    }

    pub fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), VmError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),

            Value::Class(class) => {
                self.maybe_collect();
                let instance = self
                    .heap
                    .alloc_instance(InstanceObj {
                        class,
                        fields: Table::new(),
                    })
                    .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

                // 被调用的类对象原地换成新实例，init 看到的槽 0 就是它
                self.stack.set_peek(argc, Value::Instance(instance));

                let initializer = unsafe { (*class).data.methods.get(self.init_string) };
                if let Some(Value::Closure(init)) = initializer {
                    self.call_closure(init, argc)
                } else if argc != 0 {
                    Err(self.error(ErrorKind::ArityMismatch(format!(
                        "Class with no initializer must receive zero args: got {}",
                        argc
                    ))))
                } else {
                    Ok(())
                }
            }

            Value::BoundMethod(bound) => {
                let receiver = unsafe { (*bound).data.receiver };
                self.stack.set_peek(argc, receiver);
                self.call_closure(unsafe { (*bound).data.method }, argc)
            }

            Value::Native(native) => {
                let callback = unsafe { (*native).data.callback };
                let args_start = self.stack.top - argc;
                let result = {
                    let args = &self.stack.values[args_start..self.stack.top];
                    callback(&*self, args)
                };

                self.stack.top -= argc + 1;
                self.stack.push(result);
                Ok(())
            }

            Value::Nil => Err(self.error(ErrorKind::InvalidCall(
                "NullPointerException: attempt to invoke a nil value".into(),
            ))),

            _ => Err(self.error(ErrorKind::InvalidCall(format!(
                "Can only call closures and classes, not '{}'",
                callee.type_name()
            )))),
        }
    }

    pub fn call_closure(
        &mut self,
        closure: *mut GCObject<ClosureObj>,
        argc: usize,
    ) -> Result<(), VmError> {
        let function = unsafe { (*closure).data.function };
        let arity = unsafe { (*function).data.arity };

        if argc != arity {
            let name = unsafe {
                let name = (*function).data.name;
                if name.is_null() {
                    "<script>".to_string()
                } else {
                    (*name).data.data.clone()
                }
            };
            return Err(self.error(ErrorKind::ArityMismatch(format!(
                "function '{}' expected {} arguments but got {}",
                name, arity, argc
            ))));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }

        self.frames.push(CallFrame {
            closure,
            ip: 0,
            // 槽 0 是被调者本身（方法调用时已被换成接收者）
            slots: self.stack.top - argc - 1,
        });
        Ok(())
    }

    /// RETURN
    pub fn handle_return(&mut self) -> Result<(), VmError> {
        let result = self.stack.pop();
        let frame = self.frames.pop().ok_or_else(|| {
            self.error(ErrorKind::InternalError(
                "StackUnderflowException: attempt to return from an empty call stack".into(),
            ))
        })?;

        let base = self.stack.slot_ptr(frame.slots);
        self.close_upvalues(base);

        if self.frames.is_empty() {
            // script 收尾：把顶层 closure 一并弹掉
            self.stack.pop();
            return Ok(());
        }

        self.stack.truncate(frame.slots);
        self.stack.push(result);
        Ok(())
    }
}
