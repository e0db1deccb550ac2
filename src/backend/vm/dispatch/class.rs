use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{BoundMethodObj, ClassObj, GCObject, StringObj};
use crate::common::table::Table;
use crate::common::value::Value;

impl VirtualMachine {
    /// CLASS: push a fresh class; its name is a chunk constant
    pub fn handle_class(&mut self) -> Result<(), VmError> {
        let name = self.read_string()?;

        self.maybe_collect();
        let class = self
            .heap
            .alloc_class(ClassObj {
                name,
                methods: Table::new(),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        self.stack.push(Value::Class(class));
        Ok(())
    }

    /// METHOD: bind the closure on top to the class right below it
    pub fn handle_method(&mut self) -> Result<(), VmError> {
        let name = self.read_string()?;
        let method = self.stack.peek(0);
        let Value::Class(class) = self.stack.peek(1) else {
            return Err(self.error(ErrorKind::InternalError(
                "IllegalStateException: OP_METHOD without a class beneath the method".into(),
            )));
        };

        unsafe {
            (*class).data.methods.set(name, method);
        }
        self.stack.pop();
        Ok(())
    }

    /// GET_PROPERTY: fields first, then a method bound to the receiver
    pub fn handle_get_property(&mut self) -> Result<(), VmError> {
        let receiver = self.stack.peek(0);
        let Value::Instance(instance) = receiver else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "Only classes have properties, not '{}'",
                receiver.type_name()
            ))));
        };

        let name = self.read_string()?;

        if let Some(value) = unsafe { (*instance).data.fields.get(name) } {
            self.stack.pop();
            self.stack.push(value);
            return Ok(());
        }

        let class = unsafe { (*instance).data.class };
        self.bind_method(class, name)
    }

    /// SET_PROPERTY: store peek(0) into peek(1)'s fields, keep the value on top
    pub fn handle_set_property(&mut self) -> Result<(), VmError> {
        let target = self.stack.peek(1);
        let Value::Instance(instance) = target else {
            return Err(self.error(ErrorKind::TypeError(format!(
                "Only classes have properties, not '{}'",
                target.type_name()
            ))));
        };

        let name = self.read_string()?;
        let value = self.stack.peek(0);
        unsafe {
            (*instance).data.fields.set(name, value);
        }

        let value = self.stack.pop();
        self.stack.pop();
        self.stack.push(value);
        Ok(())
    }

    /// Replace the receiver on top with a BoundMethod for `name`.
    fn bind_method(
        &mut self,
        class: *mut GCObject<ClassObj>,
        name: *mut GCObject<StringObj>,
    ) -> Result<(), VmError> {
        let method = unsafe { (*class).data.methods.get(name) };
        let Some(Value::Closure(method)) = method else {
            let message = unsafe {
                format!(
                    "Class '{}' has no property '{}'",
                    (*(*class).data.name).data.data,
                    (*name).data.data
                )
            };
            return Err(self.error(ErrorKind::UndefinedProperty(message)));
        };

        // 接收者还在栈顶，分配期间是根
        self.maybe_collect();
        let receiver = self.stack.peek(0);
        let bound = self
            .heap
            .alloc_bound_method(BoundMethodObj { receiver, method })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        self.stack.pop();
        self.stack.push(Value::BoundMethod(bound));
        Ok(())
    }
}
