use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{GCObject, StringObj};
use crate::common::value::Value;

impl VirtualMachine {
    /// ADD: numbers add, two strings concatenate, anything else is a type error
    pub fn handle_add(&mut self) -> Result<(), VmError> {
        match (self.stack.peek(1), self.stack.peek(0)) {
            (Value::String(a), Value::String(b)) => self.concatenate(a, b),
            (Value::Number(a), Value::Number(b)) => {
                self.stack.pop();
                self.stack.pop();
                self.stack.push(Value::Number(a + b));
                Ok(())
            }
            (a, b) => Err(self.error(ErrorKind::TypeError(format!(
                "Operands must be two numbers or two strings, got '{}' and '{}'",
                a.type_name(),
                b.type_name()
            )))),
        }
    }

    pub fn handle_subtract(&mut self) -> Result<(), VmError> {
        self.binary_number_op(|a, b| Value::Number(a - b), "subtraction")
    }

    pub fn handle_multiply(&mut self) -> Result<(), VmError> {
        self.binary_number_op(|a, b| Value::Number(a * b), "multiplication")
    }

    /// DIV: division by zero is not trapped, IEEE gives inf/NaN
    pub fn handle_divide(&mut self) -> Result<(), VmError> {
        self.binary_number_op(|a, b| Value::Number(a / b), "division")
    }

    pub fn handle_not(&mut self) -> Result<(), VmError> {
        let value = self.stack.pop();
        self.stack.push(Value::Boolean(!value.is_truthy()));
        Ok(())
    }

    pub fn handle_negate(&mut self) -> Result<(), VmError> {
        let Value::Number(n) = self.stack.peek(0) else {
            let found = self.stack.peek(0).type_name();
            return Err(self.error(ErrorKind::TypeError(format!(
                "Operand must be a number, got '{}'",
                found
            ))));
        };

        self.stack.pop();
        self.stack.push(Value::Number(-n));
        Ok(())
    }

    pub(crate) fn binary_number_op<F>(&mut self, op_fn: F, op_name: &str) -> Result<(), VmError>
    where
        F: Fn(f64, f64) -> Value,
    {
        let (Value::Number(a), Value::Number(b)) = (self.stack.peek(1), self.stack.peek(0)) else {
            let message = format!(
                "binary operator '{}' expects numbers, got '{}' and '{}'",
                op_name,
                self.stack.peek(1).type_name(),
                self.stack.peek(0).type_name()
            );
            return Err(self.error(ErrorKind::TypeError(message)));
        };

        self.stack.pop();
        self.stack.pop();
        self.stack.push(op_fn(a, b));
        Ok(())
    }

    fn concatenate(
        &mut self,
        a: *mut GCObject<StringObj>,
        b: *mut GCObject<StringObj>,
    ) -> Result<(), VmError> {
        // 两个操作数还压在栈上，回收扫得到它们
        self.maybe_collect();

        let combined = unsafe {
            let mut s = String::with_capacity((&(*a).data.data).len() + (&(*b).data.data).len());
            s.push_str(&(*a).data.data);
            s.push_str(&(*b).data.data);
            s
        };

        let result = self
            .heap
            .take_string(combined)
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;

        self.stack.pop();
        self.stack.pop();
        self.stack.push(Value::String(result));
        Ok(())
    }
}
