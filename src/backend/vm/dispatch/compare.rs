use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::VmError;
use crate::common::value::Value;

impl VirtualMachine {
    /// EQUAL: by variant; numbers IEEE, objects by identity, mixed types never equal
    pub fn handle_equal(&mut self) -> Result<(), VmError> {
        let b = self.stack.pop();
        let a = self.stack.pop();
        self.stack.push(Value::Boolean(a == b));
        Ok(())
    }

    pub fn handle_greater(&mut self) -> Result<(), VmError> {
        self.binary_number_op(|a, b| Value::Boolean(a > b), "comparison")
    }

    pub fn handle_less(&mut self) -> Result<(), VmError> {
        self.binary_number_op(|a, b| Value::Boolean(a < b), "comparison")
    }
}
