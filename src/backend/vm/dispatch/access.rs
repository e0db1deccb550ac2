use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::value::Value;

impl VirtualMachine {
    pub fn handle_constant(&mut self) -> Result<(), VmError> {
        let constant = self.read_constant();
        self.stack.push(constant);
        Ok(())
    }

    pub fn handle_nil(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Nil);
        Ok(())
    }

    pub fn handle_true(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Boolean(true));
        Ok(())
    }

    pub fn handle_false(&mut self) -> Result<(), VmError> {
        self.stack.push(Value::Boolean(false));
        Ok(())
    }

    pub fn handle_pop(&mut self) -> Result<(), VmError> {
        self.stack.pop();
        Ok(())
    }

    /// GET_LOCAL: push frame.slots[u8]
    pub fn handle_get_local(&mut self) -> Result<(), VmError> {
        let slot = self.read_byte() as usize;
        let base = self.frames.last().unwrap().slots;
        let value = self.stack.values[base + slot];
        self.stack.push(value);
        Ok(())
    }

    /// SET_LOCAL: frame.slots[u8] := peek(0)，赋值表达式有值，不弹栈
    pub fn handle_set_local(&mut self) -> Result<(), VmError> {
        let slot = self.read_byte() as usize;
        let base = self.frames.last().unwrap().slots;
        self.stack.values[base + slot] = self.stack.peek(0);
        Ok(())
    }

    pub fn handle_get_global(&mut self) -> Result<(), VmError> {
        let name = self.read_string()?;
        match self.globals.get(name) {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None => {
                let name = unsafe { (*name).data.data.clone() };
                Err(self.error(ErrorKind::UndefinedVariable(name)))
            }
        }
    }

    pub fn handle_define_global(&mut self) -> Result<(), VmError> {
        let name = self.read_string()?;
        let value = self.stack.peek(0);
        self.globals.set(name, value);
        self.stack.pop();
        Ok(())
    }

    /// SET_GLOBAL: insert-and-delete probe, assigning an undefined name is an error
    pub fn handle_set_global(&mut self) -> Result<(), VmError> {
        let name = self.read_string()?;
        let value = self.stack.peek(0);
        if self.globals.set(name, value) {
            self.globals.delete(name);
            let name = unsafe { (*name).data.data.clone() };
            return Err(self.error(ErrorKind::UndefinedVariable(name)));
        }

        Ok(())
    }

    pub fn handle_get_upvalue(&mut self) -> Result<(), VmError> {
        let slot = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let value = unsafe {
            let upvalue = (&(*frame.closure).data.upvalues)[slot];
            *(*upvalue).data.location
        };
        self.stack.push(value);
        Ok(())
    }

    pub fn handle_set_upvalue(&mut self) -> Result<(), VmError> {
        let slot = self.read_byte() as usize;
        let value = self.stack.peek(0);
        let frame = self.frames.last().unwrap();
        unsafe {
            let upvalue = (&(*frame.closure).data.upvalues)[slot];
            *(*upvalue).data.location = value;
        }
        Ok(())
    }

    pub fn handle_print(&mut self) -> Result<(), VmError> {
        let value = self.stack.pop();
        println!("{}", value);
        Ok(())
    }
}
