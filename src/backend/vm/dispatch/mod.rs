mod access;
mod arithmetic;
mod class;
mod closure;
mod compare;
mod control;

use crate::backend::vm::VirtualMachine;
use crate::backend::vm::error::VmError;
use crate::common::opcode::OpCode;

impl VirtualMachine {
    pub fn execute_instruction(&mut self, op: OpCode) -> Result<(), VmError> {
        match op {
            OpCode::Constant => self.handle_constant(),
            OpCode::Nil => self.handle_nil(),
            OpCode::True => self.handle_true(),
            OpCode::False => self.handle_false(),
            OpCode::Pop => self.handle_pop(),

            OpCode::GetLocal => self.handle_get_local(),
            OpCode::SetLocal => self.handle_set_local(),
            OpCode::GetGlobal => self.handle_get_global(),
            OpCode::DefineGlobal => self.handle_define_global(),
            OpCode::SetGlobal => self.handle_set_global(),
            OpCode::GetUpvalue => self.handle_get_upvalue(),
            OpCode::SetUpvalue => self.handle_set_upvalue(),
            OpCode::GetProperty => self.handle_get_property(),
            OpCode::SetProperty => self.handle_set_property(),

            OpCode::Equal => self.handle_equal(),
            OpCode::Greater => self.handle_greater(),
            OpCode::Less => self.handle_less(),

            OpCode::Add => self.handle_add(),
            OpCode::Subtract => self.handle_subtract(),
            OpCode::Multiply => self.handle_multiply(),
            OpCode::Divide => self.handle_divide(),
            OpCode::Not => self.handle_not(),
            OpCode::Negate => self.handle_negate(),

            OpCode::Print => self.handle_print(),

            OpCode::Jump => self.handle_jump(),
            OpCode::JumpIfFalse => self.handle_jump_if_false(),
            OpCode::Loop => self.handle_loop(),
            OpCode::Call => self.handle_call(),
            OpCode::Closure => self.handle_closure(),
            OpCode::CloseUpvalue => self.handle_close_upvalue(),
            OpCode::Return => self.handle_return(),

            OpCode::Class => self.handle_class(),
            OpCode::Method => self.handle_method(),
        }
    }
}
