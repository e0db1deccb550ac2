use crate::backend::vm::VirtualMachine;
use crate::common::object::{NativeFn, NativeObj};
use crate::common::value::Value;

/// clock() -> seconds since the VM started, as a number.
pub fn native_clock(vm: &VirtualMachine, _args: &[Value]) -> Value {
    Value::Number(vm.start_time.elapsed().as_secs_f64())
}

impl VirtualMachine {
    pub fn load_standard_library(&mut self) {
        self.define_native("clock", native_clock);
    }

    fn define_native(&mut self, name: &str, callback: NativeFn) {
        let name = self
            .heap
            .copy_string(name)
            .expect("BootstrapError: OutOfMemory while registering a native function");
        // 名字和 native 对象都过一遍栈，注册途中触发回收也饿不死它们
        self.stack.push(Value::String(name));
        let native = self
            .heap
            .alloc_native(NativeObj { callback })
            .expect("BootstrapError: OutOfMemory while registering a native function");
        self.stack.push(Value::Native(native));

        self.globals.set(name, self.stack.peek(0));

        self.stack.pop();
        self.stack.pop();
    }
}
