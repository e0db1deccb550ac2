// Axol compiler VM
// Changelog:
// 2026-03-04: Finalized the VM data structures and core components;
//            fixed-size value stack plus a bounded frame vector, slot 0 of every frame holds
//            the callee (or the receiver after a method bind), upvalue pointers stay valid
//            because the stack storage never reallocates.
// 2026-03-07: Introduced the heap and string interning; `interpret` wraps the compiled script
//            function in a closure and runs the dispatch loop until the last frame returns.
// 2026-03-10: Major Architectural Evolution:
//            [Dispatch System]: decoupled `dispatch` module per instruction family, each
//            handler owns its operand decoding through read_byte/read_short/read_constant.
//            [Error Handling & Diagnostics]: VmError carries the source line and a full
//            stack traceback (innermost first), reporting resets the stack afterwards.
//            [GC & Memory Strategy]: mark-sweep runs synchronously at allocation sites in
//            the dispatch handlers; the intern table is weak and is scrubbed before sweep;
//            stress mode forces a collection at every one of those sites.
// 2026-03-12: Shutdown walks the whole object list and frees every object, nothing leaks.

pub mod dispatch;
pub mod error;
pub mod heap;
pub mod stack;
mod std_lib;

use std::time::Instant;

use clap::ValueEnum;

use crate::backend::debug::disassemble_instruction;
use crate::backend::vm::error::{ErrorKind, TraceEntry, VmError};
use crate::backend::vm::heap::Heap;
use crate::backend::vm::stack::{CallFrame, ValueStack};
use crate::common::chunk::Chunk;
use crate::common::object::{ClosureObj, FunctionObj, GCObject, HeaderOnly, StringObj, UpvalueObj};
use crate::common::opcode::OpCode;
use crate::common::table::Table;
use crate::common::value::Value;
use crate::frontend::compiler;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Release, // 仅输出程序结果
    Debug,   // 输出编译与 GC 统计信息
    Trace,   // 额外反汇编每个 chunk 并逐指令追踪栈
}

#[derive(Debug)]
pub enum InterpretError {
    CompileError,
    RuntimeError(VmError),
}

pub struct VirtualMachine {
    pub frames: Vec<CallFrame>,
    pub stack: ValueStack,
    pub globals: Table,
    /// Sorted by stack address, deepest slot first.
    pub open_upvalues: *mut GCObject<UpvalueObj>,
    pub init_string: *mut GCObject<StringObj>,
    pub heap: Heap,
    pub log_level: LogLevel,
    pub start_time: Instant,
}

impl VirtualMachine {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap
            .copy_string("init")
            .expect("BootstrapError: OutOfMemory while interning the init string");

        let mut vm = Self {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: ValueStack::new(STACK_MAX),
            globals: Table::new(),
            open_upvalues: std::ptr::null_mut(),
            init_string,
            heap,
            log_level: LogLevel::Release,
            start_time: Instant::now(),
        };

        vm.load_standard_library();
        vm
    }

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compiler::compile(source, &mut self.heap, self.log_level)
            .ok_or(InterpretError::CompileError)?;

        match self.run_function(function) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_error(&err);
                self.reset_stack();
                Err(InterpretError::RuntimeError(err))
            }
        }
    }

    fn run_function(&mut self, function: *mut GCObject<FunctionObj>) -> Result<(), VmError> {
        // 裸函数先压栈再包 closure，分配期间它就是根
        self.stack.push(Value::Function(function));
        let closure = self
            .heap
            .alloc_closure(ClosureObj {
                function,
                upvalues: Vec::new(),
            })
            .ok_or_else(|| self.error(ErrorKind::OutOfMemory))?;
        self.stack.pop();
        self.stack.push(Value::Closure(closure));

        self.call_value(Value::Closure(closure), 0)?;
        self.run()
    }

    pub fn run(&mut self) -> Result<(), VmError> {
        if matches!(self.log_level, LogLevel::Debug | LogLevel::Trace) {
            println!("[DEBUG] Starting execution engine...");
        }

        while !self.frames.is_empty() {
            if self.log_level == LogLevel::Trace {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = OpCode::from_byte(byte).ok_or_else(|| {
                self.error(ErrorKind::InternalError(format!(
                    "IllegalOpcodeException: unknown opcode byte {:#04x}",
                    byte
                )))
            })?;

            self.execute_instruction(op)?;
        }

        if matches!(self.log_level, LogLevel::Debug | LogLevel::Trace) {
            println!(
                "[DEBUG] Execution finished. Peak heap usage: {} bytes",
                self.heap.max_allocated
            );
        }

        Ok(())
    }

    /* ---------- operand decoding ---------- */

    pub(crate) fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let chunk = unsafe { &(*(*frame.closure).data.function).data.chunk };
        let byte = chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    pub(crate) fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    pub(crate) fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let chunk = unsafe { &(*(*frame.closure).data.function).data.chunk };
        chunk.constants[index]
    }

    pub(crate) fn read_string(&mut self) -> Result<*mut GCObject<StringObj>, VmError> {
        match self.read_constant() {
            Value::String(string) => Ok(string),
            other => Err(self.error(ErrorKind::InternalError(format!(
                "LinkageError: expected a string constant but found '{}'",
                other.type_name()
            )))),
        }
    }

    /* ---------- diagnostics ---------- */

    fn frame_line(frame: &CallFrame) -> usize {
        unsafe {
            let chunk = &(*(*frame.closure).data.function).data.chunk;
            let ip = frame.ip.saturating_sub(1);
            chunk.lines.get(ip).copied().unwrap_or(0)
        }
    }

    fn frame_name(frame: &CallFrame) -> Option<String> {
        unsafe {
            let name = (*(*frame.closure).data.function).data.name;
            if name.is_null() {
                None
            } else {
                Some((*name).data.data.clone())
            }
        }
    }

    pub fn error(&self, kind: ErrorKind) -> VmError {
        let line = self.frames.last().map(Self::frame_line).unwrap_or(0);
        let stack_trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| TraceEntry {
                line: Self::frame_line(frame),
                func_name: Self::frame_name(frame),
            })
            .collect();

        VmError {
            kind,
            line,
            stack_trace,
        }
    }

    fn report_error(&self, err: &VmError) {
        eprintln!("{}", err.get_message());
        for entry in &err.stack_trace {
            match &entry.func_name {
                Some(name) => eprintln!("[line {}] in {}()", entry.line, name),
                None => eprintln!("[line {}] in script", entry.line),
            }
        }
    }

    pub fn reset_stack(&mut self) {
        self.stack.reset();
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
    }

    fn trace_instruction(&self) {
        print!("\t\t");
        for i in 0..self.stack.top {
            print!("[ {} ]", self.stack.values[i]);
        }
        println!();

        let frame = self.frames.last().unwrap();
        let chunk: &Chunk = unsafe { &(*(*frame.closure).data.function).data.chunk };
        disassemble_instruction(chunk, frame.ip);
    }

    /* ---------- garbage collection ---------- */

    /// Called right before the dispatch handlers allocate. Temporaries that
    /// are still being assembled must already sit on the value stack.
    pub fn maybe_collect(&mut self) {
        if self.heap.check_gc_condition() {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        let before = self.heap.heap_size;

        self.mark_roots();
        self.heap.trace_references();
        // 弱键：没被标上的字符串先从驻留表里摘掉，sweep 才不会留悬垂键
        self.heap.strings.remove_white();
        let (swept_count, swept_bytes) = self.heap.sweep();
        self.heap.expand_threshold();

        if swept_count > 0 && matches!(self.log_level, LogLevel::Debug | LogLevel::Trace) {
            println!(
                "[DEBUG] Sweep phase finished: reclaimed {} objects, {} bytes released (heap {} -> {}), next collection at {} bytes.",
                swept_count, swept_bytes, before, self.heap.heap_size, self.heap.threshold
            );
        }
    }

    fn mark_roots(&mut self) {
        for i in 0..self.stack.top {
            let value = self.stack.values[i];
            self.heap.mark_value(value);
        }

        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.heap.mark_object(closure as *mut GCObject<HeaderOnly>);
        }

        let mut upvalue = self.open_upvalues;
        while !upvalue.is_null() {
            self.heap.mark_object(upvalue as *mut GCObject<HeaderOnly>);
            upvalue = unsafe { (*upvalue).data.next_open };
        }

        self.heap.mark_table(&self.globals);
        self.heap
            .mark_object(self.init_string as *mut GCObject<HeaderOnly>);
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}
