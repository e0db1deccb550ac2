// Axol compiler disassembler
// Changelog:
// 2026-03-06: Chunk disassembly for Trace mode; one line per instruction, a `|` marks runs
//            on the same source line, closure descriptors are expanded inline.

use crate::common::chunk::Chunk;
use crate::common::opcode::OpCode;
use crate::common::value::Value;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);

    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{:<16} {:4}", name, slot);
    offset + 2
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = ((chunk.code[offset + 1] as u16) << 8) | chunk.code[offset + 2] as u16;
    println!(
        "{:<16} {:4} -> {}",
        name,
        offset,
        offset as i64 + 3 + sign * jump as i64
    );
    offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    println!(
        "{:<16} {:4} '{}'",
        name, constant, chunk.constants[constant as usize]
    );
    offset + 2
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset];
    offset += 1;

    let value = chunk.constants[constant as usize];
    println!("{:<16} {:4} {}", "OP_CLOSURE", constant, value);

    if let Value::Function(function) = value {
        let upvalue_count = unsafe { (*function).data.upvalue_count };
        for _ in 0..upvalue_count {
            let is_local = chunk.code[offset];
            let index = chunk.code[offset + 1];
            println!(
                "{:04}    |                     {} {}",
                offset,
                if is_local != 0 { "local" } else { "upvalue" },
                index
            );
            offset += 2;
        }
    }

    offset
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let Some(op) = OpCode::from_byte(chunk.code[offset]) else {
        println!("Unknown opcode: {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Class
        | OpCode::Method => constant_instruction(op.name(), chunk, offset),

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(op.name(), chunk, offset),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op.name(), 1, chunk, offset),
        OpCode::Loop => jump_instruction(op.name(), -1, chunk, offset),

        OpCode::Closure => closure_instruction(chunk, offset),

        _ => simple_instruction(op.name(), offset),
    }
}
