// Axol compiler bytecode emitter
//
// Changelog:
//      26-03-05: Initial version, single pass: the Pratt parser emits bytecode
//                directly into the current function's chunk, no AST in between
//      26-03-08: Local slots, scope tracking, jump patching for control flow
//      26-03-11: Closures: upvalue resolution walks the enclosing compiler
//                chain, captured locals are closed on scope exit
//      26-03-13: Classes, methods and `this`; `init` compiles as initializer

use std::borrow::Cow;
use std::mem;

use crate::backend::debug::disassemble_chunk;
use crate::backend::vm::LogLevel;
use crate::backend::vm::heap::Heap;
use crate::common::chunk::Chunk;
use crate::common::object::{FunctionObj, GCObject};
use crate::common::opcode::OpCode;
use crate::common::value::Value;
use crate::frontend::scanner::Scanner;
use crate::frontend::scanner::token::{Token, TokenKind};

const LOCALS_MAX: usize = 256;
const UPVALUES_MAX: usize = 256;

/// 优先级从低到高，parse_precedence 只接受 >= Assignment 的入口
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

/// Rule actions are a closed set, so the table dispatches through an enum
/// instead of function pointers.
#[derive(Debug, Clone, Copy)]
enum ParseFn {
    Grouping,
    CallExpr,
    Dot,
    Unary,
    Binary,
    Variable,
    StringLit,
    NumberLit,
    AndOp,
    OrOp,
    Literal,
    This,
}

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    prec: Precedence,
}

const fn parse_rule(
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    prec: Precedence,
) -> ParseRule {
    ParseRule { prefix, infix, prec }
}

fn rule(kind: TokenKind) -> ParseRule {
    use ParseFn::*;
    use TokenKind as T;

    match kind {
        T::LeftParen => parse_rule(Some(Grouping), Some(CallExpr), Precedence::Call),
        T::Dot => parse_rule(None, Some(Dot), Precedence::Call),
        T::Minus => parse_rule(Some(Unary), Some(Binary), Precedence::Term),
        T::Plus => parse_rule(None, Some(Binary), Precedence::Term),
        T::Slash | T::Star => parse_rule(None, Some(Binary), Precedence::Factor),
        T::Bang => parse_rule(Some(Unary), None, Precedence::None),
        T::BangEqual | T::EqualEqual => parse_rule(None, Some(Binary), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            parse_rule(None, Some(Binary), Precedence::Comparison)
        }
        T::Identifier => parse_rule(Some(Variable), None, Precedence::None),
        T::String => parse_rule(Some(StringLit), None, Precedence::None),
        T::Number => parse_rule(Some(NumberLit), None, Precedence::None),
        T::And => parse_rule(None, Some(AndOp), Precedence::And),
        T::Or => parse_rule(None, Some(OrOp), Precedence::Or),
        T::False | T::Nil | T::True => parse_rule(Some(Literal), None, Precedence::None),
        T::This => parse_rule(Some(This), None, Precedence::None),
        _ => parse_rule(None, None, Precedence::None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncType {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: Cow<'src, str>,
    /// -1 means declared but not yet initialized.
    depth: i32,
    captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

pub struct FuncCompiler<'src> {
    enclosing: Option<Box<FuncCompiler<'src>>>,
    pub function: *mut GCObject<FunctionObj>,
    ftype: FuncType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FuncCompiler<'src> {
    fn placeholder() -> Self {
        Self {
            enclosing: None,
            function: std::ptr::null_mut(),
            ftype: FuncType::Script,
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
}

fn resolve_local_in(compiler: &FuncCompiler, name: &str, errors: &mut Vec<String>) -> Option<u8> {
    for (i, local) in compiler.locals.iter().enumerate().rev() {
        if local.name == name {
            if local.depth == -1 {
                errors.push(format!(
                    "Self-referencing local variable '{}' in initializer",
                    name
                ));
            }
            return Some(i as u8);
        }
    }

    None
}

fn add_upvalue(
    compiler: &mut FuncCompiler,
    index: u8,
    is_local: bool,
    errors: &mut Vec<String>,
) -> u8 {
    let desc = UpvalueDesc { index, is_local };
    for (i, existing) in compiler.upvalues.iter().enumerate() {
        if *existing == desc {
            return i as u8;
        }
    }

    if compiler.upvalues.len() == UPVALUES_MAX {
        errors.push("Too many captured variables in closure".to_string());
        return 0;
    }

    compiler.upvalues.push(desc);
    (compiler.upvalues.len() - 1) as u8
}

/// 逐层向外找：先当外层局部变量，找不到再递归当外层的 upvalue
fn resolve_upvalue_in(
    compiler: &mut FuncCompiler,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<u8> {
    compiler.enclosing.as_deref_mut()?;

    let local = {
        let enclosing = compiler.enclosing.as_deref_mut().unwrap();
        let slot = resolve_local_in(enclosing, name, errors);
        if let Some(index) = slot {
            enclosing.locals[index as usize].captured = true;
        }
        slot
    };
    if let Some(index) = local {
        return Some(add_upvalue(compiler, index, true, errors));
    }

    let upvalue = resolve_upvalue_in(compiler.enclosing.as_deref_mut().unwrap(), name, errors);
    if let Some(index) = upvalue {
        return Some(add_upvalue(compiler, index, false, errors));
    }

    None
}

pub struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    heap: &'h mut Heap,
    compiler: Box<FuncCompiler<'src>>,
    class_compiler: Option<Box<ClassCompiler>>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    log_level: LogLevel,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap, log_level: LogLevel) -> Parser<'src, 'h> {
        let function = heap
            .alloc_function(FunctionObj::new())
            .expect("BootstrapError: OutOfMemory while allocating the script function");

        let compiler = Box::new(FuncCompiler {
            enclosing: None,
            function,
            ftype: FuncType::Script,
            locals: vec![Local {
                name: Cow::Borrowed("this"),
                depth: 0,
                captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        });

        Parser {
            scanner: Scanner::new(source),
            heap,
            compiler,
            class_compiler: None,
            current: Token::synthetic(TokenKind::Eof, ""),
            previous: Token::synthetic(TokenKind::Eof, ""),
            had_error: false,
            panic_mode: false,
            log_level,
        }
    }

    /* ---------- error reporting ---------- */

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        eprint!("[{}:{}] Error", token.line, token.column);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {}", message);

        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    /* ---------- token plumbing ---------- */

    fn advance(&mut self) {
        self.previous = self.current.clone();

        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }

            let message = self.current.lexeme.clone().into_owned();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }

        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }

        self.advance();
        true
    }

    /* ---------- emit helpers ---------- */

    fn current_chunk(&mut self) -> &mut Chunk {
        unsafe { &mut (*self.compiler.function).data.chunk }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large! Maximum 65535 ops");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over!");
        }

        let chunk = self.current_chunk();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn implicit_return(&mut self) {
        // 构造器的隐式返回值是槽 0 里的实例本身
        if self.compiler.ftype == FuncType::Initializer {
            self.emit_ops(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let constant = self.current_chunk().add_constant(value);
        if constant > u8::MAX as usize {
            self.error("Too many constants in one chunk! Maximum 255");
            return 0;
        }

        constant as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_ops(OpCode::Constant, constant);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let string = self
            .heap
            .copy_string(name)
            .expect("BootstrapError: OutOfMemory while interning an identifier");
        self.make_constant(Value::String(string))
    }

    /* ---------- compiler chain ---------- */

    fn push_compiler(&mut self, ftype: FuncType) {
        let function = self
            .heap
            .alloc_function(FunctionObj::new())
            .expect("BootstrapError: OutOfMemory while allocating a function object");

        let new_compiler = Box::new(FuncCompiler {
            enclosing: None,
            function,
            ftype,
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
        });
        let enclosing = mem::replace(&mut self.compiler, new_compiler);
        self.compiler.enclosing = Some(enclosing);

        if ftype != FuncType::Script {
            let name = self
                .heap
                .copy_string(self.previous.lexeme.as_ref())
                .expect("BootstrapError: OutOfMemory while interning a function name");
            unsafe {
                (*function).data.name = name;
            }
        }

        // 槽 0 保留：方法和构造器绑定 this，普通函数留一个够不着的空名
        let slot_zero = if ftype == FuncType::Function {
            Cow::Borrowed("")
        } else {
            Cow::Borrowed("this")
        };
        self.compiler.locals.push(Local {
            name: slot_zero,
            depth: 0,
            captured: false,
        });
    }

    fn function_name(&self) -> String {
        unsafe {
            let name = (*self.compiler.function).data.name;
            if name.is_null() {
                "<script>".to_string()
            } else {
                (*name).data.data.clone()
            }
        }
    }

    fn pop_compiler(&mut self) -> Box<FuncCompiler<'src>> {
        self.implicit_return();

        let function = self.compiler.function;
        unsafe {
            (*function).data.upvalue_count = self.compiler.upvalues.len();
        }

        if self.log_level == LogLevel::Trace && !self.had_error {
            let name = self.function_name();
            disassemble_chunk(unsafe { &(*function).data.chunk }, &name);
        }

        match self.compiler.enclosing.take() {
            Some(enclosing) => mem::replace(&mut self.compiler, enclosing),
            None => mem::replace(&mut self.compiler, Box::new(FuncCompiler::placeholder())),
        }
    }

    /* ---------- scopes and variables ---------- */

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;

        loop {
            let Some(local) = self.compiler.locals.last() else {
                break;
            };
            if local.depth <= self.compiler.scope_depth {
                break;
            }

            let captured = local.captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.compiler.locals.pop();
        }
    }

    fn add_local(&mut self, name: Cow<'src, str>) {
        if self.compiler.locals.len() == LOCALS_MAX {
            self.error("Too many local variables in function, limit 256");
            return;
        }

        self.compiler.locals.push(Local {
            name,
            depth: -1,
            captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme.clone();
        let mut redeclared = false;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }

            if local.name == name {
                redeclared = true;
                break;
            }
        }

        if redeclared {
            let message = format!("Redeclaration of variable '{}'", name);
            self.error(&message);
        }

        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.compiler.scope_depth > 0 {
            return 0;
        }

        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }

        let depth = self.compiler.scope_depth;
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        self.emit_ops(OpCode::DefineGlobal, global);
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let mut errors = Vec::new();
        let lexeme = name.lexeme.clone();

        let (get_op, set_op, arg) =
            if let Some(slot) = resolve_local_in(&self.compiler, &lexeme, &mut errors) {
                (OpCode::GetLocal, OpCode::SetLocal, slot)
            } else if let Some(index) =
                resolve_upvalue_in(&mut self.compiler, &lexeme, &mut errors)
            {
                (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
            } else {
                let constant = self.identifier_constant(&lexeme);
                (OpCode::GetGlobal, OpCode::SetGlobal, constant)
            };

        for message in errors {
            self.error(&message);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }

    /* ---------- expression rules ---------- */

    fn apply_rule(&mut self, parse_fn: ParseFn, can_assign: bool) {
        match parse_fn {
            ParseFn::Grouping => self.grouping(),
            ParseFn::CallExpr => self.call(),
            ParseFn::Dot => self.dot(can_assign),
            ParseFn::Unary => self.unary(),
            ParseFn::Binary => self.binary(),
            ParseFn::Variable => self.variable(can_assign),
            ParseFn::StringLit => self.string(),
            ParseFn::NumberLit => self.number(),
            ParseFn::AndOp => self.and_op(),
            ParseFn::OrOp => self.or_op(),
            ParseFn::Literal => self.literal(),
            ParseFn::This => self.this(),
        }
    }

    fn parse_precedence(&mut self, prec: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expected expression");
            return;
        };

        let can_assign = prec <= Precedence::Assignment;
        self.apply_rule(prefix, can_assign);

        while prec <= rule(self.current.kind).prec {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                self.apply_rule(infix, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' to end parentheses");
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        // 词素还带着开引号
        let lexeme = self.previous.lexeme.clone();
        let string = self
            .heap
            .copy_string(&lexeme[1..])
            .expect("BootstrapError: OutOfMemory while interning a string literal");
        self.emit_constant(Value::String(string));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.clone();
        self.named_variable(name, can_assign);
    }

    fn this(&mut self) {
        if self.class_compiler.is_none() {
            self.error("`this` reference outside of class body");
            return;
        }

        self.variable(false);
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;

        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let op_kind = self.previous.kind;
        let prec = rule(op_kind).prec;
        self.parse_precedence(prec.next());

        match op_kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    fn and_op(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);

        self.patch_jump(end_jump);
    }

    fn or_op(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == u8::MAX {
                    self.error("Function cannot have more than 255 arguments");
                } else {
                    argc += 1;
                }

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightParen, "Expected ')' after argument list");
        argc
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_ops(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expected property name to follow `.`");
        let lexeme = self.previous.lexeme.clone();
        let name = self.identifier_constant(&lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_ops(OpCode::SetProperty, name);
        } else {
            self.emit_ops(OpCode::GetProperty, name);
        }
    }

    /* ---------- declarations and statements ---------- */

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }

        self.consume(TokenKind::RightBrace, "Expected '}' to end a block");
    }

    fn function(&mut self, ftype: FuncType) {
        self.push_compiler(ftype);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after a function name");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = unsafe {
                    let function = &mut (*self.compiler.function).data;
                    function.arity += 1;
                    function.arity
                };
                if arity > u8::MAX as usize {
                    let message = format!(
                        "Function {} cannot have more than 255 parameters",
                        self.function_name()
                    );
                    self.error_at_current(&message);
                }

                let constant = self.parse_variable("Expected parameter name");
                self.define_variable(constant);

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightParen, "Expected ')' to end a parameter list");
        self.consume(TokenKind::LeftBrace, "Expected '{' for a function body");

        self.block();
        let compiler = self.pop_compiler();

        let constant = self.make_constant(Value::Function(compiler.function));
        self.emit_ops(OpCode::Closure, constant);

        for upvalue in &compiler.upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expected method name");
        let lexeme = self.previous.lexeme.clone();
        let constant = self.identifier_constant(&lexeme);

        let ftype = if lexeme.as_ref() == "init" {
            FuncType::Initializer
        } else {
            FuncType::Method
        };

        self.function(ftype);
        self.emit_ops(OpCode::Method, constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expected class name");
        let class_name = self.previous.clone();
        let lexeme = class_name.lexeme.clone();
        let name_const = self.identifier_constant(&lexeme);
        self.declare_variable();

        self.emit_ops(OpCode::Class, name_const);
        self.define_variable(name_const);

        let enclosing = self.class_compiler.take();
        self.class_compiler = Some(Box::new(ClassCompiler { enclosing }));

        // 类对象压回栈顶，方法挨个绑上去
        self.named_variable(class_name, false);

        self.consume(TokenKind::LeftBrace, "Expected '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }

        self.consume(TokenKind::RightBrace, "Expected '}' to end class body");
        self.emit_op(OpCode::Pop);

        let class_compiler = self.class_compiler.take().unwrap();
        self.class_compiler = class_compiler.enclosing;
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expected function name");
        // 先标记已初始化，函数体里才能递归引用自己
        self.mark_initialized();
        self.function(FuncType::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expected variable name");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.consume(TokenKind::Semicolon, "Expected ';' to end a statement");
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' to end a statement");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expected '(' after `if`");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' to end if condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' to end a statement");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.compiler.ftype == FuncType::Script {
            self.error("Return outside of function");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.implicit_return();
        } else {
            if self.compiler.ftype == FuncType::Initializer {
                self.error("Illegal return in initializer");
            }

            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' to end a statement");
            self.emit_op(OpCode::Return);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expected '(' after `while`");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' to end while condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after `for`");
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if !self.match_token(TokenKind::Semicolon) {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump = None;

        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after for loop condition");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // 先跳过增量段，循环体执行完再回头跑它
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expected ')' after for loop clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }

            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }

            self.advance();
        }
    }

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }
}

/// Compile a source string into the top-level script function. Returns None
/// when any compile error was reported.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    log_level: LogLevel,
) -> Option<*mut GCObject<FunctionObj>> {
    let mut parser = Parser::new(source, heap, log_level);

    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }

    let compiler = parser.pop_compiler();
    let had_error = parser.had_error;

    if log_level == LogLevel::Debug || log_level == LogLevel::Trace {
        println!(
            "[DEBUG] Compilation finished: {}",
            if had_error { "errors reported" } else { "ok" }
        );
    }

    if had_error { None } else { Some(compiler.function) }
}
