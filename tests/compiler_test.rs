use axol::backend::vm::LogLevel;
use axol::backend::vm::heap::Heap;
use axol::frontend::compiler::compile;

// 编译到一个独立的堆上，只看字节码本身
fn compile_bytes(source: &str) -> Option<(Vec<u8>, Vec<usize>, usize)> {
    let mut heap = Heap::new();
    let function = compile(source, &mut heap, LogLevel::Release)?;
    let chunk = unsafe { &(*function).data.chunk };
    Some((chunk.code.clone(), chunk.lines.clone(), chunk.constants.len()))
}

fn compiles(source: &str) -> bool {
    compile_bytes(source).is_some()
}

#[test]
fn compilation_is_deterministic() {
    let source = r#"
        fun fib(n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        var r = fib(10);
        print r;
        class Box { init(v) { this.v = v; } get() { return this.v; } }
        print Box(3).get();
    "#;

    let first = compile_bytes(source).expect("program must compile");
    let second = compile_bytes(source).expect("program must compile");

    assert_eq!(first.0, second.0, "code bytes must be identical");
    assert_eq!(first.1, second.1, "line tables must be identical");
    assert_eq!(first.2, second.2, "constant pools must have equal length");
}

#[test]
fn too_many_constants_in_one_chunk() {
    // 每个数字字面量都会占一个常量槽
    let mut source = String::new();
    for i in 0..260 {
        source.push_str(&format!("print {};", i));
    }

    assert!(!compiles(&source));
}

#[test]
fn too_many_locals_in_one_function() {
    let mut source = String::from("{");
    for i in 0..257 {
        source.push_str(&format!("var l{};", i));
    }
    source.push('}');

    assert!(!compiles(&source));
}

#[test]
fn too_many_parameters() {
    let mut source = String::from("fun f(");
    for i in 0..256 {
        if i > 0 {
            source.push(',');
        }
        source.push_str(&format!("p{}", i));
    }
    source.push_str(") {}");

    assert!(!compiles(&source));
}

#[test]
fn jump_offset_overflow_is_reported() {
    // 一个超过 u16 偏移量的 then 分支：每条 print 语句 3 字节
    let mut source = String::from("if (true) { var a; ");
    for _ in 0..33000 {
        source.push_str("print a;");
    }
    source.push('}');

    assert!(!compiles(&source));
}

#[test]
fn self_referencing_local_is_an_error() {
    assert!(!compiles("{ var a = a; }"));
}

#[test]
fn shadowing_an_outer_scope_is_allowed() {
    assert!(compiles("var a = 1; { var a = 2; print a; }"));
}

#[test]
fn redeclaration_in_same_scope_is_an_error() {
    assert!(!compiles("{ var a = 1; var a = 2; }"));
}

#[test]
fn return_outside_function_is_an_error() {
    assert!(!compiles("return 1;"));
}

#[test]
fn return_with_value_in_initializer_is_an_error() {
    assert!(!compiles("class C { init() { return 1; } }"));
    // 裸 return 在构造器里是允许的
    assert!(compiles("class C { init() { return; } }"));
}

#[test]
fn invalid_assignment_target_is_an_error() {
    assert!(!compiles("1 = 2;"));
    assert!(!compiles("var a; var b; a + b = 3;"));
}

#[test]
fn this_outside_class_body_is_an_error() {
    assert!(!compiles("print this;"));
    assert!(!compiles("fun f() { return this; }"));
}

#[test]
fn panic_mode_recovers_at_statement_boundary() {
    // 第一条语句坏掉，后面的坏语句照样能报出来；最重要的是不崩
    assert!(!compiles("var = 1; var ok = 2; print ok;"));
}

#[test]
fn empty_source_compiles_to_implicit_return() {
    let (code, _, _) = compile_bytes("").expect("empty program must compile");
    // OP_NIL + OP_RETURN
    assert_eq!(code.len(), 2);
}
