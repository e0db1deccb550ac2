use axol::backend::vm::error::ErrorKind;
use axol::backend::vm::{InterpretError, VirtualMachine};
use axol::common::value::Value;

// 跑完以后从全局表里把结果捞出来
fn global(vm: &mut VirtualMachine, name: &str) -> Option<Value> {
    let key = vm.heap.copy_string(name).unwrap();
    vm.globals.get(key)
}

fn run(source: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new();
    vm.interpret(source).expect("program must run cleanly");
    assert_eq!(vm.stack.top, 0, "value stack must be balanced after a run");
    vm
}

fn run_error(source: &str) -> ErrorKind {
    let mut vm = VirtualMachine::new();
    match vm.interpret(source) {
        Err(InterpretError::RuntimeError(err)) => err.kind,
        other => panic!("expected a runtime error, got {:?}", other.err()),
    }
}

#[test]
fn arithmetic_precedence() {
    let mut vm = run("var r = 1 + 2 * 3 - 4 / 2;");
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(5.0)));
}

#[test]
fn unary_and_comparison() {
    let mut vm = run("var a = !nil; var b = -3 < 2; var c = 2 <= 2; var d = 3 != 3;");
    assert_eq!(global(&mut vm, "a"), Some(Value::Boolean(true)));
    assert_eq!(global(&mut vm, "b"), Some(Value::Boolean(true)));
    assert_eq!(global(&mut vm, "c"), Some(Value::Boolean(true)));
    assert_eq!(global(&mut vm, "d"), Some(Value::Boolean(false)));
}

#[test]
fn cross_type_equality_is_false() {
    let mut vm = run(r#"var r = 1 == "1"; var s = nil == false;"#);
    assert_eq!(global(&mut vm, "r"), Some(Value::Boolean(false)));
    assert_eq!(global(&mut vm, "s"), Some(Value::Boolean(false)));
}

#[test]
fn division_by_zero_yields_infinity() {
    let mut vm = run("var r = 1 / 0;");
    match global(&mut vm, "r") {
        Some(Value::Number(n)) => assert!(n.is_infinite()),
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn string_concatenation_interns_the_result() {
    let mut vm = run(r#"var r = "foo" + "bar" == "foobar";"#);
    assert_eq!(global(&mut vm, "r"), Some(Value::Boolean(true)));
}

#[test]
fn block_scoping_shadows_and_restores() {
    let mut vm = run("var a = 1; var inner; { var a = 2; inner = a; } var outer = a;");
    assert_eq!(global(&mut vm, "inner"), Some(Value::Number(2.0)));
    assert_eq!(global(&mut vm, "outer"), Some(Value::Number(1.0)));
}

#[test]
fn while_and_for_loops() {
    let mut vm = run(
        "var sum = 0; var i = 0; while (i < 5) { sum = sum + i; i = i + 1; }\
         var fsum = 0; for (var j = 0; j < 5; j = j + 1) { fsum = fsum + j; }",
    );
    assert_eq!(global(&mut vm, "sum"), Some(Value::Number(10.0)));
    assert_eq!(global(&mut vm, "fsum"), Some(Value::Number(10.0)));
}

#[test]
fn and_or_short_circuit() {
    let mut vm = run("var a = false and missing(); var b = true or missing(); var c = nil or 7;");
    assert_eq!(global(&mut vm, "a"), Some(Value::Boolean(false)));
    assert_eq!(global(&mut vm, "b"), Some(Value::Boolean(true)));
    assert_eq!(global(&mut vm, "c"), Some(Value::Number(7.0)));
}

#[test]
fn recursive_function_through_global() {
    let mut vm = run(
        "fun fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }\
         var r = fib(12);",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(144.0)));
}

#[test]
fn closure_captures_and_closes_over_local() {
    let mut vm = run(
        "fun mk() { var x = 10; fun g() { return x; } return g; }\
         var r = mk()();",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(10.0)));
}

#[test]
fn sibling_closures_share_one_upvalue() {
    let mut vm = run(
        "var get; var set;\
         fun pair() {\
             var x = 0;\
             fun g() { return x; }\
             fun s(v) { x = v; }\
             get = g; set = s;\
         }\
         pair();\
         set(42);\
         var r = get();",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(42.0)));
}

#[test]
fn loop_variable_capture_sees_mutation() {
    let mut vm = run(
        "var f;\
         { var i = 0; fun cap() { return i; } i = 99; f = cap; }\
         var r = f();",
    );
    // 闭包共享的是变量本身，关闭后仍能看到最后一次赋值
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(99.0)));
}

#[test]
fn class_with_initializer_and_method() {
    let mut vm = run(
        "class Pair { init(a, b) { this.a = a; this.b = b; } sum() { return this.a + this.b; } }\
         var r = Pair(3, 4).sum();",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(7.0)));
}

#[test]
fn fields_and_bound_methods() {
    let mut vm = run(
        "class Counter { init() { this.n = 0; } bump() { this.n = this.n + 1; return this.n; } }\
         var c = Counter();\
         var m = c.bump;\
         m(); m();\
         var r = c.n;",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(2.0)));
}

#[test]
fn set_property_leaves_value_on_stack() {
    let mut vm = run(
        "class B { init() { this.v = 0; } }\
         var b = B();\
         var r = b.v = 5;",
    );
    assert_eq!(global(&mut vm, "r"), Some(Value::Number(5.0)));
}

#[test]
fn class_without_initializer_rejects_args() {
    let kind = run_error("class Empty { } Empty(1);");
    assert!(matches!(kind, ErrorKind::ArityMismatch(_)));
}

#[test]
fn undefined_variable_assignment_is_a_runtime_error() {
    let kind = run_error("x = 1;");
    assert!(matches!(kind, ErrorKind::UndefinedVariable(_)));
}

#[test]
fn undefined_variable_read_is_a_runtime_error() {
    let kind = run_error("print missing;");
    assert!(matches!(kind, ErrorKind::UndefinedVariable(_)));
}

#[test]
fn property_access_on_non_instance_is_a_type_error() {
    let kind = run_error("(1).x;");
    match kind {
        ErrorKind::TypeError(message) => {
            assert!(message.contains("classes have properties"), "{}", message)
        }
        other => panic!("expected a type error, got {:?}", other),
    }
}

#[test]
fn unknown_property_is_reported() {
    let kind = run_error("class C { } var c = C(); c.missing;");
    assert!(matches!(kind, ErrorKind::UndefinedProperty(_)));
}

#[test]
fn arity_mismatch_is_reported_with_counts() {
    let kind = run_error("fun f() {} f(1);");
    match kind {
        ErrorKind::ArityMismatch(message) => {
            assert!(
                message.contains("expected 0 arguments but got 1"),
                "{}",
                message
            )
        }
        other => panic!("expected an arity mismatch, got {:?}", other),
    }
}

#[test]
fn calling_a_number_is_an_invalid_call() {
    let kind = run_error("var f = 1; f();");
    assert!(matches!(kind, ErrorKind::InvalidCall(_)));
}

#[test]
fn unbounded_recursion_exhausts_frames_without_crashing() {
    let kind = run_error("fun f() { f(); } f();");
    assert!(matches!(kind, ErrorKind::StackOverflow));
}

#[test]
fn adding_number_and_string_is_a_type_error() {
    let kind = run_error(r#"var r = 1 + "one";"#);
    assert!(matches!(kind, ErrorKind::TypeError(_)));
}

#[test]
fn vm_recovers_after_a_runtime_error() {
    let mut vm = VirtualMachine::new();
    assert!(vm.interpret("x = 1;").is_err());
    // 错误之后栈被重置，同一台 VM 还能继续跑
    assert_eq!(vm.stack.top, 0);
    vm.interpret("var ok = 2;").expect("must run after reset");
    let key = vm.heap.copy_string("ok").unwrap();
    assert_eq!(vm.globals.get(key), Some(Value::Number(2.0)));
}

#[test]
fn clock_native_returns_a_number() {
    let mut vm = run("var r = clock();");
    match global(&mut vm, "r") {
        Some(Value::Number(n)) => assert!(n >= 0.0),
        other => panic!("expected a number, got {:?}", other),
    }
}

#[test]
fn gc_preserves_reachable_objects_across_collections() {
    let mut vm = VirtualMachine::new();
    vm.interpret(
        "class Node { init(v) { this.v = v; } }\
         var keep = Node(41);",
    )
    .expect("program must run");

    vm.collect_garbage();
    vm.collect_garbage();

    vm.interpret("var r = keep.v + 1;").expect("object must survive");
    let key = vm.heap.copy_string("r").unwrap();
    assert_eq!(vm.globals.get(key), Some(Value::Number(42.0)));
}

#[test]
fn stress_mode_collects_at_every_allocation_site() {
    let mut vm = VirtualMachine::new();
    vm.heap.stress = true;
    vm.interpret(
        "fun mk(n) { var acc = \"\"; fun add(s) { acc = acc + s; return acc; } return add; }\
         var add = mk(0);\
         add(\"a\"); add(\"b\");\
         var r = add(\"c\") == \"abc\";",
    )
    .expect("stress run must complete");

    let key = vm.heap.copy_string("r").unwrap();
    assert_eq!(vm.globals.get(key), Some(Value::Boolean(true)));
}
