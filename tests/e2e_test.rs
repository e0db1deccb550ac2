use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

// 真跑二进制：写进临时脚本文件，检查退出码和输出
fn run_script(source: &str) -> Output {
    run_script_with_args(source, &[])
}

fn run_script_with_args(source: &str, extra_args: &[&str]) -> Output {
    let mut file = NamedTempFile::new().expect("无法创建临时脚本文件");
    file.write_all(source.as_bytes()).expect("无法写入临时脚本文件");

    Command::new(env!("CARGO_BIN_EXE_axol"))
        .arg(file.path())
        .args(extra_args)
        .output()
        .expect("无法启动 axol 进程")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn prints_number_addition() {
    let output = run_script("print 1 + 2;");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "3\n");
}

#[test]
fn prints_string_concatenation() {
    let output = run_script(r#"print "foo" + "bar";"#);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "foobar\n");
}

#[test]
fn block_scoping_shadows_then_restores() {
    let output = run_script("var a = 1; { var a = 2; print a; } print a;");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "2\n1\n");
}

#[test]
fn closure_returns_captured_local() {
    let output = run_script(
        "fun mk() { var x = 10; fun g() { return x; } return g; } print mk()();",
    );
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "10\n");
}

#[test]
fn class_initializer_and_method() {
    let output = run_script(
        "class Pair { init(a, b) { this.a = a; this.b = b; } sum() { return this.a + this.b; } }\
         print Pair(3, 4).sum();",
    );
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "7\n");
}

#[test]
fn sibling_closures_observe_shared_upvalue() {
    let output = run_script(
        "var get; var set;\
         fun pair() {\
             var x = 0;\
             fun g() { return x; }\
             fun s(v) { x = v; }\
             get = g; set = s;\
         }\
         pair();\
         set(42);\
         print get();",
    );
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "42\n");
}

#[test]
fn printable_forms() {
    let output = run_script(r#"print nil; print true; print false; print 2.5;"#);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "<nil>\ntrue\nfalse\n2.5\n");
}

#[test]
fn stress_gc_does_not_change_results() {
    let output = run_script_with_args(
        "fun mk() { var x = 10; fun g() { return x; } return g; } print mk()();\
         var s = \"\"; for (var i = 0; i < 20; i = i + 1) { s = s + \"x\"; }\
         print s == \"xxxxxxxxxxxxxxxxxxxx\";",
        &["--stress-gc"],
    );
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "10\ntrue\n");
}

#[test]
fn self_referencing_local_is_a_compile_error() {
    let output = run_script("{ var a = a; }");
    assert_eq!(output.status.code(), Some(65));
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("Self-referencing local variable"),
        "{}",
        stderr
    );
    assert!(stderr.contains("Error at 'a'"), "{}", stderr);
}

#[test]
fn assigning_an_undefined_global_is_a_runtime_error() {
    let output = run_script("x = 1;");
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("reference to undefined variable 'x'"),
        "{}",
        stderr
    );
    assert!(stderr.contains("in script"), "{}", stderr);
}

#[test]
fn property_access_on_a_number_is_a_runtime_error() {
    let output = run_script("(1).x;");
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("classes have properties"), "{}", stderr);
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let output = run_script("fun f() {} f(1);");
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("expected 0 arguments but got 1"),
        "{}",
        stderr
    );
}

#[test]
fn runtime_error_prints_innermost_frame_first() {
    let output = run_script(
        "fun inner() { missing; }\
         fun outer() { inner(); }\
         outer();",
    );
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    let inner_pos = stderr.find("in inner()").expect("inner frame missing");
    let outer_pos = stderr.find("in outer()").expect("outer frame missing");
    let script_pos = stderr.find("in script").expect("script frame missing");
    assert!(inner_pos < outer_pos && outer_pos < script_pos, "{}", stderr);
}

#[test]
fn unreadable_file_exits_with_io_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_axol"))
        .arg("definitely/not/a/real/file.axol")
        .output()
        .expect("无法启动 axol 进程");
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn extra_arguments_exit_with_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_axol"))
        .arg("one.axol")
        .arg("two.axol")
        .output()
        .expect("无法启动 axol 进程");
    assert_eq!(output.status.code(), Some(64));
}
