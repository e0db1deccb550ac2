use axol::backend::vm::VirtualMachine;
use axol::backend::vm::heap::Heap;
use axol::common::object::hash_string;

#[test]
fn copy_string_returns_the_same_pointer_for_equal_bytes() {
    let mut heap = Heap::new();
    let a = heap.copy_string("hello").unwrap();
    let b = heap.copy_string("hello").unwrap();
    assert_eq!(a, b);
}

#[test]
fn take_string_deduplicates_against_copied_strings() {
    let mut heap = Heap::new();
    let copied = heap.copy_string("shared").unwrap();
    let taken = heap.take_string(String::from("shared")).unwrap();
    assert_eq!(copied, taken);
}

#[test]
fn distinct_contents_get_distinct_objects() {
    let mut heap = Heap::new();
    let a = heap.copy_string("left").unwrap();
    let b = heap.copy_string("right").unwrap();
    assert_ne!(a, b);
}

#[test]
fn interned_strings_carry_their_hash() {
    let mut heap = Heap::new();
    let s = heap.copy_string("fnv-check").unwrap();
    unsafe {
        assert_eq!((*s).data.hash, hash_string("fnv-check"));
    }
}

#[test]
fn intern_table_is_weak_across_collections() {
    let mut vm = VirtualMachine::new();
    // keep 留在全局表里活着，tmp 的拼接结果没人再引用
    vm.interpret(r#"var keep = "aa" + "bb"; var tmp = "xx" + "yy"; tmp = nil;"#)
        .expect("program must run");

    vm.collect_garbage();

    let strings = &vm.heap.strings;
    assert!(
        !strings.find_string("aabb", hash_string("aabb")).is_null(),
        "reachable concatenation must survive"
    );
    assert!(
        strings.find_string("xxyy", hash_string("xxyy")).is_null(),
        "unreachable concatenation must be dropped from the intern set"
    );
}
