mod common;

use common::{ClassFileBuilder, object_class_bytes, string_class_bytes};
use skadi_runtime::error::{JavaExceptionKind, JvmError};
use skadi_runtime::gc;
use skadi_runtime::keys::FullyQualifiedMethodKey;
use skadi_runtime::vm::{Value, VirtualMachine, VmConfig};

fn new_vm() -> VirtualMachine {
    VirtualMachine::new(VmConfig {
        heap_size: 1 << 20,
        ..VmConfig::default()
    })
    .unwrap()
}

fn kind_of(error: JvmError) -> Option<JavaExceptionKind> {
    match error {
        JvmError::JavaException(ex) => Some(ex.kind),
        _ => None,
    }
}

#[test]
fn registered_classfiles_shadow_the_classpath() {
    let vm = new_vm();
    let bytes = object_class_bytes();
    vm.register_classfile("java/lang/Object.class", bytes.clone());

    assert_eq!(vm.read_classfile("java/lang/Object.class").unwrap(), bytes);
    assert!(matches!(
        vm.read_classfile("java/lang/Objec.class"),
        Err(JvmError::ClassNotFound(_))
    ));
    assert_eq!(vm.list_classfiles(), vec!["java/lang/Object.class".to_string()]);
}

#[test]
fn linking_assigns_packed_field_offsets_and_reference_bitsets() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());
    vm.register_classfile(
        "P.class",
        ClassFileBuilder::new("P")
            .field(0x0001, "flag", "Z")
            .field(0x0001, "next", "LP;")
            .field(0x0001, "count", "I")
            .field(0x0009, "shared", "LP;")
            .field(0x0009, "total", "J")
            .build(),
    );
    let class_id = vm.get_class_id_or_load("P").unwrap();
    let ma = vm.method_area_read();
    let class = ma.get_instance_class(&class_id).unwrap();

    // flag at 0, next aligned to 8, count packs into the following gap.
    let flag = class.get_instance_field(&vm.field_key("flag", "Z")).unwrap();
    let next = class.get_instance_field(&vm.field_key("next", "LP;")).unwrap();
    let count = class.get_instance_field(&vm.field_key("count", "I")).unwrap();
    assert_eq!(flag.offset, 0);
    assert_eq!(next.offset, 8);
    assert_eq!(count.offset, 16);
    assert_eq!(class.get_instance_size().unwrap(), 20);

    // instance_references is indexed by word offset from the object base
    // (header included): the `next` field at data offset 8 is word 3.
    let refs = class.instance_references().unwrap();
    let mut bits = Vec::new();
    refs.list_set_bits(&mut bits);
    assert_eq!(bits, vec![3]);

    // static area: shared (ref) at 0, total (long) at 8; one ref word.
    let statics = class.statics().unwrap();
    let mut static_bits = Vec::new();
    statics.refs().list_set_bits(&mut static_bits);
    assert_eq!(static_bits, vec![0]);
    assert_eq!(statics.size(), 16);
}

#[test]
fn static_fields_read_and_write_through_the_packed_area() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());
    vm.register_classfile(
        "S.class",
        ClassFileBuilder::new("S")
            .field(0x0009, "counter", "I")
            .field(0x0009, "label", "Ljava/lang/String;")
            .build(),
    );
    let class_id = vm.get_class_id_or_load("S").unwrap();
    let ma = vm.method_area_read();
    let class = ma.get_instance_class(&class_id).unwrap();

    let counter = vm.field_key("counter", "I");
    assert_eq!(class.get_static_field_value(&counter).unwrap(), Value::Integer(0));
    class.set_static_field_value(&counter, Value::Integer(41)).unwrap();
    assert_eq!(class.get_static_field_value(&counter).unwrap(), Value::Integer(41));

    let label = vm.field_key("label", "Ljava/lang/String;");
    assert_eq!(class.get_static_field_value(&label).unwrap(), Value::Null);
}

#[test]
fn static_reference_slots_keep_objects_alive_and_get_rewritten() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());
    vm.register_classfile(
        "R.class",
        ClassFileBuilder::new("R").field(0x0009, "keep", "Ljava/lang/Object;").build(),
    );
    let class_id = vm.get_class_id_or_load("R").unwrap();
    let thread = vm.create_thread();

    // Garbage first so the kept array has to move.
    vm.alloc_array(&thread, "[I", 16).unwrap();
    let kept = vm.alloc_array(&thread, "[I", 2).unwrap();
    vm.heap_write().write_array_element(kept, 1, Value::Integer(7)).unwrap();

    let key = vm.field_key("keep", "Ljava/lang/Object;");
    {
        let ma = vm.method_area_read();
        ma.get_instance_class(&class_id)
            .unwrap()
            .set_static_field_value(&key, Value::Ref(kept))
            .unwrap();
    }

    let stats = gc::collect(&vm).unwrap();
    assert_eq!(stats.live_objects, 1);

    let moved = {
        let ma = vm.method_area_read();
        ma.get_instance_class(&class_id)
            .unwrap()
            .get_static_field_value(&key)
            .unwrap()
            .as_obj_ref()
            .unwrap()
    };
    assert!(moved < kept, "static slot was not rewritten");
    assert_eq!(
        vm.heap_read().read_array_element(moved, 1).unwrap(),
        Value::Integer(7)
    );

    vm.free_thread(thread);
}

#[test]
fn interned_strings_are_canonical_and_survive_collection() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());
    vm.register_classfile("java/lang/String.class", string_class_bytes());
    let mut thread = vm.create_thread();

    let a = vm.intern_string(&mut thread, "hello").unwrap();
    let b = vm.intern_string(&mut thread, "hello").unwrap();
    assert_eq!(a, b);
    assert_eq!(vm.read_java_string(a).unwrap(), "hello");

    let wide = vm.intern_string(&mut thread, "smörgåsbord ☃").unwrap();
    assert_eq!(vm.read_java_string(wide).unwrap(), "smörgåsbord ☃");

    gc::collect(&vm).unwrap();

    // The table's values were rewritten; interning again returns the
    // relocated canonical instance and it still reads back intact.
    let c = vm.intern_string(&mut thread, "hello").unwrap();
    assert_eq!(vm.read_java_string(c).unwrap(), "hello");
    let wide_again = vm.intern_string(&mut thread, "smörgåsbord ☃").unwrap();
    assert_eq!(vm.read_java_string(wide_again).unwrap(), "smörgåsbord ☃");

    vm.free_thread(thread);
}

#[test]
fn arraycopy_checks_bounds_before_touching_the_destination() {
    let vm = new_vm();
    let mut thread = vm.create_thread();

    let src = vm.alloc_array(&thread, "[I", 10).unwrap();
    let dest = vm.alloc_array(&thread, "[I", 10).unwrap();
    {
        let mut heap = vm.heap_write();
        for i in 0..10 {
            heap.write_array_element(src, i, Value::Integer(i)).unwrap();
            heap.write_array_element(dest, i, Value::Integer(99)).unwrap();
        }
    }

    let arraycopy = vm
        .native_registry
        .get(&FullyQualifiedMethodKey::new_with_str(
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
            &vm.native_registry.string_interner,
        ))
        .expect("arraycopy is preregistered");

    // sp + n > len(src)
    let err = arraycopy(
        &vm,
        &mut thread,
        &[Value::Ref(src), Value::Integer(7), Value::Ref(dest), Value::Integer(0), Value::Integer(5)],
    )
    .unwrap_err();
    assert_eq!(kind_of(err), Some(JavaExceptionKind::ArrayIndexOutOfBoundsException));

    // n < 0
    let err = arraycopy(
        &vm,
        &mut thread,
        &[Value::Ref(src), Value::Integer(0), Value::Ref(dest), Value::Integer(0), Value::Integer(-1)],
    )
    .unwrap_err();
    assert_eq!(kind_of(err), Some(JavaExceptionKind::ArrayIndexOutOfBoundsException));

    // Destination untouched by the failures.
    for i in 0..10 {
        assert_eq!(
            vm.heap_read().read_array_element(dest, i).unwrap(),
            Value::Integer(99)
        );
    }

    // A valid copy moves exactly the requested range.
    arraycopy(
        &vm,
        &mut thread,
        &[Value::Ref(src), Value::Integer(2), Value::Ref(dest), Value::Integer(1), Value::Integer(3)],
    )
    .unwrap();
    let heap = vm.heap_read();
    assert_eq!(heap.read_array_element(dest, 0).unwrap(), Value::Integer(99));
    for i in 0..3 {
        assert_eq!(
            heap.read_array_element(dest, i + 1).unwrap(),
            heap.read_array_element(src, i + 2).unwrap()
        );
    }
    assert_eq!(heap.read_array_element(dest, 4).unwrap(), Value::Integer(99));

    drop(heap);
    vm.free_thread(thread);
}

#[test]
fn null_arraycopy_is_a_null_pointer_exception() {
    let vm = new_vm();
    let mut thread = vm.create_thread();
    let dest = vm.alloc_array(&thread, "[I", 1).unwrap();

    let arraycopy = vm
        .native_registry
        .get(&FullyQualifiedMethodKey::new_with_str(
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
            &vm.native_registry.string_interner,
        ))
        .unwrap();

    let err = arraycopy(
        &vm,
        &mut thread,
        &[Value::Null, Value::Integer(0), Value::Ref(dest), Value::Integer(0), Value::Integer(0)],
    )
    .unwrap_err();
    assert_eq!(kind_of(err), Some(JavaExceptionKind::NullPointerException));

    vm.free_thread(thread);
}

#[test]
fn constant_values_initialise_static_primitives() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());

    // Hand-extend the builder output is overkill here; a dedicated class
    // file with a ConstantValue attribute is small enough to assemble raw.
    let bytes = class_with_constant_value();
    vm.register_classfile("CV.class", bytes);
    let class_id = vm.get_class_id_or_load("CV").unwrap();

    let ma = vm.method_area_read();
    let class = ma.get_instance_class(&class_id).unwrap();
    assert_eq!(
        class
            .get_static_field_value(&vm.field_key("MAX", "I"))
            .unwrap(),
        Value::Integer(2147483647)
    );
}

/// `class CV { static final int MAX = Integer.MAX_VALUE; }`
fn class_with_constant_value() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes());
    b.extend_from_slice(&52u16.to_be_bytes());

    b.extend_from_slice(&9u16.to_be_bytes()); // pool count
    push_utf8(&mut b, "CV"); // 1
    push_class(&mut b, 1); // 2
    push_utf8(&mut b, "java/lang/Object"); // 3
    push_class(&mut b, 3); // 4
    push_utf8(&mut b, "MAX"); // 5
    push_utf8(&mut b, "I"); // 6
    push_utf8(&mut b, "ConstantValue"); // 7
    b.push(3); // 8: Integer
    b.extend_from_slice(&2147483647i32.to_be_bytes());

    b.extend_from_slice(&0x0021u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes());
    b.extend_from_slice(&4u16.to_be_bytes());
    b.extend_from_slice(&0u16.to_be_bytes()); // interfaces

    b.extend_from_slice(&1u16.to_be_bytes()); // fields
    b.extend_from_slice(&0x0019u16.to_be_bytes()); // public static final
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&6u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes()); // one attribute
    b.extend_from_slice(&7u16.to_be_bytes());
    b.extend_from_slice(&2u32.to_be_bytes());
    b.extend_from_slice(&8u16.to_be_bytes());

    b.extend_from_slice(&0u16.to_be_bytes()); // methods
    b.extend_from_slice(&0u16.to_be_bytes()); // class attributes
    b
}

fn push_utf8(b: &mut Vec<u8>, s: &str) {
    b.push(1);
    b.extend_from_slice(&(s.len() as u16).to_be_bytes());
    b.extend_from_slice(s.as_bytes());
}

fn push_class(b: &mut Vec<u8>, name_index: u16) {
    b.push(7);
    b.extend_from_slice(&name_index.to_be_bytes());
}
