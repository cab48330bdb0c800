mod common;

use common::{ClassFileBuilder, object_class_bytes};
use skadi_runtime::gc;
use skadi_runtime::keys::MethodKey;
use skadi_runtime::vm::{Value, VirtualMachine, VmConfig};

fn new_vm() -> VirtualMachine {
    VirtualMachine::new(VmConfig {
        class_path: String::new(),
        heap_size: 1 << 20,
        frame_stack_size: 64 * 1024,
        ..VmConfig::default()
    })
    .expect("VM creation")
}

#[test]
fn collection_retains_exactly_the_rooted_arrays() {
    let vm = new_vm();
    let mut thread = vm.create_thread();

    let mut old_refs = Vec::new();
    let mut handles = Vec::new();
    for i in 0..10 {
        let arr = vm.alloc_array(&thread, "[I", 8).unwrap();
        vm.heap_write()
            .write_array_element(arr, 0, Value::Integer(i))
            .unwrap();
        if i % 2 == 0 {
            handles.push((thread.handles.make_handle(arr), arr, i));
        }
        old_refs.push(arr);
    }

    let stats = gc::collect(&vm).unwrap();
    assert_eq!(stats.live_objects, 5);

    // header + length word + 8 ints, 8-aligned; plus the reserved null slot.
    let array_size = 16 + 8 + 8 * size_of::<i32>();
    assert_eq!(stats.heap_used, 16 + 5 * array_size);

    for (handle, old_ref, marker) in &handles {
        let new_ref = thread.handles.get(*handle);
        let heap = vm.heap_read();
        assert_eq!(heap.array_length(new_ref).unwrap(), 8);
        assert_eq!(
            heap.read_array_element(new_ref, 0).unwrap(),
            Value::Integer(*marker)
        );
        if *marker > 0 {
            // Everything after the first survivor slides down.
            assert!(new_ref < *old_ref, "array {} did not move", marker);
        }
    }

    vm.free_thread(thread);
}

#[test]
fn reference_arrays_keep_their_elements_alive() {
    let vm = new_vm();
    let mut thread = vm.create_thread();

    let inner_a = vm.alloc_array(&thread, "[I", 3).unwrap();
    let inner_b = vm.alloc_array(&thread, "[I", 3).unwrap();
    let outer = vm.alloc_array(&thread, "[[I", 2).unwrap();
    {
        let mut heap = vm.heap_write();
        heap.write_array_element(outer, 0, Value::Ref(inner_a)).unwrap();
        heap.write_array_element(outer, 1, Value::Ref(inner_b)).unwrap();
        heap.write_array_element(inner_b, 2, Value::Integer(42)).unwrap();
    }
    // Only the outer array is rooted; the inner ones live through it.
    let handle = thread.handles.make_handle(outer);

    let stats = gc::collect(&vm).unwrap();
    assert_eq!(stats.live_objects, 3);

    let outer = thread.handles.get(handle);
    let heap = vm.heap_read();
    let inner_b = heap
        .read_array_element(outer, 1)
        .unwrap()
        .as_obj_ref()
        .unwrap();
    assert_eq!(heap.read_array_element(inner_b, 2).unwrap(), Value::Integer(42));

    drop(heap);
    vm.free_thread(thread);
}

#[test]
fn frame_slots_are_roots_and_never_double_recorded() {
    let vm = new_vm();
    vm.register_classfile("java/lang/Object.class", object_class_bytes());
    // aload_1; astore_2; return
    let code = [0x2b, 0x4d, 0xb1];
    vm.register_classfile(
        "T.class",
        ClassFileBuilder::new("T")
            .method(0x0001, "m", "(Ljava/lang/Object;)V", 2, 3, &code)
            .build(),
    );
    let class_id = vm.get_class_id_or_load("T").unwrap();

    let (method_id, max_stack, max_locals) = {
        let ma = vm.method_area_read();
        let key = MethodKey {
            name: vm.interner().get_or_intern("m"),
            desc: vm.interner().get_or_intern("(Ljava/lang/Object;)V"),
        };
        let method_id = ma
            .get_instance_class(&class_id)
            .unwrap()
            .get_vtable_method_id(&key)
            .unwrap();
        let method = ma.get_method(&method_id);
        let cp = ma.get_cp(&class_id).unwrap();
        let descriptor = ma.get_method_descriptor_by_method_id(&method_id);
        method.ensure_analysis(cp, vm.interner(), descriptor).unwrap();
        let (max_stack, max_locals) = method.frame_attributes().unwrap();
        (method_id, max_stack, max_locals)
    };

    let mut thread = vm.create_thread();
    // An unrooted allocation first, so the "exception" below has to move.
    vm.alloc_array(&thread, "[I", 4).unwrap();
    let exception = vm.alloc_array(&thread, "[I", 1).unwrap();

    // The same object sits in the caller's locals and on the callee's
    // stack (pc 1 = just after aload_1, where slot types are known).
    for _ in 0..2 {
        thread.stack.push_frame(method_id, max_stack, max_locals).unwrap();
        let mut frame = thread.stack.cur_frame().unwrap();
        frame.set_pc(1);
        frame.set_local_raw(1, exception as u64).unwrap();
        frame.push_ref(exception).unwrap();
    }

    let stats = gc::collect(&vm).unwrap();
    assert_eq!(
        stats.roots, stats.unique_root_slots,
        "a frame slot was recorded as a root twice"
    );
    assert_eq!(stats.live_objects, 1);

    let moved = {
        let mut frame = thread.stack.cur_frame().unwrap();
        let top = frame.pop_ref().unwrap();
        frame.push_ref(top).unwrap();
        top
    };
    assert!(moved < exception, "object was not compacted");
    assert_eq!(
        thread.stack.cur_frame().unwrap().local_raw(1).unwrap() as usize,
        moved,
        "local and stack copies diverged after rewriting"
    );
    assert_eq!(vm.heap_read().array_length(moved).unwrap(), 1);

    thread.stack.pop_frame(None).unwrap();
    assert_eq!(
        thread.stack.cur_frame().unwrap().local_raw(1).unwrap() as usize,
        moved
    );

    vm.free_thread(thread);
}

#[test]
fn exhaustion_collects_then_raises_out_of_memory() {
    let vm = VirtualMachine::new(VmConfig {
        heap_size: 4096,
        ..VmConfig::default()
    })
    .unwrap();
    let mut thread = vm.create_thread();

    // Fill the heap with garbage; allocation should collect and succeed.
    for _ in 0..200 {
        vm.alloc_array(&thread, "[I", 64).unwrap();
    }

    // Now root everything the heap can hold and allocate once more.
    let mut live = Vec::new();
    loop {
        match vm.alloc_array(&thread, "[I", 64) {
            Ok(arr) => {
                thread.handles.make_handle(arr);
                live.push(arr);
            }
            Err(e) => {
                assert!(matches!(e, skadi_runtime::error::JvmError::OutOfMemory));
                break;
            }
        }
        assert!(live.len() < 100, "heap never filled up");
    }

    vm.free_thread(thread);
}
