use crate::keys::FullyQualifiedMethodKey;
use crate::native::{NativeRegistry, NativeRet};
use crate::thread::JavaThreadState;
use crate::vm::{Value, VirtualMachine};
use crate::{build_exception, throw_exception};
use skadi_common::jtype::AllocationType;

pub(super) fn register_java_lang_natives(native_registry: &NativeRegistry) {
    native_registry.register(
        FullyQualifiedMethodKey::new_with_str(
            "java/lang/System",
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
            &native_registry.string_interner,
        ),
        java_lang_system_arraycopy,
    );

    native_registry.register(
        FullyQualifiedMethodKey::new_with_str(
            "java/lang/Throwable",
            "fillInStackTrace",
            "(I)Ljava/lang/Throwable;",
            &native_registry.string_interner,
        ),
        java_lang_throwable_fill_in_stack_trace,
    );

    native_registry.register(
        FullyQualifiedMethodKey::new_with_str(
            "java/lang/Object",
            "hashCode",
            "()I",
            &native_registry.string_interner,
        ),
        java_lang_object_hash_code,
    );
}

/// All bounds and type checks happen before the first element moves, so a
/// failing copy leaves the destination untouched.
fn java_lang_system_arraycopy(
    vm: &VirtualMachine,
    _thread: &mut JavaThreadState,
    args: &[Value],
) -> NativeRet {
    let [src, src_pos, dest, dest_pos, length] = args else {
        return Err(build_exception!(InternalError, "arraycopy expects 5 arguments"));
    };
    let src = src.as_obj_ref()?;
    let dest = dest.as_obj_ref()?;
    let src_pos = src_pos.as_int()?;
    let dest_pos = dest_pos.as_int()?;
    let length = length.as_int()?;

    let mut heap = vm.heap_write();
    if !heap.is_array(src) || !heap.is_array(dest) {
        throw_exception!(ArrayStoreException, "arraycopy of non-array objects")?
    }
    heap.copy_array_slice(src, src_pos, dest, dest_pos, length)?;
    Ok(None)
}

/// Captures the frame stack into a backtrace array of `(method id, pc)`
/// pairs and hangs it off the throwable. The receiver comes back so the
/// Java-side constructor chain can keep using it.
fn java_lang_throwable_fill_in_stack_trace(
    vm: &VirtualMachine,
    thread: &mut JavaThreadState,
    args: &[Value],
) -> NativeRet {
    let Some(receiver) = args.first() else {
        return Err(build_exception!(InternalError, "fillInStackTrace without receiver"));
    };
    let throwable = receiver.as_obj_ref()?;

    let frames: Vec<(u32, u32)> = thread
        .stack
        .raw_frames()
        .iter()
        .map(|frame| (frame.method.into_inner().get(), frame.pc))
        .collect();

    // The allocation below may collect; the receiver has to sit in a
    // handle or its offset goes stale.
    let receiver_handle = thread.handles.make_handle(throwable);
    let backtrace = vm.alloc_array(thread, "[I", (frames.len() * 2) as i32)?;
    let throwable = thread.handles.get(receiver_handle);
    thread.handles.drop_handle(receiver_handle);
    {
        let mut heap = vm.heap_write();
        for (i, (method_raw, pc)) in frames.iter().enumerate() {
            heap.write_array_element(backtrace, (i * 2) as i32, Value::Integer(*method_raw as i32))?;
            heap.write_array_element(backtrace, (i * 2 + 1) as i32, Value::Integer(*pc as i32))?;
        }
    }

    let (backtrace_field, depth_field) = {
        let ma = vm.method_area_read();
        let class_id = vm.heap_read().class_id(throwable)?;
        let class = ma.get_instance_class(&class_id)?;
        (
            class
                .get_instance_field(&vm.br.throwable_backtrace_fk)
                .ok()
                .map(|f| f.offset),
            class
                .get_instance_field(&vm.br.throwable_depth_fk)
                .ok()
                .map(|f| f.offset),
        )
    };

    let mut heap = vm.heap_write();
    if let Some(offset) = backtrace_field {
        heap.write_field(
            throwable,
            offset,
            Value::Ref(backtrace),
            AllocationType::Reference,
        )?;
    }
    if let Some(offset) = depth_field {
        heap.write_field(
            throwable,
            offset,
            Value::Integer(frames.len() as i32),
            AllocationType::Int,
        )?;
    }

    Ok(Some(Value::Ref(throwable)))
}

/// Identity hash over the object's current heap offset; not stable across
/// collections.
fn java_lang_object_hash_code(
    _vm: &VirtualMachine,
    _thread: &mut JavaThreadState,
    args: &[Value],
) -> NativeRet {
    let Some(receiver) = args.first() else {
        return Err(build_exception!(InternalError, "hashCode without receiver"));
    };
    let r = receiver.as_obj_ref()?;
    let folded = (r as u64 ^ (r as u64 >> 32)) as i32;
    Ok(Some(Value::Integer(folded)))
}
