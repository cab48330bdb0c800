//! Stop-the-world mark-compact collection.
//!
//! Roots are *slot addresses*: every place outside the heap that may hold a
//! heap reference (mirrors, cached constant-pool objects, inline caches,
//! static reference slots, frame slots selected by the per-PC reference
//! bitmaps, handles, the VM-level slots). Marking runs an explicit work
//! stack; compaction copies reachable objects in address order into a fresh
//! heap of the same capacity and rewrites every recorded slot plus every
//! reference inside relocated objects through a binary search over the
//! old-to-new table. Slots whose bit pattern points outside the heap are
//! left alone.

use crate::error::JvmError;
use crate::heap::{Heap, HeapRef, MonitorData};
use crate::rt::JvmClass;
use crate::vm::VirtualMachine;
use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub roots: usize,
    pub unique_root_slots: usize,
    pub live_objects: usize,
    pub heap_used: usize,
}

struct RootSet {
    slots: Vec<*mut usize>,
}

impl RootSet {
    fn new() -> Self {
        RootSet { slots: Vec::new() }
    }

    /// Records a slot when its current value looks like a live heap
    /// reference; pointers into externally managed memory are ignored.
    fn push(&mut self, heap: &Heap, slot: *mut usize) {
        let value = unsafe { *slot };
        if heap.contains(value) {
            self.slots.push(slot);
        }
    }
}

pub fn collect(vm: &VirtualMachine) -> Result<GcStats, JvmError> {
    let ma = vm.method_area.write().expect("method area lock poisoned");
    let mut heap = vm.heap.write().expect("heap lock poisoned");
    let threads = vm.threads.lock().expect("thread list lock poisoned");
    let mut interned = vm
        .interned_strings
        .lock()
        .expect("interned strings lock poisoned");
    let modules = vm.modules.lock().expect("module lock poisoned");
    let mut pinned = vm.pinned.lock().expect("pin lock poisoned");

    let mut roots = RootSet::new();
    let mut scratch_bits: Vec<u32> = Vec::new();

    // Class descriptors: mirrors, reflection objects, cached constant-pool
    // objects, inline caches, static reference slots.
    for class in ma.classes() {
        roots.push(&heap, class.mirror().as_root());
        roots.push(&heap, class.cp_mirror().as_root());
        if let JvmClass::Instance(instance) = class {
            instance
                .cp
                .for_each_obj_slot(&mut |slot| roots.push(&heap, slot.as_root()));
            if let Ok(fields) = instance.get_instance_fields() {
                for field in fields {
                    roots.push(&heap, field.reflection_field.as_root());
                }
            }
            if let Ok(fields) = instance.get_static_fields() {
                for field in fields {
                    roots.push(&heap, field.reflection_field.as_root());
                }
            }
            if let Ok(statics) = instance.statics() {
                statics.refs().list_set_bits(&mut scratch_bits);
                for word in &scratch_bits {
                    roots.push(&heap, statics.ref_word_ptr(*word as usize));
                }
            }
        }
    }
    for method in ma.methods() {
        roots.push(&heap, method.reflection_method.as_root());
        roots.push(&heap, method.reflection_ctor.as_root());
        roots.push(&heap, method.method_type_obj.as_root());
        if let Ok(code) = method.code() {
            for cache in &code.call_site_caches {
                roots.push(&heap, cache.call_site.as_root());
                roots.push(&heap, cache.method_type.as_root());
            }
        }
    }

    // VM-level roots.
    roots.push(&heap, vm.main_thread_group.as_root());
    for (_, slot) in modules.iter() {
        roots.push(&heap, slot.as_root());
    }
    interned.for_each_value_mut(|_, value| roots.push(&heap, value as *mut usize));
    for slot in pinned.iter_mut() {
        roots.push(&heap, slot as *mut usize);
    }

    // Per-thread roots: the thread object, exception slots, handles, and
    // every frame slot the method's reference bitmap selects at the frame's
    // pc. Frames are scanned innermost outward; an outer frame skips stack
    // slots above the watermark, which an inner frame's locals may alias.
    for &thread_ptr in threads.iter() {
        let thread = unsafe { &mut *thread_ptr };
        roots.push(&heap, thread.thread_obj.as_root());
        roots.push(&heap, thread.current_exception.as_root());
        roots.push(&heap, thread.out_of_mem_error.as_root());
        roots.push(&heap, thread.stack_overflow_error.as_root());
        for slot in thread.handles.raw_slots() {
            roots.push(&heap, slot as *mut usize);
        }

        let mut min_scanned_addr = usize::MAX;
        for frame in thread.stack.raw_frames().iter().rev() {
            let method = ma.get_method(&frame.method);
            let Some(analysis) = method.analysis() else {
                if method.is_native() || method.is_abstract() {
                    continue;
                }
                return Err(JvmError::Internal(
                    "frame pushed for a method whose code analysis has not run".to_string(),
                ));
            };
            let refs = analysis.insn_refs.get(frame.pc as usize).ok_or_else(|| {
                JvmError::Internal("frame pc outside the analysed instruction range".to_string())
            })?;
            refs.list_set_bits(&mut scratch_bits);
            for &bit in &scratch_bits {
                let slot = unsafe { frame.values.add(bit as usize) } as *mut usize;
                if bit < frame.max_stack as u32 && slot as usize >= min_scanned_addr {
                    // Already walked as an inner frame's locals.
                    continue;
                }
                roots.push(&heap, slot);
            }
            min_scanned_addr = unsafe { frame.values.add(frame.max_stack as usize) } as usize;
        }
    }

    // Mark: depth-first from every root with an explicit work stack.
    let mut objs: Vec<HeapRef> = Vec::new();
    let mut work: Vec<HeapRef> = Vec::new();
    let mut visit = |heap: &mut Heap, objs: &mut Vec<HeapRef>, work: &mut Vec<HeapRef>, r: HeapRef| {
        if heap.contains(r) && !heap.is_marked(r) {
            heap.set_marked(r);
            objs.push(r);
            work.push(r);
        }
    };

    for &slot in &roots.slots {
        let value = unsafe { *slot };
        visit(&mut heap, &mut objs, &mut work, value);
    }

    while let Some(obj) = work.pop() {
        let class_id = heap.class_id(obj)?;
        match ma.get_class(&class_id) {
            JvmClass::Instance(instance) => {
                instance.instance_references()?.list_set_bits(&mut scratch_bits);
                for &word in &scratch_bits {
                    let child = heap.read_word(obj + word as usize * 8);
                    visit(&mut heap, &mut objs, &mut work, child);
                }
            }
            // Reference arrays, and the outer dimensions of
            // multi-dimensional primitive arrays, store references.
            JvmClass::InstanceArray(_) => {
                walk_array(&mut heap, obj, &mut |heap, child| {
                    visit(heap, &mut objs, &mut work, child)
                })?;
            }
            JvmClass::PrimitiveArray(array) if array.dimensions > 1 => {
                walk_array(&mut heap, obj, &mut |heap, child| {
                    visit(heap, &mut objs, &mut work, child)
                })?;
            }
            _ => {}
        }
    }

    // Compact: copy reachable objects in address order into a fresh heap,
    // recording old -> new, then fix expanded monitor data.
    objs.sort_unstable();
    let mut new_heap = Heap::new(heap.capacity())?;
    let mut new_locations: Vec<HeapRef> = Vec::with_capacity(objs.len());
    let mut write_ptr = Heap::OBJECT_HEADER_SIZE;

    for &obj in &objs {
        write_ptr = write_ptr.next_multiple_of(8);
        let size = heap.object_size(obj);
        debug_assert!(write_ptr + size <= new_heap.capacity());
        unsafe {
            std::ptr::copy_nonoverlapping(
                heap.base().add(obj),
                new_heap.base().add(write_ptr),
                size,
            );
        }
        new_heap.clear_mark_at(write_ptr);
        new_locations.push(write_ptr);
        let new_obj = write_ptr;
        write_ptr += size;

        if let Some(monitor_offset) = heap.monitor_offset(obj) {
            write_ptr = write_ptr.next_multiple_of(8);
            let monitor_size = size_of::<MonitorData>();
            debug_assert!(write_ptr + monitor_size <= new_heap.capacity());
            unsafe {
                std::ptr::copy_nonoverlapping(
                    heap.base().add(monitor_offset),
                    new_heap.base().add(write_ptr),
                    monitor_size,
                );
            }
            new_heap.set_monitor_offset(new_obj, write_ptr);
            write_ptr += monitor_size;
        }
    }

    let relocate = |value: usize| -> Option<usize> {
        objs.binary_search(&value).ok().map(|idx| new_locations[idx])
    };

    // Rewrite references inside relocated objects.
    for &new_obj in &new_locations {
        let class_id = new_heap.class_id(new_obj)?;
        match ma.get_class(&class_id) {
            JvmClass::Instance(instance) => {
                instance.instance_references()?.list_set_bits(&mut scratch_bits);
                for &word in &scratch_bits {
                    let offset = new_obj + word as usize * 8;
                    if let Some(moved) = relocate(new_heap.read_word(offset)) {
                        new_heap.write_word(offset, moved);
                    }
                }
            }
            JvmClass::InstanceArray(_) => {
                rewrite_array(&mut new_heap, new_obj, &relocate)?;
            }
            JvmClass::PrimitiveArray(array) if array.dimensions > 1 => {
                rewrite_array(&mut new_heap, new_obj, &relocate)?;
            }
            _ => {}
        }
    }

    // Rewrite every recorded root slot in place.
    for &slot in &roots.slots {
        let value = unsafe { *slot };
        if let Some(moved) = relocate(value) {
            unsafe { *slot = moved };
        }
    }

    // Swap: the old heap is dropped, the compacted one installed.
    new_heap.set_used(write_ptr.next_multiple_of(8));
    let stats = GcStats {
        roots: roots.slots.len(),
        unique_root_slots: roots.slots.iter().map(|p| *p as usize).sorted().dedup().count(),
        live_objects: objs.len(),
        heap_used: new_heap.used(),
    };
    std::mem::swap(&mut *heap, &mut new_heap);

    Ok(stats)
}

fn walk_array(
    heap: &mut Heap,
    obj: HeapRef,
    visit: &mut impl FnMut(&mut Heap, HeapRef),
) -> Result<(), JvmError> {
    let length = heap.array_length(obj)? as usize;
    let elements = obj + Heap::OBJECT_HEADER_SIZE + Heap::ARRAY_ELEMENTS_OFFSET;
    for i in 0..length {
        let child = heap.read_word(elements + i * 8);
        visit(heap, child);
    }
    Ok(())
}

fn rewrite_array(
    heap: &mut Heap,
    obj: HeapRef,
    relocate: &impl Fn(usize) -> Option<usize>,
) -> Result<(), JvmError> {
    let length = heap.array_length(obj)? as usize;
    let elements = obj + Heap::OBJECT_HEADER_SIZE + Heap::ARRAY_ELEMENTS_OFFSET;
    for i in 0..length {
        let offset = elements + i * 8;
        if let Some(moved) = relocate(heap.read_word(offset)) {
            heap.write_word(offset, moved);
        }
    }
    Ok(())
}
