use crate::error::JvmError;
use crate::gc;
use crate::heap::method_area::MethodArea;
use crate::heap::{Heap, HeapRef, NULL_REF, ObjSlot};
use crate::keys::{ClassId, FieldKey, ThreadId};
use crate::rt::JvmClass;
use crate::thread::JavaThreadState;
use crate::vm::bootstrap_registry::BootstrapRegistry;
use crate::{MethodId, Symbol, debug_log, throw_exception};
use lasso::ThreadedRodeo;
use skadi_common::descriptor::FieldDescriptor;
use skadi_common::jtype::{AllocationType, PrimitiveType, TypeKind};
use skadi_common::wmap::WideMap;
use skadi_common::wstr::WString;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod bootstrap_registry;

/// A stack operand, local variable, argument or field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(HeapRef),
    Null,
}

impl Value {
    pub fn as_nullable_obj_ref(&self) -> Result<Option<HeapRef>, JvmError> {
        match self {
            Value::Ref(addr) => Ok(Some(*addr)),
            Value::Null => Ok(None),
            other => Err(JvmError::Internal(format!(
                "{:?} is not a reference value",
                other
            ))),
        }
    }

    pub fn as_obj_ref(&self) -> Result<HeapRef, JvmError> {
        match self {
            Value::Ref(addr) => Ok(*addr),
            Value::Null => throw_exception!(NullPointerException),
            other => Err(JvmError::Internal(format!(
                "{:?} is not a reference value",
                other
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i32, JvmError> {
        match self {
            Value::Integer(v) => Ok(*v),
            other => Err(JvmError::Internal(format!("{:?} is not an int", other))),
        }
    }

    pub fn as_long(&self) -> Result<i64, JvmError> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(JvmError::Internal(format!("{:?} is not a long", other))),
        }
    }

    pub fn as_float(&self) -> Result<f32, JvmError> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(JvmError::Internal(format!("{:?} is not a float", other))),
        }
    }

    pub fn as_double(&self) -> Result<f64, JvmError> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(JvmError::Internal(format!("{:?} is not a double", other))),
        }
    }
}

impl From<&FieldDescriptor> for Value {
    /// The default (zero) value for a field of this descriptor.
    fn from(descriptor: &FieldDescriptor) -> Self {
        if descriptor.is_array() || descriptor.kind == TypeKind::Reference {
            return Value::Null;
        }
        match descriptor.kind {
            TypeKind::Double => Value::Double(0.0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Long => Value::Long(0),
            _ => Value::Integer(0),
        }
    }
}

/// Host I/O hooks. The embedder's state travels inside the closures; when a
/// hook is absent the VM falls back to the process's stdio.
#[derive(Default)]
pub struct StdioHooks {
    pub read_stdin: Option<Box<dyn FnMut(&mut [u8]) -> usize + Send>>,
    pub poll_available_stdin: Option<Box<dyn FnMut() -> usize + Send>>,
    pub write_stdout: Option<Box<dyn FnMut(&[u8]) + Send>>,
    pub write_stderr: Option<Box<dyn FnMut(&[u8]) + Send>>,
}

pub struct VmConfig {
    /// Colon-separated directories and `.jar` archives.
    pub class_path: String,
    /// Heap capacity in bytes.
    pub heap_size: usize,
    /// Frame buffer capacity per thread, in bytes.
    pub frame_stack_size: usize,
    pub stdio: StdioHooks,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            class_path: String::new(),
            heap_size: 64 * 1024 * 1024,
            frame_stack_size: 512 * 1024,
            stdio: StdioHooks::default(),
        }
    }
}

/// The VM context: every entry point receives this; there is no process
/// global. The heap is exclusively owned by the collector during a
/// collection and by the mutator otherwise.
pub struct VirtualMachine {
    pub(crate) method_area: RwLock<MethodArea>,
    pub(crate) heap: RwLock<Heap>,
    interner: Arc<ThreadedRodeo>,
    pub br: Arc<BootstrapRegistry>,
    pub native_registry: crate::native::NativeRegistry,

    pub(crate) interned_strings: Mutex<WideMap<HeapRef>>,
    pub(crate) main_thread_group: ObjSlot,
    pub(crate) modules: Mutex<Vec<(String, ObjSlot)>>,
    /// Embedder-pinned objects, the moral equivalent of the host-side
    /// handle table in the original embedding API.
    pub(crate) pinned: Mutex<Vec<HeapRef>>,

    /// Live mutator threads, registered for root walking. The boxes are
    /// owned by the embedder; the cooperative single-mutator discipline
    /// guarantees they are parked at safe points whenever the collector
    /// dereferences these.
    pub(crate) threads: Mutex<Vec<*mut JavaThreadState>>,

    stdio: Mutex<StdioHooks>,
    frame_stack_size: usize,
    next_thread_id: AtomicU32,
}

// Safety: the thread pointers are only dereferenced stop-the-world; all
// other shared state is behind locks.
unsafe impl Send for VirtualMachine {}
unsafe impl Sync for VirtualMachine {}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Result<Self, JvmError> {
        let interner = Arc::new(ThreadedRodeo::default());
        let (method_area, br) = MethodArea::init(&config.class_path, interner.clone())?;
        let heap = Heap::new(config.heap_size)?;
        let native_registry = crate::native::NativeRegistry::preregistered(interner.clone());

        Ok(VirtualMachine {
            method_area: RwLock::new(method_area),
            heap: RwLock::new(heap),
            interner,
            br,
            native_registry,
            interned_strings: Mutex::new(WideMap::new()),
            main_thread_group: ObjSlot::new(),
            modules: Mutex::new(Vec::new()),
            pinned: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            stdio: Mutex::new(config.stdio),
            frame_stack_size: config.frame_stack_size,
            next_thread_id: AtomicU32::new(1),
        })
    }

    pub fn method_area_read(&self) -> RwLockReadGuard<'_, MethodArea> {
        self.method_area.read().expect("method area lock poisoned")
    }

    pub fn method_area_write(&self) -> RwLockWriteGuard<'_, MethodArea> {
        self.method_area.write().expect("method area lock poisoned")
    }

    pub fn heap_read(&self) -> RwLockReadGuard<'_, Heap> {
        self.heap.read().expect("heap lock poisoned")
    }

    pub fn heap_write(&self) -> RwLockWriteGuard<'_, Heap> {
        self.heap.write().expect("heap lock poisoned")
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    // Thread lifecycle.

    /// Creates a mutator thread and registers it for root walking. The box
    /// must come back through [`VirtualMachine::free_thread`]; moving the
    /// state out of the box would invalidate the registration.
    pub fn create_thread(&self) -> Box<JavaThreadState> {
        let id = ThreadId(self.next_thread_id.fetch_add(1, Ordering::Relaxed));
        let mut thread = Box::new(JavaThreadState::new(id, self.frame_stack_size));
        self.threads
            .lock()
            .expect("thread list lock poisoned")
            .push(&mut *thread as *mut JavaThreadState);

        // Pre-allocate the errors that must be raisable when allocating
        // their real counterparts is impossible. Configurations without the
        // error classes on the class path simply leave the slots null.
        for (name, slot) in [
            ("java/lang/OutOfMemoryError", &thread.out_of_mem_error),
            ("java/lang/StackOverflowError", &thread.stack_overflow_error),
        ] {
            if let Ok(class_id) = self.get_class_id_or_load(name)
                && let Ok(instance) = self.alloc_object(&thread, class_id)
            {
                slot.set(instance);
            }
        }

        debug_log!("Created thread {:?}", id);
        thread
    }

    pub fn free_thread(&self, thread: Box<JavaThreadState>) {
        let ptr = &*thread as *const JavaThreadState;
        self.threads
            .lock()
            .expect("thread list lock poisoned")
            .retain(|p| *p as *const JavaThreadState != ptr);
    }

    // Class file access.

    /// Makes bytes available under a file name, shadowing the class path.
    pub fn register_classfile(&self, filename: &str, bytes: Vec<u8>) {
        self.method_area_write()
            .loader_mut()
            .register(filename, bytes);
    }

    /// Locates a class file by name in the registry and class path.
    pub fn read_classfile(&self, filename: &str) -> Result<Vec<u8>, JvmError> {
        self.method_area_read()
            .loader()
            .find_file(filename)?
            .ok_or_else(|| JvmError::ClassNotFound(filename.to_string()))
    }

    /// Every class file visible to this VM, sorted, first-wins.
    pub fn list_classfiles(&self) -> Vec<String> {
        self.method_area_read().loader().class_file_names()
    }

    pub fn get_class_id_or_load(&self, name: &str) -> Result<ClassId, JvmError> {
        let name_sym = self.interner.get_or_intern(name);
        self.method_area_write().get_class_id_or_load(name_sym)
    }

    // Allocation. Exhaustion triggers a collection; if that does not help,
    // the thread's pre-allocated OutOfMemoryError is raised.

    fn alloc_or_collect(
        &self,
        thread: &JavaThreadState,
        mut alloc: impl FnMut(&mut Heap) -> Result<HeapRef, JvmError>,
    ) -> Result<HeapRef, JvmError> {
        let first = { alloc(&mut self.heap_write()) };
        match first {
            Err(JvmError::HeapExhausted) => {}
            other => return other,
        }

        self.collect_garbage()?;

        match alloc(&mut self.heap_write()) {
            Err(JvmError::HeapExhausted) => {
                if let Some(oom) = thread.out_of_mem_error.get() {
                    thread.set_current_exception(oom);
                }
                Err(JvmError::OutOfMemory)
            }
            other => other,
        }
    }

    pub fn alloc_object(
        &self,
        thread: &JavaThreadState,
        class_id: ClassId,
    ) -> Result<HeapRef, JvmError> {
        let instance_size = self
            .method_area_read()
            .get_instance_class(&class_id)?
            .get_instance_size()?;
        self.alloc_or_collect(thread, |heap| heap.alloc_instance(instance_size, class_id))
    }

    /// Allocates an array of the named array class (`[I`, `[Ljava/lang/String;`, ...).
    pub fn alloc_array(
        &self,
        thread: &JavaThreadState,
        array_class: &str,
        length: i32,
    ) -> Result<HeapRef, JvmError> {
        let class_id = self.get_class_id_or_load(array_class)?;
        let element = {
            let ma = self.method_area_read();
            match ma.get_class(&class_id) {
                JvmClass::PrimitiveArray(arr) if arr.dimensions == 1 => Some(arr.element_type),
                JvmClass::PrimitiveArray(_) | JvmClass::InstanceArray(_) => None,
                other => {
                    return Err(JvmError::Internal(format!(
                        "{} is not an array class",
                        other
                    )));
                }
            }
        };
        self.alloc_or_collect(thread, |heap| match element {
            Some(primitive) => heap.alloc_primitive_array(class_id, primitive, length),
            // Outer dimensions of multi-dimensional primitive arrays store
            // references, exactly like reference arrays.
            None => heap.alloc_object_array(class_id, length),
        })
    }

    pub fn alloc_primitive_array(
        &self,
        thread: &JavaThreadState,
        element: PrimitiveType,
        length: i32,
    ) -> Result<HeapRef, JvmError> {
        let name = format!("[{}", element.descriptor_char());
        self.alloc_array(thread, &name, length)
    }

    // Garbage collection.

    /// Stop-the-world mark + compact. All registered threads must be parked
    /// at safe points.
    pub fn collect_garbage(&self) -> Result<(), JvmError> {
        gc::collect(self).map(|_| ())
    }

    // Interned strings.

    /// Returns the canonical `java/lang/String` instance for `s`, creating
    /// and recording it on first use. Requires `java/lang/String` (with its
    /// `value`/`coder` fields) to be loadable.
    pub fn intern_string(&self, thread: &mut JavaThreadState, s: &str) -> Result<HeapRef, JvmError> {
        let key = WString::from(s);
        if let Some(existing) = self
            .interned_strings
            .lock()
            .expect("interned strings lock poisoned")
            .get(key.units())
        {
            return Ok(*existing);
        }

        let string_instance = self.alloc_string(thread, s)?;
        self.interned_strings
            .lock()
            .expect("interned strings lock poisoned")
            .insert(key.units(), string_instance);
        Ok(string_instance)
    }

    /// Allocates a non-interned `java/lang/String` with latin-1 or UTF-16
    /// backing, whichever the contents need.
    pub fn alloc_string(&self, thread: &mut JavaThreadState, s: &str) -> Result<HeapRef, JvmError> {
        const LATIN1: i32 = 0;
        const UTF16: i32 = 1;

        let string_class_sym = self.interner.resolve(&self.br.java_lang_string_sym).to_string();
        let string_class_id = self.get_class_id_or_load(&string_class_sym)?;

        let (bytes, coder) = if s.chars().all(|c| (c as u32) <= 0xFF) {
            (s.chars().map(|c| c as u8).collect::<Vec<u8>>(), LATIN1)
        } else {
            let mut bytes = Vec::with_capacity(s.len() * 2);
            for unit in s.encode_utf16() {
                bytes.extend_from_slice(&unit.to_le_bytes());
            }
            (bytes, UTF16)
        };

        let byte_array = self.alloc_primitive_array(thread, PrimitiveType::Byte, bytes.len() as i32)?;
        {
            let mut heap = self.heap_write();
            let slice = heap.byte_array_slice_mut(byte_array)?;
            for (dst, src) in slice.iter_mut().zip(&bytes) {
                *dst = *src as i8;
            }
        }

        // The second allocation can collect; the backing array must be
        // rooted across it.
        let value_handle = thread.handles.make_handle(byte_array);
        let string_instance = self.alloc_object(thread, string_class_id)?;
        let byte_array = thread.handles.get(value_handle);
        thread.handles.drop_handle(value_handle);
        {
            let ma = self.method_area_read();
            let string_class = ma.get_instance_class(&string_class_id)?;
            let value_field = string_class.get_instance_field(&self.br.string_value_fk)?;
            let coder_field = string_class.get_instance_field(&self.br.string_coder_fk)?;
            let mut heap = self.heap_write();
            heap.write_field(
                string_instance,
                value_field.offset,
                Value::Ref(byte_array),
                AllocationType::Reference,
            )?;
            heap.write_field(
                string_instance,
                coder_field.offset,
                Value::Integer(coder),
                AllocationType::Byte,
            )?;
        }
        Ok(string_instance)
    }

    /// Reads a `java/lang/String` instance back into a Rust string.
    pub fn read_java_string(&self, r: HeapRef) -> Result<String, JvmError> {
        let ma = self.method_area_read();
        let heap = self.heap_read();
        let class_id = heap.class_id(r)?;
        let string_class = ma.get_instance_class(&class_id)?;
        let value_field = string_class.get_instance_field(&self.br.string_value_fk)?;
        let coder_field = string_class.get_instance_field(&self.br.string_coder_fk)?;

        let byte_array = heap
            .read_field(r, value_field.offset, AllocationType::Reference)?
            .as_obj_ref()?;
        let coder = heap
            .read_field(r, coder_field.offset, AllocationType::Byte)?
            .as_int()?;
        let bytes = heap.byte_array_slice(byte_array)?;

        match coder {
            0 => Ok(bytes.iter().map(|&b| (b as u8) as char).collect()),
            1 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0] as u8, pair[1] as u8]))
                    .collect();
                Ok(String::from_utf16_lossy(&units))
            }
            other => Err(JvmError::Internal(format!("unknown String coder {}", other))),
        }
    }

    // VM-level roots for the embedder.

    pub fn set_main_thread_group(&self, group: HeapRef) {
        self.main_thread_group.set(group);
    }

    pub fn register_module(&self, name: &str, reflection_object: HeapRef) {
        let slot = ObjSlot::new();
        slot.set(reflection_object);
        self.modules
            .lock()
            .expect("module lock poisoned")
            .push((name.to_string(), slot));
    }

    /// Pins an object for the embedder; pinned objects are GC roots until
    /// unpinned.
    pub fn pin_object(&self, r: HeapRef) -> usize {
        let mut pinned = self.pinned.lock().expect("pin lock poisoned");
        pinned.push(r);
        pinned.len() - 1
    }

    pub fn unpin_object(&self, index: usize) {
        let mut pinned = self.pinned.lock().expect("pin lock poisoned");
        if index < pinned.len() {
            pinned[index] = NULL_REF;
        }
    }

    // Exception plumbing for the external interpreter.

    /// Looks for a handler of `exception` in the method of the topmost
    /// frame. On a hit the frame is retargeted at the handler with the
    /// exception as the only operand, and `true` comes back.
    pub fn find_exception_handler(
        &self,
        thread: &mut JavaThreadState,
        method_id: &MethodId,
        exception: HeapRef,
    ) -> Result<bool, JvmError> {
        let pc = thread.stack.cur_frame()?.pc();
        let handler = {
            let ma = self.method_area_read();
            let exception_table = ma.get_method(method_id).exception_table()?;
            let mut found = None;
            for entry in exception_table {
                if pc < entry.start_insn || pc >= entry.end_insn {
                    continue;
                }
                let caught = if entry.catch_type == 0 {
                    true
                } else {
                    let exception_class_id = self.heap_read().class_id(exception)?;
                    let catch_type_sym = ma
                        .get_cp_by_method_id(method_id)?
                        .get_class_sym(&entry.catch_type, &self.interner)?;
                    ma.instance_of(exception_class_id, catch_type_sym)
                };
                if caught {
                    found = Some(entry.handler_insn);
                    break;
                }
            }
            found
        };

        match handler {
            Some(handler) => {
                let mut frame = thread.stack.cur_frame()?;
                while frame.stack_depth() > 0 {
                    frame.pop_raw()?;
                }
                frame.push_ref(exception)?;
                frame.set_pc(handler);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unwinds frame by frame until some method's exception table claims
    /// the exception. When nothing does, the current-exception slot is set
    /// and `false` comes back; the thread's frame stack is empty then.
    pub fn unwind(
        &self,
        thread: &mut JavaThreadState,
        exception: HeapRef,
    ) -> Result<bool, JvmError> {
        while !thread.stack.is_empty() {
            let method_id = thread.stack.cur_frame()?.method_id();
            if self.find_exception_handler(thread, &method_id, exception)? {
                return Ok(true);
            }
            thread.stack.pop_frame(None)?;
        }
        thread.set_current_exception(exception);
        Ok(false)
    }

    /// Reports an uncaught exception through the stderr hook and clears the
    /// thread's exception slot. Full `toString`/`printStackTrace` execution
    /// belongs to the interpreter; this prints the class name and the
    /// detail message when it is readable.
    pub fn report_uncaught_exception(&self, thread: &JavaThreadState) {
        let Some(exception) = thread.take_current_exception() else {
            return;
        };
        let class_name = {
            let heap = self.heap_read();
            let ma = self.method_area_read();
            heap.class_id(exception)
                .map(|id| {
                    self.interner
                        .resolve(&ma.get_class(&id).get_name())
                        .replace('/', ".")
                })
                .unwrap_or_else(|_| "<unknown>".to_string())
        };
        let message = self.read_detail_message(exception);

        let mut line = format!("Exception in thread \"main\" {}", class_name);
        if let Some(message) = message {
            line.push_str(": ");
            line.push_str(&message);
        }
        line.push('\n');
        self.write_stderr(line.as_bytes());
    }

    fn read_detail_message(&self, exception: HeapRef) -> Option<String> {
        let message_ref = {
            let ma = self.method_area_read();
            let heap = self.heap_read();
            let class_id = heap.class_id(exception).ok()?;
            let class = ma.get_instance_class(&class_id).ok()?;
            let field = class
                .get_instance_field(&self.br.throwable_detail_message_fk)
                .ok()?;
            heap.read_field(exception, field.offset, AllocationType::Reference)
                .ok()?
                .as_nullable_obj_ref()
                .ok()??
        };
        self.read_java_string(message_ref).ok()
    }

    // Stdio.

    pub fn write_stdout(&self, bytes: &[u8]) {
        let mut stdio = self.stdio.lock().expect("stdio lock poisoned");
        match &mut stdio.write_stdout {
            Some(hook) => hook(bytes),
            None => {
                let _ = std::io::stdout().write_all(bytes);
            }
        }
    }

    pub fn write_stderr(&self, bytes: &[u8]) {
        let mut stdio = self.stdio.lock().expect("stdio lock poisoned");
        match &mut stdio.write_stderr {
            Some(hook) => hook(bytes),
            None => {
                let _ = std::io::stderr().write_all(bytes);
            }
        }
    }

    pub fn read_stdin(&self, buf: &mut [u8]) -> usize {
        let mut stdio = self.stdio.lock().expect("stdio lock poisoned");
        match &mut stdio.read_stdin {
            Some(hook) => hook(buf),
            None => std::io::stdin().read(buf).unwrap_or(0),
        }
    }

    pub fn poll_available_stdin(&self) -> usize {
        let mut stdio = self.stdio.lock().expect("stdio lock poisoned");
        match &mut stdio.poll_available_stdin {
            Some(hook) => hook(),
            None => 0,
        }
    }

    pub fn intern_symbol(&self, s: &str) -> Symbol {
        self.interner.get_or_intern(s)
    }

    /// Interns a `(name, descriptor)` pair into a field key.
    pub fn field_key(&self, name: &str, desc: &str) -> FieldKey {
        FieldKey {
            name: self.intern_symbol(name),
            desc: self.intern_symbol(desc),
        }
    }
}
