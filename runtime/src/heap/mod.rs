use crate::error::JvmError;
use crate::keys::ClassId;
use crate::throw_exception;
use crate::vm::Value;
use skadi_common::jtype::{AllocationType, PrimitiveType};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod method_area;

/// Offset of an object header from the heap base. Offset 0 is reserved and
/// stands for `null`.
pub type HeapRef = usize;

pub const NULL_REF: HeapRef = 0;

/// A traced object slot: a nullable heap reference the collector both reads
/// (as a root) and rewrites (after compaction). Mirrors, cached constant
/// pool objects, inline caches and the per-thread exception slots all live
/// in these.
#[derive(Debug, Default)]
pub struct ObjSlot(AtomicUsize);

impl ObjSlot {
    pub const fn new() -> Self {
        ObjSlot(AtomicUsize::new(NULL_REF))
    }

    pub fn get(&self) -> Option<HeapRef> {
        match self.0.load(Ordering::Relaxed) {
            NULL_REF => None,
            r => Some(r),
        }
    }

    pub fn set(&self, r: HeapRef) {
        self.0.store(r, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(NULL_REF, Ordering::Relaxed);
    }

    pub fn is_null(&self) -> bool {
        self.0.load(Ordering::Relaxed) == NULL_REF
    }

    /// Address of the slot itself, for the collector's root list. Only valid
    /// while the world is stopped.
    pub(crate) fn as_root(&self) -> *mut usize {
        self.0.as_ptr()
    }
}

impl Clone for ObjSlot {
    fn clone(&self) -> Self {
        ObjSlot(AtomicUsize::new(self.0.load(Ordering::Relaxed)))
    }
}

/// Every object starts with this 16-byte header. The mark word packs the
/// collector's reachability flag, the array flag and, when the low bit is
/// set, the heap offset of expanded monitor data.
#[repr(C)]
struct ObjectHeader {
    mark: u64,
    class_id: u32,
    /// Total bytes including the header, before alignment padding.
    size: u32,
}

const MARK_EXPANDED: u64 = 1 << 0;
const MARK_REACHABLE: u64 = 1 << 1;
const MARK_ARRAY: u64 = 1 << 2;
const MARK_FLAG_MASK: u64 = 0b111;

/// Monitor state hung off the mark word once a lock inflates.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MonitorData {
    pub owner: u32,
    pub recursion: u32,
}

/// Fixed-capacity, page-aligned bump heap. Objects are allocated at 8-byte
/// alignment and never move except under the collector.
pub struct Heap {
    memory: *mut u8,
    capacity: usize,
    used: usize,
}

// Safety: the heap hands out raw pointers but is only touched under the
// VM's locks; the mutator and the collector never run concurrently.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub const OBJECT_HEADER_SIZE: usize = size_of::<ObjectHeader>();
    pub const ARRAY_LENGTH_OFFSET: usize = 0;
    pub const ARRAY_KIND_OFFSET: usize = 4;
    pub const ARRAY_ELEMENTS_OFFSET: usize = 8;

    pub fn new(capacity: usize) -> Result<Self, JvmError> {
        const { assert!(size_of::<ObjectHeader>() == 16) };
        let capacity = capacity.next_multiple_of(4096);

        let memory = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if memory == libc::MAP_FAILED {
            return Err(JvmError::Internal("mmap of heap failed".to_string()));
        }

        Ok(Heap {
            memory: memory as *mut u8,
            capacity,
            // Offset 0 stays unused so it can represent null.
            used: Self::OBJECT_HEADER_SIZE,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn set_used(&mut self, used: usize) {
        self.used = used;
    }

    /// True for offsets that can denote an allocated object.
    pub(crate) fn contains(&self, r: HeapRef) -> bool {
        r >= Self::OBJECT_HEADER_SIZE && r < self.used && r % 8 == 0
    }

    pub(crate) unsafe fn base(&self) -> *mut u8 {
        self.memory
    }

    fn header(&self, r: HeapRef) -> &ObjectHeader {
        unsafe { &*(self.memory.add(r) as *const ObjectHeader) }
    }

    fn header_mut(&mut self, r: HeapRef) -> &mut ObjectHeader {
        unsafe { &mut *(self.memory.add(r) as *mut ObjectHeader) }
    }

    unsafe fn data_ptr(&self, r: HeapRef) -> *mut u8 {
        unsafe { self.memory.add(r + Self::OBJECT_HEADER_SIZE) }
    }

    fn alloc_raw(&mut self, data_size: usize) -> Result<HeapRef, JvmError> {
        let total = Self::OBJECT_HEADER_SIZE + data_size;
        let aligned = total.next_multiple_of(8);

        if self.used + aligned > self.capacity {
            return Err(JvmError::HeapExhausted);
        }

        let offset = self.used;
        self.used += aligned;

        unsafe {
            std::ptr::write_bytes(self.data_ptr(offset), 0, data_size);
        }
        Ok(offset)
    }

    pub fn alloc_instance(
        &mut self,
        instance_size: usize,
        class_id: ClassId,
    ) -> Result<HeapRef, JvmError> {
        let r = self.alloc_raw(instance_size)?;
        let header = self.header_mut(r);
        header.mark = 0;
        header.class_id = class_id.into_inner().get();
        header.size = (Self::OBJECT_HEADER_SIZE + instance_size) as u32;
        Ok(r)
    }

    fn alloc_array_internal(
        &mut self,
        class_id: ClassId,
        length: i32,
        kind: AllocationType,
    ) -> Result<HeapRef, JvmError> {
        if length < 0 {
            throw_exception!(NegativeArraySizeException, "{}", length)?
        }
        let data_size = Self::ARRAY_ELEMENTS_OFFSET + length as usize * kind.byte_size();
        let r = self.alloc_raw(data_size)?;

        let header = self.header_mut(r);
        header.mark = MARK_ARRAY;
        header.class_id = class_id.into_inner().get();
        header.size = (Self::OBJECT_HEADER_SIZE + data_size) as u32;

        unsafe {
            let data = self.data_ptr(r);
            *(data as *mut i32) = length;
            *data.add(Self::ARRAY_KIND_OFFSET) = kind as u8;
        }
        Ok(r)
    }

    pub fn alloc_primitive_array(
        &mut self,
        class_id: ClassId,
        element: PrimitiveType,
        length: i32,
    ) -> Result<HeapRef, JvmError> {
        self.alloc_array_internal(class_id, length, element.into())
    }

    pub fn alloc_object_array(
        &mut self,
        class_id: ClassId,
        length: i32,
    ) -> Result<HeapRef, JvmError> {
        self.alloc_array_internal(class_id, length, AllocationType::Reference)
    }

    pub fn class_id(&self, r: HeapRef) -> Result<ClassId, JvmError> {
        let raw = self.header(r).class_id;
        NonZeroU32::new(raw)
            .map(ClassId::new)
            .ok_or_else(|| JvmError::Internal(format!("object at {:#x} has class id 0", r)))
    }

    pub fn object_size(&self, r: HeapRef) -> usize {
        self.header(r).size as usize
    }

    pub fn is_array(&self, r: HeapRef) -> bool {
        self.header(r).mark & MARK_ARRAY != 0
    }

    fn require_array(&self, r: HeapRef) -> Result<(), JvmError> {
        if self.is_array(r) {
            Ok(())
        } else {
            Err(JvmError::Internal(format!("object at {:#x} is not an array", r)))
        }
    }

    pub fn array_length(&self, r: HeapRef) -> Result<i32, JvmError> {
        self.require_array(r)?;
        Ok(unsafe { *(self.data_ptr(r) as *const i32) })
    }

    pub fn array_element_kind(&self, r: HeapRef) -> Result<AllocationType, JvmError> {
        self.require_array(r)?;
        let byte = unsafe { *self.data_ptr(r).add(Self::ARRAY_KIND_OFFSET) };
        AllocationType::try_from(byte)
            .map_err(|_| JvmError::Internal(format!("bad array element kind {}", byte)))
    }

    pub fn read_field(
        &self,
        r: HeapRef,
        field_offset: usize,
        ty: AllocationType,
    ) -> Result<Value, JvmError> {
        let src = unsafe { self.data_ptr(r).add(field_offset) };
        let value = match ty {
            AllocationType::Boolean => {
                let v = unsafe { *src };
                Value::Integer(if v != 0 { 1 } else { 0 })
            }
            AllocationType::Byte => Value::Integer(unsafe { *(src as *const i8) } as i32),
            AllocationType::Short => Value::Integer(unsafe { *(src as *const i16) } as i32),
            AllocationType::Char => Value::Integer(unsafe { *(src as *const u16) } as i32),
            AllocationType::Int => Value::Integer(unsafe { *(src as *const i32) }),
            AllocationType::Long => Value::Long(unsafe { *(src as *const i64) }),
            AllocationType::Float => Value::Float(unsafe { *(src as *const f32) }),
            AllocationType::Double => Value::Double(unsafe { *(src as *const f64) }),
            AllocationType::Reference => match unsafe { *(src as *const usize) } {
                NULL_REF => Value::Null,
                obj => Value::Ref(obj),
            },
        };
        Ok(value)
    }

    pub fn write_field(
        &mut self,
        r: HeapRef,
        field_offset: usize,
        value: Value,
        ty: AllocationType,
    ) -> Result<(), JvmError> {
        let dst = unsafe { self.data_ptr(r).add(field_offset) };
        match (value, ty) {
            (Value::Integer(v), AllocationType::Boolean) => unsafe {
                *dst = if v != 0 { 1 } else { 0 };
            },
            (Value::Integer(v), AllocationType::Byte) => unsafe {
                *(dst as *mut i8) = v as i8;
            },
            (Value::Integer(v), AllocationType::Short) => unsafe {
                *(dst as *mut i16) = v as i16;
            },
            (Value::Integer(v), AllocationType::Char) => unsafe {
                *(dst as *mut u16) = v as u16;
            },
            (Value::Integer(v), AllocationType::Int) => unsafe {
                *(dst as *mut i32) = v;
            },
            (Value::Long(v), AllocationType::Long) => unsafe {
                *(dst as *mut i64) = v;
            },
            (Value::Float(v), AllocationType::Float) => unsafe {
                *(dst as *mut f32) = v;
            },
            (Value::Double(v), AllocationType::Double) => unsafe {
                *(dst as *mut f64) = v;
            },
            (Value::Ref(obj), AllocationType::Reference) => unsafe {
                *(dst as *mut usize) = obj;
            },
            (Value::Null, AllocationType::Reference) => unsafe {
                *(dst as *mut usize) = NULL_REF;
            },
            (value, ty) => {
                return Err(JvmError::Internal(format!(
                    "type mismatch writing {:?} into a {:?} slot",
                    value, ty
                )));
            }
        }
        Ok(())
    }

    pub fn read_array_element(&self, r: HeapRef, index: i32) -> Result<Value, JvmError> {
        let length = self.array_length(r)?;
        if index < 0 || index >= length {
            throw_exception!(
                ArrayIndexOutOfBoundsException,
                "Index {} out of bounds for length {}",
                index,
                length
            )?
        }
        let kind = self.array_element_kind(r)?;
        let offset = Self::ARRAY_ELEMENTS_OFFSET + index as usize * kind.byte_size();
        self.read_field(r, offset, kind)
    }

    pub fn write_array_element(
        &mut self,
        r: HeapRef,
        index: i32,
        value: Value,
    ) -> Result<(), JvmError> {
        let length = self.array_length(r)?;
        if index < 0 || index >= length {
            throw_exception!(
                ArrayIndexOutOfBoundsException,
                "Index {} out of bounds for length {}",
                index,
                length
            )?
        }
        let kind = self.array_element_kind(r)?;
        let offset = Self::ARRAY_ELEMENTS_OFFSET + index as usize * kind.byte_size();
        self.write_field(r, offset, value, kind)
    }

    /// Overlapping-safe element copy between arrays of the same element
    /// kind. Bounds are fully checked before the first byte moves, so the
    /// destination is untouched when an index error is raised.
    pub fn copy_array_slice(
        &mut self,
        src: HeapRef,
        src_pos: i32,
        dest: HeapRef,
        dest_pos: i32,
        length: i32,
    ) -> Result<(), JvmError> {
        let src_kind = self.array_element_kind(src)?;
        let dest_kind = self.array_element_kind(dest)?;
        if src_kind != dest_kind {
            throw_exception!(
                ArrayStoreException,
                "arraycopy between incompatible arrays"
            )?
        }

        let src_len = self.array_length(src)?;
        let dest_len = self.array_length(dest)?;
        if src_pos < 0
            || dest_pos < 0
            || length < 0
            || src_pos as i64 + length as i64 > src_len as i64
            || dest_pos as i64 + length as i64 > dest_len as i64
        {
            throw_exception!(
                ArrayIndexOutOfBoundsException,
                "arraycopy range [{}..{}+{}] out of bounds",
                src_pos,
                dest_pos,
                length
            )?
        }

        let element_size = src_kind.byte_size();
        unsafe {
            let src_ptr = self
                .data_ptr(src)
                .add(Self::ARRAY_ELEMENTS_OFFSET + src_pos as usize * element_size);
            let dest_ptr = self
                .data_ptr(dest)
                .add(Self::ARRAY_ELEMENTS_OFFSET + dest_pos as usize * element_size);
            std::ptr::copy(src_ptr, dest_ptr, length as usize * element_size);
        }
        Ok(())
    }

    pub fn byte_array_slice(&self, r: HeapRef) -> Result<&[i8], JvmError> {
        if self.array_element_kind(r)? != AllocationType::Byte {
            return Err(JvmError::Internal("not a byte array".to_string()));
        }
        let length = self.array_length(r)? as usize;
        let elements = unsafe { self.data_ptr(r).add(Self::ARRAY_ELEMENTS_OFFSET) };
        Ok(unsafe { std::slice::from_raw_parts(elements as *const i8, length) })
    }

    pub fn byte_array_slice_mut(&mut self, r: HeapRef) -> Result<&mut [i8], JvmError> {
        if self.array_element_kind(r)? != AllocationType::Byte {
            return Err(JvmError::Internal("not a byte array".to_string()));
        }
        let length = self.array_length(r)? as usize;
        let elements = unsafe { self.data_ptr(r).add(Self::ARRAY_ELEMENTS_OFFSET) };
        Ok(unsafe { std::slice::from_raw_parts_mut(elements as *mut i8, length) })
    }

    pub fn int_array_slice(&self, r: HeapRef) -> Result<&[i32], JvmError> {
        if self.array_element_kind(r)? != AllocationType::Int {
            return Err(JvmError::Internal("not an int array".to_string()));
        }
        let length = self.array_length(r)? as usize;
        let elements = unsafe { self.data_ptr(r).add(Self::ARRAY_ELEMENTS_OFFSET) };
        Ok(unsafe { std::slice::from_raw_parts(elements as *const i32, length) })
    }

    // Mark-word plumbing for the collector.

    pub(crate) fn is_marked(&self, r: HeapRef) -> bool {
        self.header(r).mark & MARK_REACHABLE != 0
    }

    pub(crate) fn set_marked(&mut self, r: HeapRef) {
        self.header_mut(r).mark |= MARK_REACHABLE;
    }

    pub(crate) fn clear_mark_at(&mut self, r: HeapRef) {
        self.header_mut(r).mark &= !MARK_REACHABLE;
    }

    /// Inflates the object's monitor, allocating its expanded data in the
    /// heap and threading the offset through the mark word.
    pub fn expand_monitor(&mut self, r: HeapRef) -> Result<(), JvmError> {
        if self.header(r).mark & MARK_EXPANDED != 0 {
            return Ok(());
        }
        let data = self.alloc_raw(size_of::<MonitorData>())?;
        // alloc_raw zeroed it; alloc_raw's header area for this pseudo
        // allocation doubles as padding, the data region is the monitor.
        let monitor_offset = data + Self::OBJECT_HEADER_SIZE;
        let header = self.header_mut(r);
        header.mark =
            (header.mark & MARK_FLAG_MASK) | MARK_EXPANDED | (monitor_offset as u64) << 3;
        Ok(())
    }

    pub(crate) fn monitor_offset(&self, r: HeapRef) -> Option<usize> {
        let mark = self.header(r).mark;
        if mark & MARK_EXPANDED != 0 {
            Some((mark >> 3) as usize)
        } else {
            None
        }
    }

    pub(crate) fn set_monitor_offset(&mut self, r: HeapRef, monitor_offset: usize) {
        let header = self.header_mut(r);
        header.mark = (header.mark & MARK_FLAG_MASK) | MARK_EXPANDED | (monitor_offset as u64) << 3;
    }

    pub fn monitor(&self, r: HeapRef) -> Option<MonitorData> {
        let offset = self.monitor_offset(r)?;
        Some(unsafe { *(self.memory.add(offset) as *const MonitorData) })
    }

    // Word-level access used by the collector when walking reference slots.

    pub(crate) fn read_word(&self, offset: usize) -> usize {
        unsafe { *(self.memory.add(offset) as *const usize) }
    }

    pub(crate) fn write_word(&mut self, offset: usize, value: usize) {
        unsafe { *(self.memory.add(offset) as *mut usize) = value }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.memory as *mut libc::c_void, self.capacity) };
        if result != 0 {
            crate::debug_error_log!("munmap failed during Heap drop");
        }
    }
}
