use crate::heap::{HeapRef, ObjSlot};
use crate::keys::ThreadId;
use crate::thread::handles::HandleTable;
use crate::thread::stack::FrameStack;

pub mod handles;
pub mod stack;

/// Per-thread mutator state: the frame buffer, the native handle table, the
/// current-exception slot and the pre-allocated error instances raised when
/// allocating their real counterparts is impossible.
pub struct JavaThreadState {
    pub id: ThreadId,
    pub stack: FrameStack,
    pub handles: HandleTable,
    pub thread_obj: ObjSlot,
    /// The exception currently propagating, null otherwise.
    pub current_exception: ObjSlot,
    pub out_of_mem_error: ObjSlot,
    pub stack_overflow_error: ObjSlot,
}

impl JavaThreadState {
    pub(crate) fn new(id: ThreadId, frame_buffer_bytes: usize) -> Self {
        JavaThreadState {
            id,
            stack: FrameStack::new(frame_buffer_bytes),
            handles: HandleTable::new(),
            thread_obj: ObjSlot::new(),
            current_exception: ObjSlot::new(),
            out_of_mem_error: ObjSlot::new(),
            stack_overflow_error: ObjSlot::new(),
        }
    }

    pub fn set_current_exception(&self, exception: HeapRef) {
        self.current_exception.set(exception);
    }

    pub fn take_current_exception(&self) -> Option<HeapRef> {
        let exception = self.current_exception.get();
        self.current_exception.clear();
        exception
    }

    pub fn has_pending_exception(&self) -> bool {
        !self.current_exception.is_null()
    }
}
