use crate::error::JvmError;
use crate::keys::FullyQualifiedMethodKey;
use crate::thread::JavaThreadState;
use crate::vm::{Value, VirtualMachine};
use dashmap::DashMap;
use lasso::ThreadedRodeo;
use std::sync::Arc;

mod java_lang;

pub type NativeRet = Result<Option<Value>, JvmError>;

/// A native method binding. Arguments arrive in declaration order, the
/// receiver first for instance methods. The callee must uphold the heap and
/// frame invariants: any reference it keeps across a potential collection
/// has to live in a handle or frame slot.
pub type NativeFn = fn(&VirtualMachine, &mut JavaThreadState, &[Value]) -> NativeRet;

pub struct NativeRegistry {
    bindings: DashMap<FullyQualifiedMethodKey, NativeFn>,
    pub string_interner: Arc<ThreadedRodeo>,
}

impl NativeRegistry {
    /// Builds a registry with the core `java.lang` bindings installed.
    pub fn preregistered(string_interner: Arc<ThreadedRodeo>) -> Self {
        let registry = NativeRegistry {
            bindings: DashMap::new(),
            string_interner,
        };
        java_lang::register_java_lang_natives(&registry);
        registry
    }

    pub fn register(&self, key: FullyQualifiedMethodKey, binding: NativeFn) {
        self.bindings.insert(key, binding);
    }

    pub fn get(&self, key: &FullyQualifiedMethodKey) -> Option<NativeFn> {
        self.bindings.get(key).map(|entry| *entry.value())
    }
}
