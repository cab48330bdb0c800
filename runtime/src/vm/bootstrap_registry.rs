use crate::error::JvmError;
use crate::keys::{ClassId, FieldKey, MethodKey, Symbol};
use lasso::ThreadedRodeo;
use once_cell::sync::OnceCell;
use skadi_common::jtype::PrimitiveType;

/// Pre-interned names, descriptors and member keys the runtime reaches for
/// constantly, plus the ids of the handful of core classes once they load.
pub struct BootstrapRegistry {
    // Method names
    pub init_sym: Symbol,
    pub clinit_sym: Symbol,
    pub main_sym: Symbol,
    pub clone_sym: Symbol,
    pub arraycopy_sym: Symbol,

    // Class names
    pub java_lang_object_sym: Symbol,
    pub java_lang_class_sym: Symbol,
    pub java_lang_string_sym: Symbol,
    pub java_lang_throwable_sym: Symbol,
    pub java_lang_system_sym: Symbol,
    pub java_lang_thread_sym: Symbol,
    pub java_lang_thread_group_sym: Symbol,

    // Descriptors
    pub void_desc: Symbol,         // ()V
    pub string_desc: Symbol,       // Ljava/lang/String;
    pub object_desc: Symbol,       // Ljava/lang/Object;
    pub class_desc: Symbol,        // Ljava/lang/Class;
    pub string_array_desc: Symbol, // [Ljava/lang/String;
    pub byte_array_desc: Symbol,   // [B
    pub int_array_desc: Symbol,    // [I
    pub int_desc: Symbol,          // I
    pub boolean_desc: Symbol,      // Z
    pub clone_desc: Symbol,        // ()Ljava/lang/Object;

    // Member keys
    pub main_mk: MethodKey,
    pub string_value_fk: FieldKey,
    pub string_coder_fk: FieldKey,
    pub throwable_detail_message_fk: FieldKey,
    pub throwable_backtrace_fk: FieldKey,
    pub throwable_depth_fk: FieldKey,

    primitive_syms: [Symbol; 8],

    // Core class ids, set as each class is first loaded.
    java_lang_object_id: OnceCell<ClassId>,
    java_lang_class_id: OnceCell<ClassId>,
    java_lang_string_id: OnceCell<ClassId>,
    java_lang_throwable_id: OnceCell<ClassId>,
    byte_array_class_id: OnceCell<ClassId>,
}

impl BootstrapRegistry {
    pub fn new(interner: &ThreadedRodeo) -> Self {
        let string_desc = interner.get_or_intern("Ljava/lang/String;");
        let int_desc = interner.get_or_intern("I");

        let primitive_syms = PrimitiveType::values()
            .map(|p| interner.get_or_intern(p.name()));

        Self {
            init_sym: interner.get_or_intern("<init>"),
            clinit_sym: interner.get_or_intern("<clinit>"),
            main_sym: interner.get_or_intern("main"),
            clone_sym: interner.get_or_intern("clone"),
            arraycopy_sym: interner.get_or_intern("arraycopy"),

            java_lang_object_sym: interner.get_or_intern("java/lang/Object"),
            java_lang_class_sym: interner.get_or_intern("java/lang/Class"),
            java_lang_string_sym: interner.get_or_intern("java/lang/String"),
            java_lang_throwable_sym: interner.get_or_intern("java/lang/Throwable"),
            java_lang_system_sym: interner.get_or_intern("java/lang/System"),
            java_lang_thread_sym: interner.get_or_intern("java/lang/Thread"),
            java_lang_thread_group_sym: interner.get_or_intern("java/lang/ThreadGroup"),

            void_desc: interner.get_or_intern("()V"),
            string_desc,
            object_desc: interner.get_or_intern("Ljava/lang/Object;"),
            class_desc: interner.get_or_intern("Ljava/lang/Class;"),
            string_array_desc: interner.get_or_intern("[Ljava/lang/String;"),
            byte_array_desc: interner.get_or_intern("[B"),
            int_array_desc: interner.get_or_intern("[I"),
            int_desc,
            boolean_desc: interner.get_or_intern("Z"),
            clone_desc: interner.get_or_intern("()Ljava/lang/Object;"),

            main_mk: MethodKey {
                name: interner.get_or_intern("main"),
                desc: interner.get_or_intern("([Ljava/lang/String;)V"),
            },
            string_value_fk: FieldKey {
                name: interner.get_or_intern("value"),
                desc: interner.get_or_intern("[B"),
            },
            string_coder_fk: FieldKey {
                name: interner.get_or_intern("coder"),
                desc: interner.get_or_intern("B"),
            },
            throwable_detail_message_fk: FieldKey {
                name: interner.get_or_intern("detailMessage"),
                desc: string_desc,
            },
            throwable_backtrace_fk: FieldKey {
                name: interner.get_or_intern("backtrace"),
                desc: interner.get_or_intern("Ljava/lang/Object;"),
            },
            throwable_depth_fk: FieldKey {
                name: interner.get_or_intern("depth"),
                desc: int_desc,
            },

            primitive_syms,

            java_lang_object_id: OnceCell::new(),
            java_lang_class_id: OnceCell::new(),
            java_lang_string_id: OnceCell::new(),
            java_lang_throwable_id: OnceCell::new(),
            byte_array_class_id: OnceCell::new(),
        }
    }

    pub fn get_primitive_sym(&self, primitive: PrimitiveType) -> Symbol {
        let index = PrimitiveType::values()
            .iter()
            .position(|p| *p == primitive)
            .expect("all primitive types are preregistered");
        self.primitive_syms[index]
    }

    fn set_id(cell: &OnceCell<ClassId>, id: ClassId) {
        // First load wins; re-registration of the same class is harmless.
        let _ = cell.set(id);
    }

    fn get_id(cell: &OnceCell<ClassId>, what: &str) -> Result<ClassId, JvmError> {
        cell.get()
            .copied()
            .ok_or_else(|| JvmError::ClassNotFound(what.to_string()))
    }

    pub fn note_loaded_class(&self, name: Symbol, id: ClassId) {
        if name == self.java_lang_object_sym {
            Self::set_id(&self.java_lang_object_id, id);
        } else if name == self.java_lang_class_sym {
            Self::set_id(&self.java_lang_class_id, id);
        } else if name == self.java_lang_string_sym {
            Self::set_id(&self.java_lang_string_id, id);
        } else if name == self.java_lang_throwable_sym {
            Self::set_id(&self.java_lang_throwable_id, id);
        } else if name == self.byte_array_desc {
            Self::set_id(&self.byte_array_class_id, id);
        }
    }

    pub fn get_java_lang_object_id(&self) -> Result<ClassId, JvmError> {
        Self::get_id(&self.java_lang_object_id, "java/lang/Object")
    }

    pub fn java_lang_object_id_opt(&self) -> Option<ClassId> {
        self.java_lang_object_id.get().copied()
    }

    pub fn get_java_lang_class_id(&self) -> Result<ClassId, JvmError> {
        Self::get_id(&self.java_lang_class_id, "java/lang/Class")
    }

    pub fn get_java_lang_string_id(&self) -> Result<ClassId, JvmError> {
        Self::get_id(&self.java_lang_string_id, "java/lang/String")
    }

    pub fn get_java_lang_throwable_id(&self) -> Result<ClassId, JvmError> {
        Self::get_id(&self.java_lang_throwable_id, "java/lang/Throwable")
    }

    pub fn get_byte_array_class_id(&self) -> Result<ClassId, JvmError> {
        Self::get_id(&self.byte_array_class_id, "[B")
    }
}
