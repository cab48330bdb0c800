use crate::error::JvmError;
use crate::heap::{HeapRef, ObjSlot};
use crate::keys::{ClassId, FieldKey, MethodKey};
use crate::rt::array::{ObjectArrayClass, PrimitiveArrayClass};
use crate::rt::class::InstanceClass;
use crate::rt::constant_pool::RuntimeConstantPool;
use crate::vm::Value;
use crate::{MethodId, Symbol};
use once_cell::sync::OnceCell;
use skadi_classfile::flags::ClassFlags;
use skadi_common::jtype::PrimitiveType;
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

pub mod array;
pub mod class;
pub mod constant_pool;
pub mod field;
pub mod method;

pub trait ClassLike {
    fn base(&self) -> &BaseClass;

    fn get_clinit_method_id(&self) -> Option<&MethodId> {
        self.base().clinit.get()
    }

    fn has_clinit(&self) -> bool {
        self.base().clinit.get().is_some()
    }

    fn name(&self) -> Symbol {
        self.base().name
    }

    fn flags(&self) -> ClassFlags {
        self.base().flags
    }

    fn mirror(&self) -> &ObjSlot {
        &self.base().mirror
    }

    fn cp_mirror(&self) -> &ObjSlot {
        &self.base().cp_mirror
    }

    fn get_super(&self) -> Option<ClassId> {
        self.base().super_id
    }

    fn get_source_file(&self) -> Option<Symbol> {
        self.base().source_file
    }

    fn get_interfaces(&self) -> Result<&HashSet<ClassId>, JvmError> {
        self.base().get_interfaces()
    }

    fn set_linked(&self) {
        self.base()
            .state
            .store(ClassState::Linked as u8, Ordering::Release);
    }

    fn is_initializing(&self) -> bool {
        self.base().state.load(Ordering::Acquire) == ClassState::Initializing as u8
    }

    fn set_initializing(&self) {
        self.base()
            .state
            .store(ClassState::Initializing as u8, Ordering::Release);
    }

    fn set_initialized(&self) {
        self.base()
            .state
            .store(ClassState::Initialized as u8, Ordering::Release);
    }

    fn is_initialized_or_initializing(&self) -> bool {
        let state = self.base().state.load(Ordering::Acquire);
        state == ClassState::Initialized as u8 || state == ClassState::Initializing as u8
    }
}

pub struct BaseClass {
    name: Symbol,
    flags: ClassFlags,
    super_id: Option<ClassId>,
    state: AtomicU8,
    mirror: ObjSlot,
    cp_mirror: ObjSlot,
    interfaces: OnceCell<HashSet<ClassId>>,
    clinit: OnceCell<MethodId>,
    source_file: Option<Symbol>,
}

impl BaseClass {
    pub fn new(
        name: Symbol,
        flags: ClassFlags,
        super_id: Option<ClassId>,
        source_file: Option<Symbol>,
    ) -> Self {
        Self {
            name,
            flags,
            super_id,
            source_file,
            state: AtomicU8::new(ClassState::Loaded as u8),
            mirror: ObjSlot::new(),
            cp_mirror: ObjSlot::new(),
            interfaces: OnceCell::new(),
            clinit: OnceCell::new(),
        }
    }

    pub(crate) fn set_clinit(&self, method_id: MethodId) -> Result<(), JvmError> {
        self.clinit
            .set(method_id)
            .map_err(|_| JvmError::Internal("class <clinit> already recorded".to_string()))
    }

    fn get_interfaces(&self) -> Result<&HashSet<ClassId>, JvmError> {
        self.interfaces
            .get()
            .ok_or_else(|| JvmError::Internal("class interfaces not linked yet".to_string()))
    }

    pub(crate) fn set_interfaces(&self, interfaces: HashSet<ClassId>) -> Result<(), JvmError> {
        self.interfaces
            .set(interfaces)
            .map_err(|_| JvmError::Internal("class interfaces already linked".to_string()))
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    Loaded = 0,
    Linked = 1,
    Initializing = 2,
    Initialized = 3,
}

/// A loaded class descriptor. Interfaces are ordinary instance classes with
/// the interface flag set; arrays and primitives are synthesised by the
/// method area without a class file.
pub enum JvmClass {
    Instance(Box<InstanceClass>),
    Primitive(PrimitiveClass),
    PrimitiveArray(PrimitiveArrayClass),
    InstanceArray(ObjectArrayClass),
}

impl Display for JvmClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmClass::Instance(_) => write!(f, "InstanceClass"),
            JvmClass::Primitive(_) => write!(f, "PrimitiveClass"),
            JvmClass::PrimitiveArray(_) => write!(f, "PrimitiveArrayClass"),
            JvmClass::InstanceArray(_) => write!(f, "ObjectArrayClass"),
        }
    }
}

impl JvmClass {
    // public, final, super
    const BUILTIN_CLASS_FLAGS: i32 = 0x411;

    pub fn as_class_like(&self) -> Result<&dyn ClassLike, JvmError> {
        match self {
            JvmClass::Instance(inst) => Ok(inst.as_ref()),
            other => Err(JvmError::Internal(format!(
                "{} has no class-file backing",
                other
            ))),
        }
    }

    pub fn get_cp(&self) -> Result<&RuntimeConstantPool, JvmError> {
        match self {
            JvmClass::Instance(inst) => Ok(&inst.cp),
            other => Err(JvmError::Internal(format!("{} has no constant pool", other))),
        }
    }

    pub fn get_name(&self) -> Symbol {
        match self {
            JvmClass::Instance(ic) => ic.name(),
            JvmClass::PrimitiveArray(pac) => pac.name,
            JvmClass::InstanceArray(oac) => oac.name,
            JvmClass::Primitive(pc) => pc.name,
        }
    }

    pub fn get_static_field_value(&self, field_key: &FieldKey) -> Result<Value, JvmError> {
        match self {
            JvmClass::Instance(inst) => inst.get_static_field_value(field_key),
            other => Err(JvmError::Internal(format!("{} has no static fields", other))),
        }
    }

    pub fn get_vtable_method_id(&self, key: &MethodKey) -> Result<MethodId, JvmError> {
        match self {
            JvmClass::Instance(inst) => inst.get_vtable_method_id(key),
            JvmClass::PrimitiveArray(arr) => arr.get_vtable_method_id(key),
            JvmClass::InstanceArray(arr) => arr.get_vtable_method_id(key),
            JvmClass::Primitive(_) => Err(JvmError::Internal(
                "primitive classes have no methods".to_string(),
            )),
        }
    }

    pub fn get_static_method_id_opt(&self, key: &MethodKey) -> Option<MethodId> {
        match self {
            JvmClass::Instance(inst) => inst.get_declared_method_id_opt(key),
            _ => None,
        }
    }

    pub fn mirror(&self) -> &ObjSlot {
        match self {
            JvmClass::Instance(ic) => ic.mirror(),
            JvmClass::PrimitiveArray(pac) => &pac.mirror,
            JvmClass::InstanceArray(oac) => &oac.mirror,
            JvmClass::Primitive(pc) => &pc.mirror,
        }
    }

    pub fn cp_mirror(&self) -> &ObjSlot {
        match self {
            JvmClass::Instance(ic) => ic.cp_mirror(),
            JvmClass::PrimitiveArray(pac) => &pac.cp_mirror,
            JvmClass::InstanceArray(oac) => &oac.cp_mirror,
            JvmClass::Primitive(pc) => &pc.cp_mirror,
        }
    }

    pub fn get_mirror_ref(&self) -> Option<HeapRef> {
        self.mirror().get()
    }

    pub fn get_super_id(&self) -> Option<ClassId> {
        match self {
            JvmClass::Instance(i) => i.get_super(),
            JvmClass::PrimitiveArray(arr) => arr.super_id,
            JvmClass::InstanceArray(arr) => arr.super_id,
            JvmClass::Primitive(_) => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, JvmClass::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, JvmClass::PrimitiveArray(_) | JvmClass::InstanceArray(_))
    }

    pub fn is_interface(&self) -> bool {
        match self {
            JvmClass::Instance(ic) => ic.flags().is_interface(),
            _ => false,
        }
    }

    pub fn get_raw_flags(&self) -> i32 {
        match self {
            JvmClass::Instance(ic) => ic.flags().get_raw_i32(),
            _ => Self::BUILTIN_CLASS_FLAGS,
        }
    }
}

pub struct PrimitiveClass {
    pub name: Symbol,
    pub primitive_type: PrimitiveType,
    pub mirror: ObjSlot,
    pub cp_mirror: ObjSlot,
}

impl PrimitiveClass {
    pub fn new(name: Symbol, primitive_type: PrimitiveType) -> Self {
        Self {
            name,
            primitive_type,
            mirror: ObjSlot::new(),
            cp_mirror: ObjSlot::new(),
        }
    }
}
