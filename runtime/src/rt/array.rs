use crate::error::JvmError;
use crate::heap::ObjSlot;
use crate::keys::{ClassId, MethodKey};
use crate::{MethodId, Symbol, build_exception};
use skadi_common::jtype::PrimitiveType;
use std::collections::HashMap;

/// `[I`, `[[D`, ... — the element kind plus the dimension count. The
/// `one_fewer_dim` edge reaches the element class: the primitive class for
/// one dimension, the next-smaller array otherwise.
pub struct PrimitiveArrayClass {
    pub name: Symbol,
    /// `java/lang/Object`, once it has been loaded.
    pub super_id: Option<ClassId>,
    pub element_type: PrimitiveType,
    pub dimensions: u8,
    pub one_fewer_dim: ClassId,
    pub vtable: Vec<MethodId>,
    pub vtable_index: HashMap<MethodKey, u16>,
    pub mirror: ObjSlot,
    pub cp_mirror: ObjSlot,
}

impl PrimitiveArrayClass {
    pub fn get_vtable_method_id(&self, key: &MethodKey) -> Result<MethodId, JvmError> {
        let pos = self
            .vtable_index
            .get(key)
            .copied()
            .ok_or(build_exception!(NoSuchMethodError, method_key: *key, class_sym: self.name))?;
        Ok(self.vtable[pos as usize])
    }
}

/// `[Ljava/lang/String;`, `[[Ljava/lang/Object;`, ...
pub struct ObjectArrayClass {
    pub name: Symbol,
    /// `java/lang/Object`, once it has been loaded.
    pub super_id: Option<ClassId>,
    pub dimensions: u8,
    pub one_fewer_dim: ClassId,
    pub vtable: Vec<MethodId>,
    pub vtable_index: HashMap<MethodKey, u16>,
    pub mirror: ObjSlot,
    pub cp_mirror: ObjSlot,
}

impl ObjectArrayClass {
    pub fn get_vtable_method_id(&self, key: &MethodKey) -> Result<MethodId, JvmError> {
        let pos = self
            .vtable_index
            .get(key)
            .copied()
            .ok_or(build_exception!(NoSuchMethodError, method_key: *key, class_sym: self.name))?;
        Ok(self.vtable[pos as usize])
    }
}
