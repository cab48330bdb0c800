use crate::heap::ObjSlot;
use crate::keys::{ClassId, FieldDescriptorId};
use skadi_classfile::flags::FieldFlags;
use skadi_common::jtype::AllocationType;

#[derive(Debug, Clone)]
pub struct InstanceField {
    pub flags: FieldFlags,
    pub descriptor_id: FieldDescriptorId,
    pub alloc_ty: AllocationType,
    /// Byte offset from the start of the object's data area.
    pub offset: usize,
    pub declaring_class: ClassId,
    pub reflection_field: ObjSlot,
}

#[derive(Debug, Clone)]
pub struct StaticField {
    pub flags: FieldFlags,
    pub descriptor_id: FieldDescriptorId,
    pub alloc_ty: AllocationType,
    /// Byte offset within the class's static area.
    pub offset: usize,
    /// Constant pool index of a `ConstantValue` attribute, if present.
    pub constant_value_index: Option<u16>,
    pub reflection_field: ObjSlot,
}
