use crate::flags::FieldFlags;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: FieldFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<FieldAttr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldAttr {
    /// Constant pool index of the initial value of a static field.
    ConstantValue(u16),
    Unknown { name_index: u16, data: Vec<u8> },
}

impl FieldInfo {
    pub fn constant_value_index(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr {
            FieldAttr::ConstantValue(idx) => Some(*idx),
            FieldAttr::Unknown { .. } => None,
        })
    }
}
