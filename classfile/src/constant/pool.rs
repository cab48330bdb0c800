use crate::constant::{ConstantInfo, RefInfo};
use crate::error::ClassFormatError;
use skadi_common::cursor::Cursor;
use skadi_common::descriptor::{MethodDescriptor, parse_field_descriptor};

// Tag bytes as they appear on disk.
const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_INVOKE_DYNAMIC: u8 = 18;

/// The constant pool, indexed from 1. Entry 0 and the slot after each
/// `Long`/`Double` are `Unused`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    pub inner: Vec<ConstantInfo>,
}

impl ConstantPool {
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ClassFormatError> {
        let count = cursor.read_u16()? as usize;
        let mut inner = Vec::with_capacity(count.max(1));
        inner.push(ConstantInfo::Unused);

        while inner.len() < count {
            let index = inner.len() as u16;
            let tag = cursor.read_u8()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = cursor.read_u16()? as usize;
                    let bytes = cursor.take(len)?;
                    let decoded = decode_mutf8(bytes)
                        .ok_or(ClassFormatError::BadUtf8 { index })?;
                    ConstantInfo::Utf8(decoded)
                }
                TAG_INTEGER => ConstantInfo::Integer(cursor.read_i32()?),
                TAG_FLOAT => ConstantInfo::Float(cursor.read_f32()?),
                TAG_LONG => ConstantInfo::Long(cursor.read_u64()? as i64),
                TAG_DOUBLE => ConstantInfo::Double(cursor.read_f64()?),
                TAG_CLASS => ConstantInfo::Class {
                    name_index: cursor.read_u16()?,
                },
                TAG_STRING => ConstantInfo::String {
                    string_index: cursor.read_u16()?,
                },
                TAG_FIELD_REF => ConstantInfo::FieldRef(read_ref(cursor)?),
                TAG_METHOD_REF => ConstantInfo::MethodRef(read_ref(cursor)?),
                TAG_INTERFACE_METHOD_REF => ConstantInfo::InterfaceMethodRef(read_ref(cursor)?),
                TAG_NAME_AND_TYPE => ConstantInfo::NameAndType {
                    name_index: cursor.read_u16()?,
                    descriptor_index: cursor.read_u16()?,
                },
                TAG_METHOD_HANDLE => ConstantInfo::MethodHandle {
                    reference_kind: cursor.read_u8()?,
                    reference_index: cursor.read_u16()?,
                },
                TAG_METHOD_TYPE => ConstantInfo::MethodType {
                    descriptor_index: cursor.read_u16()?,
                },
                TAG_INVOKE_DYNAMIC => ConstantInfo::InvokeDynamic {
                    bootstrap_method_attr_index: cursor.read_u16()?,
                    name_and_type_index: cursor.read_u16()?,
                },
                tag => return Err(ClassFormatError::BadConstantTag { tag, index }),
            };
            let two_slots = matches!(entry, ConstantInfo::Long(_) | ConstantInfo::Double(_));
            inner.push(entry);
            if two_slots {
                if inner.len() >= count {
                    return Err(ClassFormatError::BadPoolIndex { index });
                }
                inner.push(ConstantInfo::Unused);
            }
        }

        Ok(ConstantPool { inner })
    }

    pub fn len(&self) -> u16 {
        self.inner.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() <= 1
    }

    pub fn entry(&self, index: u16) -> Result<&ConstantInfo, ClassFormatError> {
        match self.inner.get(index as usize) {
            Some(ConstantInfo::Unused) | None => Err(ClassFormatError::BadPoolIndex { index }),
            Some(entry) => Ok(entry),
        }
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index)? {
            ConstantInfo::Utf8(s) => Ok(s),
            _ => Err(ClassFormatError::WrongPoolKind {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn get_class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index)? {
            ConstantInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFormatError::WrongPoolKind {
                index,
                expected: "Class",
            }),
        }
    }

    fn check_name_and_type(&self, index: u16, field: bool) -> Result<(), ClassFormatError> {
        match self.entry(index)? {
            ConstantInfo::NameAndType {
                name_index,
                descriptor_index,
            } => {
                self.get_utf8(*name_index)?;
                let descriptor = self.get_utf8(*descriptor_index)?;
                let result = if field {
                    let mut pos = 0;
                    parse_field_descriptor(descriptor, &mut pos).map(|_| ()).and_then(|()| {
                        if pos == descriptor.len() {
                            Ok(())
                        } else {
                            Err(skadi_common::descriptor::DescriptorError::TrailingBytes { at: pos })
                        }
                    })
                } else {
                    MethodDescriptor::try_from(descriptor).map(|_| ())
                };
                result.map_err(|error| ClassFormatError::BadDescriptor {
                    index: *descriptor_index,
                    error,
                })
            }
            _ => Err(ClassFormatError::WrongPoolKind {
                index,
                expected: "NameAndType",
            }),
        }
    }

    fn check_ref(&self, info: &RefInfo, field: bool) -> Result<(), ClassFormatError> {
        self.get_class_name(info.class_index)?;
        self.check_name_and_type(info.name_and_type_index, field)
    }

    /// Second pass over the parsed pool: every symbolic back-index must land
    /// on an entry of the right kind, and every descriptor must parse. After
    /// this runs, downstream code can follow indices without re-checking.
    /// `InvokeDynamic` bootstrap indices are validated later, once the
    /// `BootstrapMethods` attribute has been seen.
    pub(crate) fn link_check(&self) -> Result<(), ClassFormatError> {
        for (i, entry) in self.inner.iter().enumerate() {
            let index = i as u16;
            match entry {
                ConstantInfo::Class { name_index } => {
                    self.get_utf8(*name_index)?;
                }
                ConstantInfo::String { string_index } => {
                    self.get_utf8(*string_index)?;
                }
                ConstantInfo::FieldRef(info) => self.check_ref(info, true)?,
                ConstantInfo::MethodRef(info) | ConstantInfo::InterfaceMethodRef(info) => {
                    self.check_ref(info, false)?
                }
                ConstantInfo::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    self.get_utf8(*name_index)?;
                    self.get_utf8(*descriptor_index)?;
                }
                ConstantInfo::MethodHandle {
                    reference_kind,
                    reference_index,
                } => match reference_kind {
                    1..=4 => match self.entry(*reference_index)? {
                        ConstantInfo::FieldRef(info) => self.check_ref(info, true)?,
                        _ => {
                            return Err(ClassFormatError::WrongPoolKind {
                                index: *reference_index,
                                expected: "FieldRef",
                            });
                        }
                    },
                    5 | 8 => match self.entry(*reference_index)? {
                        ConstantInfo::MethodRef(info) => self.check_ref(info, false)?,
                        _ => {
                            return Err(ClassFormatError::WrongPoolKind {
                                index: *reference_index,
                                expected: "MethodRef",
                            });
                        }
                    },
                    // invokeStatic/invokeSpecial handles may name interface
                    // methods from class file version 52 on.
                    6 | 7 => match self.entry(*reference_index)? {
                        ConstantInfo::MethodRef(info)
                        | ConstantInfo::InterfaceMethodRef(info) => {
                            self.check_ref(info, false)?
                        }
                        _ => {
                            return Err(ClassFormatError::WrongPoolKind {
                                index: *reference_index,
                                expected: "MethodRef",
                            });
                        }
                    },
                    9 => match self.entry(*reference_index)? {
                        ConstantInfo::InterfaceMethodRef(info) => self.check_ref(info, false)?,
                        _ => {
                            return Err(ClassFormatError::WrongPoolKind {
                                index: *reference_index,
                                expected: "InterfaceMethodRef",
                            });
                        }
                    },
                    kind => {
                        return Err(ClassFormatError::BadMethodHandleKind { kind: *kind, index });
                    }
                },
                ConstantInfo::MethodType { descriptor_index } => {
                    let descriptor = self.get_utf8(*descriptor_index)?;
                    MethodDescriptor::try_from(descriptor).map_err(|error| {
                        ClassFormatError::BadDescriptor {
                            index: *descriptor_index,
                            error,
                        }
                    })?;
                }
                ConstantInfo::InvokeDynamic {
                    name_and_type_index,
                    ..
                } => {
                    self.check_name_and_type(*name_and_type_index, false)?;
                }
                ConstantInfo::Unused
                | ConstantInfo::Utf8(_)
                | ConstantInfo::Integer(_)
                | ConstantInfo::Float(_)
                | ConstantInfo::Long(_)
                | ConstantInfo::Double(_) => {}
            }
        }
        Ok(())
    }
}

fn read_ref(cursor: &mut Cursor<'_>) -> Result<RefInfo, ClassFormatError> {
    Ok(RefInfo {
        class_index: cursor.read_u16()?,
        name_and_type_index: cursor.read_u16()?,
    })
}

/// Modified UTF-8 as used by class files: no embedded NUL bytes, no four-byte
/// sequences; supplementary characters arrive as surrogate pairs and are
/// recombined by the UTF-16 conversion.
fn decode_mutf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0 || b >= 0xf0 {
            return None;
        }
        if b < 0x80 {
            units.push(b as u16);
            i += 1;
        } else if b < 0xe0 {
            if b < 0xc0 {
                return None;
            }
            let b2 = *bytes.get(i + 1)?;
            if b2 & 0xc0 != 0x80 {
                return None;
            }
            units.push(((b as u16 & 0x1f) << 6) | (b2 as u16 & 0x3f));
            i += 2;
        } else {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            if b2 & 0xc0 != 0x80 || b3 & 0xc0 != 0x80 {
                return None;
            }
            units.push(((b as u16 & 0x0f) << 12) | ((b2 as u16 & 0x3f) << 6) | (b3 as u16 & 0x3f));
            i += 3;
        }
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutf8_rejects_nul_and_four_byte_forms() {
        assert_eq!(decode_mutf8(b"plain"), Some("plain".to_string()));
        assert_eq!(decode_mutf8(&[0x00]), None);
        assert_eq!(decode_mutf8(&[0xf0, 0x9f, 0x92, 0xa9]), None);
        // NUL is encoded as C0 80 in modified UTF-8.
        assert_eq!(decode_mutf8(&[0xc0, 0x80]), Some("\0".to_string()));
    }

    #[test]
    fn long_occupies_two_slots() {
        // count=4: one Long (2 slots) and one Utf8.
        let mut bytes = vec![0x00, 0x04];
        bytes.push(TAG_LONG);
        bytes.extend_from_slice(&0x0102030405060708u64.to_be_bytes());
        bytes.push(TAG_UTF8);
        bytes.extend_from_slice(&[0x00, 0x01, b'a']);

        let pool = ConstantPool::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(pool.inner.len(), 4);
        assert_eq!(pool.inner[1], ConstantInfo::Long(0x0102030405060708));
        assert_eq!(pool.inner[2], ConstantInfo::Unused);
        assert_eq!(pool.get_utf8(3).unwrap(), "a");
        // The shadow slot is not addressable.
        assert!(pool.entry(2).is_err());
    }
}
