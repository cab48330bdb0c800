//! Byte-exact class-file decoding.
//!
//! `ClassFile::parse` walks the on-disk layout in order — magic, versions,
//! constant pool, flags, this/super, interfaces, fields, methods, class
//! attributes — with every read bounds-checked; any overrun or structural
//! inconsistency surfaces as a `ClassFormatError` value.

use crate::attribute::class::{BootstrapMethodEntry, ClassAttr};
use crate::attribute::method::code::{CodeAttributeInfo, LineNumberEntry};
use crate::attribute::method::{CodeAttribute, ExceptionTableEntry, MethodAttribute};
use crate::constant::ConstantInfo;
use crate::constant::pool::ConstantPool;
use crate::error::ClassFormatError;
use crate::field::{FieldAttr, FieldInfo};
use crate::flags::{ClassFlags, FieldFlags, MethodFlags};
use crate::method::MethodInfo;
use skadi_common::cursor::Cursor;

pub mod attribute;
pub mod constant;
pub mod error;
pub mod field;
pub mod flags;
pub mod method;

pub const CLASS_FILE_MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub cp: ConstantPool,
    pub access_flags: ClassFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<ClassAttr>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32()?;
        if magic != CLASS_FILE_MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = cursor.read_u16()?;
        let major_version = cursor.read_u16()?;

        let cp = ConstantPool::parse(&mut cursor)?;

        let access_flags = ClassFlags::from_bits_retain(cursor.read_u16()?);
        let this_class = cursor.read_u16()?;
        let super_class = cursor.read_u16()?;

        let interface_count = cursor.read_u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(cursor.read_u16()?);
        }

        let field_count = cursor.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(parse_field(&mut cursor, &cp)?);
        }

        let method_count = cursor.read_u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(parse_method(&mut cursor, &cp)?);
        }

        let attr_count = cursor.read_u16()?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            attributes.push(parse_class_attr(&mut cursor, &cp)?);
        }

        if !cursor.is_empty() {
            return Err(ClassFormatError::TrailingBytes {
                at: cursor.position(),
            });
        }

        // Second pass: resolve-and-check every symbolic back-index now that
        // the whole pool is in memory.
        cp.link_check()?;
        cp.get_class_name(this_class)?;
        if super_class != 0 {
            cp.get_class_name(super_class)?;
        }
        for interface in &interfaces {
            cp.get_class_name(*interface)?;
        }

        let class_file = ClassFile {
            minor_version,
            major_version,
            cp,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class_file.check_bootstrap_indices()?;
        Ok(class_file)
    }

    pub fn class_name(&self) -> Result<&str, ClassFormatError> {
        self.cp.get_class_name(self.this_class)
    }

    /// `None` only for the primordial object class.
    pub fn super_class_name(&self) -> Result<Option<&str>, ClassFormatError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.cp.get_class_name(self.super_class).map(Some)
    }

    pub fn bootstrap_methods(&self) -> &[BootstrapMethodEntry] {
        self.attributes
            .iter()
            .find_map(|attr| match attr {
                ClassAttr::BootstrapMethods(entries) => Some(entries.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// `InvokeDynamic` entries name a slot of the `BootstrapMethods`
    /// attribute; that check has to wait until the attribute has been parsed.
    fn check_bootstrap_indices(&self) -> Result<(), ClassFormatError> {
        let bootstrap = self.bootstrap_methods();
        for (i, entry) in self.cp.inner.iter().enumerate() {
            if let ConstantInfo::InvokeDynamic {
                bootstrap_method_attr_index,
                ..
            } = entry
                && *bootstrap_method_attr_index as usize >= bootstrap.len()
            {
                return Err(ClassFormatError::MissingBootstrapMethod {
                    index: i as u16,
                    referenced: *bootstrap_method_attr_index,
                });
            }
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for ClassFile {
    type Error = ClassFormatError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        ClassFile::parse(bytes)
    }
}

struct RawAttr<'a> {
    name_index: u16,
    name: &'a str,
    data: &'a [u8],
}

fn read_raw_attr<'a>(
    cursor: &mut Cursor<'a>,
    cp: &'a ConstantPool,
) -> Result<RawAttr<'a>, ClassFormatError> {
    let name_index = cursor.read_u16()?;
    let length = cursor.read_u32()? as usize;
    let data = cursor.take(length)?;
    Ok(RawAttr {
        name_index,
        name: cp.get_utf8(name_index)?,
        data,
    })
}

fn parse_field<'a>(cursor: &mut Cursor<'a>, cp: &'a ConstantPool) -> Result<FieldInfo, ClassFormatError> {
    let access_flags = FieldFlags::from_bits_retain(cursor.read_u16()?);
    let name_index = cursor.read_u16()?;
    let descriptor_index = cursor.read_u16()?;
    let attr_count = cursor.read_u16()?;
    let mut attributes = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        let raw = read_raw_attr(cursor, cp)?;
        let attr = match raw.name {
            "ConstantValue" => {
                let mut sub = Cursor::new(raw.data);
                FieldAttr::ConstantValue(sub.read_u16()?)
            }
            _ => FieldAttr::Unknown {
                name_index: raw.name_index,
                data: raw.data.to_vec(),
            },
        };
        attributes.push(attr);
    }
    Ok(FieldInfo {
        access_flags,
        name_index,
        descriptor_index,
        attributes,
    })
}

fn parse_method<'a>(
    cursor: &mut Cursor<'a>,
    cp: &'a ConstantPool,
) -> Result<MethodInfo, ClassFormatError> {
    let access_flags = MethodFlags::from_bits_retain(cursor.read_u16()?);
    let name_index = cursor.read_u16()?;
    let descriptor_index = cursor.read_u16()?;
    let attr_count = cursor.read_u16()?;
    let mut attributes = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        let raw = read_raw_attr(cursor, cp)?;
        let attr = match raw.name {
            "Code" => MethodAttribute::Code(parse_code_attr(raw.data, cp)?),
            "Exceptions" => {
                let mut sub = Cursor::new(raw.data);
                let count = sub.read_u16()?;
                let mut thrown = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    thrown.push(sub.read_u16()?);
                }
                MethodAttribute::Exceptions(thrown)
            }
            _ => MethodAttribute::Unknown {
                name_index: raw.name_index,
                data: raw.data.to_vec(),
            },
        };
        attributes.push(attr);
    }
    Ok(MethodInfo {
        access_flags,
        name_index,
        descriptor_index,
        attributes,
    })
}

fn parse_code_attr(data: &[u8], cp: &ConstantPool) -> Result<CodeAttribute, ClassFormatError> {
    let mut cursor = Cursor::new(data);
    let max_stack = cursor.read_u16()?;
    let max_locals = cursor.read_u16()?;
    let code_length = cursor.read_u32()? as usize;
    let code = cursor.take(code_length)?.to_vec();

    let exception_count = cursor.read_u16()?;
    let mut exception_table = Vec::with_capacity(exception_count as usize);
    for _ in 0..exception_count {
        exception_table.push(ExceptionTableEntry {
            start_pc: cursor.read_u16()?,
            end_pc: cursor.read_u16()?,
            handler_pc: cursor.read_u16()?,
            catch_type: cursor.read_u16()?,
        });
    }

    let attr_count = cursor.read_u16()?;
    let mut attributes = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        let raw = read_raw_attr(&mut cursor, cp)?;
        let attr = match raw.name {
            "LineNumberTable" => {
                let mut sub = Cursor::new(raw.data);
                let count = sub.read_u16()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(LineNumberEntry {
                        start_pc: sub.read_u16()?,
                        line_number: sub.read_u16()?,
                    });
                }
                CodeAttributeInfo::LineNumberTable(entries)
            }
            _ => CodeAttributeInfo::Unknown {
                name_index: raw.name_index,
                data: raw.data.to_vec(),
            },
        };
        attributes.push(attr);
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}

fn parse_class_attr<'a>(
    cursor: &mut Cursor<'a>,
    cp: &'a ConstantPool,
) -> Result<ClassAttr, ClassFormatError> {
    let raw = read_raw_attr(cursor, cp)?;
    let attr = match raw.name {
        "SourceFile" => {
            let mut sub = Cursor::new(raw.data);
            ClassAttr::SourceFile(sub.read_u16()?)
        }
        "BootstrapMethods" => {
            let mut sub = Cursor::new(raw.data);
            let count = sub.read_u16()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let bootstrap_method_idx = sub.read_u16()?;
                let arg_count = sub.read_u16()?;
                let mut bootstrap_arguments = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    bootstrap_arguments.push(sub.read_u16()?);
                }
                entries.push(BootstrapMethodEntry {
                    bootstrap_method_idx,
                    bootstrap_arguments,
                });
            }
            ClassAttr::BootstrapMethods(entries)
        }
        _ => ClassAttr::Unknown {
            name_index: raw.name_index,
            data: raw.data.to_vec(),
        },
    };
    Ok(attr)
}
