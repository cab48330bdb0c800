use crate::error::JvmError;
use crate::heap::ObjSlot;
use crate::rt::constant_pool::entry::{
    ClassEntry, InvokeDynamicEntry, InvokeDynamicEntryView, MemberEntry, MemberEntryView,
    MethodHandleEntry, MethodHandleEntryView, MethodHandleType, MethodTypeEntry, NameAndTypeEntry,
    NameAndTypeEntryView, StringEntry, Utf8Entry,
};
use crate::{Symbol, build_exception, throw_exception};
use lasso::ThreadedRodeo;
use skadi_classfile::attribute::class::BootstrapMethodEntry;
use skadi_classfile::constant::ConstantInfo;
use std::fmt::Display;

pub mod entry;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RuntimeConstantType {
    Unused,
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    Method,
    Field,
    InterfaceMethod,
    NameAndType,
    MethodType,
    MethodHandle,
    InvokeDynamic,
}

impl Display for RuntimeConstantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_str = match self {
            RuntimeConstantType::Unused => "Unused",
            RuntimeConstantType::Utf8 => "Utf8",
            RuntimeConstantType::Integer => "Integer",
            RuntimeConstantType::Float => "Float",
            RuntimeConstantType::Long => "Long",
            RuntimeConstantType::Double => "Double",
            RuntimeConstantType::Class => "Class",
            RuntimeConstantType::String => "String",
            RuntimeConstantType::Method => "Method",
            RuntimeConstantType::Field => "Field",
            RuntimeConstantType::InterfaceMethod => "InterfaceMethod",
            RuntimeConstantType::NameAndType => "NameAndType",
            RuntimeConstantType::MethodType => "MethodType",
            RuntimeConstantType::MethodHandle => "MethodHandle",
            RuntimeConstantType::InvokeDynamic => "InvokeDynamic",
        };
        write!(f, "{}", type_str)
    }
}

pub enum RuntimeConstant {
    Unused,
    Utf8(Utf8Entry),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassEntry),
    String(StringEntry),
    Method(MemberEntry),
    Field(MemberEntry),
    InterfaceMethod(MemberEntry),
    NameAndType(NameAndTypeEntry),
    MethodType(MethodTypeEntry),
    MethodHandle(MethodHandleEntry),
    InvokeDynamic(InvokeDynamicEntry),
}

impl RuntimeConstant {
    pub fn get_type(&self) -> RuntimeConstantType {
        match self {
            RuntimeConstant::Unused => RuntimeConstantType::Unused,
            RuntimeConstant::Utf8(_) => RuntimeConstantType::Utf8,
            RuntimeConstant::Integer(_) => RuntimeConstantType::Integer,
            RuntimeConstant::Float(_) => RuntimeConstantType::Float,
            RuntimeConstant::Long(_) => RuntimeConstantType::Long,
            RuntimeConstant::Double(_) => RuntimeConstantType::Double,
            RuntimeConstant::Class(_) => RuntimeConstantType::Class,
            RuntimeConstant::String(_) => RuntimeConstantType::String,
            RuntimeConstant::Method(_) => RuntimeConstantType::Method,
            RuntimeConstant::Field(_) => RuntimeConstantType::Field,
            RuntimeConstant::InterfaceMethod(_) => RuntimeConstantType::InterfaceMethod,
            RuntimeConstant::NameAndType(_) => RuntimeConstantType::NameAndType,
            RuntimeConstant::MethodType(_) => RuntimeConstantType::MethodType,
            RuntimeConstant::MethodHandle(_) => RuntimeConstantType::MethodHandle,
            RuntimeConstant::InvokeDynamic(_) => RuntimeConstantType::InvokeDynamic,
        }
    }
}

/// The linked form of a class's constant pool. Raw entries keep their weak
/// back-indices; symbol resolution happens lazily and is cached in
/// `OnceCell`s, resolved VM objects are cached in traced `ObjSlot`s.
pub struct RuntimeConstantPool {
    entries: Vec<RuntimeConstant>,
    bootstrap_entries: Vec<BootstrapMethodEntry>,
}

impl RuntimeConstantPool {
    pub fn new(raw: Vec<ConstantInfo>, bootstrap_methods: Vec<BootstrapMethodEntry>) -> Self {
        let mut entries = Vec::with_capacity(raw.len());
        for info in raw {
            let entry = match info {
                ConstantInfo::Unused => RuntimeConstant::Unused,
                ConstantInfo::Utf8(value) => RuntimeConstant::Utf8(Utf8Entry::new(value)),
                ConstantInfo::Integer(v) => RuntimeConstant::Integer(v),
                ConstantInfo::Float(v) => RuntimeConstant::Float(v),
                ConstantInfo::Long(v) => RuntimeConstant::Long(v),
                ConstantInfo::Double(v) => RuntimeConstant::Double(v),
                ConstantInfo::Class { name_index } => {
                    RuntimeConstant::Class(ClassEntry::new(name_index))
                }
                ConstantInfo::String { string_index } => {
                    RuntimeConstant::String(StringEntry::new(string_index))
                }
                ConstantInfo::MethodRef(info) => RuntimeConstant::Method(MemberEntry::new(
                    info.class_index,
                    info.name_and_type_index,
                )),
                ConstantInfo::FieldRef(info) => RuntimeConstant::Field(MemberEntry::new(
                    info.class_index,
                    info.name_and_type_index,
                )),
                ConstantInfo::InterfaceMethodRef(info) => RuntimeConstant::InterfaceMethod(
                    MemberEntry::new(info.class_index, info.name_and_type_index),
                ),
                ConstantInfo::NameAndType {
                    name_index,
                    descriptor_index,
                } => RuntimeConstant::NameAndType(NameAndTypeEntry::new(
                    name_index,
                    descriptor_index,
                )),
                ConstantInfo::MethodType { descriptor_index } => {
                    RuntimeConstant::MethodType(MethodTypeEntry::new(descriptor_index))
                }
                ConstantInfo::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    // Kinds outside 1..=9 were rejected by the parser's
                    // link check.
                    let kind = match reference_kind {
                        1 => MethodHandleType::GetField(reference_index),
                        2 => MethodHandleType::GetStatic(reference_index),
                        3 => MethodHandleType::PutField(reference_index),
                        4 => MethodHandleType::PutStatic(reference_index),
                        5 => MethodHandleType::InvokeVirtual(reference_index),
                        6 => MethodHandleType::InvokeStatic(reference_index),
                        7 => MethodHandleType::InvokeSpecial(reference_index),
                        8 => MethodHandleType::NewInvokeSpecial(reference_index),
                        _ => MethodHandleType::InvokeInterface(reference_index),
                    };
                    RuntimeConstant::MethodHandle(MethodHandleEntry {
                        kind,
                        resolved_mt: ObjSlot::new(),
                    })
                }
                ConstantInfo::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => RuntimeConstant::InvokeDynamic(InvokeDynamicEntry::new(
                    bootstrap_method_attr_index,
                    name_and_type_index,
                )),
            };
            entries.push(entry);
        }
        Self {
            entries,
            bootstrap_entries: bootstrap_methods,
        }
    }

    pub fn len(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entry(&self, idx: &u16) -> Result<&RuntimeConstant, JvmError> {
        self.entries
            .get(*idx as usize)
            .filter(|e| !matches!(e, RuntimeConstant::Unused))
            .ok_or(build_exception!(
                IncompatibleClassChangeError,
                "invalid constant pool index {}",
                idx
            ))
    }

    pub fn kind_at(&self, idx: &u16) -> Result<RuntimeConstantType, JvmError> {
        Ok(self.entry(idx)?.get_type())
    }

    fn bootstrap_entry(&self, idx: &u16) -> Result<&BootstrapMethodEntry, JvmError> {
        self.bootstrap_entries
            .get(*idx as usize)
            .ok_or(build_exception!(
                IncompatibleClassChangeError,
                "invalid bootstrap methods index {}",
                idx
            ))
    }

    pub fn get_utf8_sym(&self, idx: &u16, interner: &ThreadedRodeo) -> Result<Symbol, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::Utf8(entry) => Ok(*entry
                .utf8_sym
                .get_or_init(|| interner.get_or_intern(&entry.value))),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::Utf8,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_class_sym(&self, idx: &u16, interner: &ThreadedRodeo) -> Result<Symbol, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::Class(entry) => entry
                .name_sym
                .get_or_try_init(|| self.get_utf8_sym(&entry.name_idx, interner))
                .copied(),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::Class,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_string_sym(&self, idx: &u16, interner: &ThreadedRodeo) -> Result<Symbol, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::String(entry) => entry
                .string_sym
                .get_or_try_init(|| self.get_utf8_sym(&entry.string_idx, interner))
                .copied(),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::String,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_nat_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<NameAndTypeEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::NameAndType(entry) => {
                let name_sym = *entry
                    .name_sym
                    .get_or_try_init(|| self.get_utf8_sym(&entry.name_idx, interner))?;
                let descriptor_sym = *entry
                    .descriptor_sym
                    .get_or_try_init(|| self.get_utf8_sym(&entry.descriptor_idx, interner))?;
                Ok(NameAndTypeEntryView::new(name_sym, descriptor_sym))
            }
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::NameAndType,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_method_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::Method(entry) => self.member_view(entry, interner),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::Method,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_interface_method_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::InterfaceMethod(entry) => self.member_view(entry, interner),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::InterfaceMethod,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_method_or_interface_method_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::Method(entry) | RuntimeConstant::InterfaceMethod(entry) => {
                self.member_view(entry, interner)
            }
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::Method,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_field_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<MemberEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::Field(entry) => self.member_view(entry, interner),
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::Field,
                idx,
                other.get_type()
            ),
        }
    }

    fn member_view(
        &self,
        entry: &MemberEntry,
        interner: &ThreadedRodeo,
    ) -> Result<MemberEntryView, JvmError> {
        let class_sym = *entry
            .class_sym
            .get_or_try_init(|| self.get_class_sym(&entry.class_idx, interner))?;
        let nat = self.get_nat_view(&entry.nat_idx, interner)?;
        Ok(MemberEntryView::new(class_sym, nat))
    }

    pub fn get_method_handle_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<MethodHandleEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::MethodHandle(entry) => {
                let view = match &entry.kind {
                    MethodHandleType::GetField(i) => {
                        MethodHandleEntryView::GetField(self.get_field_view(i, interner)?)
                    }
                    MethodHandleType::GetStatic(i) => {
                        MethodHandleEntryView::GetStatic(self.get_field_view(i, interner)?)
                    }
                    MethodHandleType::PutField(i) => {
                        MethodHandleEntryView::PutField(self.get_field_view(i, interner)?)
                    }
                    MethodHandleType::PutStatic(i) => {
                        MethodHandleEntryView::PutStatic(self.get_field_view(i, interner)?)
                    }
                    MethodHandleType::InvokeVirtual(i) => {
                        MethodHandleEntryView::InvokeVirtual(self.get_method_view(i, interner)?)
                    }
                    MethodHandleType::InvokeStatic(i) => {
                        MethodHandleEntryView::InvokeStatic(self.get_method_view(i, interner)?)
                    }
                    MethodHandleType::InvokeSpecial(i) => {
                        MethodHandleEntryView::InvokeSpecial(self.get_method_view(i, interner)?)
                    }
                    MethodHandleType::NewInvokeSpecial(i) => {
                        MethodHandleEntryView::NewInvokeSpecial(self.get_method_view(i, interner)?)
                    }
                    MethodHandleType::InvokeInterface(i) => MethodHandleEntryView::InvokeInterface(
                        self.get_interface_method_view(i, interner)?,
                    ),
                };
                Ok(view)
            }
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::MethodHandle,
                idx,
                other.get_type()
            ),
        }
    }

    pub fn get_invoke_dynamic_view(
        &self,
        idx: &u16,
        interner: &ThreadedRodeo,
    ) -> Result<InvokeDynamicEntryView, JvmError> {
        match self.entry(idx)? {
            RuntimeConstant::InvokeDynamic(entry) => {
                let bootstrap_entry = self.bootstrap_entry(&entry.bootstrap_idx)?;
                let bootstrap_method =
                    self.get_method_handle_view(&bootstrap_entry.bootstrap_method_idx, interner)?;
                let nat = self.get_nat_view(&entry.nat_idx, interner)?;
                Ok(InvokeDynamicEntryView::new(
                    bootstrap_method,
                    bootstrap_entry.bootstrap_arguments.clone(),
                    nat,
                ))
            }
            other => throw_exception!(
                IncompatibleClassChangeError,
                "expected {} at pool index {}, found {}",
                RuntimeConstantType::InvokeDynamic,
                idx,
                other.get_type()
            ),
        }
    }

    /// Visits every cached VM object slot in the pool, for the collector's
    /// root enumeration.
    pub(crate) fn for_each_obj_slot(&self, f: &mut impl FnMut(&ObjSlot)) {
        for entry in &self.entries {
            match entry {
                RuntimeConstant::Class(e) => f(&e.mirror),
                RuntimeConstant::String(e) => f(&e.interned),
                RuntimeConstant::MethodType(e) => f(&e.resolved_mt),
                RuntimeConstant::MethodHandle(e) => f(&e.resolved_mt),
                RuntimeConstant::InvokeDynamic(e) => f(&e.resolved_mt),
                _ => {}
            }
        }
    }
}
