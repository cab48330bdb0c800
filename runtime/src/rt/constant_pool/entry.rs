use crate::Symbol;
use crate::heap::ObjSlot;
use once_cell::sync::OnceCell;

pub struct Utf8Entry {
    pub value: String,
    pub utf8_sym: OnceCell<Symbol>,
}

impl Utf8Entry {
    pub fn new(value: String) -> Self {
        Self {
            value,
            utf8_sym: OnceCell::new(),
        }
    }
}

pub struct ClassEntry {
    pub name_idx: u16,
    pub name_sym: OnceCell<Symbol>,
    /// The resolved `java/lang/Class` mirror, traced by the collector.
    pub mirror: ObjSlot,
}

impl ClassEntry {
    pub fn new(name_idx: u16) -> Self {
        Self {
            name_idx,
            name_sym: OnceCell::new(),
            mirror: ObjSlot::new(),
        }
    }
}

pub struct StringEntry {
    pub string_idx: u16,
    pub string_sym: OnceCell<Symbol>,
    /// The interned `java/lang/String` instance, traced by the collector.
    pub interned: ObjSlot,
}

impl StringEntry {
    pub fn new(string_idx: u16) -> Self {
        Self {
            string_idx,
            string_sym: OnceCell::new(),
            interned: ObjSlot::new(),
        }
    }
}

/// Field, method and interface-method references share this shape.
pub struct MemberEntry {
    pub class_idx: u16,
    pub nat_idx: u16,
    pub class_sym: OnceCell<Symbol>,
}

impl MemberEntry {
    pub fn new(class_idx: u16, nat_idx: u16) -> Self {
        Self {
            class_idx,
            nat_idx,
            class_sym: OnceCell::new(),
        }
    }
}

pub struct NameAndTypeEntry {
    pub name_idx: u16,
    pub descriptor_idx: u16,
    pub name_sym: OnceCell<Symbol>,
    pub descriptor_sym: OnceCell<Symbol>,
}

impl NameAndTypeEntry {
    pub fn new(name_idx: u16, descriptor_idx: u16) -> Self {
        Self {
            name_idx,
            descriptor_idx,
            name_sym: OnceCell::new(),
            descriptor_sym: OnceCell::new(),
        }
    }
}

pub struct MethodTypeEntry {
    pub descriptor_idx: u16,
    pub descriptor_sym: OnceCell<Symbol>,
    /// The resolved `java/lang/invoke/MethodType`, traced by the collector.
    pub resolved_mt: ObjSlot,
}

impl MethodTypeEntry {
    pub fn new(descriptor_idx: u16) -> Self {
        Self {
            descriptor_idx,
            descriptor_sym: OnceCell::new(),
            resolved_mt: ObjSlot::new(),
        }
    }
}

pub struct MethodHandleEntry {
    pub kind: MethodHandleType,
    /// The resolved `MethodType` of the handle, traced by the collector.
    pub resolved_mt: ObjSlot,
}

pub enum MethodHandleType {
    GetField(u16),
    GetStatic(u16),
    PutField(u16),
    PutStatic(u16),
    InvokeVirtual(u16),
    InvokeStatic(u16),
    InvokeSpecial(u16),
    NewInvokeSpecial(u16),
    InvokeInterface(u16),
}

pub struct InvokeDynamicEntry {
    pub bootstrap_idx: u16,
    pub nat_idx: u16,
    /// The resolved call-site `MethodType`, traced by the collector.
    pub resolved_mt: ObjSlot,
}

impl InvokeDynamicEntry {
    pub fn new(bootstrap_idx: u16, nat_idx: u16) -> Self {
        Self {
            bootstrap_idx,
            nat_idx,
            resolved_mt: ObjSlot::new(),
        }
    }
}

// Resolved views.

#[derive(Debug, Clone, Copy)]
pub struct NameAndTypeEntryView {
    pub name: Symbol,
    pub desc: Symbol,
}

impl NameAndTypeEntryView {
    pub fn new(name: Symbol, desc: Symbol) -> Self {
        Self { name, desc }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemberEntryView {
    pub class_sym: Symbol,
    pub nat: NameAndTypeEntryView,
}

impl MemberEntryView {
    pub fn new(class_sym: Symbol, nat: NameAndTypeEntryView) -> Self {
        Self { class_sym, nat }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MethodHandleEntryView {
    GetField(MemberEntryView),
    GetStatic(MemberEntryView),
    PutField(MemberEntryView),
    PutStatic(MemberEntryView),
    InvokeVirtual(MemberEntryView),
    InvokeStatic(MemberEntryView),
    InvokeSpecial(MemberEntryView),
    NewInvokeSpecial(MemberEntryView),
    InvokeInterface(MemberEntryView),
}

#[derive(Debug, Clone)]
pub struct InvokeDynamicEntryView {
    pub bootstrap_method: MethodHandleEntryView,
    pub bootstrap_arguments: Vec<u16>,
    pub nat: NameAndTypeEntryView,
}

impl InvokeDynamicEntryView {
    pub fn new(
        bootstrap_method: MethodHandleEntryView,
        bootstrap_arguments: Vec<u16>,
        nat: NameAndTypeEntryView,
    ) -> Self {
        Self {
            bootstrap_method,
            bootstrap_arguments,
            nat,
        }
    }
}
