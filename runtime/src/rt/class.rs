use crate::error::JvmError;
use crate::heap::Heap;
use crate::heap::method_area::MethodArea;
use crate::keys::{ClassId, FieldKey, MethodKey};
use crate::rt::constant_pool::{RuntimeConstant, RuntimeConstantPool};
use crate::rt::field::{InstanceField, StaticField};
use crate::rt::method::Method;
use crate::rt::{BaseClass, ClassLike, JvmClass};
use crate::vm::Value;
use crate::{MethodId, build_exception, throw_exception};
use once_cell::sync::OnceCell;
use skadi_classfile::ClassFile;
use skadi_classfile::attribute::class::ClassAttr;
use skadi_classfile::constant::pool::ConstantPool;
use skadi_classfile::field::FieldInfo;
use skadi_classfile::flags::ClassFlags;
use skadi_classfile::method::MethodInfo;
use skadi_common::bitset::CompressedBitSet;
use skadi_common::jtype::AllocationType;
use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet};

/// Packed storage for a class's static fields. Reference slots are 8-byte
/// aligned words selected by the `refs` bitset (indexed by word offset), so
/// the collector can walk and rewrite them without reflection.
pub struct StaticArea {
    data: UnsafeCell<Box<[u8]>>,
    refs: CompressedBitSet,
}

// Safety: writes go through `putstatic` in the owning thread during class
// initialisation, and through the collector while the world is stopped.
unsafe impl Send for StaticArea {}
unsafe impl Sync for StaticArea {}

impl StaticArea {
    fn new(size: usize, refs: CompressedBitSet) -> Self {
        StaticArea {
            data: UnsafeCell::new(vec![0u8; size.next_multiple_of(8)].into_boxed_slice()),
            refs,
        }
    }

    pub fn size(&self) -> usize {
        unsafe { &*self.data.get() }.len()
    }

    pub fn refs(&self) -> &CompressedBitSet {
        &self.refs
    }

    fn slot_ptr(&self, offset: usize) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr().add(offset) }
    }

    pub(crate) fn ref_word_ptr(&self, word: usize) -> *mut usize {
        self.slot_ptr(word * 8) as *mut usize
    }

    pub fn read(&self, offset: usize, ty: AllocationType) -> Value {
        let src = self.slot_ptr(offset);
        unsafe {
            match ty {
                AllocationType::Boolean => Value::Integer(if *src != 0 { 1 } else { 0 }),
                AllocationType::Byte => Value::Integer(*(src as *const i8) as i32),
                AllocationType::Short => Value::Integer(*(src as *const i16) as i32),
                AllocationType::Char => Value::Integer(*(src as *const u16) as i32),
                AllocationType::Int => Value::Integer(*(src as *const i32)),
                AllocationType::Long => Value::Long(*(src as *const i64)),
                AllocationType::Float => Value::Float(*(src as *const f32)),
                AllocationType::Double => Value::Double(*(src as *const f64)),
                AllocationType::Reference => match *(src as *const usize) {
                    0 => Value::Null,
                    r => Value::Ref(r),
                },
            }
        }
    }

    pub fn write(&self, offset: usize, value: Value, ty: AllocationType) -> Result<(), JvmError> {
        let dst = self.slot_ptr(offset);
        unsafe {
            match (value, ty) {
                (Value::Integer(v), AllocationType::Boolean) => *dst = if v != 0 { 1 } else { 0 },
                (Value::Integer(v), AllocationType::Byte) => *(dst as *mut i8) = v as i8,
                (Value::Integer(v), AllocationType::Short) => *(dst as *mut i16) = v as i16,
                (Value::Integer(v), AllocationType::Char) => *(dst as *mut u16) = v as u16,
                (Value::Integer(v), AllocationType::Int) => *(dst as *mut i32) = v,
                (Value::Long(v), AllocationType::Long) => *(dst as *mut i64) = v,
                (Value::Float(v), AllocationType::Float) => *(dst as *mut f32) = v,
                (Value::Double(v), AllocationType::Double) => *(dst as *mut f64) = v,
                (Value::Ref(r), AllocationType::Reference) => *(dst as *mut usize) = r,
                (Value::Null, AllocationType::Reference) => *(dst as *mut usize) = 0,
                (value, ty) => {
                    return Err(JvmError::Internal(format!(
                        "type mismatch writing {:?} into a {:?} static slot",
                        value, ty
                    )));
                }
            }
        }
        Ok(())
    }
}

pub struct InstanceClass {
    base: BaseClass,

    pub cp: RuntimeConstantPool,

    declared_method_index: OnceCell<HashMap<MethodKey, MethodId>>,
    vtable: OnceCell<Vec<MethodId>>,
    vtable_index: OnceCell<HashMap<MethodKey, u16>>,

    instance_fields: OnceCell<Vec<InstanceField>>,
    instance_field_index: OnceCell<HashMap<FieldKey, usize>>,
    static_fields: OnceCell<Vec<StaticField>>,
    static_field_index: OnceCell<HashMap<FieldKey, usize>>,
    statics: OnceCell<StaticArea>,

    instance_size: OnceCell<usize>,
    instance_references: OnceCell<CompressedBitSet>,
}

impl InstanceClass {
    fn load(
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
        flags: ClassFlags,
        cp: RuntimeConstantPool,
        this_class: u16,
        attributes: &[ClassAttr],
    ) -> Result<ClassId, JvmError> {
        let name = cp.get_class_sym(&this_class, method_area.interner())?;

        let mut source_file = None;
        for attr in attributes {
            if let ClassAttr::SourceFile(sourcefile_index) = attr {
                source_file = Some(cp.get_utf8_sym(sourcefile_index, method_area.interner())?);
                break;
            }
        }

        let class = JvmClass::Instance(Box::new(Self {
            base: BaseClass::new(name, flags, super_id, source_file),
            cp,
            declared_method_index: OnceCell::new(),
            vtable: OnceCell::new(),
            vtable_index: OnceCell::new(),
            instance_fields: OnceCell::new(),
            instance_field_index: OnceCell::new(),
            static_fields: OnceCell::new(),
            static_field_index: OnceCell::new(),
            statics: OnceCell::new(),
            instance_size: OnceCell::new(),
            instance_references: OnceCell::new(),
        }));

        Ok(method_area.push_class(class))
    }

    /// Assigns field offsets (packed to each type's natural alignment),
    /// precomputes the instance size, and builds the reference bitsets the
    /// collector walks: `instance_references` by word offset from the
    /// object base, `static_references` by word offset into the static
    /// area.
    fn link_fields(
        fields: Vec<FieldInfo>,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(), JvmError> {
        let parent = super_id
            .map(|id| method_area.get_instance_class(&id))
            .transpose()?;
        let mut instance_fields = parent
            .map(|class| class.get_instance_fields().cloned())
            .transpose()?
            .unwrap_or_default();
        let mut instance_field_index = parent
            .map(|class| class.get_instance_field_index().cloned())
            .transpose()?
            .unwrap_or_default();
        let mut instance_size = parent
            .map(|class| class.get_instance_size())
            .transpose()?
            .unwrap_or_default();

        let mut static_fields: Vec<StaticField> = Vec::new();
        let mut static_field_index = HashMap::new();
        let mut static_size = 0usize;

        for field in fields {
            let field_key = {
                let cp = &method_area.get_instance_class(&this_id)?.cp;
                FieldKey {
                    name: cp.get_utf8_sym(&field.name_index, method_area.interner())?,
                    desc: cp.get_utf8_sym(&field.descriptor_index, method_area.interner())?,
                }
            };

            let descriptor_id = method_area.get_or_new_field_descriptor_id(field_key.desc)?;
            let descriptor = method_area.get_field_descriptor(&descriptor_id);
            let alloc_ty = descriptor.allocation_type();
            let size = alloc_ty.byte_size();

            if field.access_flags.is_static() {
                static_size = static_size.next_multiple_of(size);
                static_field_index.insert(field_key, static_fields.len());
                static_fields.push(StaticField {
                    flags: field.access_flags,
                    descriptor_id,
                    alloc_ty,
                    offset: static_size,
                    constant_value_index: field.constant_value_index(),
                    reflection_field: crate::heap::ObjSlot::new(),
                });
                static_size += size;
            } else {
                instance_size = instance_size.next_multiple_of(size);
                instance_field_index.insert(field_key, instance_fields.len());
                instance_fields.push(InstanceField {
                    flags: field.access_flags,
                    descriptor_id,
                    alloc_ty,
                    offset: instance_size,
                    declaring_class: this_id,
                    reflection_field: crate::heap::ObjSlot::new(),
                });
                instance_size += size;
            }
        }

        let mut instance_refs =
            CompressedBitSet::new((Heap::OBJECT_HEADER_SIZE + instance_size).div_ceil(8));
        for field in &instance_fields {
            if field.alloc_ty == AllocationType::Reference {
                instance_refs.set((Heap::OBJECT_HEADER_SIZE + field.offset) / 8);
            }
        }

        let mut static_refs = CompressedBitSet::new(static_size.next_multiple_of(8) / 8);
        for field in &static_fields {
            if field.alloc_ty == AllocationType::Reference {
                static_refs.set(field.offset / 8);
            }
        }
        let statics = StaticArea::new(static_size, static_refs);

        // Primitive ConstantValue initialisers are installed here; String
        // ones need the heap and wait for class initialisation.
        {
            let this = method_area.get_instance_class(&this_id)?;
            for field in &static_fields {
                let Some(cv_index) = field.constant_value_index else {
                    continue;
                };
                let value = match this.cp.entry(&cv_index)? {
                    RuntimeConstant::Integer(v) => Some(Value::Integer(*v)),
                    RuntimeConstant::Float(v) => Some(Value::Float(*v)),
                    RuntimeConstant::Long(v) => Some(Value::Long(*v)),
                    RuntimeConstant::Double(v) => Some(Value::Double(*v)),
                    _ => None,
                };
                if let Some(value) = value {
                    statics.write(field.offset, value, field.alloc_ty)?;
                }
            }
        }

        let this = method_area.get_instance_class(&this_id)?;
        this.set_once(&this.instance_fields, instance_fields, "instance fields")?;
        this.set_once(&this.instance_field_index, instance_field_index, "instance field index")?;
        this.set_once(&this.static_fields, static_fields, "static fields")?;
        this.set_once(&this.static_field_index, static_field_index, "static field index")?;
        this.set_once(&this.statics, statics, "static area")?;
        this.set_once(&this.instance_size, instance_size, "instance size")?;
        this.set_once(&this.instance_references, instance_refs, "instance references")?;
        Ok(())
    }

    fn prepare_methods(
        methods: Vec<MethodInfo>,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(), JvmError> {
        let interner = method_area.interner_arc();
        let mut declared_index = HashMap::new();
        let (mut vtable, mut vtable_index) = super_id
            .map(|id| method_area.get_instance_class(&id))
            .transpose()?
            .map(|class| -> Result<_, JvmError> {
                Ok((class.get_vtable()?.clone(), class.get_vtable_index()?.clone()))
            })
            .transpose()?
            .unwrap_or_default();

        let clinit_sym = method_area.br().clinit_sym;
        let init_sym = method_area.br().init_sym;

        for method_info in methods {
            let method_key = {
                let cp = &method_area.get_instance_class(&this_id)?.cp;
                MethodKey {
                    name: cp.get_utf8_sym(&method_info.name_index, &interner)?,
                    desc: cp.get_utf8_sym(&method_info.descriptor_index, &interner)?,
                }
            };
            let descriptor_id = method_area.get_or_new_method_descriptor_id(&method_key.desc)?;
            let descriptor = method_area.get_method_descriptor(&descriptor_id).clone();

            let method = {
                let class = method_area.get_instance_class(&this_id)?;
                let holder_name = interner.resolve(&class.name());
                Method::new(
                    method_info,
                    this_id,
                    descriptor_id,
                    method_key.name,
                    method_key.desc,
                    holder_name,
                    &descriptor,
                    &class.cp,
                    &interner,
                )?
            };
            let is_static = method.is_static();
            let is_initializer = method_key.name == init_sym || method_key.name == clinit_sym;
            let method_id = method_area.push_method(method);

            if !is_static && !is_initializer {
                if let Some(pos) = vtable_index.get(&method_key) {
                    vtable[*pos as usize] = method_id;
                } else {
                    vtable_index.insert(method_key, vtable.len() as u16);
                    vtable.push(method_id);
                }
            } else if method_key.name == clinit_sym {
                method_area
                    .get_instance_class(&this_id)?
                    .base
                    .set_clinit(method_id)?;
            } else {
                declared_index.insert(method_key, method_id);
            }
        }

        let this = method_area.get_instance_class(&this_id)?;
        this.set_once(&this.declared_method_index, declared_index, "declared methods")?;
        this.set_once(&this.vtable, vtable, "vtable")?;
        this.set_once(&this.vtable_index, vtable_index, "vtable index")?;
        Ok(())
    }

    fn link_interfaces(
        interfaces: Vec<u16>,
        this_id: ClassId,
        super_id: Option<ClassId>,
        method_area: &mut MethodArea,
    ) -> Result<(), JvmError> {
        let mut interface_ids = super_id
            .map(|id| method_area.get_instance_class(&id))
            .transpose()?
            .map(|class| class.base.get_interfaces().cloned())
            .transpose()?
            .unwrap_or_default();

        for interface in interfaces {
            let interface_name = {
                let cp = &method_area.get_instance_class(&this_id)?.cp;
                cp.get_class_sym(&interface, method_area.interner())?
            };
            let interface_id = method_area.get_class_id_or_load(interface_name)?;
            interface_ids.insert(interface_id);
            if let Ok(interface_class) = method_area.get_instance_class(&interface_id) {
                if let Ok(supers) = interface_class.get_interfaces() {
                    let supers: HashSet<ClassId> = supers.clone();
                    interface_ids.extend(supers);
                }
            }
        }
        let this = method_area.get_instance_class(&this_id)?;
        this.base.set_interfaces(interface_ids)?;
        Ok(())
    }

    fn prepare_cp(cp: ConstantPool, attributes: &mut Vec<ClassAttr>) -> RuntimeConstantPool {
        let bootstrap = attributes
            .iter()
            .position(|a| matches!(a, ClassAttr::BootstrapMethods(_)))
            .map(|pos| match attributes.remove(pos) {
                ClassAttr::BootstrapMethods(m) => m,
                _ => unreachable!(),
            })
            .unwrap_or_default();

        RuntimeConstantPool::new(cp.inner, bootstrap)
    }

    pub fn load_and_link(
        mut cf: ClassFile,
        method_area: &mut MethodArea,
        super_id: Option<ClassId>,
    ) -> Result<ClassId, JvmError> {
        let runtime_cp = Self::prepare_cp(cf.cp, &mut cf.attributes);
        let this_id = Self::load(
            super_id,
            method_area,
            cf.access_flags,
            runtime_cp,
            cf.this_class,
            &cf.attributes,
        )?;

        Self::link_fields(cf.fields, this_id, super_id, method_area)?;
        Self::prepare_methods(cf.methods, this_id, super_id, method_area)?;
        Self::link_interfaces(cf.interfaces, this_id, super_id, method_area)?;

        let this = method_area.get_instance_class(&this_id)?;
        this.set_linked();
        Ok(this_id)
    }

    fn set_once<T>(&self, cell: &OnceCell<T>, value: T, what: &str) -> Result<(), JvmError> {
        cell.set(value)
            .map_err(|_| JvmError::Internal(format!("{} already linked", what)))
    }

    pub fn get_instance_field(&self, field_key: &FieldKey) -> Result<&InstanceField, JvmError> {
        let idx = self
            .get_instance_field_index()?
            .get(field_key)
            .copied()
            .ok_or(build_exception!(NoSuchFieldError))?;
        Ok(&self.get_instance_fields()?[idx])
    }

    pub fn has_static_field(&self, field_key: &FieldKey) -> Result<bool, JvmError> {
        Ok(self.get_static_field_index()?.contains_key(field_key))
    }

    pub fn get_static_field(&self, field_key: &FieldKey) -> Result<&StaticField, JvmError> {
        let idx = self
            .get_static_field_index()?
            .get(field_key)
            .copied()
            .ok_or(build_exception!(NoSuchFieldError))?;
        Ok(&self.get_static_fields()?[idx])
    }

    pub fn get_static_field_value(&self, field_key: &FieldKey) -> Result<Value, JvmError> {
        let field = self.get_static_field(field_key)?;
        Ok(self.statics()?.read(field.offset, field.alloc_ty))
    }

    pub fn set_static_field_value(&self, field_key: &FieldKey, value: Value) -> Result<(), JvmError> {
        let field = self.get_static_field(field_key)?;
        self.statics()?.write(field.offset, value, field.alloc_ty)
    }

    pub fn get_vtable_method_id(&self, key: &MethodKey) -> Result<MethodId, JvmError> {
        let vtable_index = self.get_vtable_index()?;
        let pos = vtable_index
            .get(key)
            .copied()
            .ok_or(build_exception!(NoSuchMethodError, method_key: *key, class_sym: self.name()))?;
        Ok(self.get_vtable()?[pos as usize])
    }

    pub fn get_declared_method_id(&self, key: &MethodKey) -> Result<MethodId, JvmError> {
        if let Some(id) = self.get_declared_method_id_opt(key) {
            return Ok(id);
        }
        throw_exception!(NoSuchMethodError, method_key: *key, class_sym: self.name())
    }

    pub fn get_declared_method_id_opt(&self, key: &MethodKey) -> Option<MethodId> {
        if let Some(method_id) = self.declared_method_index.get()?.get(key) {
            return Some(*method_id);
        }
        if let Some(pos) = self.vtable_index.get()?.get(key) {
            return Some(self.vtable.get()?[*pos as usize]);
        }
        None
    }

    pub(crate) fn get_vtable(&self) -> Result<&Vec<MethodId>, JvmError> {
        self.vtable
            .get()
            .ok_or_else(|| JvmError::Internal("vtable not linked yet".to_string()))
    }

    pub(crate) fn get_vtable_index(&self) -> Result<&HashMap<MethodKey, u16>, JvmError> {
        self.vtable_index
            .get()
            .ok_or_else(|| JvmError::Internal("vtable index not linked yet".to_string()))
    }

    pub fn get_instance_fields(&self) -> Result<&Vec<InstanceField>, JvmError> {
        self.instance_fields
            .get()
            .ok_or_else(|| JvmError::Internal("instance fields not linked yet".to_string()))
    }

    fn get_instance_field_index(&self) -> Result<&HashMap<FieldKey, usize>, JvmError> {
        self.instance_field_index
            .get()
            .ok_or_else(|| JvmError::Internal("instance field index not linked yet".to_string()))
    }

    pub fn get_static_fields(&self) -> Result<&Vec<StaticField>, JvmError> {
        self.static_fields
            .get()
            .ok_or_else(|| JvmError::Internal("static fields not linked yet".to_string()))
    }

    fn get_static_field_index(&self) -> Result<&HashMap<FieldKey, usize>, JvmError> {
        self.static_field_index
            .get()
            .ok_or_else(|| JvmError::Internal("static field index not linked yet".to_string()))
    }

    pub fn statics(&self) -> Result<&StaticArea, JvmError> {
        self.statics
            .get()
            .ok_or_else(|| JvmError::Internal("static area not linked yet".to_string()))
    }

    pub fn get_instance_size(&self) -> Result<usize, JvmError> {
        self.instance_size
            .get()
            .copied()
            .ok_or_else(|| JvmError::Internal("instance size not linked yet".to_string()))
    }

    pub fn instance_references(&self) -> Result<&CompressedBitSet, JvmError> {
        self.instance_references
            .get()
            .ok_or_else(|| JvmError::Internal("instance references not linked yet".to_string()))
    }
}

impl ClassLike for InstanceClass {
    fn base(&self) -> &BaseClass {
        &self.base
    }
}
