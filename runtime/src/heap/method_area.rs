use crate::class_loader::ClassLoader;
use crate::error::JvmError;
use crate::heap::{Heap, HeapRef};
use crate::keys::{ClassId, FieldDescriptorId, FieldKey, MethodDescriptorId, MethodKey};
use crate::rt::array::{ObjectArrayClass, PrimitiveArrayClass};
use crate::rt::class::InstanceClass;
use crate::rt::constant_pool::RuntimeConstantPool;
use crate::rt::field::InstanceField;
use crate::rt::method::Method;
use crate::rt::{ClassLike, JvmClass, PrimitiveClass};
use crate::vm::Value;
use crate::vm::bootstrap_registry::BootstrapRegistry;
use crate::{MethodId, Symbol, debug_log, throw_exception};
use lasso::ThreadedRodeo;
use skadi_classfile::ClassFile;
use skadi_common::descriptor::{FieldDescriptor, MethodDescriptor, parse_field_descriptor};
use skadi_common::jtype::{AllocationType, PrimitiveType, TypeKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The method area: class registry, class/method arenas and the descriptor
/// caches. Classes are addressed by `ClassId`; back-edges between class
/// descriptors are always ids, never owning pointers.
pub struct MethodArea {
    bootstrap_class_loader: ClassLoader,
    class_name_to_index: HashMap<Symbol, ClassId>,
    mirror_to_class_index: HashMap<HeapRef, ClassId>,
    classes: Vec<JvmClass>,
    methods: Vec<Method>,

    field_descriptors: Vec<FieldDescriptor>,
    field_descriptors_index: HashMap<Symbol, FieldDescriptorId>,

    method_descriptors: Vec<MethodDescriptor>,
    method_descriptors_index: HashMap<Symbol, MethodDescriptorId>,

    interner: Arc<ThreadedRodeo>,
    bootstrap_registry: Arc<BootstrapRegistry>,
}

impl MethodArea {
    pub fn init(
        class_path_spec: &str,
        string_interner: Arc<ThreadedRodeo>,
    ) -> Result<(Self, Arc<BootstrapRegistry>), JvmError> {
        debug_log!("Creating method area...");
        let bootstrap_class_loader = ClassLoader::new(class_path_spec)?;

        let mut method_area = Self {
            bootstrap_class_loader,
            class_name_to_index: HashMap::new(),
            mirror_to_class_index: HashMap::new(),
            classes: Vec::with_capacity(1024),
            methods: Vec::with_capacity(4096),
            field_descriptors: Vec::with_capacity(2048),
            field_descriptors_index: HashMap::new(),
            method_descriptors: Vec::with_capacity(4096),
            method_descriptors_index: HashMap::new(),
            bootstrap_registry: Arc::new(BootstrapRegistry::new(&string_interner)),
            interner: string_interner,
        };

        method_area.preload_primitive_classes();
        let br = method_area.bootstrap_registry.clone();
        Ok((method_area, br))
    }

    /// Primitive classes exist from the start; everything else, including
    /// `java/lang/Object`, loads lazily from the class path.
    fn preload_primitive_classes(&mut self) {
        for primitive_type in PrimitiveType::values() {
            let name_sym = self.br().get_primitive_sym(*primitive_type);
            let class = JvmClass::Primitive(PrimitiveClass::new(name_sym, *primitive_type));
            let class_id = self.push_class(class);
            self.class_name_to_index.insert(name_sym, class_id);
        }
    }

    pub fn classes(&self) -> &Vec<JvmClass> {
        &self.classes
    }

    pub fn methods(&self) -> &Vec<Method> {
        &self.methods
    }

    pub fn loader(&self) -> &ClassLoader {
        &self.bootstrap_class_loader
    }

    pub fn loader_mut(&mut self) -> &mut ClassLoader {
        &mut self.bootstrap_class_loader
    }

    pub fn br(&self) -> &BootstrapRegistry {
        &self.bootstrap_registry
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn interner_arc(&self) -> Arc<ThreadedRodeo> {
        self.interner.clone()
    }

    pub fn push_field_descriptor(&mut self, sym: Symbol, ty: FieldDescriptor) -> FieldDescriptorId {
        self.field_descriptors.push(ty);
        let id = FieldDescriptorId::from_usize(self.field_descriptors.len());
        self.field_descriptors_index.insert(sym, id);
        id
    }

    pub fn get_field_descriptor(&self, id: &FieldDescriptorId) -> &FieldDescriptor {
        &self.field_descriptors[id.to_index()]
    }

    pub fn get_or_new_field_descriptor_id(
        &mut self,
        descriptor: Symbol,
    ) -> Result<FieldDescriptorId, JvmError> {
        if let Some(id) = self.field_descriptors_index.get(&descriptor) {
            return Ok(*id);
        }
        let descriptor_str = self.interner.resolve(&descriptor);
        let mut pos = 0;
        let ty = parse_field_descriptor(descriptor_str, &mut pos)?;
        Ok(self.push_field_descriptor(descriptor, ty))
    }

    pub fn get_method_descriptor(&self, id: &MethodDescriptorId) -> &MethodDescriptor {
        &self.method_descriptors[id.to_index()]
    }

    pub fn get_method_descriptor_by_method_id(&self, method_id: &MethodId) -> &MethodDescriptor {
        let method = self.get_method(method_id);
        self.get_method_descriptor(&method.descriptor_id())
    }

    pub fn get_or_new_method_descriptor_id(
        &mut self,
        descriptor: &Symbol,
    ) -> Result<MethodDescriptorId, JvmError> {
        if let Some(id) = self.method_descriptors_index.get(descriptor) {
            return Ok(*id);
        }
        let descriptor_str = self.interner.resolve(descriptor);
        let method_descriptor = MethodDescriptor::try_from(descriptor_str)?;
        self.method_descriptors.push(method_descriptor);
        let id = MethodDescriptorId::from_usize(self.method_descriptors.len());
        self.method_descriptors_index.insert(*descriptor, id);
        Ok(id)
    }

    pub fn push_method(&mut self, method: Method) -> MethodId {
        self.methods.push(method);
        MethodId::from_usize(self.methods.len())
    }

    pub fn get_method(&self, method_id: &MethodId) -> &Method {
        &self.methods[method_id.to_index()]
    }

    pub fn push_class(&mut self, class: JvmClass) -> ClassId {
        self.classes.push(class);
        ClassId::from_usize(self.classes.len())
    }

    pub fn get_class(&self, class_id: &ClassId) -> &JvmClass {
        &self.classes[class_id.to_index()]
    }

    pub fn get_class_id(&self, name_sym: &Symbol) -> Option<ClassId> {
        self.class_name_to_index.get(name_sym).copied()
    }

    pub fn get_instance_class(&self, class_id: &ClassId) -> Result<&InstanceClass, JvmError> {
        match self.get_class(class_id) {
            JvmClass::Instance(ic) => Ok(ic),
            other => Err(JvmError::Internal(format!(
                "expected an instance class, found {}",
                other
            ))),
        }
    }

    pub fn get_instance_field(
        &self,
        class_id: &ClassId,
        key: &FieldKey,
    ) -> Result<&InstanceField, JvmError> {
        self.get_instance_class(class_id)?.get_instance_field(key)
    }

    pub fn get_static_field_value(
        &self,
        class_id: &ClassId,
        key: &FieldKey,
    ) -> Result<Value, JvmError> {
        self.get_class(class_id).get_static_field_value(key)
    }

    pub fn get_cp(&self, class_id: &ClassId) -> Result<&RuntimeConstantPool, JvmError> {
        self.get_class(class_id).get_cp()
    }

    pub fn get_cp_by_method_id(&self, method_id: &MethodId) -> Result<&RuntimeConstantPool, JvmError> {
        let class_id = self.get_method(method_id).class_id();
        self.get_cp(&class_id)
    }

    fn get_static_method_id_rec(
        &self,
        class_id: &ClassId,
        key: &MethodKey,
    ) -> Option<MethodId> {
        let class = self.get_class(class_id);
        if let Some(method_id) = class.get_static_method_id_opt(key) {
            return Some(method_id);
        }
        class
            .get_super_id()
            .and_then(|super_id| self.get_static_method_id_rec(&super_id, key))
    }

    pub fn get_static_method_id(
        &self,
        class_id: &ClassId,
        key: MethodKey,
    ) -> Result<MethodId, JvmError> {
        if let Some(method_id) = self.get_static_method_id_rec(class_id, &key) {
            return Ok(method_id);
        }
        let class_sym = self.get_class(class_id).get_name();
        throw_exception!(NoSuchMethodError, method_key: key, class_sym: class_sym)
    }

    /// Walks the superclass chain and then the interfaces for the class
    /// that actually declares a static field.
    pub fn resolve_static_field_actual_class_id(
        &self,
        class_id: ClassId,
        field_key: &FieldKey,
    ) -> Result<ClassId, JvmError> {
        let mut cur_id = Some(class_id);
        while let Some(id) = cur_id {
            let class = self.get_instance_class(&id)?;
            if class.has_static_field(field_key)? {
                return Ok(id);
            }
            cur_id = class.get_super();
        }

        let class = self.get_instance_class(&class_id)?;
        for interface_id in class.get_interfaces()? {
            let interface = self.get_instance_class(interface_id)?;
            if interface.has_static_field(field_key)? {
                return Ok(*interface_id);
            }
        }
        throw_exception!(NoSuchFieldError)
    }

    fn load_array_class(&mut self, name_sym: Symbol) -> Result<ClassId, JvmError> {
        if let Some(class_id) = self.class_name_to_index.get(&name_sym) {
            return Ok(*class_id);
        }
        let interner = self.interner_arc();
        let name_str = interner.resolve(&name_sym);
        let mut pos = 0;
        let descriptor = parse_field_descriptor(name_str, &mut pos)?;
        if !descriptor.is_array() || pos != name_str.len() {
            return Err(JvmError::Linkage(format!(
                "{} is not an array class name",
                name_str
            )));
        }

        // The one-fewer-dimension edge: the element class for a single
        // dimension, the next-smaller array otherwise.
        let one_fewer_dim = if descriptor.dimensions > 1 {
            let inner_sym = interner.get_or_intern(&name_str[1..]);
            self.load_array_class(inner_sym)?
        } else if let Some(primitive) = descriptor.primitive_element() {
            let primitive_sym = self.br().get_primitive_sym(primitive);
            self.get_class_id(&primitive_sym).ok_or_else(|| {
                JvmError::Internal("primitive classes are preloaded".to_string())
            })?
        } else {
            let element_name = descriptor
                .class_name
                .as_deref()
                .ok_or_else(|| JvmError::Linkage(format!("bad array descriptor {}", name_str)))?;
            let element_sym = interner.get_or_intern(element_name);
            self.get_class_id_or_load(element_sym)?
        };

        // Arrays answer Object's virtual methods; without Object loaded yet
        // (pure embedder configurations) the vtable stays empty.
        let super_id = self.br().java_lang_object_id_opt();
        let (vtable, vtable_index) = match super_id {
            Some(object_id) => {
                let object = self.get_instance_class(&object_id)?;
                (object.get_vtable()?.clone(), object.get_vtable_index()?.clone())
            }
            None => Default::default(),
        };

        let class = if let Some(primitive) = innermost_primitive(&descriptor) {
            JvmClass::PrimitiveArray(PrimitiveArrayClass {
                name: name_sym,
                super_id,
                element_type: primitive,
                dimensions: descriptor.dimensions,
                one_fewer_dim,
                vtable,
                vtable_index,
                mirror: crate::heap::ObjSlot::new(),
                cp_mirror: crate::heap::ObjSlot::new(),
            })
        } else {
            JvmClass::InstanceArray(ObjectArrayClass {
                name: name_sym,
                super_id,
                dimensions: descriptor.dimensions,
                one_fewer_dim,
                vtable,
                vtable_index,
                mirror: crate::heap::ObjSlot::new(),
                cp_mirror: crate::heap::ObjSlot::new(),
            })
        };
        let class_id = self.push_class(class);
        self.class_name_to_index.insert(name_sym, class_id);
        self.bootstrap_registry.note_loaded_class(name_sym, class_id);
        Ok(class_id)
    }

    #[hotpath::measure]
    fn load_class(&mut self, name_sym: Symbol) -> Result<ClassId, JvmError> {
        let data = {
            hotpath::measure_block!("load_class::read_raw_class", {
                let interner = self.interner_arc();
                let name_str = interner.resolve(&name_sym);
                if name_str.starts_with('[') {
                    return self.load_array_class(name_sym);
                }
                self.bootstrap_class_loader.load(name_str)?
            })
        };
        let cf = hotpath::measure_block!(
            "load_class::parse_class_file",
            ClassFile::parse(&data)?
        );
        let super_id = match cf.super_class_name()? {
            Some(super_name) => {
                let super_name_sym = self.interner.get_or_intern(super_name);
                Some(self.get_class_id_or_load(super_name_sym)?)
            }
            None => None,
        };
        let class_id = hotpath::measure_block!(
            "load_class::load_and_link_class",
            InstanceClass::load_and_link(cf, self, super_id)?
        );
        self.class_name_to_index.insert(name_sym, class_id);
        self.bootstrap_registry.note_loaded_class(name_sym, class_id);
        Ok(class_id)
    }

    #[hotpath::measure]
    pub fn get_class_id_or_load(&mut self, name_sym: Symbol) -> Result<ClassId, JvmError> {
        if let Some(class_id) = self.class_name_to_index.get(&name_sym) {
            return Ok(*class_id);
        }
        self.load_class(name_sym)
    }

    pub fn is_assignable_from(&self, this_class: ClassId, cls: ClassId) -> bool {
        self.is_subclass_of(cls, this_class)
    }

    fn is_subclass_of(&self, this_class: ClassId, target_class: ClassId) -> bool {
        if this_class == target_class {
            return true;
        }

        let this = self.get_class(&this_class);
        let target = self.get_class(&target_class);

        if this.is_array() && target.is_array() {
            return match (this, target) {
                (JvmClass::PrimitiveArray(a), JvmClass::PrimitiveArray(b)) => {
                    a.element_type == b.element_type && a.dimensions == b.dimensions
                }
                (JvmClass::InstanceArray(a), JvmClass::InstanceArray(b)) => {
                    self.is_subclass_of(a.one_fewer_dim, b.one_fewer_dim)
                }
                _ => false,
            };
        }

        if let Some(super_id) = this.get_super_id()
            && self.is_subclass_of(super_id, target_class)
        {
            return true;
        }

        if let JvmClass::Instance(instance) = this
            && let Ok(interfaces) = instance.get_interfaces()
        {
            for interface_id in interfaces {
                if self.is_subclass_of(*interface_id, target_class) {
                    return true;
                }
            }
        }

        false
    }

    pub fn instance_of(&self, this_class_id: ClassId, other_sym: Symbol) -> bool {
        match self.class_name_to_index.get(&other_sym) {
            Some(&other_class_id) => self.is_subclass_of(this_class_id, other_class_id),
            None => false,
        }
    }

    pub fn get_class_id_by_mirror(&self, mirror: &HeapRef) -> Result<ClassId, JvmError> {
        self.mirror_to_class_index
            .get(mirror)
            .copied()
            .ok_or_else(|| JvmError::Internal("no class registered for mirror".to_string()))
    }

    /// Lazily creates the `java/lang/Class` mirror instance for a class.
    /// Requires `java/lang/Class` itself to be loadable from the class path.
    pub fn get_mirror_ref_or_create(
        &mut self,
        class_id: ClassId,
        heap: &RwLock<Heap>,
    ) -> Result<HeapRef, JvmError> {
        if let Some(mirror_ref) = self.get_class(&class_id).get_mirror_ref() {
            return Ok(mirror_ref);
        }
        let class_class_sym = self.br().java_lang_class_sym;
        let class_class_id = self.get_class_id_or_load(class_class_sym)?;
        let class_instance_size = self.get_instance_class(&class_class_id)?.get_instance_size()?;
        let mirror_ref = heap
            .write()
            .expect("heap lock poisoned")
            .alloc_instance(class_instance_size, class_class_id)?;
        self.mirror_to_class_index.insert(mirror_ref, class_id);
        self.get_class(&class_id).mirror().set(mirror_ref);
        Ok(mirror_ref)
    }

    /// Allocation size of an array, matching the heap layout: header,
    /// length, padding to 8, elements.
    pub fn array_allocation_size(element: AllocationType, length: usize) -> usize {
        Heap::OBJECT_HEADER_SIZE + Heap::ARRAY_ELEMENTS_OFFSET + element.byte_size() * length
    }
}

fn innermost_primitive(descriptor: &FieldDescriptor) -> Option<PrimitiveType> {
    if descriptor.kind == TypeKind::Reference {
        None
    } else {
        descriptor.primitive_element()
    }
}
