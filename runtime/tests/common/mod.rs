//! Hand-assembled class files for tests, so no Java toolchain is needed.
#![allow(dead_code)]

use std::collections::HashMap;

pub struct MethodSpec {
    pub flags: u16,
    pub name: String,
    pub desc: String,
    /// `(max_stack, max_locals, code)`; `None` builds a native method.
    pub code: Option<(u16, u16, Vec<u8>)>,
}

pub struct ClassFileBuilder {
    name: String,
    super_name: Option<String>,
    access: u16,
    fields: Vec<(u16, String, String)>,
    methods: Vec<MethodSpec>,
}

impl ClassFileBuilder {
    pub fn new(name: &str) -> Self {
        ClassFileBuilder {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            access: 0x0021, // public super
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// The primordial object class has no super.
    pub fn no_super(mut self) -> Self {
        self.super_name = None;
        self
    }

    pub fn field(mut self, flags: u16, name: &str, desc: &str) -> Self {
        self.fields.push((flags, name.to_string(), desc.to_string()));
        self
    }

    pub fn method(mut self, flags: u16, name: &str, desc: &str, max_stack: u16, max_locals: u16, code: &[u8]) -> Self {
        self.methods.push(MethodSpec {
            flags,
            name: name.to_string(),
            desc: desc.to_string(),
            code: Some((max_stack, max_locals, code.to_vec())),
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut pool = PoolBuilder::default();

        let this_class = pool.class(&self.name);
        let super_class = self.super_name.as_deref().map(|s| pool.class(s)).unwrap_or(0);
        let code_attr = pool.utf8("Code");

        struct FieldRefs {
            flags: u16,
            name: u16,
            desc: u16,
        }
        let field_refs: Vec<FieldRefs> = self
            .fields
            .iter()
            .map(|(flags, name, desc)| FieldRefs {
                flags: *flags,
                name: pool.utf8(name),
                desc: pool.utf8(desc),
            })
            .collect();

        struct MethodRefs {
            flags: u16,
            name: u16,
            desc: u16,
            code: Option<(u16, u16, Vec<u8>)>,
        }
        let method_refs: Vec<MethodRefs> = self
            .methods
            .into_iter()
            .map(|m| MethodRefs {
                flags: m.flags,
                name: pool.utf8(&m.name),
                desc: pool.utf8(&m.desc),
                code: m.code,
            })
            .collect();

        let mut b = Vec::new();
        b.extend_from_slice(&0xCAFEBABEu32.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes());
        b.extend_from_slice(&52u16.to_be_bytes());

        b.extend_from_slice(&(pool.count + 1).to_be_bytes());
        for entry in &pool.entries {
            b.extend_from_slice(entry);
        }

        b.extend_from_slice(&self.access.to_be_bytes());
        b.extend_from_slice(&this_class.to_be_bytes());
        b.extend_from_slice(&super_class.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes()); // interfaces

        b.extend_from_slice(&(field_refs.len() as u16).to_be_bytes());
        for field in &field_refs {
            b.extend_from_slice(&field.flags.to_be_bytes());
            b.extend_from_slice(&field.name.to_be_bytes());
            b.extend_from_slice(&field.desc.to_be_bytes());
            b.extend_from_slice(&0u16.to_be_bytes()); // attributes
        }

        b.extend_from_slice(&(method_refs.len() as u16).to_be_bytes());
        for method in &method_refs {
            b.extend_from_slice(&method.flags.to_be_bytes());
            b.extend_from_slice(&method.name.to_be_bytes());
            b.extend_from_slice(&method.desc.to_be_bytes());
            match &method.code {
                Some((max_stack, max_locals, code)) => {
                    b.extend_from_slice(&1u16.to_be_bytes());
                    b.extend_from_slice(&code_attr.to_be_bytes());
                    let attr_len = 2 + 2 + 4 + code.len() + 2 + 2;
                    b.extend_from_slice(&(attr_len as u32).to_be_bytes());
                    b.extend_from_slice(&max_stack.to_be_bytes());
                    b.extend_from_slice(&max_locals.to_be_bytes());
                    b.extend_from_slice(&(code.len() as u32).to_be_bytes());
                    b.extend_from_slice(code);
                    b.extend_from_slice(&0u16.to_be_bytes()); // exception table
                    b.extend_from_slice(&0u16.to_be_bytes()); // code attributes
                }
                None => {
                    b.extend_from_slice(&0u16.to_be_bytes());
                }
            }
        }

        b.extend_from_slice(&0u16.to_be_bytes()); // class attributes
        b
    }
}

#[derive(Default)]
struct PoolBuilder {
    entries: Vec<Vec<u8>>,
    count: u16,
    utf8_cache: HashMap<String, u16>,
    class_cache: HashMap<String, u16>,
}

impl PoolBuilder {
    fn utf8(&mut self, s: &str) -> u16 {
        if let Some(&idx) = self.utf8_cache.get(s) {
            return idx;
        }
        let mut entry = vec![1u8];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.entries.push(entry);
        self.count += 1;
        self.utf8_cache.insert(s.to_string(), self.count);
        self.count
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(&idx) = self.class_cache.get(name) {
            return idx;
        }
        let name_idx = self.utf8(name);
        let mut entry = vec![7u8];
        entry.extend_from_slice(&name_idx.to_be_bytes());
        self.entries.push(entry);
        self.count += 1;
        self.class_cache.insert(name.to_string(), self.count);
        self.count
    }
}

/// A minimal `java/lang/Object` so synthetic classes can resolve their
/// super class without a JDK on the class path.
pub fn object_class_bytes() -> Vec<u8> {
    ClassFileBuilder::new("java/lang/Object")
        .no_super()
        .method(0x0001, "<init>", "()V", 0, 1, &[0xb1])
        .build()
}

/// A minimal `java/lang/String` with the `value`/`coder` layout the VM's
/// string allocation expects.
pub fn string_class_bytes() -> Vec<u8> {
    ClassFileBuilder::new("java/lang/String")
        .field(0x0012, "value", "[B")
        .field(0x0012, "coder", "B")
        .method(0x0001, "<init>", "()V", 0, 1, &[0xb1])
        .build()
}
