use crate::class_loader::classpath::ClassPath;
use crate::debug_log;
use crate::error::JvmError;
use itertools::Itertools;
use skadi_common::wmap::WideMap;
use skadi_common::wstr::WString;

pub mod classpath;
pub mod jar;

/// Bootstrap class loader: class files registered directly by the embedder
/// are consulted first, then the class path in declaration order.
pub struct ClassLoader {
    registered: WideMap<Vec<u8>>,
    class_path: ClassPath,
}

impl ClassLoader {
    pub fn new(class_path_spec: &str) -> Result<Self, JvmError> {
        debug_log!("Creating class loader for classpath {:?}", class_path_spec);
        Ok(Self {
            registered: WideMap::new(),
            class_path: ClassPath::new(class_path_spec)?,
        })
    }

    /// Makes `bytes` available under `filename` without loading anything.
    pub fn register(&mut self, filename: &str, bytes: Vec<u8>) {
        self.registered.insert(WString::from(filename).units(), bytes);
    }

    /// Resolves a file name (e.g. `java/lang/Object.class`) to bytes.
    pub fn find_file(&self, filename: &str) -> Result<Option<Vec<u8>>, JvmError> {
        if let Some(bytes) = self.registered.get(WString::from(filename).units()) {
            return Ok(Some(bytes.clone()));
        }
        Ok(self.class_path.lookup(filename)?)
    }

    /// Resolves a class by binary name (`java/lang/Object`).
    pub fn load(&self, name: &str) -> Result<Vec<u8>, JvmError> {
        let filename = format!("{}.class", name);
        match self.find_file(&filename)? {
            Some(bytes) => {
                debug_log!("Bytecode of \"{name}\" found on the classpath.");
                Ok(bytes)
            }
            None => Err(JvmError::ClassNotFound(name.to_string())),
        }
    }

    /// Every visible class-file name, sorted and deduplicated (registered
    /// files and earlier classpath entries shadow later ones).
    pub fn class_file_names(&self) -> Vec<String> {
        self.registered
            .iter()
            .map(|(key, _)| String::from_utf16_lossy(key))
            .filter(|name| name.ends_with(".class"))
            .chain(self.class_path.class_file_names())
            .sorted()
            .dedup()
            .collect()
    }
}
