use crate::class_loader::jar::MappedJar;
use crate::debug_log;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Class-path failures, split into hard I/O faults and structural
/// corruption. "Not found" is not an error; lookups report it as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassPathError {
    Io(String),
    Corrupt(String),
}

impl Display for ClassPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassPathError::Io(msg) => write!(f, "i/o error: {}", msg),
            ClassPathError::Corrupt(msg) => write!(f, "corrupt archive: {}", msg),
        }
    }
}

enum ClassPathEntry {
    Directory(PathBuf),
    Jar(MappedJar),
}

/// Ordered list of directory and JAR entries. Lookup is first-match in
/// declaration order; duplicate entries are intentional and the first one
/// wins.
pub struct ClassPath {
    entries: Vec<(String, ClassPathEntry)>,
}

impl ClassPath {
    /// Builds a class path from a colon-separated specification. Segments
    /// ending in `.jar` load as archives, everything else is a directory
    /// prefix; empty segments are skipped.
    pub fn new(spec: &str) -> Result<Self, ClassPathError> {
        let mut entries = Vec::new();
        for segment in spec.split(':') {
            if segment.is_empty() {
                continue;
            }
            let entry = if segment.ends_with(".jar") {
                debug_log!("Opening classpath archive {}", segment);
                ClassPathEntry::Jar(MappedJar::open(Path::new(segment))?)
            } else {
                ClassPathEntry::Directory(PathBuf::from(segment))
            };
            entries.push((segment.to_string(), entry));
        }
        Ok(ClassPath { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a file name to its bytes. `Ok(None)` means not present in
    /// any entry. Names containing `..` anywhere are rejected without
    /// touching the filesystem.
    pub fn lookup(&self, filename: &str) -> Result<Option<Vec<u8>>, ClassPathError> {
        if filename.contains("..") {
            return Ok(None);
        }
        for (_, entry) in &self.entries {
            match entry {
                ClassPathEntry::Jar(jar) => {
                    if let Some(bytes) = jar.lookup(filename)? {
                        return Ok(Some(bytes));
                    }
                }
                ClassPathEntry::Directory(dir) => {
                    let path = dir.join(filename);
                    match std::fs::read(&path) {
                        Ok(bytes) => return Ok(Some(bytes)),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        // A directory component shadowing the file name also
                        // reads as "not here".
                        Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => continue,
                        Err(e) => {
                            return Err(ClassPathError::Io(format!(
                                "reading {}: {}",
                                path.display(),
                                e
                            )));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Every `.class` file name visible through this class path, relative
    /// to its entry, unordered and with duplicates preserved (the caller
    /// applies first-wins semantics).
    pub fn class_file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (_, entry) in &self.entries {
            match entry {
                ClassPathEntry::Jar(jar) => {
                    names.extend(
                        jar.entry_names()
                            .into_iter()
                            .filter(|n| n.ends_with(".class")),
                    );
                }
                ClassPathEntry::Directory(dir) => {
                    for file in WalkDir::new(dir).into_iter().flatten() {
                        if !file.file_type().is_file() {
                            continue;
                        }
                        let path = file.path();
                        if path.extension().is_some_and(|ext| ext == "class")
                            && let Ok(relative) = path.strip_prefix(dir)
                        {
                            names.push(relative.to_string_lossy().replace('\\', "/"));
                        }
                    }
                }
            }
        }
        names
    }
}
