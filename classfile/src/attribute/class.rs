/// Class-level attributes. Anything the runtime does not interpret is
/// preserved raw under `Unknown` and skipped over.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassAttr {
    SourceFile(u16),
    BootstrapMethods(Vec<BootstrapMethodEntry>),
    Unknown { name_index: u16, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethodEntry {
    /// `MethodHandle` constant pool index.
    pub bootstrap_method_idx: u16,
    /// Constant pool indices of the static arguments.
    pub bootstrap_arguments: Vec<u16>,
}
