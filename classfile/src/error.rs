use skadi_common::cursor::CursorError;
use skadi_common::descriptor::DescriptorError;
use std::fmt::Display;

/// Structural failure while decoding a class file. Carried back to the
/// embedder as a value; never surfaced as a Java exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    Truncated { at: usize, wanted: usize },
    BadMagic(u32),
    BadConstantTag { tag: u8, index: u16 },
    BadUtf8 { index: u16 },
    BadPoolIndex { index: u16 },
    WrongPoolKind { index: u16, expected: &'static str },
    BadDescriptor { index: u16, error: DescriptorError },
    BadMethodHandleKind { kind: u8, index: u16 },
    MissingBootstrapMethod { index: u16, referenced: u16 },
    BadExceptionRange { method_index: u16 },
    TrailingBytes { at: usize },
}

impl Display for ClassFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassFormatError::Truncated { at, wanted } => {
                write!(f, "class file truncated: wanted {} byte(s) at offset {}", wanted, at)
            }
            ClassFormatError::BadMagic(magic) => {
                write!(f, "bad magic number {:#010x} (expected 0xCAFEBABE)", magic)
            }
            ClassFormatError::BadConstantTag { tag, index } => {
                write!(f, "unknown constant pool tag {} at index {}", tag, index)
            }
            ClassFormatError::BadUtf8 { index } => {
                write!(f, "malformed modified-UTF-8 in constant pool entry {}", index)
            }
            ClassFormatError::BadPoolIndex { index } => {
                write!(f, "constant pool index {} out of range", index)
            }
            ClassFormatError::WrongPoolKind { index, expected } => {
                write!(f, "constant pool entry {} is not a {}", index, expected)
            }
            ClassFormatError::BadDescriptor { index, error } => {
                write!(f, "invalid descriptor in constant pool entry {}: {}", index, error)
            }
            ClassFormatError::BadMethodHandleKind { kind, index } => {
                write!(f, "invalid method handle kind {} in constant pool entry {}", kind, index)
            }
            ClassFormatError::MissingBootstrapMethod { index, referenced } => {
                write!(
                    f,
                    "invokedynamic entry {} references bootstrap method {} which does not exist",
                    index, referenced
                )
            }
            ClassFormatError::BadExceptionRange { method_index } => {
                write!(f, "exception table range out of bounds in method {}", method_index)
            }
            ClassFormatError::TrailingBytes { at } => {
                write!(f, "trailing bytes after class file contents at offset {}", at)
            }
        }
    }
}

impl std::error::Error for ClassFormatError {}

impl From<CursorError> for ClassFormatError {
    fn from(value: CursorError) -> Self {
        ClassFormatError::Truncated {
            at: value.at,
            wanted: value.wanted,
        }
    }
}
