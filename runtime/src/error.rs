use crate::bytecode::BytecodeError;
use crate::class_loader::classpath::ClassPathError;
use crate::heap::HeapRef;
use crate::keys::{MethodKey, Symbol};
use lasso::ThreadedRodeo;
use skadi_classfile::error::ClassFormatError;
use skadi_common::cursor::CursorError;
use skadi_common::descriptor::{DescriptorError, MethodDescriptor};
use std::fmt::Display;

#[derive(Debug)]
pub enum JvmError {
    /// Structural class-file failure. Surfaced to the embedder as a value,
    /// never as a Java exception.
    ClassFormat(ClassFormatError),
    /// Bytecode pre-processing failure (unknown opcode, branch into the
    /// middle of an instruction, operand outside the constant pool).
    Bytecode(BytecodeError),
    /// Code analysis failure.
    Verify(String),
    /// Missing or inconsistent symbol during resolution.
    Linkage(String),
    ClassNotFound(String),
    ClassPath(ClassPathError),
    Descriptor(DescriptorError),
    Cursor(CursorError),
    /// Frame buffer exhausted; the thread's pre-allocated
    /// `StackOverflowError` instance is raised alongside this.
    StackOverflow,
    /// Heap exhausted even after collection; the thread's pre-allocated
    /// `OutOfMemoryError` instance is raised alongside this.
    OutOfMemory,
    /// Bump pointer exhausted; internal trigger for a collection, never
    /// user-visible.
    HeapExhausted,
    FrameStackIsEmpty,
    OperandStackIsEmpty,
    OperandStackOverflow,
    LocalVariableNotFound(u16),
    /// A Java exception built by the VM that has not yet been materialised
    /// as a heap object.
    JavaException(JavaExceptionFromJvm),
    /// A Java exception object in flight; unwinds frame by frame.
    JavaExceptionThrown(HeapRef),
    /// Broken internal invariant. Always a bug.
    Internal(String),
}

impl From<ClassFormatError> for JvmError {
    fn from(value: ClassFormatError) -> Self {
        JvmError::ClassFormat(value)
    }
}

impl From<BytecodeError> for JvmError {
    fn from(value: BytecodeError) -> Self {
        JvmError::Bytecode(value)
    }
}

impl From<ClassPathError> for JvmError {
    fn from(value: ClassPathError) -> Self {
        JvmError::ClassPath(value)
    }
}

impl From<DescriptorError> for JvmError {
    fn from(value: DescriptorError) -> Self {
        JvmError::Descriptor(value)
    }
}

impl From<CursorError> for JvmError {
    fn from(value: CursorError) -> Self {
        JvmError::Cursor(value)
    }
}

impl From<JavaExceptionFromJvm> for JvmError {
    fn from(value: JavaExceptionFromJvm) -> Self {
        JvmError::JavaException(value)
    }
}

impl Display for JvmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmError::ClassFormat(e) => write!(f, "class format error: {}", e),
            JvmError::Bytecode(e) => write!(f, "class format error: {}", e),
            JvmError::Verify(msg) => write!(f, "verify error: {}", msg),
            JvmError::Linkage(msg) => write!(f, "linkage error: {}", msg),
            JvmError::ClassNotFound(name) => write!(f, "class not found: {}", name),
            JvmError::ClassPath(e) => write!(f, "classpath error: {}", e),
            JvmError::Descriptor(e) => write!(f, "descriptor error: {}", e),
            JvmError::Cursor(e) => write!(f, "{}", e),
            other => write!(f, "{:?}", other),
        }
    }
}

impl JvmError {
    pub fn into_pretty_string(self, interner: &ThreadedRodeo) -> String {
        match self {
            JvmError::JavaException(ex) => {
                let mut result = ex.kind.class_name_dot();
                if let Some(message) = ex.message {
                    result.push_str(": ");
                    result.push_str(&message.into_resolved(interner));
                }
                if let Some(cause) = ex.cause {
                    result.push_str(&format!(
                        "\nCaused by: {}",
                        JvmError::JavaException(*cause).into_pretty_string(interner)
                    ));
                }
                result
            }
            other => other.to_string(),
        }
    }
}

/// How a VM-built exception is constructed on the Java side.
pub struct JavaExceptionReference {
    pub class: &'static str,
    pub name: &'static str,
    pub descriptor: &'static str,
}

/// Detail message of a VM-built exception. The structured variant defers
/// symbol resolution until an interner is at hand.
#[derive(Debug, Clone)]
pub enum ExceptionMessage {
    Resolved(String),
    MethodNotFound(MethodKey, Symbol),
}

impl ExceptionMessage {
    pub fn into_resolved(self, interner: &ThreadedRodeo) -> String {
        match self {
            ExceptionMessage::Resolved(s) => s,
            ExceptionMessage::MethodNotFound(method_key, class_sym) => {
                let desc_str = interner.resolve(&method_key.desc);
                let class_name = interner.resolve(&class_sym);
                let method_name = interner.resolve(&method_key.name);
                match MethodDescriptor::try_from(desc_str) {
                    Ok(desc) => desc.to_java_signature(class_name, method_name),
                    Err(_) => format!("{}.{}{}", class_name, method_name, desc_str),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaExceptionKind {
    ArithmeticException,
    ArrayIndexOutOfBoundsException,
    ArrayStoreException,
    NegativeArraySizeException,
    NullPointerException,
    ClassNotFoundException,
    NoSuchFieldError,
    NoSuchMethodError,
    UnsatisfiedLinkError,
    IncompatibleClassChangeError,
    ExceptionInInitializerError,
    InternalError,
}

impl JavaExceptionKind {
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::ArithmeticException => "java/lang/ArithmeticException",
            Self::ArrayIndexOutOfBoundsException => "java/lang/ArrayIndexOutOfBoundsException",
            Self::ArrayStoreException => "java/lang/ArrayStoreException",
            Self::NegativeArraySizeException => "java/lang/NegativeArraySizeException",
            Self::NullPointerException => "java/lang/NullPointerException",
            Self::ClassNotFoundException => "java/lang/ClassNotFoundException",
            Self::NoSuchFieldError => "java/lang/NoSuchFieldError",
            Self::NoSuchMethodError => "java/lang/NoSuchMethodError",
            Self::UnsatisfiedLinkError => "java/lang/UnsatisfiedLinkError",
            Self::IncompatibleClassChangeError => "java/lang/IncompatibleClassChangeError",
            Self::ExceptionInInitializerError => "java/lang/ExceptionInInitializerError",
            Self::InternalError => "java/lang/InternalError",
        }
    }

    pub fn class_name_dot(self) -> String {
        self.class_name().replace('/', ".")
    }
}

#[derive(Debug, Clone)]
pub struct JavaExceptionFromJvm {
    pub kind: JavaExceptionKind,
    pub message: Option<ExceptionMessage>,
    pub cause: Option<Box<JavaExceptionFromJvm>>,
}

impl JavaExceptionFromJvm {
    const CONSTRUCTOR_NAME: &'static str = "<init>";
    const STRING_PARAM_CONSTRUCTOR: &'static str = "(Ljava/lang/String;)V";
    const NO_PARAM_CONSTRUCTOR: &'static str = "()V";

    pub fn new(kind: JavaExceptionKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
        }
    }

    pub fn with_message(kind: JavaExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(ExceptionMessage::Resolved(message.into())),
            cause: None,
        }
    }

    pub fn with_method_not_found(kind: JavaExceptionKind, key: MethodKey, class_sym: Symbol) -> Self {
        Self {
            kind,
            message: Some(ExceptionMessage::MethodNotFound(key, class_sym)),
            cause: None,
        }
    }

    pub fn as_reference(&self) -> JavaExceptionReference {
        JavaExceptionReference {
            class: self.kind.class_name(),
            name: Self::CONSTRUCTOR_NAME,
            descriptor: if self.message.is_some() {
                Self::STRING_PARAM_CONSTRUCTOR
            } else {
                Self::NO_PARAM_CONSTRUCTOR
            },
        }
    }
}
