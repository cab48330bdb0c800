//! skadi runtime core: class path, class loading and linking, bytecode
//! pre-processing and reference-liveness analysis, object heap, frame model
//! and the stop-the-world mark-compact collector.
//!
//! The instruction interpreter and the JIT are external collaborators; this
//! crate defines the frame/stack contract and the root-walking hooks they
//! plug into.

pub mod analysis;
pub mod bytecode;
pub mod class_loader;
pub mod error;
pub mod gc;
pub mod heap;
pub mod keys;
pub mod native;
pub mod rt;
pub mod thread;
pub mod vm;

pub use crate::keys::{ClassId, MethodId, Symbol};
pub use crate::vm::{StdioHooks, VirtualMachine, VmConfig};

#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing_log::log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug_error_log {
    ($($arg:tt)*) => {
        tracing_log::log::error!($($arg)*)
    };
}

/// Builds a `JvmError::JavaException` of the given kind, optionally with a
/// formatted message or a deferred method-not-found message.
#[macro_export]
macro_rules! build_exception {
    ($kind:ident) => {
        $crate::error::JvmError::JavaException($crate::error::JavaExceptionFromJvm::new(
            $crate::error::JavaExceptionKind::$kind,
        ))
    };
    ($kind:ident, method_key: $method_key:expr, class_sym: $class_sym:expr) => {
        $crate::error::JvmError::JavaException(
            $crate::error::JavaExceptionFromJvm::with_method_not_found(
                $crate::error::JavaExceptionKind::$kind,
                $method_key,
                $class_sym,
            ),
        )
    };
    ($kind:ident, $($fmt:tt)+) => {
        $crate::error::JvmError::JavaException($crate::error::JavaExceptionFromJvm::with_message(
            $crate::error::JavaExceptionKind::$kind,
            format!($($fmt)+),
        ))
    };
}

/// `Err(build_exception!(...))`, usable directly as a match arm or with `?`.
#[macro_export]
macro_rules! throw_exception {
    ($($arg:tt)+) => {
        Err($crate::build_exception!($($arg)+))
    };
}
