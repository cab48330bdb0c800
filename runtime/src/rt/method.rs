use crate::analysis::{self, CodeAnalysis};
use crate::bytecode;
use crate::error::JvmError;
use crate::heap::ObjSlot;
use crate::keys::{ClassId, MethodDescriptorId};
use crate::rt::constant_pool::RuntimeConstantPool;
use crate::{Symbol, throw_exception};
use lasso::ThreadedRodeo;
use once_cell::sync::OnceCell;
use skadi_classfile::attribute::method::MethodAttribute;
use skadi_classfile::attribute::method::code::{CodeAttributeInfo, LineNumberEntry};
use skadi_classfile::flags::MethodFlags;
use skadi_classfile::method::MethodInfo;
use skadi_common::descriptor::MethodDescriptor;
use skadi_common::instruction::{Insn, InsnKind};
use skadi_common::jtype::TypeKind;

/// One exception-table row after pre-processing, in instruction indices.
/// `end_insn` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_insn: u32,
    pub end_insn: u32,
    pub handler_insn: u32,
    pub catch_type: u16,
}

/// Per-call-site cache objects for `invokedynamic` and
/// signature-polymorphic sites. Both slots are GC roots.
#[derive(Debug)]
pub struct CallSiteCache {
    pub insn_index: u32,
    pub call_site: ObjSlot,
    pub method_type: ObjSlot,
}

pub struct CodeBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub insns: Vec<Insn>,
    pub exception_table: Vec<ExceptionHandler>,
    line_numbers: Option<Vec<LineNumberEntry>>,
    pub call_site_caches: Vec<CallSiteCache>,
    analysis: OnceCell<CodeAnalysis>,
}

pub enum MethodBody {
    Interpreted(CodeBody),
    Native,
    Abstract,
}

pub struct Method {
    class_id: ClassId,
    pub name: Symbol,
    pub desc: Symbol,
    descriptor_id: MethodDescriptorId,
    flags: MethodFlags,
    body: MethodBody,
    is_signature_polymorphic: bool,
    pub reflection_method: ObjSlot,
    pub reflection_ctor: ObjSlot,
    pub method_type_obj: ObjSlot,
}

impl Method {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method_info: MethodInfo,
        class_id: ClassId,
        descriptor_id: MethodDescriptorId,
        name: Symbol,
        desc: Symbol,
        holder_name: &str,
        descriptor: &MethodDescriptor,
        cp: &RuntimeConstantPool,
        interner: &ThreadedRodeo,
    ) -> Result<Self, JvmError> {
        let flags = method_info.access_flags;
        let body = if flags.is_abstract() {
            MethodBody::Abstract
        } else if flags.is_native() {
            MethodBody::Native
        } else {
            let code_attr = method_info
                .attributes
                .iter()
                .find_map(|attr| match attr {
                    MethodAttribute::Code(code) => Some(code),
                    _ => None,
                })
                .ok_or_else(|| {
                    JvmError::Linkage(format!(
                        "method {} has neither code nor a native/abstract flag",
                        interner.resolve(&name)
                    ))
                })?;

            let insns = bytecode::preprocess(&code_attr.code, cp.len())?;
            let exception_table = bytecode::rewrite_exception_table(
                &code_attr.exception_table,
                &insns,
                code_attr.code.len(),
            )?;

            let mut line_numbers: Option<Vec<LineNumberEntry>> = None;
            for attr in &code_attr.attributes {
                if let CodeAttributeInfo::LineNumberTable(entries) = attr {
                    line_numbers
                        .get_or_insert_with(Vec::new)
                        .extend_from_slice(entries);
                }
            }

            let call_site_caches = collect_call_site_caches(&insns, cp, interner);

            MethodBody::Interpreted(CodeBody {
                max_stack: code_attr.max_stack,
                max_locals: code_attr.max_locals,
                insns,
                exception_table,
                line_numbers,
                call_site_caches,
                analysis: OnceCell::new(),
            })
        };

        Ok(Method {
            class_id,
            name,
            desc,
            descriptor_id,
            flags,
            body,
            is_signature_polymorphic: is_signature_polymorphic(holder_name, flags, descriptor),
            reflection_method: ObjSlot::new(),
            reflection_ctor: ObjSlot::new(),
            method_type_obj: ObjSlot::new(),
        })
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    pub fn is_native(&self) -> bool {
        self.flags.is_native()
    }

    pub fn is_signature_polymorphic(&self) -> bool {
        self.is_signature_polymorphic
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn descriptor_id(&self) -> MethodDescriptorId {
        self.descriptor_id
    }

    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    pub fn code(&self) -> Result<&CodeBody, JvmError> {
        match &self.body {
            MethodBody::Interpreted(code) => Ok(code),
            _ => throw_exception!(InternalError, "method has no bytecode body"),
        }
    }

    pub fn frame_attributes(&self) -> Result<(u16, u16), JvmError> {
        let code = self.code()?;
        Ok((code.max_stack, code.max_locals))
    }

    pub fn exception_table(&self) -> Result<&[ExceptionHandler], JvmError> {
        Ok(&self.code()?.exception_table)
    }

    /// Runs the abstract interpretation on first use and caches the result
    /// for the method's lifetime. The collector requires this to have
    /// happened before any frame of this method is walked.
    pub fn ensure_analysis(
        &self,
        cp: &RuntimeConstantPool,
        interner: &ThreadedRodeo,
        descriptor: &MethodDescriptor,
    ) -> Result<&CodeAnalysis, JvmError> {
        let code = self.code()?;
        code.analysis
            .get_or_try_init(|| {
                analysis::analyze(
                    &code.insns,
                    code.max_stack as usize,
                    code.max_locals as usize,
                    &code.exception_table,
                    cp,
                    interner,
                    descriptor,
                    self.is_static(),
                )
                .map_err(JvmError::from)
            })
    }

    pub fn analysis(&self) -> Option<&CodeAnalysis> {
        match &self.body {
            MethodBody::Interpreted(code) => code.analysis.get(),
            _ => None,
        }
    }

    /// Source line for a byte pc, from the (merged) line number tables.
    pub fn line_number_at(&self, pc: u32) -> Option<u16> {
        let MethodBody::Interpreted(code) = &self.body else {
            return None;
        };
        let table = code.line_numbers.as_ref()?;
        if table.is_empty() {
            return None;
        }
        let mut result = None;
        for entry in table {
            if entry.start_pc as u32 <= pc {
                result = Some(entry.line_number);
            }
        }
        result.or(Some(table[0].line_number))
    }
}

/// JVMS §2.9.3: a method is signature polymorphic iff it is declared in
/// `java/lang/invoke/MethodHandle` or `java/lang/invoke/VarHandle`, takes a
/// single `Object[]` argument, and is both native and varargs.
fn is_signature_polymorphic(
    holder_name: &str,
    flags: MethodFlags,
    descriptor: &MethodDescriptor,
) -> bool {
    if holder_name != "java/lang/invoke/MethodHandle"
        && holder_name != "java/lang/invoke/VarHandle"
    {
        return false;
    }
    if !flags.is_native() || !flags.is_varargs() {
        return false;
    }
    match descriptor.params.as_slice() {
        [only] => {
            only.dimensions == 1
                && only.kind == TypeKind::Reference
                && only.class_name.as_deref() == Some("java/lang/Object")
        }
        _ => false,
    }
}

/// `invokedynamic` sites always carry an inline cache; `invokevirtual`
/// sites get one when they name a method on `MethodHandle`/`VarHandle`,
/// which is where signature-polymorphic dispatch caches its method types.
fn collect_call_site_caches(
    insns: &[Insn],
    cp: &RuntimeConstantPool,
    interner: &ThreadedRodeo,
) -> Vec<CallSiteCache> {
    let mut caches = Vec::new();
    for (i, insn) in insns.iter().enumerate() {
        let needs_cache = match &insn.kind {
            InsnKind::InvokeDynamic(_) => true,
            InsnKind::InvokeVirtual(idx) => cp
                .get_method_view(idx, interner)
                .map(|view| {
                    let holder = interner.resolve(&view.class_sym);
                    holder == "java/lang/invoke/MethodHandle"
                        || holder == "java/lang/invoke/VarHandle"
                })
                .unwrap_or(false),
            _ => false,
        };
        if needs_cache {
            caches.push(CallSiteCache {
                insn_index: i as u32,
                call_site: ObjSlot::new(),
                method_type: ObjSlot::new(),
            });
        }
    }
    caches
}
