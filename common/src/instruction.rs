//! Canonical bytecode instruction model.
//!
//! After pre-processing, family opcodes are collapsed onto their general
//! form: `aload_<n>` becomes `aload n` (same for the other load/store
//! families), `bipush`/`sipush`/`iconst_<n>` become `iconst`, `ldc_w`
//! becomes `ldc`, `goto_w`/`jsr_w` become `goto`/`jsr`, and `wide` is
//! absorbed into the operand of the instruction it prefixes. Branch operands
//! hold *instruction indices*, not byte offsets; the pre-processor is the
//! only producer of these values.

use crate::jtype::PrimitiveType;
use num_enum::TryFromPrimitive;

/// `newarray` element kinds, numbered as in the instruction encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ArrayType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl ArrayType {
    pub fn as_primitive(self) -> PrimitiveType {
        match self {
            ArrayType::Boolean => PrimitiveType::Boolean,
            ArrayType::Char => PrimitiveType::Char,
            ArrayType::Float => PrimitiveType::Float,
            ArrayType::Double => PrimitiveType::Double,
            ArrayType::Byte => PrimitiveType::Byte,
            ArrayType::Short => PrimitiveType::Short,
            ArrayType::Int => PrimitiveType::Int,
            ArrayType::Long => PrimitiveType::Long,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSwitchData {
    pub default_target: u32,
    pub low: i32,
    pub high: i32,
    pub targets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupSwitchData {
    pub default_target: u32,
    pub pairs: Vec<(i32, u32)>,
}

/// One canonical instruction. Operand-free opcodes come first, then the
/// groups by operand shape, mirroring the order in which the interpreter
/// contract describes them.
#[derive(Debug, Clone, PartialEq)]
pub enum InsnKind {
    // No operands
    Nop,
    Aaload,
    Aastore,
    AconstNull,
    Areturn,
    Arraylength,
    Athrow,
    Baload,
    Bastore,
    Caload,
    Castore,
    D2f,
    D2i,
    D2l,
    Dadd,
    Daload,
    Dastore,
    Dcmpg,
    Dcmpl,
    Ddiv,
    Dmul,
    Dneg,
    Drem,
    Dreturn,
    Dsub,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    F2d,
    F2i,
    F2l,
    Fadd,
    Faload,
    Fastore,
    Fcmpg,
    Fcmpl,
    Fdiv,
    Fmul,
    Fneg,
    Frem,
    Freturn,
    Fsub,
    I2b,
    I2c,
    I2d,
    I2f,
    I2l,
    I2s,
    Iadd,
    Iaload,
    Iand,
    Iastore,
    Idiv,
    Imul,
    Ineg,
    Ior,
    Irem,
    Ireturn,
    Ishl,
    Ishr,
    Isub,
    Iushr,
    Ixor,
    L2d,
    L2f,
    L2i,
    Ladd,
    Laload,
    Land,
    Lastore,
    Lcmp,
    Ldiv,
    Lmul,
    Lneg,
    Lor,
    Lrem,
    Lreturn,
    Lshl,
    Lshr,
    Lsub,
    Lushr,
    Lxor,
    Monitorenter,
    Monitorexit,
    Pop,
    Pop2,
    Return,
    Saload,
    Sastore,
    Swap,

    // Constant-pool index
    Anewarray(u16),
    Checkcast(u16),
    Getfield(u16),
    Getstatic(u16),
    Instanceof(u16),
    InvokeDynamic(u16),
    New(u16),
    Putfield(u16),
    Putstatic(u16),
    InvokeVirtual(u16),
    InvokeSpecial(u16),
    InvokeStatic(u16),
    Ldc(u16),
    Ldc2W(u16),

    // Local-table index
    Dload(u16),
    Fload(u16),
    Iload(u16),
    Lload(u16),
    Aload(u16),
    Dstore(u16),
    Fstore(u16),
    Istore(u16),
    Lstore(u16),
    Astore(u16),

    // Branch target as instruction index
    Goto(u32),
    Jsr(u32),
    IfAcmpeq(u32),
    IfAcmpne(u32),
    IfIcmpeq(u32),
    IfIcmpne(u32),
    IfIcmplt(u32),
    IfIcmpge(u32),
    IfIcmpgt(u32),
    IfIcmple(u32),
    Ifeq(u32),
    Ifne(u32),
    Iflt(u32),
    Ifge(u32),
    Ifgt(u32),
    Ifle(u32),
    Ifnonnull(u32),
    Ifnull(u32),

    // Immediates, canonicalised
    Iconst(i32),
    Lconst(i64),
    Fconst(f32),
    Dconst(f64),

    // The rest
    Iinc { index: u16, delta: i16 },
    InvokeInterface { index: u16, count: u8 },
    MultiAnewArray { index: u16, dimensions: u8 },
    NewArray(ArrayType),
    TableSwitch(Box<TableSwitchData>),
    LookupSwitch(Box<LookupSwitchData>),
    Ret(u16),
}

/// One pre-processed instruction: its original byte program counter plus the
/// canonical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub pc: u32,
    pub kind: InsnKind,
}

impl InsnKind {
    /// Conditional branches fall through *and* jump.
    pub fn is_conditional_branch(&self) -> bool {
        matches!(
            self,
            InsnKind::IfAcmpeq(_)
                | InsnKind::IfAcmpne(_)
                | InsnKind::IfIcmpeq(_)
                | InsnKind::IfIcmpne(_)
                | InsnKind::IfIcmplt(_)
                | InsnKind::IfIcmpge(_)
                | InsnKind::IfIcmpgt(_)
                | InsnKind::IfIcmple(_)
                | InsnKind::Ifeq(_)
                | InsnKind::Ifne(_)
                | InsnKind::Iflt(_)
                | InsnKind::Ifge(_)
                | InsnKind::Ifgt(_)
                | InsnKind::Ifle(_)
                | InsnKind::Ifnonnull(_)
                | InsnKind::Ifnull(_)
        )
    }

    /// Control never reaches the following instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            InsnKind::Goto(_)
                | InsnKind::Athrow
                | InsnKind::Return
                | InsnKind::Areturn
                | InsnKind::Ireturn
                | InsnKind::Lreturn
                | InsnKind::Freturn
                | InsnKind::Dreturn
                | InsnKind::TableSwitch(_)
                | InsnKind::LookupSwitch(_)
                | InsnKind::Ret(_)
        )
    }

    /// Any instruction that carries a rewritten branch target.
    pub fn is_branch(&self) -> bool {
        self.is_conditional_branch()
            || matches!(
                self,
                InsnKind::Goto(_)
                    | InsnKind::Jsr(_)
                    | InsnKind::TableSwitch(_)
                    | InsnKind::LookupSwitch(_)
            )
    }

    /// Explicit jump targets (not including fall-through), as instruction
    /// indices. Passed a scratch vector so CFG construction can reuse one
    /// allocation.
    pub fn collect_targets(&self, out: &mut Vec<u32>) {
        out.clear();
        match self {
            InsnKind::Goto(t)
            | InsnKind::Jsr(t)
            | InsnKind::IfAcmpeq(t)
            | InsnKind::IfAcmpne(t)
            | InsnKind::IfIcmpeq(t)
            | InsnKind::IfIcmpne(t)
            | InsnKind::IfIcmplt(t)
            | InsnKind::IfIcmpge(t)
            | InsnKind::IfIcmpgt(t)
            | InsnKind::IfIcmple(t)
            | InsnKind::Ifeq(t)
            | InsnKind::Ifne(t)
            | InsnKind::Iflt(t)
            | InsnKind::Ifge(t)
            | InsnKind::Ifgt(t)
            | InsnKind::Ifle(t)
            | InsnKind::Ifnonnull(t)
            | InsnKind::Ifnull(t) => out.push(*t),
            InsnKind::TableSwitch(data) => {
                out.push(data.default_target);
                out.extend_from_slice(&data.targets);
            }
            InsnKind::LookupSwitch(data) => {
                out.push(data.default_target);
                out.extend(data.pairs.iter().map(|&(_, t)| t));
            }
            _ => {}
        }
    }
}
