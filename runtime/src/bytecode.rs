//! Bytecode pre-processing: raw `Code` bytes become canonical [`Insn`]
//! records. Family opcodes collapse onto their general form, `wide` is
//! absorbed, switch payloads are decoded with their 4-byte alignment, and
//! every branch operand is rewritten from a byte offset to an instruction
//! index. `jsr`/`ret` are preserved.

use crate::rt::method::ExceptionHandler;
use skadi_classfile::attribute::method::ExceptionTableEntry;
use skadi_common::cursor::Cursor;
use skadi_common::instruction::{ArrayType, Insn, InsnKind, LookupSwitchData, TableSwitchData};
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    UnknownOpcode { opcode: u8, pc: u32 },
    TruncatedInstruction { pc: u32 },
    BadWideOpcode { opcode: u8, pc: u32 },
    BadNewArrayType { atype: u8, pc: u32 },
    BadConstantIndex { index: u16, pc: u32 },
    BadSwitch { pc: u32 },
    BadBranchTarget { pc: u32, target: i64 },
    BadExceptionRange { start_pc: u16, end_pc: u16, handler_pc: u16 },
    ZeroDimensions { pc: u32 },
}

impl Display for BytecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BytecodeError::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode {:#04x} at pc {}", opcode, pc)
            }
            BytecodeError::TruncatedInstruction { pc } => {
                write!(f, "instruction at pc {} runs past the end of the code", pc)
            }
            BytecodeError::BadWideOpcode { opcode, pc } => {
                write!(f, "opcode {:#04x} cannot be widened at pc {}", opcode, pc)
            }
            BytecodeError::BadNewArrayType { atype, pc } => {
                write!(f, "invalid newarray element kind {} at pc {}", atype, pc)
            }
            BytecodeError::BadConstantIndex { index, pc } => {
                write!(f, "constant pool operand {} out of range at pc {}", index, pc)
            }
            BytecodeError::BadSwitch { pc } => write!(f, "malformed switch at pc {}", pc),
            BytecodeError::BadBranchTarget { pc, target } => {
                write!(f, "branch from pc {} to byte offset {} is not an instruction boundary", pc, target)
            }
            BytecodeError::BadExceptionRange { start_pc, end_pc, handler_pc } => {
                write!(
                    f,
                    "exception table range [{}, {}) with handler {} does not align with instruction boundaries",
                    start_pc, end_pc, handler_pc
                )
            }
            BytecodeError::ZeroDimensions { pc } => {
                write!(f, "multianewarray with zero dimensions at pc {}", pc)
            }
        }
    }
}

/// Decodes and canonicalises a method body. `pool_len` bounds every
/// constant-pool operand.
pub fn preprocess(code: &[u8], pool_len: u16) -> Result<Vec<Insn>, BytecodeError> {
    let mut insns: Vec<Insn> = Vec::with_capacity(code.len() / 2);
    let mut pc_to_index: HashMap<u32, u32> = HashMap::with_capacity(code.len() / 2);

    let mut cursor = Cursor::new(code);
    while !cursor.is_empty() {
        let pc = cursor.position() as u32;
        pc_to_index.insert(pc, insns.len() as u32);
        // Branch payloads hold *absolute byte targets* until the second
        // pass maps them onto instruction indices.
        let kind = decode_one(&mut cursor, pc, pool_len)?;
        insns.push(Insn { pc, kind });
    }

    for i in 0..insns.len() {
        let pc = insns[i].pc;
        rewrite_targets(&mut insns[i].kind, pc, &pc_to_index)?;
    }
    Ok(insns)
}

/// Converts a raw exception table from byte pcs to instruction indices.
/// `end_pc` is exclusive and may equal the code length.
pub fn rewrite_exception_table(
    raw: &[ExceptionTableEntry],
    insns: &[Insn],
    code_len: usize,
) -> Result<Vec<ExceptionHandler>, BytecodeError> {
    let pc_to_index: HashMap<u32, u32> = insns
        .iter()
        .enumerate()
        .map(|(i, insn)| (insn.pc, i as u32))
        .collect();

    let mut handlers = Vec::with_capacity(raw.len());
    for entry in raw {
        let bad = || BytecodeError::BadExceptionRange {
            start_pc: entry.start_pc,
            end_pc: entry.end_pc,
            handler_pc: entry.handler_pc,
        };
        let start_insn = *pc_to_index.get(&(entry.start_pc as u32)).ok_or_else(bad)?;
        let end_insn = if entry.end_pc as usize == code_len {
            insns.len() as u32
        } else {
            *pc_to_index.get(&(entry.end_pc as u32)).ok_or_else(bad)?
        };
        let handler_insn = *pc_to_index.get(&(entry.handler_pc as u32)).ok_or_else(bad)?;
        if start_insn > end_insn {
            return Err(bad());
        }
        handlers.push(ExceptionHandler {
            start_insn,
            end_insn,
            handler_insn,
            catch_type: entry.catch_type,
        });
    }
    Ok(handlers)
}

fn check_cp(index: u16, pool_len: u16, pc: u32) -> Result<u16, BytecodeError> {
    if index == 0 || index >= pool_len {
        return Err(BytecodeError::BadConstantIndex { index, pc });
    }
    Ok(index)
}

fn abs_target(pc: u32, offset: i32) -> u32 {
    // Negative absolute targets have no boundary entry and fail pass 2.
    (pc as i64 + offset as i64) as u32
}

fn decode_one(cursor: &mut Cursor<'_>, pc: u32, pool_len: u16) -> Result<InsnKind, BytecodeError> {
    let truncated = |_| BytecodeError::TruncatedInstruction { pc };
    let opcode = cursor.read_u8().map_err(truncated)?;

    let kind = match opcode {
        0x00 => InsnKind::Nop,
        0x01 => InsnKind::AconstNull,
        // iconst_m1 .. iconst_5
        0x02..=0x08 => InsnKind::Iconst(opcode as i32 - 0x03),
        0x09 | 0x0a => InsnKind::Lconst((opcode - 0x09) as i64),
        0x0b..=0x0d => InsnKind::Fconst((opcode - 0x0b) as f32),
        0x0e | 0x0f => InsnKind::Dconst((opcode - 0x0e) as f64),
        // bipush / sipush fold into iconst
        0x10 => InsnKind::Iconst(cursor.read_i8().map_err(truncated)? as i32),
        0x11 => InsnKind::Iconst(cursor.read_i16().map_err(truncated)? as i32),
        0x12 => InsnKind::Ldc(check_cp(cursor.read_u8().map_err(truncated)? as u16, pool_len, pc)?),
        0x13 => InsnKind::Ldc(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0x14 => InsnKind::Ldc2W(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0x15 => InsnKind::Iload(cursor.read_u8().map_err(truncated)? as u16),
        0x16 => InsnKind::Lload(cursor.read_u8().map_err(truncated)? as u16),
        0x17 => InsnKind::Fload(cursor.read_u8().map_err(truncated)? as u16),
        0x18 => InsnKind::Dload(cursor.read_u8().map_err(truncated)? as u16),
        0x19 => InsnKind::Aload(cursor.read_u8().map_err(truncated)? as u16),
        0x1a..=0x1d => InsnKind::Iload((opcode - 0x1a) as u16),
        0x1e..=0x21 => InsnKind::Lload((opcode - 0x1e) as u16),
        0x22..=0x25 => InsnKind::Fload((opcode - 0x22) as u16),
        0x26..=0x29 => InsnKind::Dload((opcode - 0x26) as u16),
        0x2a..=0x2d => InsnKind::Aload((opcode - 0x2a) as u16),
        0x2e => InsnKind::Iaload,
        0x2f => InsnKind::Laload,
        0x30 => InsnKind::Faload,
        0x31 => InsnKind::Daload,
        0x32 => InsnKind::Aaload,
        0x33 => InsnKind::Baload,
        0x34 => InsnKind::Caload,
        0x35 => InsnKind::Saload,
        0x36 => InsnKind::Istore(cursor.read_u8().map_err(truncated)? as u16),
        0x37 => InsnKind::Lstore(cursor.read_u8().map_err(truncated)? as u16),
        0x38 => InsnKind::Fstore(cursor.read_u8().map_err(truncated)? as u16),
        0x39 => InsnKind::Dstore(cursor.read_u8().map_err(truncated)? as u16),
        0x3a => InsnKind::Astore(cursor.read_u8().map_err(truncated)? as u16),
        0x3b..=0x3e => InsnKind::Istore((opcode - 0x3b) as u16),
        0x3f..=0x42 => InsnKind::Lstore((opcode - 0x3f) as u16),
        0x43..=0x46 => InsnKind::Fstore((opcode - 0x43) as u16),
        0x47..=0x4a => InsnKind::Dstore((opcode - 0x47) as u16),
        0x4b..=0x4e => InsnKind::Astore((opcode - 0x4b) as u16),
        0x4f => InsnKind::Iastore,
        0x50 => InsnKind::Lastore,
        0x51 => InsnKind::Fastore,
        0x52 => InsnKind::Dastore,
        0x53 => InsnKind::Aastore,
        0x54 => InsnKind::Bastore,
        0x55 => InsnKind::Castore,
        0x56 => InsnKind::Sastore,
        0x57 => InsnKind::Pop,
        0x58 => InsnKind::Pop2,
        0x59 => InsnKind::Dup,
        0x5a => InsnKind::DupX1,
        0x5b => InsnKind::DupX2,
        0x5c => InsnKind::Dup2,
        0x5d => InsnKind::Dup2X1,
        0x5e => InsnKind::Dup2X2,
        0x5f => InsnKind::Swap,
        0x60 => InsnKind::Iadd,
        0x61 => InsnKind::Ladd,
        0x62 => InsnKind::Fadd,
        0x63 => InsnKind::Dadd,
        0x64 => InsnKind::Isub,
        0x65 => InsnKind::Lsub,
        0x66 => InsnKind::Fsub,
        0x67 => InsnKind::Dsub,
        0x68 => InsnKind::Imul,
        0x69 => InsnKind::Lmul,
        0x6a => InsnKind::Fmul,
        0x6b => InsnKind::Dmul,
        0x6c => InsnKind::Idiv,
        0x6d => InsnKind::Ldiv,
        0x6e => InsnKind::Fdiv,
        0x6f => InsnKind::Ddiv,
        0x70 => InsnKind::Irem,
        0x71 => InsnKind::Lrem,
        0x72 => InsnKind::Frem,
        0x73 => InsnKind::Drem,
        0x74 => InsnKind::Ineg,
        0x75 => InsnKind::Lneg,
        0x76 => InsnKind::Fneg,
        0x77 => InsnKind::Dneg,
        0x78 => InsnKind::Ishl,
        0x79 => InsnKind::Lshl,
        0x7a => InsnKind::Ishr,
        0x7b => InsnKind::Lshr,
        0x7c => InsnKind::Iushr,
        0x7d => InsnKind::Lushr,
        0x7e => InsnKind::Iand,
        0x7f => InsnKind::Land,
        0x80 => InsnKind::Ior,
        0x81 => InsnKind::Lor,
        0x82 => InsnKind::Ixor,
        0x83 => InsnKind::Lxor,
        0x84 => InsnKind::Iinc {
            index: cursor.read_u8().map_err(truncated)? as u16,
            delta: cursor.read_i8().map_err(truncated)? as i16,
        },
        0x85 => InsnKind::I2l,
        0x86 => InsnKind::I2f,
        0x87 => InsnKind::I2d,
        0x88 => InsnKind::L2i,
        0x89 => InsnKind::L2f,
        0x8a => InsnKind::L2d,
        0x8b => InsnKind::F2i,
        0x8c => InsnKind::F2l,
        0x8d => InsnKind::F2d,
        0x8e => InsnKind::D2i,
        0x8f => InsnKind::D2l,
        0x90 => InsnKind::D2f,
        0x91 => InsnKind::I2b,
        0x92 => InsnKind::I2c,
        0x93 => InsnKind::I2s,
        0x94 => InsnKind::Lcmp,
        0x95 => InsnKind::Fcmpl,
        0x96 => InsnKind::Fcmpg,
        0x97 => InsnKind::Dcmpl,
        0x98 => InsnKind::Dcmpg,
        0x99 => InsnKind::Ifeq(branch16(cursor, pc)?),
        0x9a => InsnKind::Ifne(branch16(cursor, pc)?),
        0x9b => InsnKind::Iflt(branch16(cursor, pc)?),
        0x9c => InsnKind::Ifge(branch16(cursor, pc)?),
        0x9d => InsnKind::Ifgt(branch16(cursor, pc)?),
        0x9e => InsnKind::Ifle(branch16(cursor, pc)?),
        0x9f => InsnKind::IfIcmpeq(branch16(cursor, pc)?),
        0xa0 => InsnKind::IfIcmpne(branch16(cursor, pc)?),
        0xa1 => InsnKind::IfIcmplt(branch16(cursor, pc)?),
        0xa2 => InsnKind::IfIcmpge(branch16(cursor, pc)?),
        0xa3 => InsnKind::IfIcmpgt(branch16(cursor, pc)?),
        0xa4 => InsnKind::IfIcmple(branch16(cursor, pc)?),
        0xa5 => InsnKind::IfAcmpeq(branch16(cursor, pc)?),
        0xa6 => InsnKind::IfAcmpne(branch16(cursor, pc)?),
        0xa7 => InsnKind::Goto(branch16(cursor, pc)?),
        0xa8 => InsnKind::Jsr(branch16(cursor, pc)?),
        0xa9 => InsnKind::Ret(cursor.read_u8().map_err(truncated)? as u16),
        0xaa => {
            cursor.align_to(4).map_err(truncated)?;
            let default_target = abs_target(pc, cursor.read_i32().map_err(truncated)?);
            let low = cursor.read_i32().map_err(truncated)?;
            let high = cursor.read_i32().map_err(truncated)?;
            if low > high {
                return Err(BytecodeError::BadSwitch { pc });
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(abs_target(pc, cursor.read_i32().map_err(truncated)?));
            }
            InsnKind::TableSwitch(Box::new(TableSwitchData {
                default_target,
                low,
                high,
                targets,
            }))
        }
        0xab => {
            cursor.align_to(4).map_err(truncated)?;
            let default_target = abs_target(pc, cursor.read_i32().map_err(truncated)?);
            let npairs = cursor.read_i32().map_err(truncated)?;
            if npairs < 0 {
                return Err(BytecodeError::BadSwitch { pc });
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = cursor.read_i32().map_err(truncated)?;
                let target = abs_target(pc, cursor.read_i32().map_err(truncated)?);
                pairs.push((key, target));
            }
            InsnKind::LookupSwitch(Box::new(LookupSwitchData {
                default_target,
                pairs,
            }))
        }
        0xac => InsnKind::Ireturn,
        0xad => InsnKind::Lreturn,
        0xae => InsnKind::Freturn,
        0xaf => InsnKind::Dreturn,
        0xb0 => InsnKind::Areturn,
        0xb1 => InsnKind::Return,
        0xb2 => InsnKind::Getstatic(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xb3 => InsnKind::Putstatic(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xb4 => InsnKind::Getfield(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xb5 => InsnKind::Putfield(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xb6 => {
            InsnKind::InvokeVirtual(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?)
        }
        0xb7 => {
            InsnKind::InvokeSpecial(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?)
        }
        0xb8 => {
            InsnKind::InvokeStatic(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?)
        }
        0xb9 => {
            let index = check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?;
            let count = cursor.read_u8().map_err(truncated)?;
            cursor.skip(1).map_err(truncated)?;
            InsnKind::InvokeInterface { index, count }
        }
        0xba => {
            let index = check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?;
            cursor.skip(2).map_err(truncated)?;
            InsnKind::InvokeDynamic(index)
        }
        0xbb => InsnKind::New(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xbc => {
            let atype = cursor.read_u8().map_err(truncated)?;
            let array_type = ArrayType::try_from(atype)
                .map_err(|_| BytecodeError::BadNewArrayType { atype, pc })?;
            InsnKind::NewArray(array_type)
        }
        0xbd => InsnKind::Anewarray(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xbe => InsnKind::Arraylength,
        0xbf => InsnKind::Athrow,
        0xc0 => InsnKind::Checkcast(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xc1 => InsnKind::Instanceof(check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?),
        0xc2 => InsnKind::Monitorenter,
        0xc3 => InsnKind::Monitorexit,
        // wide
        0xc4 => {
            let widened = cursor.read_u8().map_err(truncated)?;
            let index = cursor.read_u16().map_err(truncated)?;
            match widened {
                0x15 => InsnKind::Iload(index),
                0x16 => InsnKind::Lload(index),
                0x17 => InsnKind::Fload(index),
                0x18 => InsnKind::Dload(index),
                0x19 => InsnKind::Aload(index),
                0x36 => InsnKind::Istore(index),
                0x37 => InsnKind::Lstore(index),
                0x38 => InsnKind::Fstore(index),
                0x39 => InsnKind::Dstore(index),
                0x3a => InsnKind::Astore(index),
                0x84 => InsnKind::Iinc {
                    index,
                    delta: cursor.read_i16().map_err(truncated)?,
                },
                0xa9 => InsnKind::Ret(index),
                opcode => return Err(BytecodeError::BadWideOpcode { opcode, pc }),
            }
        }
        0xc5 => {
            let index = check_cp(cursor.read_u16().map_err(truncated)?, pool_len, pc)?;
            let dimensions = cursor.read_u8().map_err(truncated)?;
            if dimensions == 0 {
                return Err(BytecodeError::ZeroDimensions { pc });
            }
            InsnKind::MultiAnewArray { index, dimensions }
        }
        0xc6 => InsnKind::Ifnull(branch16(cursor, pc)?),
        0xc7 => InsnKind::Ifnonnull(branch16(cursor, pc)?),
        // goto_w / jsr_w fold onto goto / jsr
        0xc8 => InsnKind::Goto(abs_target(pc, cursor.read_i32().map_err(truncated)?)),
        0xc9 => InsnKind::Jsr(abs_target(pc, cursor.read_i32().map_err(truncated)?)),
        opcode => return Err(BytecodeError::UnknownOpcode { opcode, pc }),
    };
    Ok(kind)
}

fn branch16(cursor: &mut Cursor<'_>, pc: u32) -> Result<u32, BytecodeError> {
    let offset = cursor
        .read_i16()
        .map_err(|_| BytecodeError::TruncatedInstruction { pc })?;
    Ok(abs_target(pc, offset as i32))
}

fn rewrite_targets(
    kind: &mut InsnKind,
    pc: u32,
    pc_to_index: &HashMap<u32, u32>,
) -> Result<(), BytecodeError> {
    let map = |target: u32| {
        pc_to_index
            .get(&target)
            .copied()
            .ok_or(BytecodeError::BadBranchTarget {
                pc,
                target: target as i64,
            })
    };
    match kind {
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
        | InsnKind::Ifnull(t) => *t = map(*t)?,
        InsnKind::TableSwitch(data) => {
            data.default_target = map(data.default_target)?;
            for target in &mut data.targets {
                *target = map(*target)?;
            }
        }
        InsnKind::LookupSwitch(data) => {
            data.default_target = map(data.default_target)?;
            for (_, target) in &mut data.pairs {
                *target = map(*target)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: u16 = 64;

    #[test]
    fn canonicalises_families() {
        // iconst_2; bipush 100; sipush -2; aload_0; aload 5; istore_3; return
        let code = [
            0x05, 0x10, 100, 0x11, 0xff, 0xfe, 0x2a, 0x19, 5, 0x3e, 0xb1,
        ];
        let insns = preprocess(&code, POOL).unwrap();
        let kinds: Vec<_> = insns.iter().map(|i| i.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                InsnKind::Iconst(2),
                InsnKind::Iconst(100),
                InsnKind::Iconst(-2),
                InsnKind::Aload(0),
                InsnKind::Aload(5),
                InsnKind::Istore(3),
                InsnKind::Return,
            ]
        );
        assert_eq!(insns[1].pc, 1);
        assert_eq!(insns[3].pc, 6);
    }

    #[test]
    fn branch_targets_become_instruction_indices() {
        // 0: iconst_0; 1: ifeq +4 (-> pc 5); 4: nop; 5: return
        let code = [0x03, 0x99, 0x00, 0x04, 0x00, 0xb1];
        let insns = preprocess(&code, POOL).unwrap();
        assert_eq!(insns[1].kind, InsnKind::Ifeq(3));
    }

    #[test]
    fn backward_goto() {
        // 0: nop; 1: goto -1 (-> pc 0)
        let code = [0x00, 0xa7, 0xff, 0xff];
        let insns = preprocess(&code, POOL).unwrap();
        assert_eq!(insns[1].kind, InsnKind::Goto(0));
    }

    #[test]
    fn goto_w_folds_to_goto() {
        let code = [0xc8, 0x00, 0x00, 0x00, 0x05, 0xb1];
        let insns = preprocess(&code, POOL).unwrap();
        assert_eq!(insns[0].kind, InsnKind::Goto(1));
    }

    #[test]
    fn branch_into_operand_bytes_is_rejected() {
        // ifeq jumps into the middle of the following sipush.
        let code = [0x99, 0x00, 0x04, 0x11, 0x00, 0x01, 0xb1];
        assert!(matches!(
            preprocess(&code, POOL).unwrap_err(),
            BytecodeError::BadBranchTarget { .. }
        ));
    }

    #[test]
    fn wide_is_absorbed() {
        // wide iload 0x1234; wide iinc 0x0102 by -1; return
        let code = [
            0xc4, 0x15, 0x12, 0x34, 0xc4, 0x84, 0x01, 0x02, 0xff, 0xff, 0xb1,
        ];
        let insns = preprocess(&code, POOL).unwrap();
        assert_eq!(insns[0].kind, InsnKind::Iload(0x1234));
        assert_eq!(
            insns[1].kind,
            InsnKind::Iinc {
                index: 0x0102,
                delta: -1
            }
        );
    }

    #[test]
    fn tableswitch_alignment_and_targets() {
        // pc 0: nop, pc 1: tableswitch (pad to 4), default -> pc 1? use:
        //   default +23 -> pc 24, low 0 high 1, targets +23, +24
        let mut code = vec![0x00, 0xaa];
        code.extend_from_slice(&[0, 0]); // pad to offset 4
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&24i32.to_be_bytes());
        assert_eq!(code.len(), 24);
        code.push(0x00); // pc 24
        code.push(0xb1); // pc 25
        let insns = preprocess(&code, POOL).unwrap();
        match &insns[1].kind {
            InsnKind::TableSwitch(data) => {
                assert_eq!(data.default_target, 2);
                assert_eq!(data.targets, vec![2, 3]);
            }
            other => panic!("expected tableswitch, got {:?}", other),
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(
            preprocess(&[0xcb], POOL).unwrap_err(),
            BytecodeError::UnknownOpcode { opcode: 0xcb, .. }
        ));
    }

    #[test]
    fn truncated_operand_is_rejected() {
        assert!(matches!(
            preprocess(&[0x10], POOL).unwrap_err(),
            BytecodeError::TruncatedInstruction { pc: 0 }
        ));
    }

    #[test]
    fn pool_operand_out_of_range_is_rejected() {
        // ldc 63 is fine with a 64-slot pool, ldc 64 is not.
        assert!(preprocess(&[0x12, 63, 0xb1], POOL).is_ok());
        assert!(matches!(
            preprocess(&[0x12, 64, 0xb1], POOL).unwrap_err(),
            BytecodeError::BadConstantIndex { index: 64, .. }
        ));
    }

    #[test]
    fn jsr_and_ret_are_preserved() {
        // 0: jsr +4 -> pc 4; 3: return; 4: astore_1; 5: ret 1
        let code = [0xa8, 0x00, 0x04, 0xb1, 0x4c, 0xa9, 0x01];
        let insns = preprocess(&code, POOL).unwrap();
        assert_eq!(insns[0].kind, InsnKind::Jsr(2));
        assert_eq!(insns[3].kind, InsnKind::Ret(1));
    }
}
