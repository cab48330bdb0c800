//! Abstract interpretation over a single method.
//!
//! A work-list fixed point (in reverse post-order) computes the abstract
//! stack and locals at every instruction, from which the per-PC reference
//! bitmaps are derived: bit `k` is set iff abstract slot `k` holds a
//! reference, with `[0, max_stack)` covering the operand stack and
//! `[max_stack, max_stack + max_locals)` the locals. Longs and doubles
//! occupy two slots; the second is always `top` and never a reference
//! candidate. On top of the same CFG the module computes basic blocks, the
//! immediate-dominator tree and a T1/T2 reducibility check.

use crate::rt::constant_pool::{RuntimeConstant, RuntimeConstantPool};
use crate::rt::method::ExceptionHandler;
use lasso::ThreadedRodeo;
use smallvec::SmallVec;
use skadi_common::bitset::CompressedBitSet;
use skadi_common::descriptor::{FieldDescriptor, MethodDescriptor, parse_field_descriptor};
use skadi_common::instruction::{Insn, InsnKind};
use skadi_common::jtype::TypeKind;
use std::collections::BTreeSet;
use std::fmt::Display;

mod cfg;

pub use cfg::BasicBlock;

/// Unreachable blocks carry this sentinel in the dominator array.
pub const NO_IDOM: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct CodeAnalysis {
    /// One bitset per instruction, width `max_stack + max_locals`.
    pub insn_refs: Vec<CompressedBitSet>,
    pub blocks: Vec<BasicBlock>,
    /// `idom[b]` per block; the entry block dominates itself.
    pub idom: Vec<u32>,
    /// Whether T1/T2 transformations collapse the CFG to a single node.
    pub reducible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractKind {
    Top,
    Int,
    Long,
    Float,
    Double,
    Reference,
    ReturnAddress,
}

impl AbstractKind {
    fn merge(self, other: AbstractKind) -> AbstractKind {
        // Reference join reference is reference regardless of class; all
        // other mismatches collapse to top.
        if self == other { self } else { AbstractKind::Top }
    }
}

impl Display for AbstractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbstractKind::Top => "top",
            AbstractKind::Int => "int",
            AbstractKind::Long => "long",
            AbstractKind::Float => "float",
            AbstractKind::Double => "double",
            AbstractKind::Reference => "reference",
            AbstractKind::ReturnAddress => "return-address",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    StackUnderflow { pc: u32 },
    StackOverflow { pc: u32 },
    TypeMismatch { pc: u32, expected: AbstractKind, found: AbstractKind },
    BadLocal { pc: u32, index: u16 },
    StackShapeMismatch { pc: u32 },
    FallsOffEnd { pc: u32 },
    BadConstant { pc: u32, message: String },
    TooManyArgs,
}

impl Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::StackUnderflow { pc } => write!(f, "operand stack underflow at pc {}", pc),
            AnalysisError::StackOverflow { pc } => write!(f, "operand stack overflow at pc {}", pc),
            AnalysisError::TypeMismatch { pc, expected, found } => {
                write!(f, "expected {} on stack at pc {}, found {}", expected, pc, found)
            }
            AnalysisError::BadLocal { pc, index } => {
                write!(f, "local variable {} out of range or wrong kind at pc {}", index, pc)
            }
            AnalysisError::StackShapeMismatch { pc } => {
                write!(f, "incompatible stack depths meet at pc {}", pc)
            }
            AnalysisError::FallsOffEnd { pc } => {
                write!(f, "control flow runs off the end of the code after pc {}", pc)
            }
            AnalysisError::BadConstant { pc, message } => {
                write!(f, "bad constant operand at pc {}: {}", pc, message)
            }
            AnalysisError::TooManyArgs => write!(f, "method arguments exceed max_locals"),
        }
    }
}

impl From<AnalysisError> for crate::error::JvmError {
    fn from(value: AnalysisError) -> Self {
        crate::error::JvmError::Verify(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AbstractState {
    stack: SmallVec<[AbstractKind; 8]>,
    locals: SmallVec<[AbstractKind; 8]>,
}

impl AbstractState {
    fn merge_from(&mut self, other: &AbstractState, pc: u32) -> Result<bool, AnalysisError> {
        if self.stack.len() != other.stack.len() {
            return Err(AnalysisError::StackShapeMismatch { pc });
        }
        let mut changed = false;
        for (slot, incoming) in self.stack.iter_mut().zip(&other.stack) {
            let merged = slot.merge(*incoming);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        for (slot, incoming) in self.locals.iter_mut().zip(&other.locals) {
            let merged = slot.merge(*incoming);
            if merged != *slot {
                *slot = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Where control can go after one instruction, in instruction indices.
enum Flow {
    FallThrough,
    Branch(u32),
    Jump(u32),
    Switch(Vec<u32>),
    End,
}

pub fn analyze(
    insns: &[Insn],
    max_stack: usize,
    max_locals: usize,
    exception_table: &[ExceptionHandler],
    cp: &RuntimeConstantPool,
    interner: &ThreadedRodeo,
    descriptor: &MethodDescriptor,
    is_static: bool,
) -> Result<CodeAnalysis, AnalysisError> {
    let interp = Interp {
        insns,
        max_stack,
        max_locals,
        cp,
        interner,
    };
    let states = interp.run(exception_table, descriptor, is_static)?;

    let mut insn_refs = Vec::with_capacity(insns.len());
    for state in &states {
        let mut refs = CompressedBitSet::new(max_stack + max_locals);
        if let Some(state) = state {
            for (i, kind) in state.stack.iter().enumerate() {
                if *kind == AbstractKind::Reference {
                    refs.set(i);
                }
            }
            for (i, kind) in state.locals.iter().enumerate() {
                if *kind == AbstractKind::Reference {
                    refs.set(max_stack + i);
                }
            }
        }
        insn_refs.push(refs);
    }

    let blocks = cfg::scan_basic_blocks(insns, exception_table);
    let idom = cfg::compute_dominator_tree(&blocks);
    let reducible = cfg::attempt_reduce(&blocks);

    Ok(CodeAnalysis {
        insn_refs,
        blocks,
        idom,
        reducible,
    })
}

struct Interp<'a> {
    insns: &'a [Insn],
    max_stack: usize,
    max_locals: usize,
    cp: &'a RuntimeConstantPool,
    interner: &'a ThreadedRodeo,
}

impl<'a> Interp<'a> {
    fn run(
        &self,
        exception_table: &[ExceptionHandler],
        descriptor: &MethodDescriptor,
        is_static: bool,
    ) -> Result<Vec<Option<AbstractState>>, AnalysisError> {
        let mut states: Vec<Option<AbstractState>> = vec![None; self.insns.len()];
        if self.insns.is_empty() {
            return Ok(states);
        }

        let entry = self.entry_state(descriptor, is_static)?;
        states[0] = Some(entry);

        // Worklist ordered by reverse post-order so most merges see their
        // predecessors first.
        let rpo_rank = cfg::insn_rpo_rank(self.insns, exception_table);
        let mut worklist: BTreeSet<(u32, u32)> = BTreeSet::new();
        worklist.insert((rpo_rank[0], 0));

        let mut scratch_targets = Vec::new();
        while let Some((_, index)) = worklist.pop_first() {
            let insn = &self.insns[index as usize];
            let in_state = states[index as usize]
                .clone()
                .expect("worklist entries always have a state");

            // Anything protected by a handler can reach it with any stack
            // shape; the handler entry state is the exception alone on the
            // stack plus the locals as they are here.
            for handler in exception_table {
                if index >= handler.start_insn && index < handler.end_insn {
                    let mut handler_state = AbstractState {
                        stack: SmallVec::new(),
                        locals: in_state.locals.clone(),
                    };
                    handler_state.stack.push(AbstractKind::Reference);
                    self.merge_into(
                        &mut states,
                        &mut worklist,
                        &rpo_rank,
                        handler.handler_insn,
                        handler_state,
                        insn.pc,
                    )?;
                }
            }

            let mut state = in_state;
            let flow = self.step(&mut state, insn, &mut scratch_targets)?;

            let mut push_target = |states: &mut Vec<Option<AbstractState>>,
                                   worklist: &mut BTreeSet<(u32, u32)>,
                                   target: u32,
                                   state: AbstractState|
             -> Result<(), AnalysisError> {
                self.merge_into(states, worklist, &rpo_rank, target, state, insn.pc)
            };

            match flow {
                Flow::FallThrough => {
                    push_target(&mut states, &mut worklist, index + 1, state)?;
                }
                Flow::Branch(target) => {
                    push_target(&mut states, &mut worklist, target, state.clone())?;
                    push_target(&mut states, &mut worklist, index + 1, state)?;
                }
                Flow::Jump(target) => {
                    push_target(&mut states, &mut worklist, target, state)?;
                }
                Flow::Switch(targets) => {
                    for target in targets {
                        push_target(&mut states, &mut worklist, target, state.clone())?;
                    }
                }
                Flow::End => {}
            }
        }

        Ok(states)
    }

    fn merge_into(
        &self,
        states: &mut Vec<Option<AbstractState>>,
        worklist: &mut BTreeSet<(u32, u32)>,
        rpo_rank: &[u32],
        target: u32,
        incoming: AbstractState,
        from_pc: u32,
    ) -> Result<(), AnalysisError> {
        let Some(slot) = states.get_mut(target as usize) else {
            return Err(AnalysisError::FallsOffEnd { pc: from_pc });
        };
        let changed = match slot {
            None => {
                *slot = Some(incoming);
                true
            }
            Some(existing) => existing.merge_from(&incoming, from_pc)?,
        };
        if changed {
            worklist.insert((rpo_rank[target as usize], target));
        }
        Ok(())
    }

    fn entry_state(
        &self,
        descriptor: &MethodDescriptor,
        is_static: bool,
    ) -> Result<AbstractState, AnalysisError> {
        let mut locals: SmallVec<[AbstractKind; 8]> =
            SmallVec::from_elem(AbstractKind::Top, self.max_locals);
        let mut next = 0usize;
        let mut place = |kind: AbstractKind, wide: bool| -> Result<(), AnalysisError> {
            let needed = if wide { 2 } else { 1 };
            if next + needed > self.max_locals {
                return Err(AnalysisError::TooManyArgs);
            }
            locals[next] = kind;
            next += needed;
            Ok(())
        };
        if !is_static {
            place(AbstractKind::Reference, false)?;
        }
        for param in &descriptor.params {
            let kind = field_abstract_kind(param);
            place(kind, param.is_wide())?;
        }
        Ok(AbstractState {
            stack: SmallVec::new(),
            locals,
        })
    }

    // Stack helpers. `pc` is only for diagnostics.

    fn push(&self, s: &mut AbstractState, kind: AbstractKind, pc: u32) -> Result<(), AnalysisError> {
        if s.stack.len() >= self.max_stack {
            return Err(AnalysisError::StackOverflow { pc });
        }
        s.stack.push(kind);
        Ok(())
    }

    fn push_kind(&self, s: &mut AbstractState, kind: AbstractKind, pc: u32) -> Result<(), AnalysisError> {
        self.push(s, kind, pc)?;
        if matches!(kind, AbstractKind::Long | AbstractKind::Double) {
            self.push(s, AbstractKind::Top, pc)?;
        }
        Ok(())
    }

    fn pop_any(&self, s: &mut AbstractState, pc: u32) -> Result<AbstractKind, AnalysisError> {
        s.stack.pop().ok_or(AnalysisError::StackUnderflow { pc })
    }

    fn pop_expect(
        &self,
        s: &mut AbstractState,
        expected: AbstractKind,
        pc: u32,
    ) -> Result<(), AnalysisError> {
        let found = self.pop_any(s, pc)?;
        if found != expected {
            return Err(AnalysisError::TypeMismatch { pc, expected, found });
        }
        Ok(())
    }

    /// Pops a value of the given kind, accounting for the `top` filler slot
    /// above longs and doubles.
    fn pop_kind(
        &self,
        s: &mut AbstractState,
        kind: AbstractKind,
        pc: u32,
    ) -> Result<(), AnalysisError> {
        if matches!(kind, AbstractKind::Long | AbstractKind::Double) {
            self.pop_expect(s, AbstractKind::Top, pc)?;
        }
        self.pop_expect(s, kind, pc)
    }

    fn load_local(
        &self,
        s: &mut AbstractState,
        index: u16,
        kind: AbstractKind,
        pc: u32,
    ) -> Result<(), AnalysisError> {
        let wide = matches!(kind, AbstractKind::Long | AbstractKind::Double);
        let needed = if wide { 2 } else { 1 };
        if index as usize + needed > self.max_locals {
            return Err(AnalysisError::BadLocal { pc, index });
        }
        if s.locals[index as usize] != kind
            || (wide && s.locals[index as usize + 1] != AbstractKind::Top)
        {
            return Err(AnalysisError::BadLocal { pc, index });
        }
        self.push_kind(s, kind, pc)
    }

    fn store_local(
        &self,
        s: &mut AbstractState,
        index: u16,
        kind: AbstractKind,
        pc: u32,
    ) -> Result<(), AnalysisError> {
        let wide = matches!(kind, AbstractKind::Long | AbstractKind::Double);
        let needed = if wide { 2 } else { 1 };
        if index as usize + needed > self.max_locals {
            return Err(AnalysisError::BadLocal { pc, index });
        }
        // Overwriting the second half of a wide value kills the first.
        if index > 0
            && matches!(
                s.locals[index as usize - 1],
                AbstractKind::Long | AbstractKind::Double
            )
        {
            s.locals[index as usize - 1] = AbstractKind::Top;
        }
        s.locals[index as usize] = kind;
        if wide {
            s.locals[index as usize + 1] = AbstractKind::Top;
        }
        Ok(())
    }

    fn field_kind_at(&self, idx: u16, pc: u32) -> Result<FieldDescriptor, AnalysisError> {
        let view = self
            .cp
            .get_field_view(&idx, self.interner)
            .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })?;
        let desc_str = self.interner.resolve(&view.nat.desc);
        let mut pos = 0;
        parse_field_descriptor(desc_str, &mut pos)
            .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })
    }

    fn method_descriptor_at(
        &self,
        idx: u16,
        pc: u32,
        kind: MethodRefKind,
    ) -> Result<MethodDescriptor, AnalysisError> {
        let bad = |e: crate::error::JvmError| AnalysisError::BadConstant {
            pc,
            message: e.to_string(),
        };
        let view = match kind {
            MethodRefKind::Virtual => self.cp.get_method_view(&idx, self.interner).map_err(bad)?,
            MethodRefKind::Interface => self
                .cp
                .get_interface_method_view(&idx, self.interner)
                .map_err(bad)?,
            MethodRefKind::Either => self
                .cp
                .get_method_or_interface_method_view(&idx, self.interner)
                .map_err(bad)?,
        };
        let desc_str = self.interner.resolve(&view.nat.desc);
        MethodDescriptor::try_from(desc_str)
            .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })
    }

    fn invoke(
        &self,
        s: &mut AbstractState,
        descriptor: &MethodDescriptor,
        has_receiver: bool,
        pc: u32,
    ) -> Result<(), AnalysisError> {
        for param in descriptor.params.iter().rev() {
            self.pop_kind(s, field_abstract_kind(param), pc)?;
        }
        if has_receiver {
            self.pop_expect(s, AbstractKind::Reference, pc)?;
        }
        if !(descriptor.ret.kind == TypeKind::Void && !descriptor.ret.is_array()) {
            self.push_kind(s, field_abstract_kind(&descriptor.ret), pc)?;
        }
        Ok(())
    }

    fn step(
        &self,
        s: &mut AbstractState,
        insn: &Insn,
        scratch: &mut Vec<u32>,
    ) -> Result<Flow, AnalysisError> {
        use AbstractKind::*;
        let pc = insn.pc;

        let flow = match &insn.kind {
            InsnKind::Nop => Flow::FallThrough,

            InsnKind::AconstNull => {
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Iconst(_) => {
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lconst(_) => {
                self.push_kind(s, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fconst(_) => {
                self.push(s, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dconst(_) => {
                self.push_kind(s, Double, pc)?;
                Flow::FallThrough
            }

            InsnKind::Ldc(idx) => {
                let entry = self
                    .cp
                    .entry(idx)
                    .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })?;
                let kind = match entry {
                    RuntimeConstant::Integer(_) => Int,
                    RuntimeConstant::Float(_) => Float,
                    RuntimeConstant::String(_)
                    | RuntimeConstant::Class(_)
                    | RuntimeConstant::MethodType(_)
                    | RuntimeConstant::MethodHandle(_) => Reference,
                    other => {
                        return Err(AnalysisError::BadConstant {
                            pc,
                            message: format!("ldc of {}", other.get_type()),
                        });
                    }
                };
                self.push(s, kind, pc)?;
                Flow::FallThrough
            }
            InsnKind::Ldc2W(idx) => {
                let entry = self
                    .cp
                    .entry(idx)
                    .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })?;
                let kind = match entry {
                    RuntimeConstant::Long(_) => Long,
                    RuntimeConstant::Double(_) => Double,
                    other => {
                        return Err(AnalysisError::BadConstant {
                            pc,
                            message: format!("ldc2_w of {}", other.get_type()),
                        });
                    }
                };
                self.push_kind(s, kind, pc)?;
                Flow::FallThrough
            }

            InsnKind::Iload(n) => {
                self.load_local(s, *n, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lload(n) => {
                self.load_local(s, *n, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fload(n) => {
                self.load_local(s, *n, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dload(n) => {
                self.load_local(s, *n, Double, pc)?;
                Flow::FallThrough
            }
            InsnKind::Aload(n) => {
                self.load_local(s, *n, Reference, pc)?;
                Flow::FallThrough
            }

            InsnKind::Istore(n) => {
                self.pop_expect(s, Int, pc)?;
                self.store_local(s, *n, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lstore(n) => {
                self.pop_kind(s, Long, pc)?;
                self.store_local(s, *n, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fstore(n) => {
                self.pop_expect(s, Float, pc)?;
                self.store_local(s, *n, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dstore(n) => {
                self.pop_kind(s, Double, pc)?;
                self.store_local(s, *n, Double, pc)?;
                Flow::FallThrough
            }
            InsnKind::Astore(n) => {
                // astore also accepts the return address pushed by jsr.
                let found = self.pop_any(s, pc)?;
                if found != Reference && found != ReturnAddress {
                    return Err(AnalysisError::TypeMismatch { pc, expected: Reference, found });
                }
                self.store_local(s, *n, found, pc)?;
                Flow::FallThrough
            }

            InsnKind::Iaload | InsnKind::Baload | InsnKind::Caload | InsnKind::Saload => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Laload => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push_kind(s, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Faload => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Daload => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push_kind(s, Double, pc)?;
                Flow::FallThrough
            }
            InsnKind::Aaload => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }

            InsnKind::Iastore | InsnKind::Bastore | InsnKind::Castore | InsnKind::Sastore => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lastore => {
                self.pop_kind(s, Long, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fastore => {
                self.pop_expect(s, Float, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dastore => {
                self.pop_kind(s, Double, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Aastore => {
                self.pop_expect(s, Reference, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }

            InsnKind::Pop => {
                self.pop_any(s, pc)?;
                Flow::FallThrough
            }
            InsnKind::Pop2 => {
                self.pop_any(s, pc)?;
                self.pop_any(s, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dup => {
                let top = *s.stack.last().ok_or(AnalysisError::StackUnderflow { pc })?;
                self.push(s, top, pc)?;
                Flow::FallThrough
            }
            InsnKind::DupX1 => {
                let v1 = self.pop_any(s, pc)?;
                let v2 = self.pop_any(s, pc)?;
                self.push(s, v1, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                Flow::FallThrough
            }
            InsnKind::DupX2 => {
                let v1 = self.pop_any(s, pc)?;
                let v2 = self.pop_any(s, pc)?;
                let v3 = self.pop_any(s, pc)?;
                self.push(s, v1, pc)?;
                self.push(s, v3, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dup2 => {
                let len = s.stack.len();
                if len < 2 {
                    return Err(AnalysisError::StackUnderflow { pc });
                }
                let v2 = s.stack[len - 2];
                let v1 = s.stack[len - 1];
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dup2X1 => {
                let v1 = self.pop_any(s, pc)?;
                let v2 = self.pop_any(s, pc)?;
                let v3 = self.pop_any(s, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                self.push(s, v3, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dup2X2 => {
                let v1 = self.pop_any(s, pc)?;
                let v2 = self.pop_any(s, pc)?;
                let v3 = self.pop_any(s, pc)?;
                let v4 = self.pop_any(s, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                self.push(s, v4, pc)?;
                self.push(s, v3, pc)?;
                self.push(s, v2, pc)?;
                self.push(s, v1, pc)?;
                Flow::FallThrough
            }
            InsnKind::Swap => {
                let v1 = self.pop_any(s, pc)?;
                let v2 = self.pop_any(s, pc)?;
                self.push(s, v1, pc)?;
                self.push(s, v2, pc)?;
                Flow::FallThrough
            }

            InsnKind::Iadd
            | InsnKind::Isub
            | InsnKind::Imul
            | InsnKind::Idiv
            | InsnKind::Irem
            | InsnKind::Ishl
            | InsnKind::Ishr
            | InsnKind::Iushr
            | InsnKind::Iand
            | InsnKind::Ior
            | InsnKind::Ixor => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Int, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Ineg | InsnKind::I2b | InsnKind::I2c | InsnKind::I2s => {
                self.pop_expect(s, Int, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Ladd
            | InsnKind::Lsub
            | InsnKind::Lmul
            | InsnKind::Ldiv
            | InsnKind::Lrem
            | InsnKind::Land
            | InsnKind::Lor
            | InsnKind::Lxor => {
                self.pop_kind(s, Long, pc)?;
                self.pop_kind(s, Long, pc)?;
                self.push_kind(s, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lneg => {
                self.pop_kind(s, Long, pc)?;
                self.push_kind(s, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Lshl | InsnKind::Lshr | InsnKind::Lushr => {
                self.pop_expect(s, Int, pc)?;
                self.pop_kind(s, Long, pc)?;
                self.push_kind(s, Long, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fadd | InsnKind::Fsub | InsnKind::Fmul | InsnKind::Fdiv | InsnKind::Frem => {
                self.pop_expect(s, Float, pc)?;
                self.pop_expect(s, Float, pc)?;
                self.push(s, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fneg => {
                self.pop_expect(s, Float, pc)?;
                self.push(s, Float, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dadd | InsnKind::Dsub | InsnKind::Dmul | InsnKind::Ddiv | InsnKind::Drem => {
                self.pop_kind(s, Double, pc)?;
                self.pop_kind(s, Double, pc)?;
                self.push_kind(s, Double, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dneg => {
                self.pop_kind(s, Double, pc)?;
                self.push_kind(s, Double, pc)?;
                Flow::FallThrough
            }
            InsnKind::Iinc { index, .. } => {
                if *index as usize >= self.max_locals
                    || s.locals[*index as usize] != Int
                {
                    return Err(AnalysisError::BadLocal { pc, index: *index });
                }
                Flow::FallThrough
            }

            InsnKind::I2l => { self.pop_expect(s, Int, pc)?; self.push_kind(s, Long, pc)?; Flow::FallThrough }
            InsnKind::I2f => { self.pop_expect(s, Int, pc)?; self.push(s, Float, pc)?; Flow::FallThrough }
            InsnKind::I2d => { self.pop_expect(s, Int, pc)?; self.push_kind(s, Double, pc)?; Flow::FallThrough }
            InsnKind::L2i => { self.pop_kind(s, Long, pc)?; self.push(s, Int, pc)?; Flow::FallThrough }
            InsnKind::L2f => { self.pop_kind(s, Long, pc)?; self.push(s, Float, pc)?; Flow::FallThrough }
            InsnKind::L2d => { self.pop_kind(s, Long, pc)?; self.push_kind(s, Double, pc)?; Flow::FallThrough }
            InsnKind::F2i => { self.pop_expect(s, Float, pc)?; self.push(s, Int, pc)?; Flow::FallThrough }
            InsnKind::F2l => { self.pop_expect(s, Float, pc)?; self.push_kind(s, Long, pc)?; Flow::FallThrough }
            InsnKind::F2d => { self.pop_expect(s, Float, pc)?; self.push_kind(s, Double, pc)?; Flow::FallThrough }
            InsnKind::D2i => { self.pop_kind(s, Double, pc)?; self.push(s, Int, pc)?; Flow::FallThrough }
            InsnKind::D2l => { self.pop_kind(s, Double, pc)?; self.push_kind(s, Long, pc)?; Flow::FallThrough }
            InsnKind::D2f => { self.pop_kind(s, Double, pc)?; self.push(s, Float, pc)?; Flow::FallThrough }

            InsnKind::Lcmp => {
                self.pop_kind(s, Long, pc)?;
                self.pop_kind(s, Long, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Fcmpl | InsnKind::Fcmpg => {
                self.pop_expect(s, Float, pc)?;
                self.pop_expect(s, Float, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Dcmpl | InsnKind::Dcmpg => {
                self.pop_kind(s, Double, pc)?;
                self.pop_kind(s, Double, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }

            InsnKind::Ifeq(t) | InsnKind::Ifne(t) | InsnKind::Iflt(t) | InsnKind::Ifge(t)
            | InsnKind::Ifgt(t) | InsnKind::Ifle(t) => {
                self.pop_expect(s, Int, pc)?;
                Flow::Branch(*t)
            }
            InsnKind::IfIcmpeq(t) | InsnKind::IfIcmpne(t) | InsnKind::IfIcmplt(t)
            | InsnKind::IfIcmpge(t) | InsnKind::IfIcmpgt(t) | InsnKind::IfIcmple(t) => {
                self.pop_expect(s, Int, pc)?;
                self.pop_expect(s, Int, pc)?;
                Flow::Branch(*t)
            }
            InsnKind::IfAcmpeq(t) | InsnKind::IfAcmpne(t) => {
                self.pop_expect(s, Reference, pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::Branch(*t)
            }
            InsnKind::Ifnull(t) | InsnKind::Ifnonnull(t) => {
                self.pop_expect(s, Reference, pc)?;
                Flow::Branch(*t)
            }
            InsnKind::Goto(t) => Flow::Jump(*t),
            InsnKind::Jsr(t) => {
                self.push(s, ReturnAddress, pc)?;
                Flow::Jump(*t)
            }
            InsnKind::Ret(n) => {
                if *n as usize >= self.max_locals
                    || s.locals[*n as usize] != ReturnAddress
                {
                    return Err(AnalysisError::BadLocal { pc, index: *n });
                }
                Flow::End
            }
            InsnKind::TableSwitch(_) | InsnKind::LookupSwitch(_) => {
                self.pop_expect(s, Int, pc)?;
                insn.kind.collect_targets(scratch);
                Flow::Switch(scratch.clone())
            }

            InsnKind::Ireturn => { self.pop_expect(s, Int, pc)?; Flow::End }
            InsnKind::Lreturn => { self.pop_kind(s, Long, pc)?; Flow::End }
            InsnKind::Freturn => { self.pop_expect(s, Float, pc)?; Flow::End }
            InsnKind::Dreturn => { self.pop_kind(s, Double, pc)?; Flow::End }
            InsnKind::Areturn => { self.pop_expect(s, Reference, pc)?; Flow::End }
            InsnKind::Return => Flow::End,
            InsnKind::Athrow => { self.pop_expect(s, Reference, pc)?; Flow::End }

            InsnKind::Getstatic(idx) => {
                let field = self.field_kind_at(*idx, pc)?;
                self.push_kind(s, field_abstract_kind(&field), pc)?;
                Flow::FallThrough
            }
            InsnKind::Putstatic(idx) => {
                let field = self.field_kind_at(*idx, pc)?;
                self.pop_kind(s, field_abstract_kind(&field), pc)?;
                Flow::FallThrough
            }
            InsnKind::Getfield(idx) => {
                let field = self.field_kind_at(*idx, pc)?;
                self.pop_expect(s, Reference, pc)?;
                self.push_kind(s, field_abstract_kind(&field), pc)?;
                Flow::FallThrough
            }
            InsnKind::Putfield(idx) => {
                let field = self.field_kind_at(*idx, pc)?;
                self.pop_kind(s, field_abstract_kind(&field), pc)?;
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }

            InsnKind::InvokeVirtual(idx) => {
                let descriptor = self.method_descriptor_at(*idx, pc, MethodRefKind::Virtual)?;
                self.invoke(s, &descriptor, true, pc)?;
                Flow::FallThrough
            }
            InsnKind::InvokeSpecial(idx) => {
                let descriptor = self.method_descriptor_at(*idx, pc, MethodRefKind::Either)?;
                self.invoke(s, &descriptor, true, pc)?;
                Flow::FallThrough
            }
            InsnKind::InvokeStatic(idx) => {
                let descriptor = self.method_descriptor_at(*idx, pc, MethodRefKind::Either)?;
                self.invoke(s, &descriptor, false, pc)?;
                Flow::FallThrough
            }
            InsnKind::InvokeInterface { index, .. } => {
                let descriptor = self.method_descriptor_at(*index, pc, MethodRefKind::Interface)?;
                self.invoke(s, &descriptor, true, pc)?;
                Flow::FallThrough
            }
            InsnKind::InvokeDynamic(idx) => {
                let view = self
                    .cp
                    .get_invoke_dynamic_view(idx, self.interner)
                    .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })?;
                let desc_str = self.interner.resolve(&view.nat.desc);
                let descriptor = MethodDescriptor::try_from(desc_str)
                    .map_err(|e| AnalysisError::BadConstant { pc, message: e.to_string() })?;
                self.invoke(s, &descriptor, false, pc)?;
                Flow::FallThrough
            }

            InsnKind::New(_) => {
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::NewArray(_) | InsnKind::Anewarray(_) => {
                self.pop_expect(s, Int, pc)?;
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::MultiAnewArray { dimensions, .. } => {
                for _ in 0..*dimensions {
                    self.pop_expect(s, Int, pc)?;
                }
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Arraylength => {
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Checkcast(_) => {
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Reference, pc)?;
                Flow::FallThrough
            }
            InsnKind::Instanceof(_) => {
                self.pop_expect(s, Reference, pc)?;
                self.push(s, Int, pc)?;
                Flow::FallThrough
            }
            InsnKind::Monitorenter | InsnKind::Monitorexit => {
                self.pop_expect(s, Reference, pc)?;
                Flow::FallThrough
            }
        };
        Ok(flow)
    }
}

enum MethodRefKind {
    Virtual,
    Interface,
    Either,
}

fn field_abstract_kind(d: &FieldDescriptor) -> AbstractKind {
    if d.is_array() || d.kind == TypeKind::Reference {
        return AbstractKind::Reference;
    }
    match d.kind {
        TypeKind::Boolean | TypeKind::Byte | TypeKind::Char | TypeKind::Short | TypeKind::Int => {
            AbstractKind::Int
        }
        TypeKind::Long => AbstractKind::Long,
        TypeKind::Float => AbstractKind::Float,
        TypeKind::Double => AbstractKind::Double,
        _ => AbstractKind::Top,
    }
}
