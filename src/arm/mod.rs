//! The ARM instruction model the code generator emits into.
//!
//! Instructions here are still abstract: register operands are drawn from an
//! unbounded virtual register file alongside the sixteen physical GPRs, and a
//! couple of pseudo-ops (`_mod`, the stack-offset control marker) survive
//! until later passes rewrite them. The register allocator consumes this
//! form and substitutes physical registers or spills for every virtual
//! register; only then can the text be assembled.
//!
//! Every layer implements `Display` so a lowered function can be dumped and
//! diffed at any stage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use either::Either;
use smallvec::SmallVec;

use crate::mir::FnSig;

/// The register kinds the allocator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegisterKind {
    GeneralPurpose,
    VirtualGeneralPurpose,
    VirtualDoubleVector,
    VirtualQuadVector,
}

/// A register operand: one of the sixteen physical GPRs, or a virtual
/// register of one of three kinds, to be rewritten by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Gp(u8),
    Vgp(u32),
    Vd(u32),
    Vq(u32),
}

pub const REG_FP: Reg = Reg::Gp(11);
pub const REG_SP: Reg = Reg::Gp(13);
pub const REG_LR: Reg = Reg::Gp(14);
pub const REG_PC: Reg = Reg::Gp(15);

impl Reg {
    pub fn kind(&self) -> RegisterKind {
        match self {
            Reg::Gp(_) => RegisterKind::GeneralPurpose,
            Reg::Vgp(_) => RegisterKind::VirtualGeneralPurpose,
            Reg::Vd(_) => RegisterKind::VirtualDoubleVector,
            Reg::Vq(_) => RegisterKind::VirtualQuadVector,
        }
    }

    pub fn is_virtual(&self) -> bool {
        !matches!(self, Reg::Gp(_))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Gp(11) => write!(f, "fp"),
            Reg::Gp(13) => write!(f, "sp"),
            Reg::Gp(14) => write!(f, "lr"),
            Reg::Gp(15) => write!(f, "pc"),
            Reg::Gp(n) => write!(f, "r{}", n),
            Reg::Vgp(n) => write!(f, "v{}", n),
            Reg::Vd(n) => write!(f, "vd{}", n),
            Reg::Vq(n) => write!(f, "vq{}", n),
        }
    }
}

/// Whether `val` can be encoded as an ARM data-processing immediate: an
/// 8-bit value rotated right by an even amount within a 32-bit word.
pub fn is_encodable_imm(val: i32) -> bool {
    let v = val as u32;
    (0..16).any(|r| v.rotate_left(r * 2) <= 0xff)
}

/// A constant shift applied to a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Lsl(u8),
    Lsr(u8),
    Asr(u8),
    Ror(u8),
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shift::Lsl(n) => write!(f, "lsl #{}", n),
            Shift::Lsr(n) => write!(f, "lsr #{}", n),
            Shift::Asr(n) => write!(f, "asr #{}", n),
            Shift::Ror(n) => write!(f, "ror #{}", n),
        }
    }
}

/// The flexible second operand of ARM data-processing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand2 {
    Imm(i32),
    Reg(Reg, Option<Shift>),
}

impl Operand2 {
    pub fn reg(r: Reg) -> Operand2 {
        Operand2::Reg(r, None)
    }
}

impl From<Reg> for Operand2 {
    fn from(r: Reg) -> Self {
        Operand2::Reg(r, None)
    }
}

impl fmt::Display for Operand2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand2::Imm(n) => write!(f, "#{}", n),
            Operand2::Reg(r, None) => write!(f, "{}", r),
            Operand2::Reg(r, Some(shift)) => write!(f, "{}, {}", r, shift),
        }
    }
}

/// A load/store address offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOffset {
    Imm(i32),
    Reg(Reg),
}

/// Addressing mode of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessKind {
    None,
    PreIndexed,
    PostIndexed,
}

/// A load/store address: base register plus offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Reg,
    pub offset: MemOffset,
    pub kind: MemoryAccessKind,
}

impl MemoryOperand {
    pub fn offset(base: Reg, offset: i32) -> MemoryOperand {
        MemoryOperand {
            base,
            offset: MemOffset::Imm(offset),
            kind: MemoryAccessKind::None,
        }
    }

    pub fn reg_offset(base: Reg, offset: Reg) -> MemoryOperand {
        MemoryOperand {
            base,
            offset: MemOffset::Reg(offset),
            kind: MemoryAccessKind::None,
        }
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.offset, self.kind) {
            (MemOffset::Imm(0), MemoryAccessKind::None) => write!(f, "[{}]", self.base),
            (MemOffset::Imm(n), MemoryAccessKind::None) => write!(f, "[{}, #{}]", self.base, n),
            (MemOffset::Reg(r), MemoryAccessKind::None) => write!(f, "[{}, {}]", self.base, r),
            (MemOffset::Imm(n), MemoryAccessKind::PreIndexed) => {
                write!(f, "[{}, #{}]!", self.base, n)
            }
            (MemOffset::Reg(r), MemoryAccessKind::PreIndexed) => {
                write!(f, "[{}, {}]!", self.base, r)
            }
            (MemOffset::Imm(n), MemoryAccessKind::PostIndexed) => {
                write!(f, "[{}], #{}", self.base, n)
            }
            (MemOffset::Reg(r), MemoryAccessKind::PostIndexed) => {
                write!(f, "[{}], {}", self.base, r)
            }
        }
    }
}

/// ARM condition codes, restricted to what signed integer comparisons need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionCode {
    Always,
    Equal,
    NotEqual,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ConditionCode {
    /// The logically opposite condition, so `b<invert> else` skips the
    /// then-branch exactly when the condition fails. `Always` has no
    /// opposite and maps to itself.
    pub fn invert(self) -> ConditionCode {
        match self {
            ConditionCode::Always => ConditionCode::Always,
            ConditionCode::Equal => ConditionCode::NotEqual,
            ConditionCode::NotEqual => ConditionCode::Equal,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Le => ConditionCode::Gt,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::Lt => ConditionCode::Ge,
        }
    }

    /// The condition that holds after the two compared operands trade
    /// places: `a < b` iff `b > a`. Equality is symmetric.
    pub fn mirror(self) -> ConditionCode {
        match self {
            ConditionCode::Gt => ConditionCode::Lt,
            ConditionCode::Lt => ConditionCode::Gt,
            ConditionCode::Ge => ConditionCode::Le,
            ConditionCode::Le => ConditionCode::Ge,
            other => other,
        }
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConditionCode::Always => "",
            ConditionCode::Equal => "eq",
            ConditionCode::NotEqual => "ne",
            ConditionCode::Gt => "gt",
            ConditionCode::Ge => "ge",
            ConditionCode::Lt => "lt",
            ConditionCode::Le => "le",
        };
        write!(f, "{}", text)
    }
}

/// An assembly label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub String);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Two-operand data-processing ops (destination and one flexible operand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith2Op {
    Mov,
    Mvn,
    MovT,
    Cmp,
}

impl fmt::Display for Arith2Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Arith2Op::Mov => "mov",
            Arith2Op::Mvn => "mvn",
            Arith2Op::MovT => "movt",
            Arith2Op::Cmp => "cmp",
        };
        write!(f, "{}", text)
    }
}

/// Three-operand data-processing ops. `Mod` is a pseudo-op a later pass
/// expands into a divide/multiply-subtract sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith3Op {
    Add,
    Sub,
    Rsb,
    Mul,
    SDiv,
    Mod,
    And,
    Orr,
    Lsl,
    Lsr,
    Asr,
}

impl fmt::Display for Arith3Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Arith3Op::Add => "add",
            Arith3Op::Sub => "sub",
            Arith3Op::Rsb => "rsb",
            Arith3Op::Mul => "mul",
            Arith3Op::SDiv => "sdiv",
            Arith3Op::Mod => "_mod",
            Arith3Op::And => "and",
            Arith3Op::Orr => "orr",
            Arith3Op::Lsl => "lsl",
            Arith3Op::Lsr => "lsr",
            Arith3Op::Asr => "asr",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStoreOp {
    Ldr,
    Str,
}

impl fmt::Display for LoadStoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStoreOp::Ldr => write!(f, "ldr"),
            LoadStoreOp::Str => write!(f, "str"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPopOp {
    Push,
    Pop,
}

impl fmt::Display for PushPopOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushPopOp::Push => write!(f, "push"),
            PushPopOp::Pop => write!(f, "pop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    B,
    Bl,
}

impl fmt::Display for BranchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchOp::B => write!(f, "b"),
            BranchOp::Bl => write!(f, "bl"),
        }
    }
}

/// Markers that carry bookkeeping to later passes without emitting code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlOp {
    /// The stack pointer moved by this many bytes at a call site; the
    /// allocator needs this to address spill slots across the call.
    StackOffset(i32),
}

/// One abstract ARM instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Label(Label),
    Arith2 {
        op: Arith2Op,
        rd: Reg,
        rhs: Operand2,
        cond: ConditionCode,
    },
    Arith3 {
        op: Arith3Op,
        rd: Reg,
        rn: Reg,
        op2: Operand2,
    },
    LoadStore {
        op: LoadStoreOp,
        rd: Reg,
        /// Either a plain address, or a constant-pool label for the
        /// `ldr rd, =label` literal form.
        mem: Either<MemoryOperand, Label>,
    },
    PushPop {
        op: PushPopOp,
        regs: BTreeSet<Reg>,
    },
    Br {
        op: BranchOp,
        target: Label,
        cond: ConditionCode,
        /// For `bl`: the callee's declared parameter count, so later passes
        /// know which argument registers are live across the call.
        param_count: Option<u32>,
    },
    Ctrl(CtrlOp),
}

impl Inst {
    pub fn mov(rd: Reg, rhs: Operand2) -> Inst {
        Inst::Arith2 {
            op: Arith2Op::Mov,
            rd,
            rhs,
            cond: ConditionCode::Always,
        }
    }

    pub fn mov_cond(rd: Reg, rhs: Operand2, cond: ConditionCode) -> Inst {
        Inst::Arith2 {
            op: Arith2Op::Mov,
            rd,
            rhs,
            cond,
        }
    }

    pub fn mvn(rd: Reg, rhs: Operand2) -> Inst {
        Inst::Arith2 {
            op: Arith2Op::Mvn,
            rd,
            rhs,
            cond: ConditionCode::Always,
        }
    }

    pub fn movt(rd: Reg, rhs: Operand2) -> Inst {
        Inst::Arith2 {
            op: Arith2Op::MovT,
            rd,
            rhs,
            cond: ConditionCode::Always,
        }
    }

    pub fn cmp(rn: Reg, rhs: Operand2) -> Inst {
        Inst::Arith2 {
            op: Arith2Op::Cmp,
            rd: rn,
            rhs,
            cond: ConditionCode::Always,
        }
    }

    pub fn arith3(op: Arith3Op, rd: Reg, rn: Reg, op2: Operand2) -> Inst {
        Inst::Arith3 { op, rd, rn, op2 }
    }

    pub fn ldr(rd: Reg, mem: MemoryOperand) -> Inst {
        Inst::LoadStore {
            op: LoadStoreOp::Ldr,
            rd,
            mem: Either::Left(mem),
        }
    }

    pub fn ldr_label(rd: Reg, label: Label) -> Inst {
        Inst::LoadStore {
            op: LoadStoreOp::Ldr,
            rd,
            mem: Either::Right(label),
        }
    }

    pub fn str(rd: Reg, mem: MemoryOperand) -> Inst {
        Inst::LoadStore {
            op: LoadStoreOp::Str,
            rd,
            mem: Either::Left(mem),
        }
    }

    pub fn push(regs: impl IntoIterator<Item = Reg>) -> Inst {
        Inst::PushPop {
            op: PushPopOp::Push,
            regs: regs.into_iter().collect(),
        }
    }

    pub fn pop(regs: impl IntoIterator<Item = Reg>) -> Inst {
        Inst::PushPop {
            op: PushPopOp::Pop,
            regs: regs.into_iter().collect(),
        }
    }

    pub fn b(target: Label) -> Inst {
        Inst::Br {
            op: BranchOp::B,
            target,
            cond: ConditionCode::Always,
            param_count: None,
        }
    }

    pub fn b_cond(target: Label, cond: ConditionCode) -> Inst {
        Inst::Br {
            op: BranchOp::B,
            target,
            cond,
            param_count: None,
        }
    }

    pub fn bl(target: Label, param_count: u32) -> Inst {
        Inst::Br {
            op: BranchOp::Bl,
            target,
            cond: ConditionCode::Always,
            param_count: Some(param_count),
        }
    }

    /// Every register this instruction mentions, in operand order. The
    /// allocator walks these to compute liveness.
    pub fn registers(&self) -> SmallVec<[Reg; 4]> {
        let mut regs = SmallVec::new();
        match self {
            Inst::Label(_) | Inst::Br { .. } | Inst::Ctrl(_) => (),
            Inst::Arith2 { rd, rhs, .. } => {
                regs.push(*rd);
                if let Operand2::Reg(r, _) = rhs {
                    regs.push(*r);
                }
            }
            Inst::Arith3 { rd, rn, op2, .. } => {
                regs.push(*rd);
                regs.push(*rn);
                if let Operand2::Reg(r, _) = op2 {
                    regs.push(*r);
                }
            }
            Inst::LoadStore { rd, mem, .. } => {
                regs.push(*rd);
                if let Either::Left(mem) = mem {
                    regs.push(mem.base);
                    if let MemOffset::Reg(r) = mem.offset {
                        regs.push(r);
                    }
                }
            }
            Inst::PushPop { regs: set, .. } => regs.extend(set.iter().copied()),
        }
        regs
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Label(label) => write!(f, "{}:", label),
            Inst::Arith2 { op, rd, rhs, cond } => write!(f, "{}{} {}, {}", op, cond, rd, rhs),
            Inst::Arith3 { op, rd, rn, op2 } => write!(f, "{} {}, {}, {}", op, rd, rn, op2),
            Inst::LoadStore { op, rd, mem } => match mem {
                Either::Left(mem) => write!(f, "{} {}, {}", op, rd, mem),
                Either::Right(label) => write!(f, "{} {}, ={}", op, rd, label),
            },
            Inst::PushPop { op, regs } => {
                let regs = regs
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} {{{}}}", op, regs)
            }
            Inst::Br {
                op, target, cond, ..
            } => write!(f, "{}{} {}", op, cond, target),
            Inst::Ctrl(CtrlOp::StackOffset(n)) => write!(f, "@ stack_offset {:+}", n),
        }
    }
}

/// What kind of datum a constant-pool entry assembles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstKind {
    Word,
    Half,
    Byte,
}

/// A constant-pool entry: an assembler expression and its width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstValue {
    pub value: String,
    pub kind: ConstKind,
}

impl ConstValue {
    pub fn word(value: impl Into<String>) -> ConstValue {
        ConstValue {
            value: value.into(),
            kind: ConstKind::Word,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let directive = match self.kind {
            ConstKind::Word => ".word",
            ConstKind::Half => ".short",
            ConstKind::Byte => ".byte",
        };
        write!(f, "{} {}", directive, self.value)
    }
}

/// A lowered function: abstract instructions over virtual registers, the
/// function-local constant pool, and the frame size the stack scan computed.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub sig: FnSig,
    pub inst: Vec<Inst>,
    pub consts: BTreeMap<Label, ConstValue>,
    pub stack_size: u32,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for inst in &self.inst {
            match inst {
                Inst::Label(_) => writeln!(f, "{}", inst)?,
                _ => writeln!(f, "    {}", inst)?,
            }
        }
        for (label, value) in &self.consts {
            writeln!(f, "{}:", label)?;
            writeln!(f, "    {}", value)?;
        }
        Ok(())
    }
}
