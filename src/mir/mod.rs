//! The mid-level IR consumed by the code generator.
//!
//! A [Package] holds functions and global values; a [Function] holds typed
//! variables and basic blocks; a block is a run of three-address
//! [instructions](Inst) closed by a [Terminator]. Variables are numbered, and
//! the numbering carries the calling convention: variables `1..=n` are the
//! function's `n` parameters, in order.
//!
//! The IR is SSA-style with explicit φ instructions, but nothing here
//! enforces single assignment; the generator upstream is trusted to produce
//! well-formed input.

use std::collections::BTreeMap;
use std::fmt;

use either::Either;

pub mod builder;
pub mod parser;
mod ty;

pub use ty::{FnSig, Ty};

/// A MIR variable id. Ids `1..=param_count` denote the function parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl VarId {
    /// The id used as the discarded destination of a void call.
    pub const VOID: VarId = VarId(1 << 20);
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block ids. Block labels in the emitted assembly embed these.
pub type BlockId = u32;

/// A variable declaration: its type and whether it must live on the stack
/// (address-taken or aggregate).
#[derive(Debug, Clone)]
pub struct Var {
    pub ty: Ty,
    pub is_memory_var: bool,
}

impl Var {
    pub fn new(ty: Ty) -> Self {
        Var {
            ty,
            is_memory_var: false,
        }
    }

    pub fn new_memory(ty: Ty) -> Self {
        Var {
            ty,
            is_memory_var: true,
        }
    }

    pub fn size(&self) -> Option<u32> {
        self.ty.size()
    }
}

/// An operand: a 32-bit signed immediate or a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Imm(i32),
    Var(VarId),
}

impl Value {
    pub fn is_imm(&self) -> bool {
        matches!(self, Value::Imm(_))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Imm(n)
    }
}

impl From<VarId> for Value {
    fn from(v: VarId) -> Self {
        Value::Var(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Imm(n) => write!(f, "{}", n),
            Value::Var(v) => write!(f, "{}", v),
        }
    }
}

/// The binary operators of the `op` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    ShrA,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Rem => "rem",
            Op::And => "and",
            Op::Or => "or",
            Op::Shl => "shl",
            Op::Shr => "shr",
            Op::ShrA => "shra",
            Op::Gt => "gt",
            Op::Lt => "lt",
            Op::Gte => "gte",
            Op::Lte => "lte",
            Op::Eq => "eq",
            Op::Neq => "neq",
        };
        write!(f, "{}", text)
    }
}

/// The target of a `ref` instruction: a named global or a local variable.
pub type RefTarget = Either<String, VarId>;

/// A three-address MIR instruction. Every variant carries a destination
/// variable; for stores the destination names the variable written through.
#[derive(Debug, Clone)]
pub enum Inst {
    Assign {
        dest: VarId,
        src: Value,
    },
    Op {
        dest: VarId,
        op: Op,
        lhs: Value,
        rhs: Value,
    },
    Call {
        dest: VarId,
        func: String,
        args: Vec<Value>,
    },
    Load {
        dest: VarId,
        src: Value,
    },
    Store {
        dest: VarId,
        val: Value,
    },
    LoadOffset {
        dest: VarId,
        src: Value,
        offset: Value,
    },
    StoreOffset {
        dest: VarId,
        val: Value,
        offset: Value,
    },
    Ref {
        dest: VarId,
        target: RefTarget,
    },
    /// Pointer arithmetic: `dest = ptr + offset * sizeof(*ptr)`.
    PtrOffset {
        dest: VarId,
        ptr: VarId,
        offset: Value,
    },
    Phi {
        dest: VarId,
        sources: Vec<VarId>,
    },
}

impl Inst {
    /// The variable this instruction defines (or, for stores, writes
    /// through). Used to build per-block definition sets.
    pub fn dest(&self) -> VarId {
        match self {
            Inst::Assign { dest, .. }
            | Inst::Op { dest, .. }
            | Inst::Call { dest, .. }
            | Inst::Load { dest, .. }
            | Inst::Store { dest, .. }
            | Inst::LoadOffset { dest, .. }
            | Inst::StoreOffset { dest, .. }
            | Inst::Ref { dest, .. }
            | Inst::PtrOffset { dest, .. }
            | Inst::Phi { dest, .. } => *dest,
        }
    }
}

/// How a basic block ends.
#[derive(Debug, Clone)]
pub enum Terminator {
    Br(BlockId),
    BrCond(VarId, BlockId, BlockId),
    Return(Option<VarId>),
    /// The block can never be reached; upstream passes are expected to have
    /// removed it, and falling through is acceptable if they did not.
    Unreachable,
    /// Placeholder left by the generator. Visiting one is an error.
    Undefined,
}

/// A basic block: instructions plus the closing terminator.
#[derive(Debug, Clone)]
pub struct BasicBlk {
    pub inst: Vec<Inst>,
    pub terminator: Terminator,
}

/// A MIR function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub sig: FnSig,
    pub basic_blks: BTreeMap<BlockId, BasicBlk>,
    pub variables: BTreeMap<VarId, Var>,
}

impl Function {
    pub fn param_count(&self) -> u32 {
        self.sig.params.len() as u32
    }
}

/// A named global value. Only its type matters to the code generator; the
/// address is resolved through the constant pool at link time.
#[derive(Debug, Clone)]
pub struct GlobalValue {
    pub ty: Ty,
}

/// A whole compilation unit: functions and globals, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub functions: BTreeMap<String, Function>,
    pub global_values: BTreeMap<String, GlobalValue>,
}
