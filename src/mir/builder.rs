//! Append-style construction of MIR packages, for the front-end generator
//! and for tests.
//!
//! A [FunctionBuilder] owns the function under construction; `ins(block)`
//! hands out a single-use inserter that appends one instruction, so building
//! a block reads as a straight-line listing:
//!
//! ```
//! use mir2arm::mir::{builder::FunctionBuilder, Op, Terminator, Ty};
//!
//! let mut f = FunctionBuilder::new("max2", vec![Ty::Int, Ty::Int], Ty::Int);
//! let (a, b) = (f.param(1), f.param(2));
//! let t = f.var(Ty::Int);
//! let bb0 = f.block();
//! f.ins(bb0).op(t, Op::Lt, a.into(), b.into());
//! let bb1 = f.block();
//! let bb2 = f.block();
//! f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
//! ```

use std::collections::BTreeMap;

use either::Either;

use super::{
    BasicBlk, BlockId, FnSig, Function, GlobalValue, Inst, Op, Package, Terminator, Ty, Value, Var,
    VarId,
};

/// Builds a [Package] out of finished functions and global declarations.
#[derive(Default)]
pub struct PackageBuilder {
    package: Package,
}

impl PackageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&mut self, name: impl Into<String>, ty: Ty) -> &mut Self {
        self.package
            .global_values
            .insert(name.into(), GlobalValue { ty });
        self
    }

    pub fn function(&mut self, function: Function) -> &mut Self {
        self.package.functions.insert(function.name.clone(), function);
        self
    }

    pub fn build(self) -> Package {
        self.package
    }
}

/// Builds one [Function]. Parameters are declared by the signature and take
/// variable ids `1..=n`; further variables are numbered after them.
pub struct FunctionBuilder {
    name: String,
    sig: FnSig,
    variables: BTreeMap<VarId, Var>,
    blocks: BTreeMap<BlockId, BasicBlk>,
    next_var: u32,
    next_block: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: Vec<Ty>, ret: Ty) -> Self {
        let mut variables = BTreeMap::new();
        for (i, ty) in params.iter().enumerate() {
            variables.insert(VarId(i as u32 + 1), Var::new(ty.clone()));
        }
        let next_var = params.len() as u32 + 1;
        FunctionBuilder {
            name: name.into(),
            sig: FnSig::new(params, ret),
            variables,
            blocks: BTreeMap::new(),
            next_var,
            next_block: 0,
        }
    }

    /// The variable bound to the `idx`-th parameter, 1-based.
    pub fn param(&self, idx: u32) -> VarId {
        debug_assert!(idx >= 1 && idx <= self.sig.params.len() as u32);
        VarId(idx)
    }

    /// Declares a fresh register-resident variable.
    pub fn var(&mut self, ty: Ty) -> VarId {
        self.declare(Var::new(ty))
    }

    /// Declares a fresh memory-resident variable; it will receive a frame
    /// slot during lowering.
    pub fn memory_var(&mut self, ty: Ty) -> VarId {
        self.declare(Var::new_memory(ty))
    }

    fn declare(&mut self, var: Var) -> VarId {
        let id = VarId(self.next_var);
        self.next_var += 1;
        self.variables.insert(id, var);
        id
    }

    /// Opens a new block. Its terminator starts out `Undefined` and must be
    /// set with [FunctionBuilder::terminate] before lowering.
    pub fn block(&mut self) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.insert(
            id,
            BasicBlk {
                inst: Vec::new(),
                terminator: Terminator::Undefined,
            },
        );
        id
    }

    /// A single-use inserter appending to `block`.
    pub fn ins(&mut self, block: BlockId) -> InstInserter<'_> {
        InstInserter {
            builder: self,
            block,
        }
    }

    pub fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        if let Some(blk) = self.blocks.get_mut(&block) {
            blk.terminator = terminator;
        }
    }

    pub fn build(self) -> Function {
        Function {
            name: self.name,
            sig: self.sig,
            basic_blks: self.blocks,
            variables: self.variables,
        }
    }
}

/// Appends exactly one instruction to a block, then is spent.
pub struct InstInserter<'a> {
    builder: &'a mut FunctionBuilder,
    block: BlockId,
}

impl<'a> InstInserter<'a> {
    fn push(self, inst: Inst) {
        let blk = self
            .builder
            .blocks
            .get_mut(&self.block)
            .expect("inserter for unknown block");
        blk.inst.push(inst);
    }

    pub fn assign(self, dest: VarId, src: Value) {
        self.push(Inst::Assign { dest, src });
    }

    pub fn op(self, dest: VarId, op: Op, lhs: Value, rhs: Value) {
        self.push(Inst::Op { dest, op, lhs, rhs });
    }

    pub fn call(self, dest: VarId, func: impl Into<String>, args: Vec<Value>) {
        self.push(Inst::Call {
            dest,
            func: func.into(),
            args,
        });
    }

    /// A call whose result is discarded.
    pub fn call_void(self, func: impl Into<String>, args: Vec<Value>) {
        self.push(Inst::Call {
            dest: VarId::VOID,
            func: func.into(),
            args,
        });
    }

    pub fn load(self, dest: VarId, src: Value) {
        self.push(Inst::Load { dest, src });
    }

    pub fn store(self, dest: VarId, val: Value) {
        self.push(Inst::Store { dest, val });
    }

    pub fn load_offset(self, dest: VarId, src: Value, offset: Value) {
        self.push(Inst::LoadOffset { dest, src, offset });
    }

    pub fn store_offset(self, dest: VarId, val: Value, offset: Value) {
        self.push(Inst::StoreOffset { dest, val, offset });
    }

    pub fn ref_global(self, dest: VarId, symbol: impl Into<String>) {
        self.push(Inst::Ref {
            dest,
            target: Either::Left(symbol.into()),
        });
    }

    pub fn ref_var(self, dest: VarId, var: VarId) {
        self.push(Inst::Ref {
            dest,
            target: Either::Right(var),
        });
    }

    pub fn ptr_offset(self, dest: VarId, ptr: VarId, offset: Value) {
        self.push(Inst::PtrOffset { dest, ptr, offset });
    }

    pub fn phi(self, dest: VarId, sources: Vec<VarId>) {
        self.push(Inst::Phi { dest, sources });
    }
}
