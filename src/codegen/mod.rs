//! Per-function instruction selection: MIR in, abstract ARM out.
//!
//! Lowering works in a fixed order. Parameters 1-4 are bound to r0-r3 up
//! front; memory-resident variables get frame slots; a scan over all blocks
//! collects the φ-coalescing relation; then each block is emitted in the
//! externally supplied order between the standard prologue and epilogue.
//!
//! Registers produced here are virtual (unbounded), so every result lives in
//! its own register and moves are emitted freely. The register allocator
//! that runs afterwards is responsible for collapsing the excess.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use either::Either;
use lazy_static::lazy_static;
use tracing::trace;

use crate::arm::{
    self, Arith3Op, ConditionCode, CtrlOp, Inst, Label, MemoryOperand, Operand2, Reg, REG_FP,
    REG_LR, REG_PC, REG_SP,
};
use crate::error::CodegenError;
use crate::extra_data::{self, ExtraData};
use crate::mir::{self, BlockId, Value, VarId};

type Result<T> = std::result::Result<T, CodegenError>;

pub fn format_bb_label(function_name: &str, block: BlockId) -> Label {
    Label(format!(".bb_{}${}", function_name, block))
}

pub fn format_fn_end_label(function_name: &str) -> Label {
    Label(format!(".end_{}$", function_name))
}

pub fn format_const_label(function_name: &str, counter: u32) -> Label {
    Label(format!(".const_{}${}", function_name, counter))
}

pub fn format_load_pc_label(function_name: &str, counter: u32) -> Label {
    Label(format!(".ld_pc_{}${}", function_name, counter))
}

lazy_static! {
    static ref COMPARISON_OPS: BTreeSet<mir::Op> = [
        mir::Op::Gt,
        mir::Op::Lt,
        mir::Op::Gte,
        mir::Op::Lte,
        mir::Op::Eq,
        mir::Op::Neq,
    ]
    .iter()
    .copied()
    .collect();

    /// Operators whose operands must stay in declaration order. Everything
    /// else may swap an immediate left operand to the right (comparisons
    /// mirror their condition when this happens).
    static ref NON_SWAPPABLE_OPS: BTreeSet<mir::Op> = [
        mir::Op::Div,
        mir::Op::Rem,
        mir::Op::Shl,
        mir::Op::Shr,
        mir::Op::ShrA,
    ]
    .iter()
    .copied()
    .collect();
}

fn is_comparison(op: mir::Op) -> bool {
    COMPARISON_OPS.contains(&op)
}

fn can_swap_operands(op: mir::Op) -> bool {
    !NON_SWAPPABLE_OPS.contains(&op)
}

/// Code generator for a single function. Create one per function, then call
/// [`FnCodegen::translate_function`] to consume it and produce the lowered
/// [`arm::Function`].
pub struct FnCodegen<'a> {
    func: &'a mir::Function,
    package: &'a mir::Package,

    inst: Vec<Inst>,
    reg_map: BTreeMap<VarId, Reg>,
    consts: BTreeMap<Label, arm::ConstValue>,

    /// φ-coalescing relation: every incoming variable of a φ maps to that
    /// φ's destination. One variable may feed φs in several successors.
    var_collapse: BTreeMap<VarId, Vec<VarId>>,
    stack_space_allocation: BTreeMap<VarId, u32>,

    bb_ordering: Vec<BlockId>,
    inline_hint: BTreeMap<BlockId, ConditionCode>,

    vgp_counter: u32,
    vd_counter: u32,
    vq_counter: u32,
    const_counter: u32,

    param_size: u32,
    stack_size: u32,
}

impl<'a> FnCodegen<'a> {
    pub fn new(func: &'a mir::Function, package: &'a mir::Package, extra: &ExtraData) -> Self {
        let bb_ordering = match extra_data::block_ordering(extra, &func.name) {
            Some(ordering) => {
                trace!(
                    "found block ordering for {} with {} entries",
                    func.name,
                    ordering.len()
                );
                ordering.to_vec()
            }
            None => {
                trace!("no block ordering for {}, using key order", func.name);
                func.basic_blks.keys().copied().collect()
            }
        };

        let inline_hint = match extra_data::inline_hints(extra, &func.name) {
            Some(hints) => {
                trace!("found {} inline hints for {}", hints.len(), func.name);
                hints.clone()
            }
            None => BTreeMap::new(),
        };

        FnCodegen {
            func,
            package,
            inst: Vec::new(),
            reg_map: BTreeMap::new(),
            consts: BTreeMap::new(),
            var_collapse: BTreeMap::new(),
            stack_space_allocation: BTreeMap::new(),
            bb_ordering,
            inline_hint,
            vgp_counter: 0,
            vd_counter: 0,
            vq_counter: 0,
            const_counter: 0,
            param_size: func.param_count(),
            stack_size: 0,
        }
    }

    /// Runs the whole lowering pipeline and hands back the finished function.
    /// The register map is published into `extra` for the allocator.
    pub fn translate_function(mut self, extra: &mut ExtraData) -> Result<arm::Function> {
        self.init_reg_map();
        self.scan_stack()?;
        self.scan();
        self.emit_prologue();

        let ordering = mem::take(&mut self.bb_ordering);
        let func = self.func;
        for &bb_id in &ordering {
            let blk = func
                .basic_blks
                .get(&bb_id)
                .ok_or(CodegenError::UnknownBlock(bb_id))?;
            self.translate_basic_block(bb_id, blk)?;
        }

        self.emit_epilogue();

        for (var, reg) in &self.reg_map {
            trace!("{} -> {}", var, reg);
        }
        extra_data::publish_reg_map(extra, &self.func.name, self.reg_map);

        Ok(arm::Function {
            name: self.func.name.clone(),
            sig: self.func.sig.clone(),
            inst: self.inst,
            consts: self.consts,
            stack_size: self.stack_size,
        })
    }

    /// Parameters 1-4 arrive in r0-r3 and keep those bindings. Later
    /// parameters live above the saved frame and are reloaded on each use.
    fn init_reg_map(&mut self) {
        for i in 0..self.param_size.min(4) {
            self.reg_map.insert(VarId(i + 1), Reg::Gp(i as u8));
        }
    }

    /// Assigns a frame slot to every memory-resident variable and totals the
    /// frame size. Rest-param markers never occupy a slot.
    fn scan_stack(&mut self) -> Result<()> {
        for (&id, var) in &self.func.variables {
            if var.is_memory_var && !var.ty.is_rest_param() {
                let size = var
                    .size()
                    .ok_or(CodegenError::Internal("memory-resident variable is unsized"))?;
                self.stack_space_allocation.insert(id, self.stack_size);
                self.stack_size += size;
            }
        }
        Ok(())
    }

    /// Walks every block once before emission to collect the φ-coalescing
    /// relation.
    fn scan(&mut self) {
        let func = self.func;
        for blk in func.basic_blks.values() {
            for inst in &blk.inst {
                if let mir::Inst::Phi { dest, sources } = inst {
                    for &src in sources {
                        trace!("collapse {} -> {}", src, dest);
                        self.var_collapse.entry(src).or_default().push(*dest);
                    }
                }
            }
        }
    }

    fn emit_prologue(&mut self) {
        self.inst.push(Inst::push([REG_FP, REG_LR]));
        self.inst.push(Inst::mov(REG_FP, Operand2::reg(REG_SP)));
    }

    fn emit_epilogue(&mut self) {
        self.inst
            .push(Inst::Label(format_fn_end_label(&self.func.name)));
        self.inst.push(Inst::mov(REG_SP, Operand2::reg(REG_FP)));
        self.inst.push(Inst::pop([REG_FP, REG_PC]));
    }

    fn alloc_vgp(&mut self) -> Reg {
        let reg = Reg::Vgp(self.vgp_counter);
        self.vgp_counter += 1;
        reg
    }

    /// Allocates a fresh double-vector virtual register.
    pub fn alloc_vd(&mut self) -> Reg {
        let reg = Reg::Vd(self.vd_counter);
        self.vd_counter += 1;
        reg
    }

    /// Allocates a fresh quad-vector virtual register.
    pub fn alloc_vq(&mut self) -> Reg {
        let reg = Reg::Vq(self.vq_counter);
        self.vq_counter += 1;
        reg
    }

    fn is_stack_param(&self, v: VarId) -> bool {
        v.0 >= 5 && v.0 <= self.param_size
    }

    /// The register holding variable `v`, allocating or materializing as
    /// needed.
    ///
    /// Stack-passed parameters are reloaded and frame-slot variables have
    /// their address recomputed on every query; those registers hold values
    /// derived from fp/sp and must not be cached across points where the
    /// frame state could differ. The allocator coalesces the redundancy
    /// later. Everything else gets exactly one stable binding.
    fn get_or_alloc_vgp(&mut self, v: VarId) -> Reg {
        if self.is_stack_param(v) {
            let reg = self.alloc_vgp();
            self.inst.push(Inst::ldr(
                reg,
                MemoryOperand::offset(REG_FP, ((v.0 - 5) * 4) as i32),
            ));
            reg
        } else if let Some(&offset) = self.stack_space_allocation.get(&v) {
            let reg = self.alloc_vgp();
            self.inst.push(Inst::arith3(
                Arith3Op::Add,
                reg,
                REG_SP,
                Operand2::Imm(offset as i32),
            ));
            reg
        } else if let Some(&reg) = self.reg_map.get(&v) {
            reg
        } else {
            let reg = self.alloc_vgp();
            self.reg_map.insert(v, reg);
            reg
        }
    }

    /// The double-vector register bound to `v`, allocating one on first use.
    pub fn get_or_alloc_vd(&mut self, v: VarId) -> Reg {
        if let Some(&reg) = self.reg_map.get(&v) {
            debug_assert_eq!(reg.kind(), arm::RegisterKind::VirtualDoubleVector);
            reg
        } else {
            let reg = self.alloc_vd();
            self.reg_map.insert(v, reg);
            reg
        }
    }

    /// The quad-vector register bound to `v`, allocating one on first use.
    pub fn get_or_alloc_vq(&mut self, v: VarId) -> Reg {
        if let Some(&reg) = self.reg_map.get(&v) {
            debug_assert_eq!(reg.kind(), arm::RegisterKind::VirtualQuadVector);
            reg
        } else {
            let reg = self.alloc_vq();
            self.reg_map.insert(v, reg);
            reg
        }
    }

    fn var_reg(&mut self, v: VarId) -> Reg {
        self.get_or_alloc_vgp(v)
    }

    /// Loads the 32-bit constant `num` into `reg` with the cheapest
    /// sequence: a single `mvn` when the complement fits in 16 bits,
    /// otherwise `mov` of the low half plus `movt` of the high half.
    fn make_number(&mut self, reg: Reg, num: u32) {
        if !num <= 0xffff {
            self.inst.push(Inst::mvn(reg, Operand2::Imm(!num as i32)));
        } else {
            self.inst
                .push(Inst::mov(reg, Operand2::Imm((num & 0xffff) as i32)));
            if num > 0xffff {
                self.inst
                    .push(Inst::movt(reg, Operand2::Imm((num >> 16) as i32)));
            }
        }
    }

    /// Translates `v` into a flexible second operand, materializing
    /// non-encodable immediates into a fresh register.
    fn value_to_operand2(&mut self, v: &Value) -> Operand2 {
        match v {
            Value::Imm(n) => {
                if arm::is_encodable_imm(*n) {
                    Operand2::Imm(*n)
                } else {
                    let reg = self.alloc_vgp();
                    self.make_number(reg, *n as u32);
                    Operand2::reg(reg)
                }
            }
            Value::Var(id) => Operand2::reg(self.get_or_alloc_vgp(*id)),
        }
    }

    /// Translates `v` into a register, materializing immediates
    /// unconditionally.
    fn value_to_reg(&mut self, v: &Value) -> Reg {
        match v {
            Value::Imm(n) => {
                let reg = self.alloc_vgp();
                self.make_number(reg, *n as u32);
                reg
            }
            Value::Var(id) => self.get_or_alloc_vgp(*id),
        }
    }

    /// Builds the memory operand for an access rooted at variable `v`.
    ///
    /// Stack-passed parameters address through fp, frame-slot variables
    /// through sp; both only take immediate offsets. A plain pointer
    /// variable takes either an immediate displacement or a register offset.
    fn var_memory_operand(&mut self, v: VarId, offset: Option<&Value>) -> Result<MemoryOperand> {
        if self.is_stack_param(v) {
            let disp = ((v.0 - 4) * 4) as i32;
            match offset {
                None => Ok(MemoryOperand::offset(REG_FP, disp)),
                Some(Value::Imm(o)) => Ok(MemoryOperand::offset(REG_FP, disp + o)),
                Some(Value::Var(_)) => Err(CodegenError::NotImplemented(
                    "variable offset from a stack-passed parameter",
                )),
            }
        } else if let Some(&slot) = self.stack_space_allocation.get(&v) {
            match offset {
                None => Ok(MemoryOperand::offset(REG_SP, slot as i32)),
                Some(Value::Imm(o)) => Ok(MemoryOperand::offset(REG_SP, slot as i32 + o)),
                Some(Value::Var(_)) => Err(CodegenError::NotImplemented(
                    "variable offset from a frame slot",
                )),
            }
        } else {
            let base = self.get_or_alloc_vgp(v);
            match offset {
                None => Ok(MemoryOperand::offset(base, 0)),
                Some(Value::Imm(o)) => Ok(MemoryOperand::offset(base, *o)),
                Some(Value::Var(o)) => {
                    let reg = self.get_or_alloc_vgp(*o);
                    Ok(MemoryOperand::reg_offset(base, reg))
                }
            }
        }
    }

    fn value_memory_operand(&mut self, v: &Value, offset: Option<&Value>) -> Result<MemoryOperand> {
        match v {
            Value::Imm(_) => Err(CodegenError::NotImplemented(
                "memory access through an immediate base",
            )),
            Value::Var(id) => self.var_memory_operand(*id, offset),
        }
    }

    /// Emits one block: its label, its instructions, the φ-resolution moves
    /// at the splice point, and its terminator.
    ///
    /// The φ-moves land immediately before the comparison whose flags the
    /// conditional terminator consumes; emitting them after it would clobber
    /// CPSR between the compare and the branch. Blocks without such a
    /// comparison splice at the end, just before the terminator.
    fn translate_basic_block(&mut self, id: BlockId, blk: &mir::BasicBlk) -> Result<()> {
        let label = format_bb_label(&self.func.name, id);
        if let Some(Inst::Label(last)) = self.inst.last() {
            if *last == label {
                self.inst.pop();
            }
        }
        self.inst.push(Inst::Label(label));

        let splice_at = match blk.terminator {
            mir::Terminator::BrCond(cond, _, _) => blk.inst.iter().position(|inst| {
                matches!(inst, mir::Inst::Op { dest, op, .. }
                    if *dest == cond && is_comparison(*op))
            }),
            _ => None,
        };

        let mut defined = BTreeSet::new();
        let mut spliced = false;
        for (idx, inst) in blk.inst.iter().enumerate() {
            if splice_at == Some(idx) {
                self.emit_phi_moves(&defined);
                spliced = true;
            }
            self.translate_inst(inst)?;
            defined.insert(inst.dest());
        }
        if !spliced {
            self.emit_phi_moves(&defined);
        }

        self.translate_terminator(id, &blk.terminator)
    }

    /// For every variable in `defined` with coalesce targets, moves its
    /// value into each target's register.
    fn emit_phi_moves(&mut self, defined: &BTreeSet<VarId>) {
        for &id in defined {
            let targets = match self.var_collapse.get(&id) {
                Some(targets) => targets.clone(),
                None => continue,
            };
            for dest in targets {
                let dest_reg = self.get_or_alloc_vgp(dest);
                let src_reg = self.var_reg(id);
                self.inst.push(Inst::mov(dest_reg, Operand2::reg(src_reg)));
            }
        }
    }

    fn translate_inst(&mut self, inst: &mir::Inst) -> Result<()> {
        match inst {
            mir::Inst::Assign { dest, src } => self.translate_assign(*dest, src),
            mir::Inst::Op { dest, op, lhs, rhs } => self.translate_op(*dest, *op, lhs, rhs),
            mir::Inst::Call { dest, func, args } => self.translate_call(*dest, func, args),
            mir::Inst::Load { dest, src } => {
                let mem = self.value_memory_operand(src, None)?;
                let rd = self.var_reg(*dest);
                self.inst.push(Inst::ldr(rd, mem));
                Ok(())
            }
            mir::Inst::Store { dest, val } => {
                let rd = self.value_to_reg(val);
                let mem = self.var_memory_operand(*dest, None)?;
                self.inst.push(Inst::str(rd, mem));
                Ok(())
            }
            mir::Inst::LoadOffset { dest, src, offset } => {
                let mem = self.value_memory_operand(src, Some(offset))?;
                let rd = self.var_reg(*dest);
                self.inst.push(Inst::ldr(rd, mem));
                Ok(())
            }
            mir::Inst::StoreOffset { dest, val, offset } => {
                let rd = self.value_to_reg(val);
                let mem = self.var_memory_operand(*dest, Some(offset))?;
                self.inst.push(Inst::str(rd, mem));
                Ok(())
            }
            mir::Inst::Ref { dest, target } => self.translate_ref(*dest, target),
            mir::Inst::PtrOffset { dest, ptr, offset } => {
                self.translate_ptr_offset(*dest, *ptr, offset)
            }
            // φ data movement happens at predecessor splice points through
            // the collapse relation; the φ site itself emits nothing.
            mir::Inst::Phi { .. } => Ok(()),
        }
    }

    fn translate_assign(&mut self, dest: VarId, src: &Value) -> Result<()> {
        match src {
            Value::Imm(n) => {
                let rd = self.var_reg(dest);
                self.make_number(rd, *n as u32);
            }
            Value::Var(_) => {
                let op2 = self.value_to_operand2(src);
                let rd = self.var_reg(dest);
                self.inst.push(Inst::mov(rd, op2));
            }
        }
        Ok(())
    }

    fn translate_op(&mut self, dest: VarId, op: mir::Op, lhs: &Value, rhs: &Value) -> Result<()> {
        let swapped = lhs.is_imm() && !rhs.is_imm() && can_swap_operands(op);
        let (lhs, rhs) = if swapped { (rhs, lhs) } else { (lhs, rhs) };

        match op {
            mir::Op::Add => self.emit_arith3(Arith3Op::Add, dest, lhs, rhs),
            mir::Op::Sub => {
                let arm_op = if swapped { Arith3Op::Rsb } else { Arith3Op::Sub };
                self.emit_arith3(arm_op, dest, lhs, rhs)
            }
            mir::Op::Mul => {
                // mul takes no immediate operand2; force both sides into
                // registers.
                let rn = self.value_to_reg(lhs);
                let rm = self.value_to_reg(rhs);
                let rd = self.var_reg(dest);
                self.inst
                    .push(Inst::arith3(Arith3Op::Mul, rd, rn, Operand2::reg(rm)));
                Ok(())
            }
            mir::Op::Div => self.emit_arith3(Arith3Op::SDiv, dest, lhs, rhs),
            // `_mod` is a pseudo-op; a later pass expands it.
            mir::Op::Rem => self.emit_arith3(Arith3Op::Mod, dest, lhs, rhs),
            mir::Op::And => self.emit_arith3(Arith3Op::And, dest, lhs, rhs),
            mir::Op::Or => self.emit_arith3(Arith3Op::Orr, dest, lhs, rhs),
            mir::Op::Shl => self.emit_arith3(Arith3Op::Lsl, dest, lhs, rhs),
            mir::Op::Shr => self.emit_arith3(Arith3Op::Lsr, dest, lhs, rhs),
            mir::Op::ShrA => self.emit_arith3(Arith3Op::Asr, dest, lhs, rhs),
            mir::Op::Gt => self.emit_compare(dest, lhs, rhs, ConditionCode::Gt, swapped),
            mir::Op::Lt => self.emit_compare(dest, lhs, rhs, ConditionCode::Lt, swapped),
            mir::Op::Gte => self.emit_compare(dest, lhs, rhs, ConditionCode::Ge, swapped),
            mir::Op::Lte => self.emit_compare(dest, lhs, rhs, ConditionCode::Le, swapped),
            mir::Op::Eq => self.emit_compare(dest, lhs, rhs, ConditionCode::Equal, swapped),
            mir::Op::Neq => self.emit_compare(dest, lhs, rhs, ConditionCode::NotEqual, swapped),
        }
    }

    fn emit_arith3(&mut self, op: Arith3Op, dest: VarId, lhs: &Value, rhs: &Value) -> Result<()> {
        let rn = self.value_to_reg(lhs);
        let op2 = self.value_to_operand2(rhs);
        let rd = self.var_reg(dest);
        self.inst.push(Inst::arith3(op, rd, rn, op2));
        Ok(())
    }

    /// Lowers a comparison into `cmp` followed by a zero/one select on the
    /// destination. The conditional move pair is recognized again by the
    /// branch lowering and fused when the result only feeds the terminator.
    fn emit_compare(
        &mut self,
        dest: VarId,
        lhs: &Value,
        rhs: &Value,
        cond: ConditionCode,
        swapped: bool,
    ) -> Result<()> {
        let cond = if swapped { cond.mirror() } else { cond };
        let rn = self.value_to_reg(lhs);
        let op2 = self.value_to_operand2(rhs);
        self.inst.push(Inst::cmp(rn, op2));
        let rd = self.var_reg(dest);
        self.inst.push(Inst::mov(rd, Operand2::Imm(0)));
        self.inst.push(Inst::mov_cond(rd, Operand2::Imm(1), cond));
        Ok(())
    }

    fn translate_ref(&mut self, dest: VarId, target: &mir::RefTarget) -> Result<()> {
        match target {
            Either::Left(symbol) => {
                // The global's address is unknown until link time, so it is
                // loaded PC-relative through the function's constant pool:
                //
                //     ldr rd, =LC
                //     add rd, pc, rd
                //   LPC:
                //     ...
                //   LC: .word symbol - (LPC + 4)
                let const_label = format_const_label(&self.func.name, self.const_counter);
                self.const_counter += 1;
                let pc_label = format_load_pc_label(&self.func.name, self.const_counter);
                self.const_counter += 1;

                let expr = format!("{}-({}+4)", symbol, pc_label);
                self.consts
                    .insert(const_label.clone(), arm::ConstValue::word(expr));

                let reg = self.get_or_alloc_vgp(dest);
                self.inst.push(Inst::ldr_label(reg, const_label));
                self.inst
                    .push(Inst::arith3(Arith3Op::Add, reg, REG_PC, Operand2::reg(reg)));
                self.inst.push(Inst::Label(pc_label));
                Ok(())
            }
            Either::Right(var) => {
                let src = self.get_or_alloc_vgp(*var);
                let rd = self.get_or_alloc_vgp(dest);
                self.inst.push(Inst::mov(rd, Operand2::reg(src)));
                Ok(())
            }
        }
    }

    fn translate_ptr_offset(&mut self, dest: VarId, ptr: VarId, offset: &Value) -> Result<()> {
        let ptr_ty = &self
            .func
            .variables
            .get(&ptr)
            .ok_or(CodegenError::Internal("pointer variable is undeclared"))?
            .ty;
        let item_size = match ptr_ty {
            mir::Ty::Ptr(item) => item
                .size()
                .ok_or(CodegenError::Internal("pointee type is unsized"))?,
            _ => {
                return Err(CodegenError::Internal(
                    "ptroff base is not a pointer variable",
                ))
            }
        };

        match offset {
            Value::Imm(n) => {
                let scaled = n * item_size as i32;
                let rn = self.var_reg(ptr);
                let rd = self.var_reg(dest);
                self.inst
                    .push(Inst::arith3(Arith3Op::Add, rd, rn, Operand2::Imm(scaled)));
            }
            Value::Var(idx) => {
                let size_reg = self.alloc_vgp();
                let scaled_reg = self.alloc_vgp();
                self.inst
                    .push(Inst::mov(size_reg, Operand2::Imm(item_size as i32)));
                let idx_reg = self.var_reg(*idx);
                self.inst.push(Inst::arith3(
                    Arith3Op::Mul,
                    scaled_reg,
                    idx_reg,
                    Operand2::reg(size_reg),
                ));
                let rn = self.var_reg(ptr);
                let rd = self.var_reg(dest);
                self.inst.push(Inst::arith3(
                    Arith3Op::Add,
                    rd,
                    rn,
                    Operand2::reg(scaled_reg),
                ));
            }
        }
        Ok(())
    }

    /// Lowers a call per the AAPCS-flavored convention used here: first four
    /// arguments in r0-r3, the rest in stack slots grown for the call and
    /// shrunk right after, arguments marshaled in reverse index order.
    fn translate_call(&mut self, dest: VarId, func_name: &str, args: &[Value]) -> Result<()> {
        let callee = self
            .package
            .functions
            .get(func_name)
            .ok_or_else(|| CodegenError::FunctionNotFound(func_name.to_string()))?;

        let mut param_count = callee.sig.params.len() as u32;
        if callee.sig.params.last().map_or(false, |ty| ty.is_rest_param()) {
            // Variadic callee: the declared list undercounts, use the actual
            // argument count.
            param_count = args.len() as u32;
        }

        let stack_args = param_count.saturating_sub(4);
        if stack_args > 0 {
            self.inst.push(Inst::arith3(
                Arith3Op::Sub,
                REG_SP,
                REG_SP,
                Operand2::Imm((stack_args * 4) as i32),
            ));
            self.inst
                .push(Inst::Ctrl(CtrlOp::StackOffset((stack_args * 4) as i32)));
        }

        for (idx, arg) in args.iter().enumerate().rev() {
            if idx < 4 {
                let op2 = self.value_to_operand2(arg);
                self.inst.push(Inst::mov(Reg::Gp(idx as u8), op2));
            } else {
                let reg = self.value_to_reg(arg);
                self.inst.push(Inst::str(
                    reg,
                    MemoryOperand::offset(REG_SP, ((idx - 4) * 4) as i32),
                ));
            }
        }

        self.inst
            .push(Inst::bl(Label(callee.name.clone()), param_count));

        if stack_args > 0 {
            self.inst
                .push(Inst::Ctrl(CtrlOp::StackOffset(-((stack_args * 4) as i32))));
            self.inst.push(Inst::arith3(
                Arith3Op::Add,
                REG_SP,
                REG_SP,
                Operand2::Imm((stack_args * 4) as i32),
            ));
        }

        if callee.sig.ret != mir::Ty::Void {
            let rd = self.var_reg(dest);
            self.inst.push(Inst::mov(rd, Operand2::reg(Reg::Gp(0))));
        }
        Ok(())
    }

    /// Matches the `mov rd, #0; mov<cond> rd, #1` tail left by
    /// [`FnCodegen::emit_compare`], returning the condition if present.
    fn compare_tail(&self) -> Option<ConditionCode> {
        let len = self.inst.len();
        if len < 2 {
            return None;
        }
        match (&self.inst[len - 2], &self.inst[len - 1]) {
            (
                Inst::Arith2 {
                    op: arm::Arith2Op::Mov,
                    rd: first_rd,
                    rhs: Operand2::Imm(0),
                    cond: ConditionCode::Always,
                },
                Inst::Arith2 {
                    op: arm::Arith2Op::Mov,
                    rd: second_rd,
                    rhs: Operand2::Imm(1),
                    cond,
                },
            ) if first_rd == second_rd && *cond != ConditionCode::Always => Some(*cond),
            _ => None,
        }
    }

    fn translate_terminator(&mut self, blk_id: BlockId, term: &mir::Terminator) -> Result<()> {
        let fn_name = &self.func.name;
        match term {
            mir::Terminator::Br(target) => {
                self.inst.push(Inst::b(format_bb_label(fn_name, *target)));
                Ok(())
            }
            mir::Terminator::BrCond(cond_var, bb_true, bb_false) => {
                let true_label = format_bb_label(fn_name, *bb_true);
                let false_label = format_bb_label(fn_name, *bb_false);
                if let Some(cond) = self.compare_tail() {
                    // The comparison result only feeds this branch: drop the
                    // zero/one select and branch on the flags directly.
                    self.inst.pop();
                    self.inst.pop();
                    self.inst.push(Inst::b_cond(false_label, cond.invert()));
                    self.inst.push(Inst::b(true_label));
                } else {
                    let reg = self.var_reg(*cond_var);
                    self.inst.push(Inst::cmp(reg, Operand2::Imm(0)));
                    self.inst
                        .push(Inst::b_cond(false_label, ConditionCode::Equal));
                    self.inst.push(Inst::b(true_label));
                }
                Ok(())
            }
            mir::Terminator::Return(value) => {
                if let Some(v) = value {
                    let reg = self.var_reg(*v);
                    self.inst.push(Inst::mov(Reg::Gp(0), Operand2::reg(reg)));
                }
                self.inst.push(Inst::b(format_fn_end_label(fn_name)));
                Ok(())
            }
            mir::Terminator::Unreachable => Ok(()),
            mir::Terminator::Undefined => Err(CodegenError::UndefinedTerminator(blk_id)),
        }
    }

    /// Conditional-execution hints recorded by earlier passes. The selector
    /// itself never acts on them; they ride along for the pass that rewrites
    /// short branches into predicated instructions.
    pub fn inline_hint(&self) -> &BTreeMap<BlockId, ConditionCode> {
        &self.inline_hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra_data::ExtraDataValue;
    use crate::mir::builder::{FunctionBuilder, PackageBuilder};
    use crate::mir::{Terminator, Ty};

    fn lower(package: &mir::Package, name: &str) -> arm::Function {
        let mut extra = ExtraData::default();
        let codegen = FnCodegen::new(&package.functions[name], package, &extra);
        codegen.translate_function(&mut extra).unwrap()
    }

    fn lower_err(package: &mir::Package, name: &str) -> CodegenError {
        let mut extra = ExtraData::default();
        let codegen = FnCodegen::new(&package.functions[name], package, &extra);
        codegen.translate_function(&mut extra).unwrap_err()
    }

    fn texts(func: &arm::Function) -> Vec<String> {
        func.inst.iter().map(|i| i.to_string()).collect()
    }

    fn position(lines: &[String], needle: &str) -> usize {
        lines
            .iter()
            .position(|l| l == needle)
            .unwrap_or_else(|| panic!("`{}` not found in {:#?}", needle, lines))
    }

    fn single_fn_package(func: crate::mir::Function) -> mir::Package {
        let mut builder = PackageBuilder::new();
        builder.function(func);
        builder.build()
    }

    #[test]
    fn identity_function() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let bb0 = f.block();
        f.terminate(bb0, Terminator::Return(Some(f.param(1))));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        assert_eq!(
            lines,
            vec![
                "push {fp, lr}",
                "mov fp, sp",
                ".bb_f$0:",
                "mov r0, r0",
                "b .end_f$",
                ".end_f$:",
                "mov sp, fp",
                "pop {fp, pc}",
            ]
        );
        assert_eq!(lowered.stack_size, 0);
    }

    #[test]
    fn constant_add_uses_operand2() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).op(d, mir::Op::Add, 5.into(), 3.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let mov = position(&lines, "mov v0, #5");
        let add = position(&lines, "add v1, v0, #3");
        assert_eq!(add, mov + 1);
        assert_eq!(lines.iter().filter(|l| l.starts_with("add")).count(), 1);
    }

    #[test]
    fn wide_constant_uses_mov_movt() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).assign(d, 0x12345.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let mov = position(&lines, "mov v0, #9029");
        assert_eq!(lines[mov + 1], "movt v0, #1");
        assert!(lowered.consts.is_empty());
        assert!(!lines.iter().any(|l| l.starts_with("ldr")));
    }

    #[test]
    fn small_negative_constant_uses_mvn() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).assign(d, (-1).into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert!(texts(&lowered).contains(&"mvn v0, #0".to_string()));
    }

    #[test]
    fn comparison_fuses_into_branch() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int, Ty::Int], Ty::Int);
        let t = f.var(Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        let bb2 = f.block();
        let (p1, p2) = (f.param(1).into(), f.param(2).into());
        f.ins(bb0).op(t, mir::Op::Lt, p1, p2);
        f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
        f.terminate(bb1, Terminator::Return(Some(f.param(1))));
        f.terminate(bb2, Terminator::Return(Some(f.param(2))));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let cmp = position(&lines, "cmp r0, r1");
        assert_eq!(lines[cmp + 1], "bge .bb_f$2");
        assert_eq!(lines[cmp + 2], "b .bb_f$1");
        assert!(!lines.iter().any(|l| l.contains("#0") && l.starts_with("mov")));
        assert!(!lines.iter().any(|l| l.starts_with("movlt")));
    }

    #[test]
    fn comparison_result_kept_when_consumed_elsewhere() {
        // The select pair must survive when the flag value is a real operand.
        let mut f = FunctionBuilder::new("f", vec![Ty::Int, Ty::Int], Ty::Int);
        let t = f.var(Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let (p1, p2) = (f.param(1).into(), f.param(2).into());
        f.ins(bb0).op(t, mir::Op::Lt, p1, p2);
        f.ins(bb0).op(d, mir::Op::Add, t.into(), 1.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let cmp = position(&lines, "cmp r0, r1");
        assert_eq!(lines[cmp + 1], "mov v0, #0");
        assert_eq!(lines[cmp + 2], "movlt v0, #1");
    }

    #[test]
    fn immediate_on_left_subtract_becomes_rsb() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let p1 = f.param(1).into();
        f.ins(bb0).op(d, mir::Op::Sub, 7.into(), p1);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert!(texts(&lowered).contains(&"rsb v0, r0, #7".to_string()));
    }

    #[test]
    fn immediate_on_left_comparison_mirrors_condition() {
        // 3 < x is emitted as cmp x, #3 with the condition flipped to gt.
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let t = f.var(Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        let bb2 = f.block();
        let p1 = f.param(1).into();
        f.ins(bb0).op(t, mir::Op::Lt, 3.into(), p1);
        f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
        f.terminate(bb1, Terminator::Return(Some(f.param(1))));
        f.terminate(bb2, Terminator::Return(Some(f.param(1))));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let cmp = position(&lines, "cmp r0, #3");
        assert_eq!(lines[cmp + 1], "ble .bb_f$2");
    }

    #[test]
    fn division_never_swaps() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let p1 = f.param(1).into();
        f.ins(bb0).op(d, mir::Op::Div, 100.into(), p1);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let mov = position(&lines, "mov v0, #100");
        assert_eq!(lines[mov + 1], "sdiv v1, v0, r0");
    }

    #[test]
    fn rem_lowers_to_mod_pseudo_op() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int, Ty::Int], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let (p1, p2) = (f.param(1).into(), f.param(2).into());
        f.ins(bb0).op(d, mir::Op::Rem, p1, p2);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert!(texts(&lowered).contains(&"_mod v0, r0, r1".to_string()));
    }

    #[test]
    fn ptr_offset_with_variable_index() {
        let mut f = FunctionBuilder::new("f", vec![Ty::ptr_to(Ty::Int), Ty::Int], Ty::Int);
        let d = f.var(Ty::ptr_to(Ty::Int));
        let bb0 = f.block();
        let (p1, p2) = (f.param(1), f.param(2).into());
        f.ins(bb0).ptr_offset(d, p1, p2);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let mov = position(&lines, "mov v0, #4");
        assert_eq!(lines[mov + 1], "mul v1, r1, v0");
        assert_eq!(lines[mov + 2], "add v2, r0, v1");
    }

    #[test]
    fn ptr_offset_with_immediate_index_scales() {
        let mut f = FunctionBuilder::new("f", vec![Ty::ptr_to(Ty::Int)], Ty::Int);
        let d = f.var(Ty::ptr_to(Ty::Int));
        let bb0 = f.block();
        let p1 = f.param(1);
        f.ins(bb0).ptr_offset(d, p1, 3.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert!(texts(&lowered).contains(&"add v0, r0, #12".to_string()));
    }

    #[test]
    fn call_with_six_arguments() {
        let mut callee = FunctionBuilder::new("callee", vec![Ty::Int; 6], Ty::Int);
        let bb0 = callee.block();
        callee.terminate(bb0, Terminator::Return(Some(callee.param(1))));

        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).call(
            d,
            "callee",
            vec![1.into(), 2.into(), 3.into(), 4.into(), 5.into(), 6.into()],
        );
        f.terminate(bb0, Terminator::Return(Some(d)));

        let mut builder = PackageBuilder::new();
        builder.function(callee.build());
        builder.function(f.build());
        let package = builder.build();
        let lowered = lower(&package, "f");

        let lines = texts(&lowered);
        let grow = position(&lines, "sub sp, sp, #8");
        assert_eq!(lines[grow + 1], "@ stack_offset +8");
        assert_eq!(lines[grow + 2], "mov v0, #6");
        assert_eq!(lines[grow + 3], "str v0, [sp, #4]");
        assert_eq!(lines[grow + 4], "mov v1, #5");
        assert_eq!(lines[grow + 5], "str v1, [sp]");
        assert_eq!(lines[grow + 6], "mov r3, #4");
        assert_eq!(lines[grow + 7], "mov r2, #3");
        assert_eq!(lines[grow + 8], "mov r1, #2");
        assert_eq!(lines[grow + 9], "mov r0, #1");
        assert_eq!(lines[grow + 10], "bl callee");
        assert_eq!(lines[grow + 11], "@ stack_offset -8");
        assert_eq!(lines[grow + 12], "add sp, sp, #8");
        assert_eq!(lines[grow + 13], "mov v2, r0");

        let bl = lowered
            .inst
            .iter()
            .find_map(|i| match i {
                Inst::Br {
                    op: arm::BranchOp::Bl,
                    param_count,
                    ..
                } => Some(*param_count),
                _ => None,
            })
            .unwrap();
        assert_eq!(bl, Some(6));
    }

    #[test]
    fn rest_param_call_counts_actual_arguments() {
        let mut callee = FunctionBuilder::new("printf", vec![Ty::Int, Ty::RestParam], Ty::Void);
        let bb0 = callee.block();
        callee.terminate(bb0, Terminator::Return(None));

        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        let bb0 = f.block();
        f.ins(bb0)
            .call_void("printf", vec![1.into(), 2.into(), 3.into()]);
        f.terminate(bb0, Terminator::Return(None));

        let mut builder = PackageBuilder::new();
        builder.function(callee.build());
        builder.function(f.build());
        let lowered = lower(&builder.build(), "f");

        let bl = lowered
            .inst
            .iter()
            .find_map(|i| match i {
                Inst::Br {
                    op: arm::BranchOp::Bl,
                    param_count,
                    ..
                } => Some(*param_count),
                _ => None,
            })
            .unwrap();
        assert_eq!(bl, Some(3));
        // Void callee: no result move back from r0.
        assert!(!texts(&lowered).iter().any(|l| l.ends_with(", r0") && l.starts_with("mov v")));
    }

    #[test]
    fn stack_passed_parameters_reload_on_each_use() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int; 6], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let (p5, p6) = (f.param(5).into(), f.param(6).into());
        f.ins(bb0).op(d, mir::Op::Add, p5, p6);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let first = position(&lines, "ldr v0, [fp]");
        assert_eq!(lines[first + 1], "ldr v1, [fp, #4]");
        assert_eq!(lines[first + 2], "add v2, v0, v1");
    }

    #[test]
    fn frame_slots_and_size() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        let arr = f.memory_var(Ty::array_of(Ty::Int, 3));
        let scalar = f.memory_var(Ty::Int);
        let plain = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).store(arr, 1.into());
        f.ins(bb0).store(scalar, 2.into());
        f.ins(bb0).assign(plain, 3.into());
        f.terminate(bb0, Terminator::Return(None));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert_eq!(lowered.stack_size, 16);
        let lines = texts(&lowered);
        assert!(lines.contains(&"str v0, [sp]".to_string()));
        assert!(lines.contains(&"str v1, [sp, #12]".to_string()));
    }

    #[test]
    fn memory_var_address_rematerializes_per_use() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let slot = f.memory_var(Ty::Int);
        let d = f.var(Ty::Int);
        let p = f.var(Ty::ptr_to(Ty::Int));
        let bb0 = f.block();
        f.ins(bb0).ref_var(p, slot);
        f.ins(bb0).ref_var(d, slot);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let addr_count = texts(&lowered)
            .iter()
            .filter(|l| l.starts_with("add v") && l.contains("sp, #0"))
            .count();
        assert_eq!(addr_count, 2);
    }

    #[test]
    fn register_bindings_are_stable() {
        let package = {
            let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
            let _bb0 = f.block();
            single_fn_package(f.build())
        };
        let extra = ExtraData::default();
        let mut codegen = FnCodegen::new(&package.functions["f"], &package, &extra);

        let v = VarId(9);
        let first = codegen.get_or_alloc_vgp(v);
        let second = codegen.get_or_alloc_vgp(v);
        assert_eq!(first, second);
        assert!(codegen.inst.is_empty());

        // Parameter 1 was pre-bound by init_reg_map at translate time only;
        // check the bootstrap mapping directly.
        codegen.init_reg_map();
        assert_eq!(codegen.get_or_alloc_vgp(VarId(1)), Reg::Gp(0));
    }

    #[test]
    fn phi_moves_emitted_in_predecessors() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let x1 = f.var(Ty::Int);
        let x2 = f.var(Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        let bb2 = f.block();
        let bb3 = f.block();
        f.terminate(bb0, Terminator::BrCond(f.param(1), bb1, bb2));
        f.ins(bb1).assign(x1, 1.into());
        f.terminate(bb1, Terminator::Br(bb3));
        f.ins(bb2).assign(x2, 2.into());
        f.terminate(bb2, Terminator::Br(bb3));
        f.ins(bb3).phi(d, vec![x1, x2]);
        f.terminate(bb3, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        // v0 = x1, v1 = d, v2 = x2; each predecessor moves into d's register
        // before branching to the join block.
        let bb1_move = position(&lines, "mov v1, v0");
        assert_eq!(lines[bb1_move + 1], "b .bb_f$3");
        let bb2_move = position(&lines, "mov v1, v2");
        assert_eq!(lines[bb2_move + 1], "b .bb_f$3");
        // The φ site itself contributes nothing.
        let join = position(&lines, ".bb_f$3:");
        assert_eq!(lines[join + 1], "mov r0, v1");
    }

    #[test]
    fn phi_moves_splice_before_consumed_comparison() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let x = f.var(Ty::Int);
        let t = f.var(Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        let bb2 = f.block();
        f.ins(bb0).assign(x, 1.into());
        let p1 = f.param(1).into();
        f.ins(bb0).op(t, mir::Op::Eq, p1, 0.into());
        f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
        f.ins(bb1).phi(d, vec![x]);
        f.terminate(bb1, Terminator::Return(Some(d)));
        f.terminate(bb2, Terminator::Return(Some(f.param(1))));
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let phi_move = position(&lines, "mov v1, v0");
        let cmp = position(&lines, "cmp r0, #0");
        assert!(
            phi_move < cmp,
            "phi move must precede the comparison that feeds the branch: {:#?}",
            lines
        );
        // And the fusion still fires on the untouched compare tail.
        assert_eq!(lines[cmp + 1], "bne .bb_f$2");
    }

    #[test]
    fn global_ref_loads_through_constant_pool() {
        let mut builder = PackageBuilder::new();
        builder.global("counter", Ty::Int);
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let p = f.var(Ty::ptr_to(Ty::Int));
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).ref_global(p, "counter");
        f.ins(bb0).load(d, p.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        builder.function(f.build());
        let lowered = lower(&builder.build(), "f");

        let lines = texts(&lowered);
        let ldr = position(&lines, "ldr v0, =.const_f$0");
        assert_eq!(lines[ldr + 1], "add v0, pc, v0");
        assert_eq!(lines[ldr + 2], ".ld_pc_f$1:");

        assert_eq!(lowered.consts.len(), 1);
        let entry = &lowered.consts[&Label(".const_f$0".into())];
        assert_eq!(entry.value, "counter-(.ld_pc_f$1+4)");
        assert_eq!(entry.kind, arm::ConstKind::Word);
    }

    #[test]
    fn ref_to_variable_is_a_move() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let p1 = f.param(1);
        f.ins(bb0).ref_var(d, p1);
        f.terminate(bb0, Terminator::Return(Some(d)));
        let lowered = lower(&single_fn_package(f.build()), "f");

        assert!(texts(&lowered).contains(&"mov v0, r0".to_string()));
        assert!(lowered.consts.is_empty());
    }

    #[test]
    fn block_ordering_is_honored() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        f.terminate(bb0, Terminator::Br(bb1));
        f.terminate(bb1, Terminator::Return(Some(f.param(1))));
        let package = single_fn_package(f.build());

        let mut extra = ExtraData::default();
        extra.insert(
            extra_data::BASIC_BLOCK_ORDERING.to_string(),
            ExtraDataValue::BasicBlockOrdering(
                [("f".to_string(), vec![1, 0])].into_iter().collect(),
            ),
        );
        let codegen = FnCodegen::new(&package.functions["f"], &package, &extra);
        let lowered = codegen.translate_function(&mut extra).unwrap();

        let lines = texts(&lowered);
        assert!(position(&lines, ".bb_f$1:") < position(&lines, ".bb_f$0:"));
    }

    #[test]
    fn unknown_block_in_ordering_fails() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        let bb0 = f.block();
        f.terminate(bb0, Terminator::Return(None));
        let package = single_fn_package(f.build());

        let mut extra = ExtraData::default();
        extra.insert(
            extra_data::BASIC_BLOCK_ORDERING.to_string(),
            ExtraDataValue::BasicBlockOrdering(
                [("f".to_string(), vec![0, 7])].into_iter().collect(),
            ),
        );
        let codegen = FnCodegen::new(&package.functions["f"], &package, &extra);
        assert_eq!(
            codegen.translate_function(&mut extra).unwrap_err(),
            CodegenError::UnknownBlock(7)
        );
    }

    #[test]
    fn undefined_terminator_fails() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        f.block();
        let package = single_fn_package(f.build());
        assert_eq!(
            lower_err(&package, "f"),
            CodegenError::UndefinedTerminator(0)
        );
    }

    #[test]
    fn unknown_callee_fails() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        let bb0 = f.block();
        f.ins(bb0).call_void("missing", vec![]);
        f.terminate(bb0, Terminator::Return(None));
        let package = single_fn_package(f.build());
        assert_eq!(
            lower_err(&package, "f"),
            CodegenError::FunctionNotFound("missing".to_string())
        );
    }

    #[test]
    fn immediate_memory_base_fails() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        f.ins(bb0).load(d, Value::Imm(0));
        f.terminate(bb0, Terminator::Return(Some(d)));
        let package = single_fn_package(f.build());
        assert!(matches!(
            lower_err(&package, "f"),
            CodegenError::NotImplemented(_)
        ));
    }

    #[test]
    fn variable_offset_from_stack_param_fails() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int; 5], Ty::Int);
        let d = f.var(Ty::Int);
        let idx = f.var(Ty::Int);
        let bb0 = f.block();
        let p5 = f.param(5).into();
        f.ins(bb0).load_offset(d, p5, idx.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let package = single_fn_package(f.build());
        assert!(matches!(
            lower_err(&package, "f"),
            CodegenError::NotImplemented(_)
        ));
    }

    #[test]
    fn unreachable_terminator_emits_nothing() {
        let mut f = FunctionBuilder::new("f", vec![], Ty::Void);
        let bb0 = f.block();
        let bb1 = f.block();
        f.terminate(bb0, Terminator::Return(None));
        f.terminate(bb1, Terminator::Unreachable);
        let lowered = lower(&single_fn_package(f.build()), "f");

        let lines = texts(&lowered);
        let label = position(&lines, ".bb_f$1:");
        assert_eq!(lines[label + 1], ".end_f$:");
    }

    #[test]
    fn reg_map_is_published() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let d = f.var(Ty::Int);
        let bb0 = f.block();
        let p1 = f.param(1).into();
        f.ins(bb0).op(d, mir::Op::Add, p1, 1.into());
        f.terminate(bb0, Terminator::Return(Some(d)));
        let package = single_fn_package(f.build());

        let mut extra = ExtraData::default();
        let codegen = FnCodegen::new(&package.functions["f"], &package, &extra);
        codegen.translate_function(&mut extra).unwrap();

        let map = extra_data::reg_map(&extra, "f").unwrap();
        assert_eq!(map[&VarId(1)], Reg::Gp(0));
        assert_eq!(map[&d], Reg::Vgp(0));
    }

    #[test]
    fn lowering_is_deterministic() {
        let build = || {
            let mut f = FunctionBuilder::new("f", vec![Ty::Int, Ty::Int], Ty::Int);
            let t = f.var(Ty::Int);
            let a = f.var(Ty::Int);
            let b = f.var(Ty::Int);
            let d = f.var(Ty::Int);
            let bb0 = f.block();
            let bb1 = f.block();
            let bb2 = f.block();
            let bb3 = f.block();
            let (p1, p2) = (f.param(1).into(), f.param(2).into());
            f.ins(bb0).op(t, mir::Op::Gt, p1, p2);
            f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
            let p1 = f.param(1).into();
            f.ins(bb1).assign(a, p1);
            f.terminate(bb1, Terminator::Br(bb3));
            let p2 = f.param(2).into();
            f.ins(bb2).assign(b, p2);
            f.terminate(bb2, Terminator::Br(bb3));
            f.ins(bb3).phi(d, vec![a, b]);
            f.terminate(bb3, Terminator::Return(Some(d)));
            single_fn_package(f.build())
        };
        let first = lower(&build(), "f").to_string();
        let second = lower(&build(), "f").to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn conditional_branches_follow_a_compare() {
        let mut f = FunctionBuilder::new("f", vec![Ty::Int], Ty::Int);
        let t = f.var(Ty::Int);
        let bb0 = f.block();
        let bb1 = f.block();
        let bb2 = f.block();
        // The condition is produced by an assignment, not a comparison, so
        // the fallback `cmp #0` lowering must kick in.
        let p1 = f.param(1).into();
        f.ins(bb0).assign(t, p1);
        f.terminate(bb0, Terminator::BrCond(t, bb1, bb2));
        f.terminate(bb1, Terminator::Return(Some(f.param(1))));
        f.terminate(bb2, Terminator::Return(Some(f.param(1))));
        let lowered = lower(&single_fn_package(f.build()), "f");

        for (i, inst) in lowered.inst.iter().enumerate() {
            if let Inst::Br { cond, .. } = inst {
                if *cond != ConditionCode::Always {
                    assert!(matches!(
                        lowered.inst[i - 1],
                        Inst::Arith2 {
                            op: arm::Arith2Op::Cmp,
                            ..
                        }
                    ));
                }
            }
        }
        assert!(texts(&lowered).contains(&"cmp v0, #0".to_string()));
        assert!(texts(&lowered).contains(&"beq .bb_f$2".to_string()));
    }
}
