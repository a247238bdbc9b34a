//! Lowers procedure bodies into VM bytecode.
//!
//! One procedure at a time: the block graph is walked in index order, every
//! reachable block gets a stable label, SSA values are scheduled onto the
//! value stack or into registers, and the finished instruction list is
//! serialized through the codec. Procedures containing operations the VM
//! reserves (comparisons, bitwise logic, casts) are refused whole; the
//! driver leaves them untouched.
//!
//! Scheduling: a value rides the stack when it has exactly one use, that use
//! is the immediately following instruction in the same block, and it is
//! that instruction's first-pushed operand — then the producing instruction
//! simply leaves it on top. Every other value gets a fresh register. Phi
//! results always live in registers: each predecessor edge writes them with
//! a stack-based parallel copy (sources pushed left-to-right, registers
//! popped in reverse), and edges from multi-successor blocks into phi blocks
//! are split through synthetic stub blocks so the copies stay per-edge.

use crate::{PassConfig, Transform};
use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use vmcloak_core::hashing;
use vmcloak_core::instr::Instr;
use vmcloak_core::value::Value;
use vmcloak_core::encoder;
use vmcloak_ir::{
    BasicBlock, BinOp, BlockId, Body, Inst, InstKind, Module, Operand, Procedure, Terminator,
    Type, ValueId,
};
use vmcloak_utils::errors::{LowerError, TransformError};

bitflags! {
    /// Encoder behavior toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LowerFlags: u32 {
        /// Insert `TypeCheckInt` guards after register reloads and integer
        /// loads.
        const TYPE_CHECK = 1;
        /// Randomly encode static allocas as either `Alloca n` or
        /// `Push n; Alloca2`.
        const POLY_INSTRUCTION = 1 << 1;
        /// Scramble the register index space.
        const RANDOM_REG_MAPPING = 1 << 2;
        /// Emit `ClearReg` when a block-local value dies.
        const CLEAR_DEAD_REGS = 1 << 3;
    }
}

impl Default for LowerFlags {
    fn default() -> Self {
        LowerFlags::TYPE_CHECK | LowerFlags::CLEAR_DEAD_REGS
    }
}

/// Lowers one procedure to an encoded byte stream.
pub fn lower_procedure(
    proc: &Procedure,
    flags: LowerFlags,
    rng: &mut StdRng,
) -> Result<Vec<u8>, LowerError> {
    Ok(encoder::encode(&lower_to_instrs(proc, flags, rng)?))
}

/// Lowers one procedure to an instruction list, for inspection and tests.
pub fn lower_to_instrs(
    proc: &Procedure,
    flags: LowerFlags,
    rng: &mut StdRng,
) -> Result<Vec<Instr>, LowerError> {
    let blocks = proc
        .blocks()
        .ok_or_else(|| malformed(proc, "body is already virtualized"))?;
    if blocks.is_empty() {
        return Err(malformed(proc, "procedure has no blocks"));
    }

    let reachable = proc.reachable_blocks().expect("body checked above");
    let info = analyze(proc, &reachable)?;

    let mut lower = Lower {
        proc,
        flags,
        rng,
        info,
        regs: RegAlloc::new(),
        out: Vec::new(),
        stack_top: None,
        stub_labels: HashMap::new(),
        pending_stubs: Vec::new(),
    };
    if flags.contains(LowerFlags::RANDOM_REG_MAPPING) {
        lower.regs.scramble(lower.rng);
    }

    // Parameters and phis live in registers before any block is emitted:
    // the entry prologue pops into the former and predecessor edges write
    // the latter.
    for i in 0..proc.params.len() {
        let reg = lower.alloc_reg();
        lower.info.get_mut(&ValueId(i)).expect("param info").reg = Some(reg);
    }
    for idx in 0..blocks.len() {
        if !reachable.contains(&BlockId(idx)) {
            continue;
        }
        for phi in &blocks[idx].phis {
            let reg = lower.alloc_reg();
            lower.info.get_mut(&phi.result).expect("phi info").reg = Some(reg);
        }
    }

    for idx in 0..blocks.len() {
        let id = BlockId(idx);
        if !reachable.contains(&id) {
            tracing::debug!("{}: dropping unreachable {id}", proc.name);
            continue;
        }
        lower.emit_block(id)?;
        lower.flush_stubs()?;
    }

    tracing::debug!(
        "{}: lowered {} blocks to {} instructions",
        proc.name,
        reachable.len(),
        lower.out.len()
    );
    Ok(lower.out)
}

#[derive(Debug, Default, Clone)]
struct ValueInfo {
    total: u32,
    remaining: u32,
    reg: Option<u32>,
    /// Used from a block other than its defining block; never cleared and
    /// never stack-scheduled.
    persistent: bool,
    ty: Option<Type>,
    def_block: Option<BlockId>,
}

/// Register index allocator mirroring the run-time register file: a flag per
/// slot, lowest free slot wins, freed slots are reused.
struct RegAlloc {
    live: Vec<bool>,
}

impl RegAlloc {
    fn new() -> Self {
        Self { live: Vec::new() }
    }

    /// Pre-seeds the index space with dead slots so allocation order stops
    /// mirroring program order.
    fn scramble(&mut self, rng: &mut StdRng) {
        self.live = vec![false; rng.random_range(10..10_000)];
    }

    fn alloc(&mut self, rng: &mut StdRng, random: bool) -> u32 {
        if random {
            let free: Vec<usize> = (0..self.live.len()).filter(|&i| !self.live[i]).collect();
            if !free.is_empty() {
                let idx = free[rng.random_range(0..free.len())];
                self.live[idx] = true;
                return idx as u32;
            }
        }
        if let Some(idx) = self.live.iter().position(|l| !l) {
            self.live[idx] = true;
            return idx as u32;
        }
        self.live.push(true);
        (self.live.len() - 1) as u32
    }

    fn free(&mut self, reg: u32) {
        if let Some(flag) = self.live.get_mut(reg as usize) {
            *flag = false;
        }
    }
}

struct Lower<'a> {
    proc: &'a Procedure,
    flags: LowerFlags,
    rng: &'a mut StdRng,
    info: HashMap<ValueId, ValueInfo>,
    regs: RegAlloc,
    out: Vec<Instr>,
    /// Value left on the stack by the previous instruction for in-place
    /// consumption by the next one.
    stack_top: Option<ValueId>,
    stub_labels: HashMap<(BlockId, BlockId), u64>,
    pending_stubs: Vec<(u64, BlockId, BlockId)>,
}

impl<'a> Lower<'a> {
    fn blocks(&self) -> &'a [BasicBlock] {
        self.proc.blocks().expect("checked in lower_to_instrs")
    }

    fn block_label(&self, id: BlockId) -> u64 {
        hashing::block_label_hash(&self.proc.name, id.0)
    }

    fn alloc_reg(&mut self) -> u32 {
        let random = self.flags.contains(LowerFlags::RANDOM_REG_MAPPING);
        self.regs.alloc(self.rng, random)
    }

    fn emit_block(&mut self, id: BlockId) -> Result<(), LowerError> {
        self.out.push(Instr::Label {
            label: self.block_label(id),
        });

        if id == Procedure::ENTRY {
            // Arguments arrive pre-pushed left-to-right, so the last one is
            // on top: pop into parameter registers in reverse.
            let param_regs: Vec<u32> = (0..self.proc.params.len())
                .map(|i| self.info[&ValueId(i)].reg.expect("assigned above"))
                .collect();
            for reg in param_regs.into_iter().rev() {
                self.out.push(Instr::PopToReg { reg });
            }
        }

        let block = &self.blocks()[id.0];
        for pos in 0..block.insts.len() {
            let next_leftmost = self.consumer_leftmost(id, pos);
            self.emit_inst(&block.insts[pos], next_leftmost)?;
        }
        self.emit_terminator(id)?;
        self.stack_top = None;
        Ok(())
    }

    /// First-pushed operand of the consumer following position `pos`, used
    /// to decide whether the producing value may stay on the stack.
    fn consumer_leftmost(&self, id: BlockId, pos: usize) -> Option<Operand> {
        let block = &self.blocks()[id.0];
        if pos + 1 < block.insts.len() {
            return leftmost_of(&block.insts[pos + 1].kind);
        }
        match &block.term {
            Terminator::Br { target } => {
                let succ = &self.blocks()[target.0];
                succ.phis
                    .first()
                    .and_then(|phi| incoming_for(phi.incoming.as_slice(), id))
            }
            Terminator::CondBr { cond, .. } => Some(*cond),
            Terminator::Switch { value, .. } => Some(*value),
            Terminator::Ret { value } => *value,
            Terminator::Unreachable => None,
        }
    }

    fn emit_inst(&mut self, inst: &Inst, next_leftmost: Option<Operand>) -> Result<(), LowerError> {
        match &inst.kind {
            InstKind::Binary {
                op, lhs, rhs, nsw, nuw, ..
            } => {
                self.emit_operand(lhs, true)?;
                self.emit_operand(rhs, false)?;
                self.out.push(match op {
                    BinOp::Add => Instr::Add {
                        nsw: *nsw,
                        nuw: *nuw,
                    },
                    BinOp::Sub => Instr::Sub,
                    BinOp::Mul => Instr::Mul,
                    BinOp::Div => Instr::Div,
                });
                self.place_result(inst.result, next_leftmost)
            }
            InstKind::Alloca { size } => {
                if self.flags.contains(LowerFlags::POLY_INSTRUCTION) && self.rng.random::<bool>() {
                    self.out.push(Instr::Push {
                        value: Value::I64(*size as i64),
                    });
                    self.out.push(Instr::Alloca2);
                } else {
                    self.out.push(Instr::Alloca { size: *size });
                }
                self.place_result(inst.result, next_leftmost)
            }
            InstKind::AllocaDyn { size } => {
                self.emit_operand(size, true)?;
                self.out.push(Instr::Alloca2);
                self.place_result(inst.result, next_leftmost)
            }
            InstKind::Load { ty, ptr } => {
                self.emit_operand(ptr, true)?;
                self.out.push(Instr::LoadValue);
                if self.flags.contains(LowerFlags::TYPE_CHECK) && ty.is_int() {
                    self.out.push(Instr::TypeCheckInt {
                        width: ty.vm_width_bits(),
                    });
                }
                self.place_result(inst.result, next_leftmost)
            }
            InstKind::Store { ptr, value } => {
                // Value first; StoreValue takes the pointer from the top.
                self.emit_operand(value, true)?;
                self.emit_operand(ptr, false)?;
                self.out.push(Instr::StoreValue);
                Ok(())
            }
            InstKind::Call { callee, args, ret } => {
                for (i, arg) in args.iter().enumerate() {
                    self.emit_operand(arg, i == 0)?;
                }
                self.out.push(Instr::Call {
                    callee: hashing::symbol_hash(callee),
                    is_void: ret.is_none(),
                    argc: args.len() as u32,
                });
                self.place_result(inst.result, next_leftmost)
            }
            InstKind::Icmp { .. } | InstKind::Bit { .. } | InstKind::Cast { .. } => {
                // Filtered in analyze; kept as a backstop.
                Err(unsupported(self.proc, "reserved operation"))
            }
        }
    }

    fn emit_terminator(&mut self, pred: BlockId) -> Result<(), LowerError> {
        let term = &self.blocks()[pred.0].term;
        match term {
            Terminator::Br { target } => {
                let target = *target;
                self.emit_phi_moves(pred, target, true)?;
                self.out.push(Instr::Jump {
                    target: self.block_label(target),
                });
            }
            Terminator::CondBr {
                cond,
                then_to,
                else_to,
            } => {
                let (cond, then_to, else_to) = (*cond, *then_to, *else_to);
                self.emit_operand(&cond, true)?;
                let else_dest = self.edge_dest(pred, else_to);
                let then_dest = self.edge_dest(pred, then_to);
                self.out.push(Instr::JumpIfNot { target: else_dest });
                self.out.push(Instr::Jump { target: then_dest });
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                // Lowered with executable opcodes only: the scrutinee sits
                // in a scratch register and each case jumps when
                // `scrutinee - k` is zero.
                let (value, default) = (*value, *default);
                let cases = cases.clone();
                self.emit_operand(&value, true)?;
                let scratch = self.alloc_reg();
                self.out.push(Instr::PopToReg { reg: scratch });
                for (case, target) in &cases {
                    self.out.push(Instr::PushFromReg { reg: scratch });
                    self.out.push(Instr::Push {
                        value: case.to_value(),
                    });
                    self.out.push(Instr::Sub);
                    let dest = self.edge_dest(pred, *target);
                    self.out.push(Instr::JumpIfNot { target: dest });
                }
                let dest = self.edge_dest(pred, default);
                self.out.push(Instr::Jump { target: dest });
                self.regs.free(scratch);
            }
            Terminator::Ret { value } => {
                match *value {
                    Some(op) => self.emit_operand(&op, true)?,
                    // Uniform return protocol: void still leaves a value on
                    // top for the interpreter to pop.
                    None => self.out.push(Instr::Push {
                        value: Value::Undef,
                    }),
                }
                self.out.push(Instr::Ret);
            }
            Terminator::Unreachable => {
                self.out.push(Instr::Push {
                    value: Value::Undef,
                });
                self.out.push(Instr::Ret);
            }
        }
        Ok(())
    }

    /// Destination label for the edge `pred -> succ`: the block itself when
    /// it has no phis, otherwise a per-edge stub that performs the phi
    /// writes before entering it.
    fn edge_dest(&mut self, pred: BlockId, succ: BlockId) -> u64 {
        if self.blocks()[succ.0].phis.is_empty() {
            return self.block_label(succ);
        }
        if let Some(label) = self.stub_labels.get(&(pred, succ)) {
            return *label;
        }
        let label = hashing::symbol_hash(&format!(
            "{}::bb{}->bb{}",
            self.proc.name, pred.0, succ.0
        ));
        self.stub_labels.insert((pred, succ), label);
        self.pending_stubs.push((label, pred, succ));
        label
    }

    /// Parallel copy into the phi registers of `succ` for the edge from
    /// `pred`: all sources are pushed before any register is written, so a
    /// phi reading another phi's previous value stays correct.
    fn emit_phi_moves(
        &mut self,
        pred: BlockId,
        succ: BlockId,
        allow_stack_first: bool,
    ) -> Result<(), LowerError> {
        let phis = &self.blocks()[succ.0].phis;
        if phis.is_empty() {
            return Ok(());
        }
        let moves: Vec<(ValueId, Option<Operand>)> = phis
            .iter()
            .map(|phi| (phi.result, incoming_for(&phi.incoming, pred)))
            .collect();
        for (i, (result, operand)) in moves.iter().enumerate() {
            let operand = operand
                .ok_or_else(|| malformed(self.proc, format!("{result} has no incoming from {pred}")))?;
            self.emit_operand(&operand, allow_stack_first && i == 0)?;
        }
        for (result, _) in moves.iter().rev() {
            let reg = self.info[result]
                .reg
                .ok_or_else(|| malformed(self.proc, format!("{result} has no register")))?;
            self.out.push(Instr::PopToReg { reg });
        }
        Ok(())
    }

    fn flush_stubs(&mut self) -> Result<(), LowerError> {
        let pending = std::mem::take(&mut self.pending_stubs);
        for (label, pred, succ) in pending {
            self.out.push(Instr::Label { label });
            self.emit_phi_moves(pred, succ, false)?;
            self.out.push(Instr::Jump {
                target: self.block_label(succ),
            });
        }
        Ok(())
    }

    fn emit_operand(&mut self, operand: &Operand, first: bool) -> Result<(), LowerError> {
        match operand {
            Operand::Const(c) => {
                // Width statically evident; no check needed.
                self.out.push(Instr::Push {
                    value: c.to_value(),
                });
            }
            Operand::Value(v) => {
                if first && self.stack_top == Some(*v) {
                    // Already on top of the stack; consume in place.
                    self.stack_top = None;
                } else {
                    let (reg, ty) = {
                        let info = self
                            .info
                            .get(v)
                            .ok_or_else(|| malformed(self.proc, format!("{v} is undefined")))?;
                        (info.reg, info.ty)
                    };
                    let reg = reg
                        .ok_or_else(|| malformed(self.proc, format!("{v} used before definition")))?;
                    self.out.push(Instr::PushFromReg { reg });
                    if self.flags.contains(LowerFlags::TYPE_CHECK) {
                        if let Some(ty) = ty {
                            if ty.is_int() {
                                self.out.push(Instr::TypeCheckInt {
                                    width: ty.vm_width_bits(),
                                });
                            }
                        }
                    }
                }
                self.note_use(*v);
            }
        }
        Ok(())
    }

    fn note_use(&mut self, v: ValueId) {
        let info = self.info.get_mut(&v).expect("noted values exist");
        info.remaining = info.remaining.saturating_sub(1);
        if info.remaining == 0
            && !info.persistent
            && self.flags.contains(LowerFlags::CLEAR_DEAD_REGS)
        {
            if let Some(reg) = info.reg.take() {
                self.out.push(Instr::ClearReg { reg });
                self.regs.free(reg);
            }
        }
    }

    fn place_result(
        &mut self,
        result: Option<ValueId>,
        next_leftmost: Option<Operand>,
    ) -> Result<(), LowerError> {
        let Some(v) = result else { return Ok(()) };
        let (total, persistent) = {
            let info = self
                .info
                .get(&v)
                .ok_or_else(|| malformed(self.proc, format!("{v} has no analysis entry")))?;
            (info.total, info.persistent)
        };
        if total == 0 {
            self.out.push(Instr::Pop);
            return Ok(());
        }
        if total == 1 && !persistent && next_leftmost == Some(Operand::Value(v)) {
            self.stack_top = Some(v);
            return Ok(());
        }
        let reg = self.alloc_reg();
        self.info.get_mut(&v).expect("looked up above").reg = Some(reg);
        self.out.push(Instr::PopToReg { reg });
        Ok(())
    }
}

/// Collects defs, types, use counts and cross-block liveness, and refuses
/// procedures outside the executable subset.
fn analyze(
    proc: &Procedure,
    reachable: &HashSet<BlockId>,
) -> Result<HashMap<ValueId, ValueInfo>, LowerError> {
    let blocks = proc.blocks().expect("caller checked");
    let mut info: HashMap<ValueId, ValueInfo> = HashMap::new();

    for (i, ty) in proc.params.iter().enumerate() {
        info.insert(
            ValueId(i),
            ValueInfo {
                ty: Some(*ty),
                def_block: Some(Procedure::ENTRY),
                ..Default::default()
            },
        );
    }

    let define =
        |info: &mut HashMap<ValueId, ValueInfo>, v: ValueId, ty: Option<Type>, block: BlockId| {
            let prior = info.insert(
                v,
                ValueInfo {
                    ty,
                    def_block: Some(block),
                    ..Default::default()
                },
            );
            if prior.is_some() {
                Err(malformed(proc, format!("{v} defined twice")))
            } else {
                Ok(())
            }
        };

    for idx in 0..blocks.len() {
        let id = BlockId(idx);
        if !reachable.contains(&id) {
            continue;
        }
        let block = &blocks[idx];
        if id == Procedure::ENTRY && !block.phis.is_empty() {
            return Err(malformed(proc, "phi in entry block"));
        }
        // The entry prologue consumes the arguments; re-entering it would
        // underflow the stack.
        if block.term.successors().iter().any(|(s, _)| *s == Procedure::ENTRY) {
            return Err(malformed(proc, "branch targets the entry block"));
        }
        for phi in &block.phis {
            define(&mut info, phi.result, Some(phi.ty), id)?;
        }
        for inst in &block.insts {
            check_supported(proc, &inst.kind)?;
            if let Some(v) = inst.result {
                define(&mut info, v, result_ty(&inst.kind), id)?;
            }
        }
    }

    let note_use = |info: &mut HashMap<ValueId, ValueInfo>,
                        operand: &Operand,
                        use_block: BlockId|
     -> Result<(), LowerError> {
        if let Operand::Value(v) = operand {
            let entry = info
                .get_mut(v)
                .ok_or_else(|| malformed(proc, format!("{v} is undefined")))?;
            entry.total += 1;
            entry.remaining += 1;
            if entry.def_block != Some(use_block) {
                entry.persistent = true;
            }
        }
        Ok(())
    };

    for idx in 0..blocks.len() {
        let id = BlockId(idx);
        if !reachable.contains(&id) {
            continue;
        }
        let block = &blocks[idx];
        for inst in &block.insts {
            for operand in operands_of(&inst.kind) {
                note_use(&mut info, &operand, id)?;
            }
        }
        match &block.term {
            Terminator::CondBr { cond, .. } => note_use(&mut info, cond, id)?,
            Terminator::Switch { value, .. } => note_use(&mut info, value, id)?,
            Terminator::Ret { value: Some(op) } => note_use(&mut info, op, id)?,
            _ => {}
        }
        // Phi incomings are consumed at the tail of the predecessor.
        for (succ, _) in block.term.successors() {
            if !reachable.contains(&succ) {
                continue;
            }
            for phi in &blocks[succ.0].phis {
                if let Some(operand) = incoming_for(&phi.incoming, id) {
                    note_use(&mut info, &operand, id)?;
                }
            }
        }
    }

    for idx in 0..blocks.len() {
        let id = BlockId(idx);
        if !reachable.contains(&id) {
            continue;
        }
        if let Terminator::Switch { value, cases, .. } = &blocks[idx].term {
            let ty = operand_ty(value, &info)
                .ok_or_else(|| malformed(proc, "switch scrutinee has no type"))?;
            if !ty.is_int() {
                return Err(unsupported(proc, "switch on non-integer scrutinee"));
            }
            if ty == Type::I1 {
                return Err(unsupported(proc, "switch on i1"));
            }
            for (case, _) in cases {
                if case.ty() != ty {
                    return Err(malformed(proc, "switch case type differs from scrutinee"));
                }
            }
        }
    }

    Ok(info)
}

fn check_supported(proc: &Procedure, kind: &InstKind) -> Result<(), LowerError> {
    match kind {
        InstKind::Icmp { .. } => Err(unsupported(proc, "integer comparison")),
        InstKind::Bit { .. } => Err(unsupported(proc, "bitwise logic")),
        InstKind::Cast { .. } => Err(unsupported(proc, "type conversion")),
        InstKind::Binary { op, ty, .. } => {
            if *ty == Type::I1 {
                return Err(unsupported(proc, "i1 arithmetic"));
            }
            if *ty == Type::Ptr && *op != BinOp::Add {
                return Err(unsupported(proc, "pointer arithmetic beyond ptr + i64"));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn result_ty(kind: &InstKind) -> Option<Type> {
    match kind {
        InstKind::Binary { ty, .. } => Some(*ty),
        InstKind::Alloca { .. } | InstKind::AllocaDyn { .. } => Some(Type::Ptr),
        InstKind::Load { ty, .. } => Some(*ty),
        InstKind::Call { ret, .. } => *ret,
        InstKind::Store { .. } => None,
        InstKind::Icmp { .. } => Some(Type::I1),
        InstKind::Bit { ty, .. } => Some(*ty),
        InstKind::Cast { to, .. } => Some(*to),
    }
}

/// Operands in push order.
fn operands_of(kind: &InstKind) -> Vec<Operand> {
    match kind {
        InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstKind::Alloca { .. } => Vec::new(),
        InstKind::AllocaDyn { size } => vec![*size],
        InstKind::Load { ptr, .. } => vec![*ptr],
        InstKind::Store { ptr, value } => vec![*value, *ptr],
        InstKind::Call { args, .. } => args.clone(),
        InstKind::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstKind::Bit { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstKind::Cast { value, .. } => vec![*value],
    }
}

fn leftmost_of(kind: &InstKind) -> Option<Operand> {
    operands_of(kind).into_iter().next()
}

fn incoming_for(incoming: &[(BlockId, Operand)], pred: BlockId) -> Option<Operand> {
    incoming
        .iter()
        .find(|(from, _)| *from == pred)
        .map(|(_, op)| *op)
}

fn operand_ty(operand: &Operand, info: &HashMap<ValueId, ValueInfo>) -> Option<Type> {
    match operand {
        Operand::Const(c) => Some(c.ty()),
        Operand::Value(v) => info.get(v).and_then(|i| i.ty),
    }
}

fn unsupported(proc: &Procedure, what: impl Into<String>) -> LowerError {
    LowerError::Unsupported {
        procedure: proc.name.clone(),
        what: what.into(),
    }
}

fn malformed(proc: &Procedure, detail: impl Into<String>) -> LowerError {
    LowerError::MalformedIr {
        procedure: proc.name.clone(),
        detail: detail.into(),
    }
}

/// The lowering pass: virtualizes every eligible procedure of the module.
pub struct VmLower {
    config: PassConfig,
    flags: LowerFlags,
}

impl VmLower {
    pub fn new(config: PassConfig) -> Self {
        Self {
            config,
            flags: LowerFlags::default(),
        }
    }

    pub fn with_flags(config: PassConfig, flags: LowerFlags) -> Self {
        Self { config, flags }
    }
}

impl Transform for VmLower {
    fn name(&self) -> &'static str {
        "VmLower"
    }

    fn apply(&self, module: &mut Module, rng: &mut StdRng) -> Result<bool, TransformError> {
        let total = module.procedures.len();
        let cap = if self.config.aggressive {
            total
        } else {
            (((total as f32) * self.config.max_virtualize_ratio).ceil() as usize).max(1)
        };

        let mut virtualized = 0usize;
        let mut changed = false;
        for proc in &mut module.procedures {
            if virtualized >= cap {
                break;
            }
            if proc.is_virtualized() {
                continue;
            }
            match lower_procedure(&*proc, self.flags, rng) {
                Ok(bytecode) => {
                    if self.config.max_bytecode_size > 0
                        && bytecode.len() > self.config.max_bytecode_size
                    {
                        tracing::warn!(
                            "{}: {} bytecode bytes over the {} cap, leaving untouched",
                            proc.name,
                            bytecode.len(),
                            self.config.max_bytecode_size
                        );
                        continue;
                    }
                    tracing::debug!("{}: virtualized into {} bytes", proc.name, bytecode.len());
                    proc.body = Body::Virtualized { bytecode };
                    virtualized += 1;
                    changed = true;
                }
                Err(LowerError::Unsupported { procedure, what }) => {
                    tracing::warn!("{procedure}: {what}, leaving untouched");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(changed)
    }
}
