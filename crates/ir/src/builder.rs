//! Incremental procedure construction for tests and demos.

use crate::proc::{
    BasicBlock, BlockId, Body, Inst, InstKind, Phi, Procedure, Terminator, ValueId,
};
use crate::types::{BinOp, BitOpKind, CastKind, Constant, IcmpPred, Operand, Type};

struct PendingBlock {
    phis: Vec<Phi>,
    insts: Vec<Inst>,
    term: Option<Terminator>,
}

/// Builds one `Procedure`. The entry block exists from the start; further
/// blocks are created on demand and every block must be terminated before
/// `finish`.
pub struct FunctionBuilder {
    name: String,
    params: Vec<Type>,
    ret: Option<Type>,
    blocks: Vec<PendingBlock>,
    next_value: usize,
}

impl FunctionBuilder {
    pub const ENTRY: BlockId = Procedure::ENTRY;

    pub fn new(name: impl Into<String>, params: &[Type], ret: Option<Type>) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            ret,
            blocks: vec![PendingBlock {
                phis: Vec::new(),
                insts: Vec::new(),
                term: None,
            }],
            next_value: params.len(),
        }
    }

    pub fn param(&self, index: usize) -> ValueId {
        assert!(index < self.params.len(), "no parameter {index}");
        ValueId(index)
    }

    pub fn create_block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock {
            phis: Vec::new(),
            insts: Vec::new(),
            term: None,
        });
        BlockId(self.blocks.len() - 1)
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn push(&mut self, block: BlockId, result: Option<ValueId>, kind: InstKind) {
        let pending = &mut self.blocks[block.0];
        assert!(pending.term.is_none(), "{block} already terminated");
        pending.insts.push(Inst { result, kind });
    }

    pub fn phi(&mut self, block: BlockId, ty: Type, incoming: Vec<(BlockId, Operand)>) -> ValueId {
        let result = self.fresh_value();
        self.blocks[block.0].phis.push(Phi {
            result,
            ty,
            incoming,
        });
        result
    }

    /// Completes a back edge: registers another incoming for a phi created
    /// before its predecessor existed.
    pub fn add_incoming(&mut self, block: BlockId, phi: ValueId, from: BlockId, operand: Operand) {
        let pending = &mut self.blocks[block.0];
        let phi = pending
            .phis
            .iter_mut()
            .find(|p| p.result == phi)
            .unwrap_or_else(|| panic!("{phi} is not a phi of {block}"));
        phi.incoming.push((from, operand));
    }

    pub fn binary(
        &mut self,
        block: BlockId,
        op: BinOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    ) -> ValueId {
        let result = self.fresh_value();
        self.push(
            block,
            Some(result),
            InstKind::Binary {
                op,
                ty,
                lhs,
                rhs,
                nsw: false,
                nuw: false,
            },
        );
        result
    }

    pub fn alloca(&mut self, block: BlockId, size: u64) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::Alloca { size });
        result
    }

    pub fn alloca_dyn(&mut self, block: BlockId, size: Operand) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::AllocaDyn { size });
        result
    }

    pub fn load(&mut self, block: BlockId, ty: Type, ptr: Operand) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::Load { ty, ptr });
        result
    }

    pub fn store(&mut self, block: BlockId, ptr: Operand, value: Operand) {
        self.push(block, None, InstKind::Store { ptr, value });
    }

    pub fn call(
        &mut self,
        block: BlockId,
        callee: impl Into<String>,
        args: Vec<Operand>,
        ret: Option<Type>,
    ) -> Option<ValueId> {
        let result = ret.map(|_| self.fresh_value());
        self.push(
            block,
            result,
            InstKind::Call {
                callee: callee.into(),
                args,
                ret,
            },
        );
        result
    }

    pub fn icmp(&mut self, block: BlockId, pred: IcmpPred, lhs: Operand, rhs: Operand) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::Icmp { pred, lhs, rhs });
        result
    }

    pub fn bit(
        &mut self,
        block: BlockId,
        op: BitOpKind,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    ) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::Bit { op, ty, lhs, rhs });
        result
    }

    pub fn cast(&mut self, block: BlockId, kind: CastKind, to: Type, value: Operand) -> ValueId {
        let result = self.fresh_value();
        self.push(block, Some(result), InstKind::Cast { kind, to, value });
        result
    }

    fn terminate(&mut self, block: BlockId, term: Terminator) {
        let pending = &mut self.blocks[block.0];
        assert!(pending.term.is_none(), "{block} already terminated");
        pending.term = Some(term);
    }

    pub fn br(&mut self, block: BlockId, target: BlockId) {
        self.terminate(block, Terminator::Br { target });
    }

    pub fn cond_br(&mut self, block: BlockId, cond: Operand, then_to: BlockId, else_to: BlockId) {
        self.terminate(
            block,
            Terminator::CondBr {
                cond,
                then_to,
                else_to,
            },
        );
    }

    pub fn switch(
        &mut self,
        block: BlockId,
        value: Operand,
        cases: Vec<(Constant, BlockId)>,
        default: BlockId,
    ) {
        self.terminate(
            block,
            Terminator::Switch {
                value,
                cases,
                default,
            },
        );
    }

    pub fn ret(&mut self, block: BlockId, value: Option<Operand>) {
        self.terminate(block, Terminator::Ret { value });
    }

    pub fn unreachable(&mut self, block: BlockId) {
        self.terminate(block, Terminator::Unreachable);
    }

    pub fn finish(self) -> Procedure {
        let blocks: Vec<BasicBlock> = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, pending)| BasicBlock {
                phis: pending.phis,
                insts: pending.insts,
                term: pending
                    .term
                    .unwrap_or_else(|| panic!("bb{i} left unterminated")),
            })
            .collect();
        Procedure {
            name: self.name,
            params: self.params,
            ret: self.ret,
            body: Body::Blocks(blocks),
        }
    }
}
