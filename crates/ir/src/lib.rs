//! Thin model of the SSA IR that the lowering pass consumes.
//!
//! The IR library proper lives outside this project; this crate carries just
//! enough of it to express procedures the encoder can walk: typed SSA values,
//! basic blocks indexed by position, terminators referencing blocks by index,
//! and block-entry phis. A reference evaluator executes block bodies directly
//! so lowered procedures can be checked against the original behavior.

pub mod builder;
pub mod eval;
pub mod proc;
pub mod types;

pub use builder::FunctionBuilder;
pub use proc::{
    BasicBlock, BlockId, Body, EdgeType, Inst, InstKind, Module, Phi, Procedure, Terminator,
    ValueId,
};
pub use types::{BinOp, BitOpKind, CastKind, Constant, IcmpPred, Operand, Type};
