//! Procedures, basic blocks and terminators.
//!
//! The block graph is conceptually cyclic (blocks reference each other
//! through terminators, phis reference predecessor values), so nothing here
//! owns anything across blocks: every block has a stable integer index
//! within its procedure and edges are expressed as indices. `ValueId`s are
//! likewise plain integers; parameters occupy ids `0..params.len()` and the
//! builder hands out the rest.

use crate::types::{BinOp, BitOpKind, CastKind, Constant, IcmpPred, Operand, Type};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashSet;
use std::fmt;

/// Index of a basic block within its procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Identifier of an SSA value: a parameter, a phi, or an instruction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Block-entry pseudo-instruction: its value is chosen by the predecessor
/// taken at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub result: ValueId,
    pub ty: Type,
    pub incoming: Vec<(BlockId, Operand)>,
}

/// A value-producing or effectful instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
        nsw: bool,
        nuw: bool,
    },
    /// Stack allocation of a statically known byte size.
    Alloca { size: u64 },
    /// Stack allocation whose size is computed at run time.
    AllocaDyn { size: Operand },
    Load {
        ty: Type,
        ptr: Operand,
    },
    Store {
        ptr: Operand,
        value: Operand,
    },
    Call {
        callee: String,
        args: Vec<Operand>,
        ret: Option<Type>,
    },
    // Not yet lowerable; the encoder recognizes these and refuses the
    // procedure.
    Icmp {
        pred: IcmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    Bit {
        op: BitOpKind,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Cast {
        kind: CastKind,
        to: Type,
        value: Operand,
    },
}

/// Edge kinds in the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Jump,
    BranchTrue,
    BranchFalse,
    SwitchCase,
    SwitchDefault,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        then_to: BlockId,
        else_to: BlockId,
    },
    Switch {
        value: Operand,
        cases: Vec<(Constant, BlockId)>,
        default: BlockId,
    },
    Ret {
        value: Option<Operand>,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<(BlockId, EdgeType)> {
        match self {
            Terminator::Br { target } => vec![(*target, EdgeType::Jump)],
            Terminator::CondBr {
                then_to, else_to, ..
            } => vec![
                (*then_to, EdgeType::BranchTrue),
                (*else_to, EdgeType::BranchFalse),
            ],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<_> = cases
                    .iter()
                    .map(|(_, target)| (*target, EdgeType::SwitchCase))
                    .collect();
                out.push((*default, EdgeType::SwitchDefault));
                out
            }
            Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
        }
    }
}

/// Maximal straight-line instruction sequence ending in one terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub phis: Vec<Phi>,
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

/// A procedure body: either real blocks or the bytecode that replaced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Blocks(Vec<BasicBlock>),
    /// The body was lowered: only the embedded byte stream and the
    /// interpreter invocation remain.
    Virtualized { bytecode: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Option<Type>,
    pub body: Body,
}

impl Procedure {
    /// Entry block is always index 0.
    pub const ENTRY: BlockId = BlockId(0);

    pub fn blocks(&self) -> Option<&[BasicBlock]> {
        match &self.body {
            Body::Blocks(blocks) => Some(blocks),
            Body::Virtualized { .. } => None,
        }
    }

    pub fn is_virtualized(&self) -> bool {
        matches!(self.body, Body::Virtualized { .. })
    }

    /// The parameter values, ids `0..params.len()`.
    pub fn param_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        (0..self.params.len()).map(ValueId)
    }

    /// The block graph with blocks as nodes and terminator edges, for
    /// reachability and ordering queries. Node `i` is block `i`.
    pub fn cfg(&self) -> Option<DiGraph<BlockId, EdgeType>> {
        let blocks = self.blocks()?;
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..blocks.len())
            .map(|i| graph.add_node(BlockId(i)))
            .collect();
        for (i, block) in blocks.iter().enumerate() {
            for (target, edge) in block.term.successors() {
                graph.add_edge(nodes[i], nodes[target.0], edge);
            }
        }
        Some(graph)
    }

    /// Blocks reachable from the entry. Unreachable blocks are dropped by
    /// the lowering pass.
    pub fn reachable_blocks(&self) -> Option<HashSet<BlockId>> {
        let graph = self.cfg()?;
        let mut reachable = HashSet::new();
        if graph.node_count() == 0 {
            return Some(reachable);
        }
        let mut dfs = Dfs::new(&graph, NodeIndex::new(0));
        while let Some(node) = dfs.next(&graph) {
            reachable.insert(graph[node]);
        }
        Some(reachable)
    }
}

/// A collection of procedures, the unit the pipeline transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub procedures: Vec<Procedure>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: Vec::new(),
        }
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }
}
