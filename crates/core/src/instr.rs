//! Decoded instruction records and the decoded program listing.

use crate::opcode::Op;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// Integer comparison predicates carried by the reserved ICmp* opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// Bitwise and shift operators carried by the reserved bitwise opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// One instruction: an opcode plus its typed operand record.
///
/// Stack effects are noted as `[before] -> [after]` with the stack top on
/// the right.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `[] -> [value]`
    Push { value: Value },
    /// `[value] -> []`
    Pop,
    /// `[value] -> []`, value written into register `reg`.
    PopToReg { reg: u32 },
    /// `[] -> [value]`, value read from register `reg`.
    PushFromReg { reg: u32 },
    /// `[] -> []`, register `reg` marked unwritten.
    ClearReg { reg: u32 },

    /// Allocate `size` bytes, `[] -> [ptr]`.
    Alloca { size: u64 },
    /// Pop an integer size, allocate, `[size] -> [ptr]`.
    Alloca2,
    /// Pop a value and store it at the absolute address. `[value] -> []`
    Store { address: u64 },
    /// `[ptr, value] -> []`; do not use for aggregates.
    StoreValue,
    /// Load the value at the absolute address. `[] -> [value]`
    Load { address: u64 },
    /// `[ptr] -> [value]`; do not use for aggregates.
    LoadValue,

    /// Pop `argc` arguments and dispatch through the call resolver.
    /// `[a0 .. a(n-1)] -> []` for void, `-> [ret]` otherwise.
    Call { callee: u64, is_void: bool, argc: u32 },

    /// `[lhs, rhs] -> [lhs + rhs]`, same-tag operands only.
    Add { nsw: bool, nuw: bool },
    Sub,
    Mul,
    Div,

    /// Terminate; the current stack top (if any) is the return value.
    Ret,

    Nop,
    Swap,
    Dup,
    /// Assert the stack top is an integer of the given bit width.
    /// `[value] -> [value]`
    TypeCheckInt { width: u32 },

    Jump { target: u64 },
    JumpIf { target: u64 },
    JumpIfNot { target: u64 },

    // Reserved: decoded, never executed.
    ICmp { pred: CmpPred },
    Bit { op: BitOp },
    Trunc { target_width: u32 },
    ZExt { target_width: u32 },
    SExt { target_width: u32 },
    FPToSI { target_width: u32 },
    FPToUI { target_width: u32 },
    SIToFP { is_double: bool },
    UIToFP { is_double: bool },

    /// Jump target marker; indexed into the label table at decode time,
    /// no effect when executed.
    Label { label: u64 },
    /// Reserved metadata opcode; accepted with zero operands until its shape
    /// is pinned down.
    MetaGVar,
}

impl Instr {
    pub fn op(&self) -> Op {
        match self {
            Instr::Push { .. } => Op::Push,
            Instr::Pop => Op::Pop,
            Instr::PopToReg { .. } => Op::PopToReg,
            Instr::PushFromReg { .. } => Op::PushFromReg,
            Instr::ClearReg { .. } => Op::ClearReg,
            Instr::Alloca { .. } => Op::Alloca,
            Instr::Alloca2 => Op::Alloca2,
            Instr::Store { .. } => Op::Store,
            Instr::StoreValue => Op::StoreValue,
            Instr::Load { .. } => Op::Load,
            Instr::LoadValue => Op::LoadValue,
            Instr::Call { .. } => Op::Call,
            Instr::Add { .. } => Op::Add,
            Instr::Sub => Op::Sub,
            Instr::Mul => Op::Mul,
            Instr::Div => Op::Div,
            Instr::Ret => Op::Ret,
            Instr::Nop => Op::Nop,
            Instr::Swap => Op::Swap,
            Instr::Dup => Op::Dup,
            Instr::TypeCheckInt { .. } => Op::TypeCheckInt,
            Instr::Jump { .. } => Op::Jump,
            Instr::JumpIf { .. } => Op::JumpIf,
            Instr::JumpIfNot { .. } => Op::JumpIfNot,
            Instr::ICmp { pred } => match pred {
                CmpPred::Eq => Op::ICmpEq,
                CmpPred::Ne => Op::ICmpNe,
                CmpPred::Slt => Op::ICmpSlt,
                CmpPred::Sle => Op::ICmpSle,
                CmpPred::Sgt => Op::ICmpSgt,
                CmpPred::Sge => Op::ICmpSge,
                CmpPred::Ult => Op::ICmpUlt,
                CmpPred::Ule => Op::ICmpUle,
                CmpPred::Ugt => Op::ICmpUgt,
                CmpPred::Uge => Op::ICmpUge,
            },
            Instr::Bit { op } => match op {
                BitOp::And => Op::And,
                BitOp::Or => Op::Or,
                BitOp::Xor => Op::Xor,
                BitOp::Shl => Op::Shl,
                BitOp::LShr => Op::LShr,
                BitOp::AShr => Op::AShr,
            },
            Instr::Trunc { .. } => Op::Trunc,
            Instr::ZExt { .. } => Op::ZExt,
            Instr::SExt { .. } => Op::SExt,
            Instr::FPToSI { .. } => Op::FPToSI,
            Instr::FPToUI { .. } => Op::FPToUI,
            Instr::SIToFP { .. } => Op::SIToFP,
            Instr::UIToFP { .. } => Op::UIToFP,
            Instr::Label { .. } => Op::Label,
            Instr::MetaGVar => Op::MetaGVar,
        }
    }
}

/// A decoded program: the instruction list plus the label table mapping
/// label hashes to instruction indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub instrs: Vec<Instr>,
    pub labels: HashMap<u64, usize>,
}

impl Program {
    /// Builds a program from a raw instruction list, indexing labels without
    /// any validation. Decoded byte streams should go through
    /// `decoder::decode` instead, which rejects duplicates and unresolved
    /// jumps.
    pub fn from_instrs(instrs: Vec<Instr>) -> Self {
        let mut labels = HashMap::new();
        for (i, instr) in instrs.iter().enumerate() {
            if let Instr::Label { label } = instr {
                labels.insert(*label, i);
            }
        }
        Self { instrs, labels }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push { value } => write!(f, "push {value}"),
            Instr::Pop => write!(f, "pop"),
            Instr::PopToReg { reg } => write!(f, "pop to r{reg}"),
            Instr::PushFromReg { reg } => write!(f, "push from r{reg}"),
            Instr::ClearReg { reg } => write!(f, "clear r{reg}"),
            Instr::Alloca { size } => write!(f, "alloca {size}"),
            Instr::Alloca2 => write!(f, "alloca2"),
            Instr::Store { address } => write!(f, "store {address:#x}"),
            Instr::StoreValue => write!(f, "store value"),
            Instr::Load { address } => write!(f, "load {address:#x}"),
            Instr::LoadValue => write!(f, "load value"),
            Instr::Call {
                callee,
                is_void,
                argc,
            } => {
                if *is_void {
                    write!(f, "call {callee:#018x}/{argc} void")
                } else {
                    write!(f, "call {callee:#018x}/{argc}")
                }
            }
            Instr::Add { nsw, nuw } => match (nsw, nuw) {
                (true, _) => write!(f, "nsw add"),
                (_, true) => write!(f, "nuw add"),
                _ => write!(f, "add"),
            },
            Instr::Sub => write!(f, "sub"),
            Instr::Mul => write!(f, "mul"),
            Instr::Div => write!(f, "div"),
            Instr::Ret => write!(f, "ret"),
            Instr::Nop => write!(f, "nop"),
            Instr::Swap => write!(f, "swap"),
            Instr::Dup => write!(f, "dup"),
            Instr::TypeCheckInt { width } => write!(f, "type_ck {width}"),
            Instr::Jump { target } => write!(f, "jmp {target:#018x}"),
            Instr::JumpIf { target } => write!(f, "jmp_if {target:#018x}"),
            Instr::JumpIfNot { target } => write!(f, "jmp_if_not {target:#018x}"),
            Instr::ICmp { pred } => write!(f, "icmp_{}", format!("{pred:?}").to_lowercase()),
            Instr::Bit { op } => write!(f, "{}", format!("{op:?}").to_lowercase()),
            Instr::Trunc { target_width } => write!(f, "trunc i{target_width}"),
            Instr::ZExt { target_width } => write!(f, "zext i{target_width}"),
            Instr::SExt { target_width } => write!(f, "sext i{target_width}"),
            Instr::FPToSI { target_width } => write!(f, "fptosi i{target_width}"),
            Instr::FPToUI { target_width } => write!(f, "fptoui i{target_width}"),
            Instr::SIToFP { is_double } => {
                write!(f, "sitofp {}", if *is_double { "double" } else { "float" })
            }
            Instr::UIToFP { is_double } => {
                write!(f, "uitofp {}", if *is_double { "double" } else { "float" })
            }
            Instr::Label { label } => write!(f, "{label:#018x}:"),
            Instr::MetaGVar => write!(f, ".global var"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instrs.iter().enumerate() {
            writeln!(f, "{i:06}  {instr}")?;
        }
        Ok(())
    }
}
