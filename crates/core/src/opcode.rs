//! The VM opcode enumeration.
//!
//! Opcode numbering is part of the wire format and is fixed: the interpreter,
//! decoder and encoder all dispatch on these values. The comparison, bitwise,
//! shift, cast and MetaGVar families are reserved: the decoder accepts them
//! and advances past their operands, but executing them is a hard error and
//! the lowering pass never emits them.

use std::fmt;

/// Wire-format opcodes, `u16` little-endian on the wire.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Push = 0,
    Pop = 1,
    PopToReg = 2,
    PushFromReg = 3,
    ClearReg = 4,

    Alloca = 5,
    Alloca2 = 6,
    Store = 7,
    StoreValue = 8,
    Load = 9,
    LoadValue = 10,

    Call = 11,

    Add = 12,
    Sub = 13,
    Mul = 14,
    Div = 15,

    Ret = 16,

    Nop = 17,
    Swap = 18,
    Dup = 19,
    TypeCheckInt = 20,

    Jump = 21,
    JumpIf = 22,
    JumpIfNot = 23,

    ICmpEq = 24,
    ICmpNe = 25,
    ICmpSlt = 26,
    ICmpSle = 27,
    ICmpSgt = 28,
    ICmpSge = 29,
    ICmpUlt = 30,
    ICmpUle = 31,
    ICmpUgt = 32,
    ICmpUge = 33,

    And = 34,
    Or = 35,
    Xor = 36,
    Shl = 37,
    LShr = 38,
    AShr = 39,

    Trunc = 40,
    ZExt = 41,
    SExt = 42,
    FPToSI = 43,
    FPToUI = 44,
    SIToFP = 45,
    UIToFP = 46,

    Label = 47,
    MetaGVar = 48,
}

impl Op {
    /// Parses a raw opcode number, or `None` if it is outside the defined
    /// range.
    pub fn from_u16(raw: u16) -> Option<Self> {
        use Op::*;

        Some(match raw {
            0 => Push,
            1 => Pop,
            2 => PopToReg,
            3 => PushFromReg,
            4 => ClearReg,
            5 => Alloca,
            6 => Alloca2,
            7 => Store,
            8 => StoreValue,
            9 => Load,
            10 => LoadValue,
            11 => Call,
            12 => Add,
            13 => Sub,
            14 => Mul,
            15 => Div,
            16 => Ret,
            17 => Nop,
            18 => Swap,
            19 => Dup,
            20 => TypeCheckInt,
            21 => Jump,
            22 => JumpIf,
            23 => JumpIfNot,
            24 => ICmpEq,
            25 => ICmpNe,
            26 => ICmpSlt,
            27 => ICmpSle,
            28 => ICmpSgt,
            29 => ICmpSge,
            30 => ICmpUlt,
            31 => ICmpUle,
            32 => ICmpUgt,
            33 => ICmpUge,
            34 => And,
            35 => Or,
            36 => Xor,
            37 => Shl,
            38 => LShr,
            39 => AShr,
            40 => Trunc,
            41 => ZExt,
            42 => SExt,
            43 => FPToSI,
            44 => FPToUI,
            45 => SIToFP,
            46 => UIToFP,
            47 => Label,
            48 => MetaGVar,
            _ => return None,
        })
    }

    pub fn to_u16(&self) -> u16 {
        *self as u16
    }

    /// True for opcodes that alter the program counter.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, Op::Jump | Op::JumpIf | Op::JumpIfNot | Op::Ret)
    }

    /// True for the reserved families: decoded but not executable, and never
    /// emitted by the lowering pass.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            Op::ICmpEq
                | Op::ICmpNe
                | Op::ICmpSlt
                | Op::ICmpSle
                | Op::ICmpSgt
                | Op::ICmpSge
                | Op::ICmpUlt
                | Op::ICmpUle
                | Op::ICmpUgt
                | Op::ICmpUge
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Shl
                | Op::LShr
                | Op::AShr
                | Op::Trunc
                | Op::ZExt
                | Op::SExt
                | Op::FPToSI
                | Op::FPToUI
                | Op::SIToFP
                | Op::UIToFP
                | Op::MetaGVar
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
