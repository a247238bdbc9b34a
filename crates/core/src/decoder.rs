//! Single entry-point for turning byte streams into instruction listings.
//!
//! The decoder checks the `VMP1` header, walks the stream one opcode at a
//! time, and produces a `Program`: the instruction list in program order plus
//! the label table. Reserved opcodes are accepted and their operands skipped;
//! they only become an error if executed. Decoding validates that every jump
//! target resolves, so a `Program` obtained here never trips the
//! interpreter's unknown-label check.

use crate::instr::{BitOp, CmpPred, Instr, Program};
use crate::opcode::Op;
use crate::value::{Value, ValueTag};
use hex::FromHex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use vmcloak_utils::errors::DecodeError;

/// Bytecode magic, followed by a u32 little-endian version.
pub const MAGIC: &[u8; 4] = b"VMP1";
pub const VERSION: u32 = 1;

/// Normalizes input into a byte vector from a hex string or a file.
pub fn input_to_bytes(input: &str, is_file: bool) -> Result<Vec<u8>, DecodeError> {
    if is_file {
        let path = Path::new(input);
        fs::read(path).map_err(|e| DecodeError::FileRead {
            path: path.display().to_string(),
            source: e,
        })
    } else {
        let clean = input.strip_prefix("0x").unwrap_or(input);
        Vec::from_hex(clean).map_err(DecodeError::HexDecode)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: self.pos + n - self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Decodes a byte stream into a `Program`.
pub fn decode(bytes: &[u8]) -> Result<Program, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    decode_header(&mut cursor)?;

    let mut instrs = Vec::new();
    let mut labels = HashMap::new();

    while cursor.has_remaining() {
        let offset = cursor.pos;
        let raw = cursor.read_u16()?;
        let op = Op::from_u16(raw).ok_or(DecodeError::UnknownOpcode {
            opcode: raw,
            offset,
        })?;
        let instr = decode_operands(op, &mut cursor)?;

        if let Instr::Label { label } = instr {
            if labels.insert(label, instrs.len()).is_some() {
                return Err(DecodeError::DuplicateLabel {
                    label,
                    index: instrs.len(),
                });
            }
        }
        instrs.push(instr);
    }

    tracing::debug!("decoded {} instructions, {} labels", instrs.len(), labels.len());

    for (index, instr) in instrs.iter().enumerate() {
        let target = match instr {
            Instr::Jump { target } | Instr::JumpIf { target } | Instr::JumpIfNot { target } => {
                *target
            }
            _ => continue,
        };
        if !labels.contains_key(&target) {
            return Err(DecodeError::UnresolvedJump {
                label: target,
                index,
            });
        }
    }

    Ok(Program { instrs, labels })
}

fn decode_header(cursor: &mut Cursor) -> Result<(), DecodeError> {
    let magic = cursor.take(4).map_err(|_| DecodeError::BadHeader {
        offset: 0,
        detail: "stream shorter than magic".into(),
    })?;
    if magic != MAGIC {
        return Err(DecodeError::BadHeader {
            offset: 0,
            detail: format!("magic {magic:02x?}"),
        });
    }
    let version = cursor.read_u32().map_err(|_| DecodeError::BadHeader {
        offset: 4,
        detail: "stream shorter than version".into(),
    })?;
    if version != VERSION {
        return Err(DecodeError::BadHeader {
            offset: 4,
            detail: format!("version {version}"),
        });
    }
    Ok(())
}

fn decode_operands(op: Op, cursor: &mut Cursor) -> Result<Instr, DecodeError> {
    Ok(match op {
        Op::Push => {
            let offset = cursor.pos;
            let raw_tag = cursor.read_u8()?;
            let tag = ValueTag::from_u8(raw_tag).ok_or(DecodeError::BadValueTag {
                tag: raw_tag,
                offset,
            })?;
            Instr::Push {
                value: decode_value(tag, cursor)?,
            }
        }
        Op::Pop => Instr::Pop,
        Op::PopToReg => Instr::PopToReg {
            reg: cursor.read_u32()?,
        },
        Op::PushFromReg => Instr::PushFromReg {
            reg: cursor.read_u32()?,
        },
        Op::ClearReg => Instr::ClearReg {
            reg: cursor.read_u32()?,
        },
        Op::Alloca => Instr::Alloca {
            size: cursor.read_u64()?,
        },
        Op::Alloca2 => Instr::Alloca2,
        Op::Store => Instr::Store {
            address: cursor.read_u64()?,
        },
        Op::StoreValue => Instr::StoreValue,
        Op::Load => Instr::Load {
            address: cursor.read_u64()?,
        },
        Op::LoadValue => Instr::LoadValue,
        Op::Call => {
            let callee = cursor.read_u64()?;
            let is_void = cursor.read_u8()? != 0;
            let argc = cursor.read_u32()?;
            Instr::Call {
                callee,
                is_void,
                argc,
            }
        }
        Op::Add => {
            let flags = cursor.read_u8()?;
            cursor.read_u8()?; // padding
            Instr::Add {
                nsw: flags & 1 != 0,
                nuw: flags & 2 != 0,
            }
        }
        Op::Sub => Instr::Sub,
        Op::Mul => Instr::Mul,
        Op::Div => Instr::Div,
        Op::Ret => Instr::Ret,
        Op::Nop => Instr::Nop,
        Op::Swap => Instr::Swap,
        Op::Dup => Instr::Dup,
        Op::TypeCheckInt => Instr::TypeCheckInt {
            width: cursor.read_u32()?,
        },
        Op::Jump => Instr::Jump {
            target: cursor.read_u64()?,
        },
        Op::JumpIf => Instr::JumpIf {
            target: cursor.read_u64()?,
        },
        Op::JumpIfNot => Instr::JumpIfNot {
            target: cursor.read_u64()?,
        },
        Op::ICmpEq => Instr::ICmp { pred: CmpPred::Eq },
        Op::ICmpNe => Instr::ICmp { pred: CmpPred::Ne },
        Op::ICmpSlt => Instr::ICmp { pred: CmpPred::Slt },
        Op::ICmpSle => Instr::ICmp { pred: CmpPred::Sle },
        Op::ICmpSgt => Instr::ICmp { pred: CmpPred::Sgt },
        Op::ICmpSge => Instr::ICmp { pred: CmpPred::Sge },
        Op::ICmpUlt => Instr::ICmp { pred: CmpPred::Ult },
        Op::ICmpUle => Instr::ICmp { pred: CmpPred::Ule },
        Op::ICmpUgt => Instr::ICmp { pred: CmpPred::Ugt },
        Op::ICmpUge => Instr::ICmp { pred: CmpPred::Uge },
        Op::And => Instr::Bit { op: BitOp::And },
        Op::Or => Instr::Bit { op: BitOp::Or },
        Op::Xor => Instr::Bit { op: BitOp::Xor },
        Op::Shl => Instr::Bit { op: BitOp::Shl },
        Op::LShr => Instr::Bit { op: BitOp::LShr },
        Op::AShr => Instr::Bit { op: BitOp::AShr },
        Op::Trunc => Instr::Trunc {
            target_width: cursor.read_u32()?,
        },
        Op::ZExt => Instr::ZExt {
            target_width: cursor.read_u32()?,
        },
        Op::SExt => Instr::SExt {
            target_width: cursor.read_u32()?,
        },
        Op::FPToSI => Instr::FPToSI {
            target_width: cursor.read_u32()?,
        },
        Op::FPToUI => Instr::FPToUI {
            target_width: cursor.read_u32()?,
        },
        Op::SIToFP => Instr::SIToFP {
            is_double: cursor.read_u8()? != 0,
        },
        Op::UIToFP => Instr::UIToFP {
            is_double: cursor.read_u8()? != 0,
        },
        Op::Label => Instr::Label {
            label: cursor.read_u64()?,
        },
        Op::MetaGVar => Instr::MetaGVar,
    })
}

fn decode_value(tag: ValueTag, cursor: &mut Cursor) -> Result<Value, DecodeError> {
    Ok(match tag {
        ValueTag::Undef => Value::Undef,
        ValueTag::I1 => Value::I1(cursor.read_u8()? != 0),
        ValueTag::I8 => Value::I8(cursor.read_u8()? as i8),
        ValueTag::I16 => Value::I16(i16::from_le_bytes(cursor.take(2)?.try_into().unwrap())),
        ValueTag::I32 => Value::I32(i32::from_le_bytes(cursor.take(4)?.try_into().unwrap())),
        ValueTag::I64 => Value::I64(i64::from_le_bytes(cursor.take(8)?.try_into().unwrap())),
        ValueTag::F32 => Value::F32(f32::from_le_bytes(cursor.take(4)?.try_into().unwrap())),
        ValueTag::F64 => Value::F64(f64::from_le_bytes(cursor.take(8)?.try_into().unwrap())),
        ValueTag::Ptr => Value::Ptr(cursor.read_u64()?),
    })
}
