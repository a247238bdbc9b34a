//! Serializes instruction lists into the binary bytecode format.
//!
//! This is the assembler direction of the codec: any instruction drawn from
//! the operand grammar — reserved opcodes included — encodes, so
//! encode-then-decode round-trips the whole format. The lowering pass is the
//! layer that restricts itself to the executable subset.

use crate::decoder::{MAGIC, VERSION};
use crate::instr::Instr;
use crate::value::Value;

/// Encodes an instruction list, header included.
pub fn encode(instrs: &[Instr]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + instrs.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    for instr in instrs {
        encode_instr(&mut bytes, instr);
    }
    bytes
}

fn encode_instr(bytes: &mut Vec<u8>, instr: &Instr) {
    bytes.extend_from_slice(&instr.op().to_u16().to_le_bytes());
    match instr {
        Instr::Push { value } => encode_value(bytes, value),
        Instr::PopToReg { reg } | Instr::PushFromReg { reg } | Instr::ClearReg { reg } => {
            bytes.extend_from_slice(&reg.to_le_bytes());
        }
        Instr::Alloca { size } => bytes.extend_from_slice(&size.to_le_bytes()),
        Instr::Store { address } | Instr::Load { address } => {
            bytes.extend_from_slice(&address.to_le_bytes());
        }
        Instr::Call {
            callee,
            is_void,
            argc,
        } => {
            bytes.extend_from_slice(&callee.to_le_bytes());
            bytes.push(u8::from(*is_void));
            bytes.extend_from_slice(&argc.to_le_bytes());
        }
        Instr::Add { nsw, nuw } => {
            let flags = u8::from(*nsw) | (u8::from(*nuw) << 1);
            bytes.push(flags);
            bytes.push(0); // pad to two bytes
        }
        Instr::TypeCheckInt { width } => bytes.extend_from_slice(&width.to_le_bytes()),
        Instr::Jump { target } | Instr::JumpIf { target } | Instr::JumpIfNot { target } => {
            bytes.extend_from_slice(&target.to_le_bytes());
        }
        Instr::Trunc { target_width }
        | Instr::ZExt { target_width }
        | Instr::SExt { target_width }
        | Instr::FPToSI { target_width }
        | Instr::FPToUI { target_width } => {
            bytes.extend_from_slice(&target_width.to_le_bytes());
        }
        Instr::SIToFP { is_double } | Instr::UIToFP { is_double } => {
            bytes.push(u8::from(*is_double));
        }
        Instr::Label { label } => bytes.extend_from_slice(&label.to_le_bytes()),
        // Everything else carries no operands.
        Instr::Pop
        | Instr::Alloca2
        | Instr::StoreValue
        | Instr::LoadValue
        | Instr::Sub
        | Instr::Mul
        | Instr::Div
        | Instr::Ret
        | Instr::Nop
        | Instr::Swap
        | Instr::Dup
        | Instr::ICmp { .. }
        | Instr::Bit { .. }
        | Instr::MetaGVar => {}
    }
}

fn encode_value(bytes: &mut Vec<u8>, value: &Value) {
    bytes.push(value.tag() as u8);
    bytes.extend_from_slice(&value.payload_bytes());
}
