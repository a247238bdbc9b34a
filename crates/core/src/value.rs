//! Tagged run-time values.
//!
//! A `Value` is what lives on the interpreter stack, in registers, and in
//! heap slots. The width is part of the tag; signedness belongs to the
//! operation, not the value. `Undef` is representable but never participates
//! in arithmetic.

use std::fmt;

/// One-byte type discriminant used in the wire format and in heap slots.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Undef = 0,
    I1 = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    F32 = 6,
    F64 = 7,
    Ptr = 8,
}

impl ValueTag {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueTag::Undef,
            1 => ValueTag::I1,
            2 => ValueTag::I8,
            3 => ValueTag::I16,
            4 => ValueTag::I32,
            5 => ValueTag::I64,
            6 => ValueTag::F32,
            7 => ValueTag::F64,
            8 => ValueTag::Ptr,
            _ => return None,
        })
    }

    /// Payload size in bytes for this tag in the wire format and on the heap.
    pub fn payload_size(&self) -> usize {
        match self {
            ValueTag::Undef => 0,
            ValueTag::I1 | ValueTag::I8 => 1,
            ValueTag::I16 => 2,
            ValueTag::I32 | ValueTag::F32 => 4,
            ValueTag::I64 | ValueTag::F64 | ValueTag::Ptr => 8,
        }
    }
}

/// A tagged run-time value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Undef,
    I1(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// 64-bit address into the VM heap.
    Ptr(u64),
}

impl Value {
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Undef => ValueTag::Undef,
            Value::I1(_) => ValueTag::I1,
            Value::I8(_) => ValueTag::I8,
            Value::I16(_) => ValueTag::I16,
            Value::I32(_) => ValueTag::I32,
            Value::I64(_) => ValueTag::I64,
            Value::F32(_) => ValueTag::F32,
            Value::F64(_) => ValueTag::F64,
            Value::Ptr(_) => ValueTag::Ptr,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.tag().payload_size()
    }

    /// 0 for `Undef`, otherwise 8 times the payload size (`I1` reports 8).
    pub fn width_bits(&self) -> u32 {
        match self {
            Value::Undef => 0,
            _ => self.size_in_bytes() as u32 * 8,
        }
    }

    /// Truthiness for conditional jumps: `Undef` is false, anything else is
    /// true when its payload is nonzero.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undef => false,
            Value::I1(v) => *v,
            Value::I8(v) => *v != 0,
            Value::I16(v) => *v != 0,
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) => *v != 0.0,
            Value::Ptr(v) => *v != 0,
        }
    }

    /// Little-endian payload bytes as stored on the heap.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match self {
            Value::Undef => Vec::new(),
            Value::I1(v) => vec![u8::from(*v)],
            Value::I8(v) => v.to_le_bytes().to_vec(),
            Value::I16(v) => v.to_le_bytes().to_vec(),
            Value::I32(v) => v.to_le_bytes().to_vec(),
            Value::I64(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_le_bytes().to_vec(),
            Value::Ptr(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Outcome of an arithmetic dispatch on a pair of tags.
///
/// The interpreter maps `Mismatch` onto a `TypeMismatch` at the current pc
/// and `DivByZero` onto the corresponding fatal error.
#[derive(Debug, PartialEq)]
pub enum ArithError {
    Mismatch,
    DivByZero,
}

/// `lhs + rhs`. Defined for same-tag integers (wrapping), same-tag floats,
/// and pointer offset arithmetic `ptr + i64`.
pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    match (lhs, rhs) {
        (Value::I8(l), Value::I8(r)) => Ok(Value::I8(l.wrapping_add(*r))),
        (Value::I16(l), Value::I16(r)) => Ok(Value::I16(l.wrapping_add(*r))),
        (Value::I32(l), Value::I32(r)) => Ok(Value::I32(l.wrapping_add(*r))),
        (Value::I64(l), Value::I64(r)) => Ok(Value::I64(l.wrapping_add(*r))),
        (Value::F32(l), Value::F32(r)) => Ok(Value::F32(l + r)),
        (Value::F64(l), Value::F64(r)) => Ok(Value::F64(l + r)),
        (Value::Ptr(l), Value::I64(r)) => Ok(Value::Ptr(l.wrapping_add(*r as u64))),
        _ => Err(ArithError::Mismatch),
    }
}

/// `lhs - rhs` for same-tag integers (wrapping) and floats.
pub fn sub(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    match (lhs, rhs) {
        (Value::I8(l), Value::I8(r)) => Ok(Value::I8(l.wrapping_sub(*r))),
        (Value::I16(l), Value::I16(r)) => Ok(Value::I16(l.wrapping_sub(*r))),
        (Value::I32(l), Value::I32(r)) => Ok(Value::I32(l.wrapping_sub(*r))),
        (Value::I64(l), Value::I64(r)) => Ok(Value::I64(l.wrapping_sub(*r))),
        (Value::F32(l), Value::F32(r)) => Ok(Value::F32(l - r)),
        (Value::F64(l), Value::F64(r)) => Ok(Value::F64(l - r)),
        _ => Err(ArithError::Mismatch),
    }
}

/// `lhs * rhs` for same-tag integers (wrapping) and floats.
pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    match (lhs, rhs) {
        (Value::I8(l), Value::I8(r)) => Ok(Value::I8(l.wrapping_mul(*r))),
        (Value::I16(l), Value::I16(r)) => Ok(Value::I16(l.wrapping_mul(*r))),
        (Value::I32(l), Value::I32(r)) => Ok(Value::I32(l.wrapping_mul(*r))),
        (Value::I64(l), Value::I64(r)) => Ok(Value::I64(l.wrapping_mul(*r))),
        (Value::F32(l), Value::F32(r)) => Ok(Value::F32(l * r)),
        (Value::F64(l), Value::F64(r)) => Ok(Value::F64(l * r)),
        _ => Err(ArithError::Mismatch),
    }
}

/// `lhs / rhs`. Integer division by zero is an error; float division follows
/// IEEE-754 and never traps.
pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, ArithError> {
    match (lhs, rhs) {
        (Value::I8(l), Value::I8(r)) => {
            if *r == 0 {
                return Err(ArithError::DivByZero);
            }
            Ok(Value::I8(l.wrapping_div(*r)))
        }
        (Value::I16(l), Value::I16(r)) => {
            if *r == 0 {
                return Err(ArithError::DivByZero);
            }
            Ok(Value::I16(l.wrapping_div(*r)))
        }
        (Value::I32(l), Value::I32(r)) => {
            if *r == 0 {
                return Err(ArithError::DivByZero);
            }
            Ok(Value::I32(l.wrapping_div(*r)))
        }
        (Value::I64(l), Value::I64(r)) => {
            if *r == 0 {
                return Err(ArithError::DivByZero);
            }
            Ok(Value::I64(l.wrapping_div(*r)))
        }
        (Value::F32(l), Value::F32(r)) => Ok(Value::F32(l / r)),
        (Value::F64(l), Value::F64(r)) => Ok(Value::F64(l / r)),
        _ => Err(ArithError::Mismatch),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => write!(f, "undef"),
            Value::I1(v) => write!(f, "i1 {}", u8::from(*v)),
            Value::I8(v) => write!(f, "i8 {v}"),
            Value::I16(v) => write!(f, "i16 {v}"),
            Value::I32(v) => write!(f, "i32 {v}"),
            Value::I64(v) => write!(f, "i64 {v}"),
            Value::F32(v) => write!(f, "f32 {v}"),
            Value::F64(v) => write!(f, "f64 {v}"),
            Value::Ptr(v) => write!(f, "ptr {v:#x}"),
        }
    }
}
