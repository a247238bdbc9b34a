pub mod decoder;
pub mod encoder;
pub mod hashing;
pub mod heap;
pub mod instr;
pub mod interp;
pub mod opcode;
pub mod regs;
pub mod value;

pub use instr::{Instr, Program};
pub use interp::{run_bytecode, run_bytecode_with_args, CallResolver, DefaultResolver, Vm};
pub use opcode::Op;
pub use value::{Value, ValueTag};
pub use vmcloak_utils::errors::{DecodeError, ExecError, VmError};
