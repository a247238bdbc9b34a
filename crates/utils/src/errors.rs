use thiserror::Error;

/// Custom error type for bytecode decoding operations.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Magic or version field did not match the `VMP1` header.
    #[error("bad header at offset {offset}: {detail}")]
    BadHeader { offset: usize, detail: String },

    /// Operand bytes missing at the end of the byte stream.
    #[error("truncated bytecode at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    /// Opcode number outside the defined range.
    #[error("unknown opcode {opcode:#06x} at offset {offset}")]
    UnknownOpcode { opcode: u16, offset: usize },

    /// Value tag byte of a Push operand outside the defined range.
    #[error("bad value tag {tag:#04x} at offset {offset}")]
    BadValueTag { tag: u8, offset: usize },

    /// Two Label instructions carried the same hash.
    #[error("duplicate label {label:#018x} at instruction {index}")]
    DuplicateLabel { label: u64, index: usize },

    /// A jump instruction references a label absent from the stream.
    #[error("jump at instruction {index} targets unresolved label {label:#018x}")]
    UnresolvedJump { label: u64, index: usize },

    #[error("hex decode failed: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("could not read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the interpreter while executing decoded bytecode.
///
/// Every variant carries the program counter (instruction index) at which
/// execution stopped. There is no partial success: the invocation terminates
/// and the caller's state is untouched.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("stack underflow at pc {at}")]
    StackUnderflow { at: usize },

    #[error("read of unwritten register r{reg} at pc {at}")]
    UnknownRegister { reg: u32, at: usize },

    #[error("type mismatch at pc {at}: {detail}")]
    TypeMismatch { at: usize, detail: String },

    #[error("integer division by zero at pc {at}")]
    DivByZero { at: usize },

    #[error("memory access at {addr:#x} out of bounds at pc {at}")]
    OutOfBounds { addr: u64, at: usize },

    #[error("jump to unknown label {label:#018x} at pc {at}")]
    UnknownLabel { label: u64, at: usize },

    #[error("type check failed at pc {at}: expected {expected}-bit int, got {found}-bit")]
    TypeCheckFailed { expected: u32, found: u32, at: usize },

    #[error("reserved opcode {op} executed at pc {at}")]
    NotImplemented { op: String, at: usize },

    #[error("heap exhausted at pc {at}: {requested} bytes requested")]
    OutOfMemory { requested: u64, at: usize },
}

/// Top-level error for one bytecode invocation: decode or execution.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
}

/// Errors raised while lowering an IR procedure to bytecode.
#[derive(Debug, Error)]
pub enum LowerError {
    /// The procedure contains an operation the encoder declines to lower.
    /// The driver leaves such procedures untouched.
    #[error("unsupported in '{procedure}': {what}")]
    Unsupported { procedure: String, what: String },

    /// The input IR violates an invariant the encoder relies on.
    #[error("malformed IR in '{procedure}': {detail}")]
    MalformedIr { procedure: String, detail: String },
}

/// Errors raised while evaluating an IR procedure directly.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation of '{procedure}' failed: {detail}")]
    Failed { procedure: String, detail: String },
    #[error("integer division by zero in '{procedure}'")]
    DivByZero { procedure: String },
}

/// Error type for metrics computation.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("module has no procedures")]
    EmptyModule,
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("lowering failed: {0}")]
    Lower(#[from] LowerError),
    #[error("metrics computation failed")]
    Metrics(#[from] MetricsError),
    #[error("generic error: {0}")]
    Generic(String),
}

/// Errors that can occur while driving the obfuscation pipeline.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),
    #[error("vm invocation failed: {0}")]
    Vm(#[from] VmError),
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
}
