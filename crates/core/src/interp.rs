//! The bytecode interpreter.
//!
//! Strictly sequential: the main loop fetches the instruction at `pc`,
//! dispatches on the opcode, mutates the frame state, and advances `pc`
//! unless the instruction was a jump or a return. One invocation exclusively
//! owns its stack, registers, heap and label table; on a fatal error the
//! error kind and the offending `pc` surface to the caller and nothing is
//! rolled back.

use crate::decoder::decode;
use crate::heap::{Heap, HeapError};
use crate::instr::{Instr, Program};
use crate::regs::RegisterFile;
use crate::value::{self, ArithError, Value};
use vmcloak_utils::errors::{ExecError, VmError};

/// Per-invocation execution counters.
#[derive(Debug, Default, Clone)]
pub struct ExecStats {
    pub instructions_executed: usize,
    pub function_calls: usize,
    pub memory_allocations: usize,
    pub stack_max_depth: usize,
}

impl ExecStats {
    /// Human-readable summary for the diagnostic sink; not a stable surface.
    pub fn summary(&self) -> String {
        format!(
            "instructions: {}, calls: {}, allocations: {}, peak stack depth: {}",
            self.instructions_executed,
            self.function_calls,
            self.memory_allocations,
            self.stack_max_depth
        )
    }
}

/// Embedder hook invoked by `Call`.
///
/// Receives the callee hash, the popped arguments in left-to-right order and
/// the void flag, and produces the value to push for non-void calls. Return
/// `None` for void calls.
pub trait CallResolver {
    fn resolve(&mut self, callee: u64, args: &[Value], is_void: bool) -> Option<Value>;
}

/// Default resolver: arguments are discarded and non-void calls produce
/// `i32 0`. Embedders substitute their own resolver to bridge to real
/// functions.
#[derive(Debug, Default)]
pub struct DefaultResolver;

impl CallResolver for DefaultResolver {
    fn resolve(&mut self, _callee: u64, _args: &[Value], is_void: bool) -> Option<Value> {
        if is_void {
            None
        } else {
            Some(Value::I32(0))
        }
    }
}

enum ControlFlow {
    Continue,
    Jump(usize),
    Return(Option<Value>),
}

/// One execution frame: created per invocation, destroyed on return.
pub struct Vm {
    stack: Vec<Value>,
    regs: RegisterFile,
    heap: Heap,
    pc: usize,
    stats: ExecStats,
    resolver: Box<dyn CallResolver>,
    debug: bool,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(16),
            regs: RegisterFile::new(),
            heap: Heap::new(),
            pc: 0,
            stats: ExecStats::default(),
            resolver: Box::new(DefaultResolver),
            debug: false,
        }
    }

    pub fn with_resolver(resolver: Box<dyn CallResolver>) -> Self {
        Self {
            resolver,
            ..Self::new()
        }
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    /// Pre-pushes procedure arguments, left-to-right, before execution.
    /// Lowered procedures start with a prologue popping them into parameter
    /// registers.
    pub fn push_args(&mut self, args: &[Value]) {
        self.stack.extend_from_slice(args);
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// Current stack depth; 0 after a well-scheduled program returns.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Runs the program to completion. The return value is the stack top at
    /// `Ret` (or at the end of the list), `None` if the stack is empty.
    pub fn execute(&mut self, program: &Program) -> Result<Option<Value>, ExecError> {
        if self.debug {
            tracing::debug!(
                "executing {} instructions, {} labels",
                program.instrs.len(),
                program.labels.len()
            );
        }

        self.pc = 0;
        let result = loop {
            if self.pc >= program.instrs.len() {
                // Falling off the end behaves like Ret.
                break self.stack.pop();
            }
            let instr = &program.instrs[self.pc];
            if self.debug {
                tracing::debug!("pc {:>4}  depth {:>3}  {}", self.pc, self.stack.len(), instr);
            }

            match self.step(instr, program)? {
                ControlFlow::Continue => self.pc += 1,
                ControlFlow::Jump(target) => self.pc = target,
                ControlFlow::Return(value) => {
                    self.note_executed();
                    break value;
                }
            }
            self.note_executed();
        };

        if self.debug {
            tracing::debug!("done: {}", self.stats.summary());
        }
        Ok(result)
    }

    fn note_executed(&mut self) {
        self.stats.instructions_executed += 1;
        self.stats.stack_max_depth = self.stats.stack_max_depth.max(self.stack.len());
    }

    fn pop(&mut self) -> Result<Value, ExecError> {
        self.stack.pop().ok_or(ExecError::StackUnderflow { at: self.pc })
    }

    fn resolve_label(&self, program: &Program, label: u64) -> Result<usize, ExecError> {
        program
            .labels
            .get(&label)
            .copied()
            .ok_or(ExecError::UnknownLabel {
                label,
                at: self.pc,
            })
    }

    fn step(&mut self, instr: &Instr, program: &Program) -> Result<ControlFlow, ExecError> {
        match instr {
            Instr::Push { value } => {
                self.stack.push(*value);
            }

            Instr::Pop => {
                self.pop()?;
            }

            Instr::PopToReg { reg } => {
                let value = self.pop()?;
                self.regs.set(*reg, value);
            }

            Instr::PushFromReg { reg } => {
                let value = self.regs.get(*reg).ok_or(ExecError::UnknownRegister {
                    reg: *reg,
                    at: self.pc,
                })?;
                self.stack.push(value);
            }

            Instr::ClearReg { reg } => {
                self.regs.clear(*reg);
            }

            Instr::Alloca { size } => {
                let addr = self.alloc(*size)?;
                self.stack.push(Value::Ptr(addr));
            }

            Instr::Alloca2 => {
                let size = match self.pop()? {
                    Value::I32(s) if s >= 0 => s as u64,
                    Value::I64(s) if s >= 0 => s as u64,
                    other => {
                        return Err(ExecError::TypeMismatch {
                            at: self.pc,
                            detail: format!("invalid allocation size {other}"),
                        })
                    }
                };
                let addr = self.alloc(size)?;
                self.stack.push(Value::Ptr(addr));
            }

            Instr::Store { address } => {
                let value = self.pop()?;
                self.store(*address, &value)?;
            }

            Instr::StoreValue => {
                // Pointer on top, value beneath.
                let ptr = self.pop()?;
                let value = self.pop()?;
                let addr = match ptr {
                    Value::Ptr(addr) => addr,
                    other => {
                        return Err(ExecError::TypeMismatch {
                            at: self.pc,
                            detail: format!("store through non-pointer {other}"),
                        })
                    }
                };
                self.store(addr, &value)?;
            }

            Instr::Load { address } => {
                let value = self.load(*address)?;
                self.stack.push(value);
            }

            Instr::LoadValue => {
                let addr = match self.pop()? {
                    Value::Ptr(addr) => addr,
                    other => {
                        return Err(ExecError::TypeMismatch {
                            at: self.pc,
                            detail: format!("load through non-pointer {other}"),
                        })
                    }
                };
                let value = self.load(addr)?;
                self.stack.push(value);
            }

            Instr::Call {
                callee,
                is_void,
                argc,
            } => {
                let mut args = Vec::with_capacity(*argc as usize);
                for _ in 0..*argc {
                    args.push(self.pop()?);
                }
                args.reverse();
                let produced = self.resolver.resolve(*callee, &args, *is_void);
                if !*is_void {
                    self.stack.push(produced.unwrap_or(Value::I32(0)));
                }
                self.stats.function_calls += 1;
            }

            Instr::Add { .. } => self.binary(value::add)?,
            Instr::Sub => self.binary(value::sub)?,
            Instr::Mul => self.binary(value::mul)?,
            Instr::Div => self.binary(value::div)?,

            Instr::Ret => {
                return Ok(ControlFlow::Return(self.stack.pop()));
            }

            Instr::Nop => {}

            Instr::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ExecError::StackUnderflow { at: self.pc });
                }
                self.stack.swap(len - 1, len - 2);
            }

            Instr::Dup => {
                let top = *self
                    .stack
                    .last()
                    .ok_or(ExecError::StackUnderflow { at: self.pc })?;
                self.stack.push(top);
            }

            Instr::TypeCheckInt { width } => {
                let top = self
                    .stack
                    .last()
                    .ok_or(ExecError::StackUnderflow { at: self.pc })?;
                let found = top.width_bits();
                if found != *width {
                    return Err(ExecError::TypeCheckFailed {
                        expected: *width,
                        found,
                        at: self.pc,
                    });
                }
            }

            Instr::Jump { target } => {
                return Ok(ControlFlow::Jump(self.resolve_label(program, *target)?));
            }

            Instr::JumpIf { target } => {
                if self.pop()?.is_truthy() {
                    return Ok(ControlFlow::Jump(self.resolve_label(program, *target)?));
                }
            }

            Instr::JumpIfNot { target } => {
                if !self.pop()?.is_truthy() {
                    return Ok(ControlFlow::Jump(self.resolve_label(program, *target)?));
                }
            }

            Instr::Label { .. } => {}

            Instr::ICmp { .. }
            | Instr::Bit { .. }
            | Instr::Trunc { .. }
            | Instr::ZExt { .. }
            | Instr::SExt { .. }
            | Instr::FPToSI { .. }
            | Instr::FPToUI { .. }
            | Instr::SIToFP { .. }
            | Instr::UIToFP { .. }
            | Instr::MetaGVar => {
                return Err(ExecError::NotImplemented {
                    op: instr.op().to_string(),
                    at: self.pc,
                });
            }
        }

        Ok(ControlFlow::Continue)
    }

    fn binary(
        &mut self,
        op: fn(&Value, &Value) -> Result<Value, ArithError>,
    ) -> Result<(), ExecError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(&lhs, &rhs).map_err(|e| match e {
            ArithError::DivByZero => ExecError::DivByZero { at: self.pc },
            ArithError::Mismatch => ExecError::TypeMismatch {
                at: self.pc,
                detail: format!("{lhs} with {rhs}"),
            },
        })?;
        self.stack.push(result);
        Ok(())
    }

    fn alloc(&mut self, size: u64) -> Result<u64, ExecError> {
        let addr = self
            .heap
            .alloc(size)
            .map_err(|e| self.heap_error(e))?;
        self.stats.memory_allocations += 1;
        Ok(addr)
    }

    fn store(&mut self, addr: u64, value: &Value) -> Result<(), ExecError> {
        self.heap
            .store(addr, value)
            .map_err(|e| self.heap_error(e))
    }

    fn load(&self, addr: u64) -> Result<Value, ExecError> {
        self.heap.load(addr).map_err(|e| self.heap_error(e))
    }

    fn heap_error(&self, e: HeapError) -> ExecError {
        match e {
            HeapError::OutOfBounds { addr } => ExecError::OutOfBounds { addr, at: self.pc },
            HeapError::OutOfMemory { requested } => ExecError::OutOfMemory {
                requested,
                at: self.pc,
            },
            HeapError::BadTag { addr, .. } => ExecError::TypeMismatch {
                at: self.pc,
                detail: format!("reinterpreting untyped memory at {addr:#x}"),
            },
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes and runs a byte stream in a fresh frame.
pub fn run_bytecode(bytes: &[u8], debug: bool) -> Result<Option<Value>, VmError> {
    run_bytecode_with_args(bytes, &[], debug)
}

/// Decodes and runs a byte stream with procedure arguments pre-pushed onto
/// the value stack, left-to-right.
pub fn run_bytecode_with_args(
    bytes: &[u8],
    args: &[Value],
    debug: bool,
) -> Result<Option<Value>, VmError> {
    let program = decode(bytes)?;
    let mut vm = Vm::new();
    vm.set_debug(debug);
    vm.push_args(args);
    Ok(vm.execute(&program)?)
}
