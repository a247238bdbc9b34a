//! Direct evaluation of block bodies.
//!
//! This is the "what the procedure originally did" side of the lowering
//! check: the pipeline compares a virtualized procedure's VM result against
//! this evaluator's result on the same inputs. Heap layout and arithmetic
//! come from `vmcloak_core` so the two sides agree bit for bit, and call
//! semantics match the VM's default resolver (arguments discarded, non-void
//! calls produce `i32 0`).

use crate::proc::{BlockId, Body, InstKind, Procedure, Terminator, ValueId};
use crate::types::Operand;
use std::collections::HashMap;
use vmcloak_core::heap::Heap;
use vmcloak_core::value::{self, ArithError, Value};
use vmcloak_utils::errors::EvalError;

/// Safety valve against diverging test procedures.
const STEP_LIMIT: usize = 1_000_000;

struct Evaluator<'a> {
    proc: &'a Procedure,
    env: HashMap<ValueId, Value>,
    heap: Heap,
    steps: usize,
}

/// Evaluates a `Body::Blocks` procedure on the given arguments.
pub fn eval_procedure(proc: &Procedure, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let Some(blocks) = proc.blocks() else {
        return Err(failed(proc, "body is already virtualized"));
    };
    if args.len() != proc.params.len() {
        return Err(failed(
            proc,
            format!("expected {} arguments, got {}", proc.params.len(), args.len()),
        ));
    }

    let mut eval = Evaluator {
        proc,
        env: proc.param_values().zip(args.iter().copied()).collect(),
        heap: Heap::new(),
        steps: 0,
    };

    let mut current = Procedure::ENTRY;
    let mut previous: Option<BlockId> = None;
    loop {
        let block = &blocks[current.0];

        if let Some(pred) = previous {
            // Phis form a parallel copy: read every incoming value against
            // the pre-entry environment before writing any of them.
            let mut chosen = Vec::with_capacity(block.phis.len());
            for phi in &block.phis {
                let operand = phi
                    .incoming
                    .iter()
                    .find(|(from, _)| *from == pred)
                    .map(|(_, op)| *op)
                    .ok_or_else(|| {
                        failed(eval.proc, format!("{} has no incoming from {pred}", phi.result))
                    })?;
                chosen.push((phi.result, eval.operand(&operand)?));
            }
            eval.env.extend(chosen);
        } else if !block.phis.is_empty() {
            return Err(failed(proc, "phi in entry block"));
        }

        for inst in &block.insts {
            eval.step_budget()?;
            eval.exec(inst.result, &inst.kind)?;
        }

        eval.step_budget()?;
        match &block.term {
            Terminator::Br { target } => {
                previous = Some(current);
                current = *target;
            }
            Terminator::CondBr {
                cond,
                then_to,
                else_to,
            } => {
                let taken = if eval.operand(cond)?.is_truthy() {
                    *then_to
                } else {
                    *else_to
                };
                previous = Some(current);
                current = taken;
            }
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let scrutinee = eval.operand(value)?;
                let taken = cases
                    .iter()
                    .find(|(case, _)| case.to_value() == scrutinee)
                    .map(|(_, target)| *target)
                    .unwrap_or(*default);
                previous = Some(current);
                current = taken;
            }
            Terminator::Ret { value } => {
                return match value {
                    Some(op) => Ok(Some(eval.operand(op)?)),
                    None => Ok(None),
                };
            }
            Terminator::Unreachable => {
                return Err(failed(proc, format!("reached unreachable in {current}")))
            }
        }
    }
}

impl Evaluator<'_> {
    fn step_budget(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(failed(self.proc, "step limit exceeded"));
        }
        Ok(())
    }

    fn operand(&self, operand: &Operand) -> Result<Value, EvalError> {
        match operand {
            Operand::Const(c) => Ok(c.to_value()),
            Operand::Value(id) => self
                .env
                .get(id)
                .copied()
                .ok_or_else(|| failed(self.proc, format!("{id} used before definition"))),
        }
    }

    fn define(&mut self, result: Option<ValueId>, value: Value) {
        if let Some(id) = result {
            self.env.insert(id, value);
        }
    }

    fn exec(&mut self, result: Option<ValueId>, kind: &InstKind) -> Result<(), EvalError> {
        match kind {
            InstKind::Binary { op, lhs, rhs, .. } => {
                let l = self.operand(lhs)?;
                let r = self.operand(rhs)?;
                let f = match op {
                    crate::types::BinOp::Add => value::add,
                    crate::types::BinOp::Sub => value::sub,
                    crate::types::BinOp::Mul => value::mul,
                    crate::types::BinOp::Div => value::div,
                };
                let v = f(&l, &r).map_err(|e| match e {
                    ArithError::DivByZero => EvalError::DivByZero {
                        procedure: self.proc.name.clone(),
                    },
                    ArithError::Mismatch => failed(self.proc, format!("{l} with {r}")),
                })?;
                self.define(result, v);
            }
            InstKind::Alloca { size } => {
                let addr = self
                    .heap
                    .alloc(*size)
                    .map_err(|e| failed(self.proc, format!("{e:?}")))?;
                self.define(result, Value::Ptr(addr));
            }
            InstKind::AllocaDyn { size } => {
                let size = match self.operand(size)? {
                    Value::I32(s) if s >= 0 => s as u64,
                    Value::I64(s) if s >= 0 => s as u64,
                    other => return Err(failed(self.proc, format!("allocation size {other}"))),
                };
                let addr = self
                    .heap
                    .alloc(size)
                    .map_err(|e| failed(self.proc, format!("{e:?}")))?;
                self.define(result, Value::Ptr(addr));
            }
            InstKind::Load { ptr, .. } => {
                let addr = self.pointer(ptr)?;
                let v = self
                    .heap
                    .load(addr)
                    .map_err(|e| failed(self.proc, format!("{e:?}")))?;
                self.define(result, v);
            }
            InstKind::Store { ptr, value } => {
                let addr = self.pointer(ptr)?;
                let v = self.operand(value)?;
                self.heap
                    .store(addr, &v)
                    .map_err(|e| failed(self.proc, format!("{e:?}")))?;
            }
            InstKind::Call { args, ret, .. } => {
                for arg in args {
                    self.operand(arg)?; // arguments are evaluated, then discarded
                }
                if ret.is_some() {
                    self.define(result, Value::I32(0));
                }
            }
            InstKind::Icmp { .. } | InstKind::Bit { .. } | InstKind::Cast { .. } => {
                return Err(failed(self.proc, "operation outside the modeled subset"));
            }
        }
        Ok(())
    }

    fn pointer(&self, operand: &Operand) -> Result<u64, EvalError> {
        match self.operand(operand)? {
            Value::Ptr(addr) => Ok(addr),
            other => Err(failed(self.proc, format!("non-pointer address {other}"))),
        }
    }
}

fn failed(proc: &Procedure, detail: impl Into<String>) -> EvalError {
    EvalError::Failed {
        procedure: proc.name.clone(),
        detail: detail.into(),
    }
}
