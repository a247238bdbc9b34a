//! Module metrics used by the pass driver to score transforms.

use serde::Serialize;
use vmcloak_ir::{Body, Module};
use vmcloak_utils::errors::MetricsError;

/// A snapshot of how much of a module has been virtualized.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleMetrics {
    pub procedures: usize,
    pub virtualized: usize,
    /// Instructions plus phis across every block-bodied procedure.
    pub ir_instructions: usize,
    /// Total embedded bytecode across virtualized procedures.
    pub bytecode_bytes: usize,
}

pub fn collect_metrics(module: &Module) -> Result<ModuleMetrics, MetricsError> {
    if module.procedures.is_empty() {
        return Err(MetricsError::EmptyModule);
    }

    let mut metrics = ModuleMetrics {
        procedures: module.procedures.len(),
        virtualized: 0,
        ir_instructions: 0,
        bytecode_bytes: 0,
    };
    for proc in &module.procedures {
        match &proc.body {
            Body::Blocks(blocks) => {
                metrics.ir_instructions += blocks
                    .iter()
                    .map(|b| b.insts.len() + b.phis.len())
                    .sum::<usize>();
            }
            Body::Virtualized { bytecode } => {
                metrics.virtualized += 1;
                metrics.bytecode_bytes += bytecode.len();
            }
        }
    }
    Ok(metrics)
}

/// Score delta between two snapshots: the increase in the fraction of
/// procedures whose bodies were virtualized. Positive means the transform
/// made progress.
pub fn compare(before: &ModuleMetrics, after: &ModuleMetrics) -> f64 {
    let total = after.procedures.max(1) as f64;
    (after.virtualized as f64 - before.virtualized as f64) / total
}
