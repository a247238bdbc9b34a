//! Module-level obfuscation entry point and the runner that executes the
//! resulting procedures.

use crate::{pass, PassConfig, Transform};
use serde::{Deserialize, Serialize};
use vmcloak_core::{run_bytecode_with_args, Value};
use vmcloak_ir::{eval::eval_procedure, Body, Module};
use vmcloak_utils::errors::ObfuscateError;

/// Configuration for the obfuscation pipeline.
pub struct ObfuscationConfig {
    /// Random seed for deterministic obfuscation.
    pub seed: u64,
    /// List of transforms to apply.
    pub transforms: Vec<Box<dyn Transform>>,
    /// Pass configuration for transform behavior.
    pub pass_config: PassConfig,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            transforms: Vec::new(),
            pass_config: PassConfig::default(),
        }
    }
}

impl std::fmt::Debug for ObfuscationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscationConfig")
            .field("seed", &self.seed)
            .field("transforms", &format!("{} transforms", self.transforms.len()))
            .field("pass_config", &self.pass_config)
            .finish()
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationResult {
    pub module: String,
    pub procedures_total: usize,
    pub procedures_virtualized: usize,
    /// Procedures the encoder refused; their bodies are untouched.
    pub procedures_skipped: Vec<String>,
    /// Total embedded bytecode across virtualized procedures.
    pub bytecode_bytes: usize,
    pub metadata: ObfuscationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationMetadata {
    pub transforms_applied: Vec<String>,
    pub seed_used: u64,
}

/// Runs the configured transforms over the module and summarizes what
/// changed.
pub fn obfuscate_module(
    module: &mut Module,
    config: ObfuscationConfig,
) -> Result<ObfuscationResult, ObfuscateError> {
    tracing::debug!(
        "obfuscating module '{}': {} procedures, seed {:#x}",
        module.name,
        module.procedures.len(),
        config.seed
    );

    let transforms_applied: Vec<String> = config
        .transforms
        .iter()
        .map(|t| t.name().to_string())
        .collect();

    pass::run(module, &config.transforms, &config.pass_config, config.seed)?;

    let mut virtualized = 0;
    let mut bytecode_bytes = 0;
    let mut skipped = Vec::new();
    for proc in &module.procedures {
        match &proc.body {
            Body::Virtualized { bytecode } => {
                virtualized += 1;
                bytecode_bytes += bytecode.len();
            }
            Body::Blocks(_) => skipped.push(proc.name.clone()),
        }
    }

    tracing::debug!(
        "module '{}': {virtualized} virtualized, {} skipped, {bytecode_bytes} bytecode bytes",
        module.name,
        skipped.len()
    );

    Ok(ObfuscationResult {
        module: module.name.clone(),
        procedures_total: module.procedures.len(),
        procedures_virtualized: virtualized,
        procedures_skipped: skipped,
        bytecode_bytes,
        metadata: ObfuscationMetadata {
            transforms_applied,
            seed_used: config.seed,
        },
    })
}

/// Executes procedures of an emitted module: virtualized bodies run in the
/// VM, remaining block bodies run through the reference evaluator.
pub struct ModuleRunner<'a> {
    module: &'a Module,
    debug: bool,
}

impl<'a> ModuleRunner<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self {
            module,
            debug: false,
        }
    }

    pub fn with_debug(module: &'a Module, debug: bool) -> Self {
        Self { module, debug }
    }

    pub fn run(&self, name: &str, args: &[Value]) -> Result<Option<Value>, ObfuscateError> {
        let proc = self
            .module
            .procedure(name)
            .ok_or_else(|| ObfuscateError::UnknownProcedure(name.to_string()))?;
        match &proc.body {
            Body::Virtualized { bytecode } => {
                Ok(run_bytecode_with_args(bytecode, args, self.debug)?)
            }
            Body::Blocks(_) => Ok(eval_procedure(proc, args)?),
        }
    }
}
