pub mod pass;
pub mod pipeline;
pub mod vm_lower;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use vmcloak_ir::Module;
use vmcloak_utils::errors::TransformError;

/// Trait for module obfuscation transforms.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform to the module, returning whether changes were
    /// made.
    fn apply(&self, module: &mut Module, rng: &mut StdRng) -> Result<bool, TransformError>;
}

/// Configuration for transform passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    /// Minimum metrics delta for accepting a transform's result.
    pub accept_threshold: f64,
    /// Apply transforms unconditionally, without quality gates or ratio caps.
    pub aggressive: bool,
    /// Maximum allowable bytecode size per procedure, in bytes (0 = no cap).
    pub max_bytecode_size: usize,
    /// Maximum fraction of procedures to virtualize in one application.
    pub max_virtualize_ratio: f32,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.0,
            aggressive: true,
            max_bytecode_size: 0,
            max_virtualize_ratio: 1.0,
        }
    }
}
