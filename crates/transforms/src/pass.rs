//! The pass driver: applies transforms one at a time against a snapshot and
//! keeps the result only when the metrics delta clears the configured
//! threshold.

use crate::{PassConfig, Transform};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use vmcloak_analysis::{collect_metrics, compare};
use vmcloak_ir::Module;
use vmcloak_utils::errors::TransformError;

/// Trait for running a sequence of obfuscation transforms on a module.
pub trait Pass {
    fn run(
        &self,
        module: &mut Module,
        passes: &[Box<dyn Transform>],
        cfg: &PassConfig,
        seed: u64,
    ) -> Result<(), TransformError>;
}

/// Default implementation of the Pass trait.
pub struct DefaultPass;

impl Pass for DefaultPass {
    fn run(
        &self,
        module: &mut Module,
        passes: &[Box<dyn Transform>],
        cfg: &PassConfig,
        seed: u64,
    ) -> Result<(), TransformError> {
        let mut rng = StdRng::seed_from_u64(seed);

        for pass in passes {
            let before = collect_metrics(module)?;
            let mut snapshot = module.clone();

            let mutated = pass.apply(&mut snapshot, &mut rng)?;
            if !mutated {
                continue;
            }

            let after = collect_metrics(&snapshot)?;
            let delta = compare(&before, &after);

            let keep = delta >= cfg.accept_threshold || cfg.aggressive;
            info!(
                "{:>12} Δ{:+.2} {}",
                pass.name(),
                delta,
                if keep { "✓" } else { "×" }
            );

            if keep {
                *module = snapshot;
            }
        }
        Ok(())
    }
}

/// Convenience function to run the default pass.
pub fn run(
    module: &mut Module,
    passes: &[Box<dyn Transform>],
    cfg: &PassConfig,
    seed: u64,
) -> Result<(), TransformError> {
    DefaultPass.run(module, passes, cfg, seed)
}
