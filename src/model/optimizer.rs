//! Optimizer settings and the learning-rate schedule.
//!
//! The optimizer itself runs on the model server; this module carries its
//! configuration there and mirrors the schedule locally so per-step requests
//! and log lines agree with what the server applies.

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;

/// Parameter-name patterns excluded from weight decay: layer-norm scales and
/// biases, and all bias vectors.
pub const WEIGHT_DECAY_EXCLUDE: &[&str] = &[
    "ln_[0-9]+.bias",
    "ln_[0-9]+.scale",
    "ln_f.bias",
    "ln_f.scale",
    "bias",
];

/// Optimizer configuration forwarded to the server at configure time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub init_lr: f64,
    pub end_lr: f64,
    pub lr: f64,
    pub lr_warmup_steps: usize,
    pub lr_decay_steps: usize,
    pub weight_decay: f64,
    pub weight_decay_exclude: Vec<String>,
    pub bf16_momentum: bool,
    pub multiply_by_parameter_scale: bool,
    pub grad_accum_steps: Option<usize>,
}

impl OptimizerSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            init_lr: config.init_lr,
            end_lr: config.end_lr,
            lr: config.lr,
            lr_warmup_steps: config.lr_warmup_steps,
            lr_decay_steps: config.lr_decay_steps,
            weight_decay: config.weight_decay,
            weight_decay_exclude: WEIGHT_DECAY_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            bf16_momentum: config.bf16_momentum,
            multiply_by_parameter_scale: config.multiply_by_parameter_scale,
            grad_accum_steps: config.grad_accum_steps,
        }
    }

    /// Learning rate at a given optimizer step.
    pub fn learning_rate_at(&self, step: usize) -> f64 {
        learning_rate_at(
            step,
            self.init_lr,
            self.lr,
            self.end_lr,
            self.lr_warmup_steps,
            self.lr_decay_steps,
        )
    }
}

/// Linear warmup from `init_lr` to `lr` over `warmup_steps`, then linear
/// decay to `end_lr` by `decay_steps`, constant afterwards.
pub fn learning_rate_at(
    step: usize,
    init_lr: f64,
    lr: f64,
    end_lr: f64,
    warmup_steps: usize,
    decay_steps: usize,
) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        let frac = step as f64 / warmup_steps as f64;
        return init_lr + (lr - init_lr) * frac;
    }
    if step >= decay_steps {
        return end_lr;
    }
    let decay_span = (decay_steps - warmup_steps) as f64;
    if decay_span <= 0.0 {
        return end_lr;
    }
    let frac = (step - warmup_steps) as f64 / decay_span;
    lr + (end_lr - lr) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_endpoints() {
        assert!((learning_rate_at(0, 0.0, 1e-3, 1e-4, 100, 200) - 0.0).abs() < 1e-12);
        assert!((learning_rate_at(100, 0.0, 1e-3, 1e-4, 100, 200) - 1e-3).abs() < 1e-12);
        assert!((learning_rate_at(200, 0.0, 1e-3, 1e-4, 100, 200) - 1e-4).abs() < 1e-12);
        assert!((learning_rate_at(5000, 0.0, 1e-3, 1e-4, 100, 200) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn warmup_is_linear() {
        let mid = learning_rate_at(50, 0.0, 1e-3, 1e-4, 100, 200);
        assert!((mid - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn flat_schedule_stays_flat() {
        // The default configuration uses init_lr = lr = end_lr: the schedule
        // must be constant through warmup, decay, and beyond.
        for step in [0, 500, 1000, 1001, 10_000] {
            let v = learning_rate_at(step, 1e-4, 1e-4, 1e-4, 1000, 1001);
            assert!((v - 1e-4).abs() < 1e-12, "step {step} gave {v}");
        }
    }

    #[test]
    fn exclusion_patterns_cover_layer_norms_and_biases() {
        assert!(WEIGHT_DECAY_EXCLUDE.contains(&"bias"));
        assert!(WEIGHT_DECAY_EXCLUDE.iter().any(|p| p.contains("ln_f")));
    }
}
