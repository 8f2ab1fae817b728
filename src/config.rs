//! Run configuration for the behavioral-cloning trainer.
//!
//! One flat record holds every hyperparameter of a run. It doubles as the
//! clap argument parser and as the frozen configuration object: `validate`
//! runs once at startup and the record is never mutated afterwards, so every
//! collaborator sees the same values for the lifetime of the process.

use anyhow::{bail, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// How the model server should load the initial parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLoadMode {
    /// Download pretrained weights from the hub by name.
    Hf,
    /// Load bare parameters from a checkpoint path.
    Params,
    /// Load full training state (parameters + optimizer).
    TrainState,
    /// Load parameters out of a saved training state.
    TrainStateParams,
}

/// Complete configuration for one behavioral-cloning run.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(
    name = "twentyq-bc",
    version,
    about = "Behavioral cloning for a Twenty Questions guesser"
)]
pub struct RunConfig {
    /// How the model server should load initial parameters.
    #[arg(value_enum)]
    pub model_load_mode: ModelLoadMode,

    /// Model name (for `hf`) or checkpoint path on the server.
    pub model_load_path: String,

    /// Path to the training conversations JSON file.
    pub train_data_path: String,

    /// Path to the held-out conversations JSON file.
    pub eval_data_path: String,

    /// Base URL of the oracle answering service.
    pub oracle_url: String,

    /// Experiment name; defaults to a timestamp when omitted.
    #[arg(long)]
    pub exp_name: Option<String>,

    /// Directory under which run outputs (manifest, loop state) are written.
    #[arg(long, default_value = "outputs")]
    pub outputs_path: String,

    /// Base URL of the model training/inference server.
    #[arg(long, default_value = "http://localhost:8000")]
    pub model_server_url: String,

    /// Path to the tokenizer.json file.
    #[arg(long, default_value = "tokenizer.json")]
    pub tokenizer_path: String,

    /// Use the built-in deterministic oracle instead of the HTTP oracle.
    #[arg(long, default_value_t = false)]
    pub mock_oracle: bool,

    // -- device mesh (forwarded to the server verbatim) ---------------------
    /// Data-parallel mesh dimension.
    #[arg(long, default_value_t = 1)]
    pub data_mesh_shape: i64,

    /// Fully-sharded-data-parallel mesh dimension.
    #[arg(long, default_value_t = 1)]
    pub fsdp_mesh_shape: i64,

    /// Model-parallel mesh dimension (-1 = remainder).
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub model_mesh_shape: i64,

    // -- schedule -----------------------------------------------------------
    /// Number of passes over the training data.
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,

    /// Hard cap on optimizer steps (unset = run all epochs).
    #[arg(long)]
    pub max_steps: Option<usize>,

    // -- optimizer ----------------------------------------------------------
    /// Weight decay applied to non-excluded parameters.
    #[arg(long, default_value_t = 0.001)]
    pub weight_decay: f64,

    /// Learning rate at step 0.
    #[arg(long, default_value_t = 0.0001)]
    pub init_lr: f64,

    /// Learning rate after decay completes.
    #[arg(long, default_value_t = 0.0001)]
    pub end_lr: f64,

    /// Peak learning rate (reached at the end of warmup).
    #[arg(long, default_value_t = 0.0001)]
    pub lr: f64,

    /// Linear warmup length in steps.
    #[arg(long, default_value_t = 1000)]
    pub lr_warmup_steps: usize,

    /// Step at which decay to `end_lr` completes; must exceed warmup.
    #[arg(long, default_value_t = 1001)]
    pub lr_decay_steps: usize,

    /// Keep optimizer momentum in bf16 on the server.
    #[arg(long, default_value_t = false)]
    pub bf16_momentum: bool,

    /// Scale updates by parameter norm (Adafactor-style).
    #[arg(long, default_value_t = true)]
    pub multiply_by_parameter_scale: bool,

    // -- model regularization -----------------------------------------------
    /// Residual dropout probability.
    #[arg(long, default_value_t = 0.05)]
    pub resid_pdrop: f64,

    /// Attention dropout probability.
    #[arg(long, default_value_t = 0.05)]
    pub attn_pdrop: f64,

    /// Embedding dropout probability.
    #[arg(long, default_value_t = 0.05)]
    pub embd_pdrop: f64,

    // -- training batching --------------------------------------------------
    /// Sequences per training step.
    #[arg(long, default_value_t = 4)]
    pub train_bsize: usize,

    /// Gradient accumulation steps (unset = no accumulation).
    #[arg(long, default_value = "32")]
    pub grad_accum_steps: Option<usize>,

    /// Enable gradient checkpointing on the server.
    #[arg(long, default_value_t = false)]
    pub gradient_checkpointing: bool,

    /// Server-side gradient checkpointing policy name.
    #[arg(long, default_value = "nothing_saveable")]
    pub gradient_checkpointing_policy: String,

    /// Run activations in bf16.
    #[arg(long, default_value_t = false)]
    pub bf16_activations: bool,

    /// Token length every training block is padded/truncated to.
    #[arg(long, default_value_t = 1024)]
    pub max_length: usize,

    // -- cadences -----------------------------------------------------------
    /// Log training loss every this many steps.
    #[arg(long, default_value_t = 256)]
    pub log_every: usize,

    /// Evaluate every this many steps (unset = never by step count).
    #[arg(long, default_value = "256")]
    pub eval_every_steps: Option<usize>,

    /// Evaluate every this many epochs.
    #[arg(long)]
    pub eval_every_epochs: Option<usize>,

    /// Run one evaluation before training starts.
    #[arg(long, default_value_t = false)]
    pub eval_at_beginning: bool,

    /// Run one evaluation after training completes.
    #[arg(long, default_value_t = true)]
    pub eval_at_end: bool,

    /// Checkpoint every this many steps.
    #[arg(long)]
    pub save_every_steps: Option<usize>,

    /// Checkpoint every this many epochs.
    #[arg(long)]
    pub save_every_epochs: Option<usize>,

    /// Checkpoint before training starts.
    #[arg(long, default_value_t = false)]
    pub save_at_beginning: bool,

    /// Checkpoint after training completes.
    #[arg(long, default_value_t = false)]
    pub save_at_end: bool,

    /// Keep a "best" checkpoint tracking the lowest eval loss.
    #[arg(long, default_value_t = true)]
    pub save_best: bool,

    /// Prune step checkpoints beyond this count (unset = keep all).
    #[arg(long)]
    pub max_checkpoints: Option<usize>,

    /// Save parameters only, dropping optimizer state.
    #[arg(long, default_value_t = false)]
    pub save_only_params: bool,

    /// Save checkpoints in bf16.
    #[arg(long, default_value_t = true)]
    pub save_bf16: bool,

    // -- held-out loss ------------------------------------------------------
    /// Sequences per eval-loss batch.
    #[arg(long, default_value_t = 32)]
    pub eval_loss_bsize: usize,

    /// Cap on eval-loss batches per evaluation (unset = full pass).
    #[arg(long)]
    pub eval_loss_batches: Option<usize>,

    // -- policy rollouts ----------------------------------------------------
    /// Environment rollouts per evaluation.
    #[arg(long, default_value_t = 32)]
    pub policy_n_rollouts: usize,

    /// Rollout chunk size.
    #[arg(long, default_value_t = 1)]
    pub policy_bsize: usize,

    /// Token length decode inputs are left-padded/left-truncated to.
    #[arg(long, default_value_t = 256)]
    pub policy_max_input_length: usize,

    /// Maximum new tokens generated per question.
    #[arg(long, default_value_t = 256)]
    pub policy_max_output_length: usize,

    /// Sample during rollouts (false = greedy).
    #[arg(long, default_value_t = true)]
    pub policy_do_sample: bool,

    /// Beam count for rollout decoding.
    #[arg(long, default_value_t = 1)]
    pub policy_num_beams: usize,

    /// Sampling temperature (unset = server default).
    #[arg(long)]
    pub policy_temperature: Option<f64>,

    /// Nucleus sampling cutoff (unset = disabled).
    #[arg(long)]
    pub policy_top_p: Option<f64>,

    /// Top-k sampling cutoff (unset = disabled).
    #[arg(long)]
    pub policy_top_k: Option<usize>,

    /// Force embedding-table padding on the server.
    #[arg(long, default_value_t = false)]
    pub force_pad_embeddings: bool,

    /// Restore step/epoch/best-loss counters from the checkpoint directory.
    #[arg(long, default_value_t = false)]
    pub should_restore_loop_state: bool,

    /// Seed for the evaluation key chain.
    #[arg(long, default_value_t = 0)]
    pub eval_seed: u64,
}

impl RunConfig {
    /// Check cross-field invariants. Called once before anything else runs;
    /// after this the configuration is frozen.
    pub fn validate(&self) -> Result<()> {
        if self.lr_decay_steps <= self.lr_warmup_steps {
            bail!(
                "lr_decay_steps ({}) must exceed lr_warmup_steps ({})",
                self.lr_decay_steps,
                self.lr_warmup_steps
            );
        }
        if self.train_bsize == 0 {
            bail!("train_bsize must be positive");
        }
        if self.eval_loss_bsize == 0 {
            bail!("eval_loss_bsize must be positive");
        }
        if self.policy_bsize == 0 {
            bail!("policy_bsize must be positive");
        }
        if self.max_length == 0 || self.policy_max_input_length == 0 {
            bail!("sequence lengths must be positive");
        }
        if self.epochs == 0 && self.max_steps.is_none() {
            bail!("either epochs or max_steps must allow at least one step");
        }
        if let Some(g) = self.grad_accum_steps {
            if g == 0 {
                bail!("grad_accum_steps must be positive when set");
            }
        }
        if let Some(t) = self.policy_temperature {
            if t <= 0.0 {
                bail!("policy_temperature must be positive, got {t}");
            }
        }
        if let Some(p) = self.policy_top_p {
            if p <= 0.0 || p > 1.0 {
                bail!("policy_top_p must be in (0, 1], got {p}");
            }
        }
        if self.policy_num_beams == 0 {
            bail!("policy_num_beams must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "twentyq-bc",
            "hf",
            "gpt2",
            "data/train.json",
            "data/eval.json",
            "http://localhost:8001",
        ]
    }

    #[test]
    fn defaults_parse_and_validate() {
        let cfg = RunConfig::parse_from(base_args());
        assert_eq!(cfg.model_load_mode, ModelLoadMode::Hf);
        assert_eq!(cfg.train_bsize, 4);
        assert_eq!(cfg.max_length, 1024);
        assert_eq!(cfg.grad_accum_steps, Some(32));
        assert_eq!(cfg.eval_every_steps, Some(256));
        assert!(cfg.eval_at_end);
        assert!(cfg.save_best);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_decay_shorter_than_warmup() {
        let mut args = base_args();
        args.extend(["--lr-warmup-steps", "100", "--lr-decay-steps", "100"]);
        let cfg = RunConfig::parse_from(args);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_temperature() {
        let mut args = base_args();
        args.extend(["--policy-temperature", "0.0"]);
        let cfg = RunConfig::parse_from(args);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_top_p() {
        let mut args = base_args();
        args.extend(["--policy-top-p", "1.5"]);
        let cfg = RunConfig::parse_from(args);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn manifest_serializes() {
        let cfg = RunConfig::parse_from(base_args());
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        assert!(json.contains("\"train_bsize\": 4"));
        assert!(json.contains("\"model_load_mode\": \"hf\""));
    }
}
