//! Model-server abstractions.
//!
//! All heavy ML work (forward/backward passes, optimizer state, sampling)
//! lives behind an external HTTP server. This module provides:
//! - [`PolicyBackend`] -- the trait seam the trainer and evaluator drive,
//!   mockable in tests.
//! - [`client::ModelServerClient`] -- the reqwest implementation.
//! - [`optimizer`] -- optimizer settings forwarded at configure time and the
//!   locally-computed learning-rate schedule.

pub mod client;
pub mod optimizer;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{ModelLoadMode, RunConfig};
use crate::data::MaskBatch;
use optimizer::OptimizerSettings;

/// Fixed decode settings used for every rollout generation in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub do_sample: bool,
    pub num_beams: usize,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub max_new_tokens: usize,
    /// Generation stops at this string (one question per line).
    pub stop: String,
    pub pad_token_id: u32,
    /// Seed for server-side sampling, derived from the evaluation key chain.
    pub seed: u64,
}

impl GenerationSettings {
    /// Build the run's rollout settings from the frozen configuration.
    pub fn from_config(config: &RunConfig, pad_token_id: u32) -> Self {
        Self {
            do_sample: config.policy_do_sample,
            num_beams: config.policy_num_beams,
            temperature: config.policy_temperature,
            top_p: config.policy_top_p,
            top_k: config.policy_top_k,
            max_new_tokens: config.policy_max_output_length,
            stop: "\n".to_string(),
            pad_token_id,
            seed: 0,
        }
    }
}

/// Everything the server needs to build the model, mesh, and optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInit {
    pub model_load_mode: ModelLoadMode,
    pub model_load_path: String,
    pub mesh_shape: (i64, i64, i64),
    pub resid_pdrop: f64,
    pub attn_pdrop: f64,
    pub embd_pdrop: f64,
    pub gradient_checkpointing: bool,
    pub gradient_checkpointing_policy: String,
    pub bf16_activations: bool,
    pub force_pad_embeddings: bool,
    pub pad_token_id: u32,
    pub optimizer: OptimizerSettings,
}

impl RunInit {
    pub fn from_config(config: &RunConfig, pad_token_id: u32) -> Self {
        Self {
            model_load_mode: config.model_load_mode,
            model_load_path: config.model_load_path.clone(),
            mesh_shape: (
                config.data_mesh_shape,
                config.fsdp_mesh_shape,
                config.model_mesh_shape,
            ),
            resid_pdrop: config.resid_pdrop,
            attn_pdrop: config.attn_pdrop,
            embd_pdrop: config.embd_pdrop,
            gradient_checkpointing: config.gradient_checkpointing,
            gradient_checkpointing_policy: config.gradient_checkpointing_policy.clone(),
            bf16_activations: config.bf16_activations,
            force_pad_embeddings: config.force_pad_embeddings,
            pad_token_id,
            optimizer: OptimizerSettings::from_config(config),
        }
    }
}

/// Loss statistics for one training step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStats {
    pub loss: f64,
}

/// Loss statistics for one held-out batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossStats {
    /// Mean loss over loss-bearing tokens in the batch.
    pub loss: f64,
    /// Number of loss-bearing tokens the mean covers.
    pub num_tokens: f64,
}

/// A checkpoint request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    /// Server-side directory the snapshot is written under.
    pub dir: String,
    /// Checkpoint tag, e.g. `"step_512"` or `"best"`.
    pub tag: String,
    /// Include optimizer state (full training state) in the snapshot.
    pub save_train_state: bool,
    pub save_bf16: bool,
}

/// The subset of model-server capabilities the trainer and evaluator need.
///
/// The HTTP implementation lives in [`client`]; tests supply mock backends.
#[allow(async_fn_in_trait)]
pub trait PolicyBackend: Send + Sync {
    /// Initialize the run: load parameters, build the mesh and optimizer.
    async fn configure(&self, init: &RunInit) -> Result<()>;

    /// One gradient step over a masked batch at the given learning rate.
    async fn train_step(&self, batch: &MaskBatch, learning_rate: f64) -> Result<StepStats>;

    /// Loss over a masked batch without updating parameters.
    async fn eval_loss(&self, batch: &MaskBatch) -> Result<LossStats>;

    /// Batched decode: one generated string per input id sequence.
    async fn generate(
        &self,
        input_ids: &[Vec<u32>],
        settings: &GenerationSettings,
    ) -> Result<Vec<String>>;

    /// Write a parameter (or full training state) snapshot.
    async fn save_checkpoint(&self, request: &SaveRequest) -> Result<()>;
}

pub use client::ModelServerClient;
pub use optimizer::learning_rate_at;
