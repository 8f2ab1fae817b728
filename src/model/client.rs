//! HTTP client for the model training/inference server.
//!
//! The server owns everything tensor-shaped: parameter loading, the device
//! mesh, gradients, optimizer state, and sampling. The client POSTs JSON to
//! a small set of endpoints and treats any non-2xx response as fatal.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::data::MaskBatch;

use super::{GenerationSettings, LossStats, PolicyBackend, RunInit, SaveRequest, StepStats};

#[derive(Debug, Serialize)]
struct TrainStepRequest<'a> {
    input_ids: &'a [Vec<u32>],
    loss_masks: &'a [Vec<f32>],
    learning_rate: f64,
}

#[derive(Debug, Deserialize)]
struct TrainStepResponse {
    loss: f64,
}

#[derive(Debug, Serialize)]
struct EvalLossRequest<'a> {
    input_ids: &'a [Vec<u32>],
    loss_masks: &'a [Vec<f32>],
}

#[derive(Debug, Deserialize)]
struct EvalLossResponse {
    loss: f64,
    num_tokens: f64,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    input_ids: &'a [Vec<u32>],
    #[serde(flatten)]
    settings: &'a GenerationSettings,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    texts: Vec<String>,
}

/// Client for the model server's train/eval/generate/save endpoints.
#[derive(Debug, Clone)]
pub struct ModelServerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ModelServerClient {
    /// Create a client pointing at `base_url` (e.g. `http://localhost:8000`).
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(%url, "model server request");

        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach model server at {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("model server {endpoint} returned {status}: {text}");
        }

        resp.json()
            .await
            .with_context(|| format!("failed to parse model server {endpoint} response"))
    }
}

impl PolicyBackend for ModelServerClient {
    async fn configure(&self, init: &RunInit) -> Result<()> {
        let _: serde_json::Value = self.post("configure", init).await?;
        Ok(())
    }

    async fn train_step(&self, batch: &MaskBatch, learning_rate: f64) -> Result<StepStats> {
        let resp: TrainStepResponse = self
            .post(
                "train_step",
                &TrainStepRequest {
                    input_ids: &batch.input_ids,
                    loss_masks: &batch.loss_masks,
                    learning_rate,
                },
            )
            .await?;
        Ok(StepStats { loss: resp.loss })
    }

    async fn eval_loss(&self, batch: &MaskBatch) -> Result<LossStats> {
        let resp: EvalLossResponse = self
            .post(
                "eval_loss",
                &EvalLossRequest {
                    input_ids: &batch.input_ids,
                    loss_masks: &batch.loss_masks,
                },
            )
            .await?;
        Ok(LossStats {
            loss: resp.loss,
            num_tokens: resp.num_tokens,
        })
    }

    async fn generate(
        &self,
        input_ids: &[Vec<u32>],
        settings: &GenerationSettings,
    ) -> Result<Vec<String>> {
        let resp: GenerateResponse = self
            .post("generate", &GenerateRequest { input_ids, settings })
            .await?;
        if resp.texts.len() != input_ids.len() {
            bail!(
                "model server returned {} generations for {} inputs",
                resp.texts.len(),
                input_ids.len()
            );
        }
        Ok(resp.texts)
    }

    async fn save_checkpoint(&self, request: &SaveRequest) -> Result<()> {
        let _: serde_json::Value = self.post("save", request).await?;
        Ok(())
    }
}
