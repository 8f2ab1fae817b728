//! Periodic evaluation: held-out loss plus live rollouts against the oracle.
//!
//! The trainer calls [`Evaluator::evaluate`] on its eval cadence, passing the
//! current [`EvalKey`]. The key is explicit state: each call derives a fresh
//! subkey deterministically and returns the advanced key to the caller, so a
//! run's evaluation randomness is reproducible from the initial seed alone.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::data::dataset::block_decode_input;
use crate::data::trajectory::{Trajectory, Turn};
use crate::data::{
    BcTokenizer, BlockingStrategy, MaskDataset, Padding, SegmentStream, Truncation,
};
use crate::env::oracle::Oracle;
use crate::env::twenty_questions::{history_to_str, normalize_question, TwentyQuestionsEnv};
use crate::model::{GenerationSettings, LossStats, PolicyBackend};

// ---------------------------------------------------------------------------
// Evaluation key
// ---------------------------------------------------------------------------

/// An explicit pseudo-random key threaded through evaluation calls.
///
/// `split` is pure: the same key always yields the same (advanced key,
/// subkey) pair, and chaining splits never repeats a subkey in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvalKey(pub u64);

impl EvalKey {
    pub fn from_seed(seed: u64) -> Self {
        Self(seed)
    }

    /// Derive the next key in the chain plus a subkey for this call.
    pub fn split(self) -> (EvalKey, EvalKey) {
        let advanced = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        (EvalKey(advanced), EvalKey(mix(advanced)))
    }
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ---------------------------------------------------------------------------
// Sampling policy
// ---------------------------------------------------------------------------

/// A decode wrapper around the current model snapshot: renders conversation
/// histories into fixed-size, left-padded/left-truncated token inputs and
/// normalizes the generated questions.
pub struct SamplingPolicy<'a, B> {
    backend: &'a B,
    tokenizer: &'a BcTokenizer,
    settings: GenerationSettings,
    max_input_length: usize,
}

impl<'a, B: PolicyBackend> SamplingPolicy<'a, B> {
    pub fn new(
        backend: &'a B,
        tokenizer: &'a BcTokenizer,
        settings: GenerationSettings,
        max_input_length: usize,
    ) -> Self {
        Self {
            backend,
            tokenizer,
            settings,
            max_input_length,
        }
    }

    /// Generate one question per conversation history.
    pub async fn ask(&self, histories: &[&[Turn]]) -> Result<Vec<String>> {
        let mut inputs = Vec::with_capacity(histories.len());
        for history in histories {
            let prompt = history_to_str(history);
            let ids = self.tokenizer.encode(&prompt)?;
            inputs.push(block_decode_input(
                &ids,
                self.tokenizer.pad_id(),
                self.max_input_length,
            ));
        }
        let texts = self.backend.generate(&inputs, &self.settings).await?;
        Ok(texts.iter().map(|t| normalize_question(t)).collect())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Aggregated held-out loss.
#[derive(Debug, Clone, Serialize)]
pub struct LossMetrics {
    /// Token-weighted mean loss across evaluated batches.
    pub loss: f64,
    pub num_batches: usize,
    pub num_tokens: f64,
}

/// Summary statistics over the evaluation rollouts.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetrics {
    pub n_rollouts: usize,
    pub mean_reward: f64,
    pub mean_questions: f64,
    /// Fraction of episodes ending in a correct guess.
    pub success_rate: f64,
}

/// One finished rollout episode.
#[derive(Debug, Clone, Serialize)]
pub struct RolloutEpisode {
    pub id: String,
    pub word: String,
    pub transcript: Vec<Turn>,
    pub reward: f64,
    pub questions: usize,
    pub won: bool,
}

/// What an evaluation call returns. `loss` is the model-selection signal
/// (lower is better).
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub loss: f64,
    pub loss_metrics: LossMetrics,
    pub generation_metrics: GenerationMetrics,
}

/// Token-weighted aggregation of per-batch loss statistics.
fn aggregate_loss(stats: &[LossStats]) -> LossMetrics {
    let num_tokens: f64 = stats.iter().map(|s| s.num_tokens).sum();
    let loss = if num_tokens > 0.0 {
        stats.iter().map(|s| s.loss * s.num_tokens).sum::<f64>() / num_tokens
    } else {
        0.0
    };
    LossMetrics {
        loss,
        num_batches: stats.len(),
        num_tokens,
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Runs one evaluation: fresh held-out dataset, aggregate loss, environment
/// rollouts, transcript printing.
pub struct Evaluator<'a, O> {
    config: &'a RunConfig,
    tokenizer: &'a BcTokenizer,
    eval_trajectories: &'a [Trajectory],
    env: TwentyQuestionsEnv<O>,
}

impl<'a, O: Oracle + Clone> Evaluator<'a, O> {
    pub fn new(
        config: &'a RunConfig,
        tokenizer: &'a BcTokenizer,
        eval_trajectories: &'a [Trajectory],
        env: TwentyQuestionsEnv<O>,
    ) -> Self {
        Self {
            config,
            tokenizer,
            eval_trajectories,
            env,
        }
    }

    /// One evaluation pass. Returns the report and the advanced key; the
    /// caller threads the key into the next call.
    pub async fn evaluate<B: PolicyBackend>(
        &mut self,
        backend: &B,
        key: EvalKey,
    ) -> Result<(EvalReport, EvalKey)> {
        let (next_key, subkey) = key.split();

        let mut settings = GenerationSettings::from_config(self.config, self.tokenizer.pad_id());
        settings.seed = subkey.0;
        let policy = SamplingPolicy::new(
            backend,
            self.tokenizer,
            settings,
            self.config.policy_max_input_length,
        );

        // The eval dataset is rebuilt from scratch on every call: nothing
        // carries over between evaluations except the key chain.
        let eval_data = MaskDataset::from_segment_lists(
            SegmentStream::new(self.eval_trajectories.iter(), "EVAL", false),
            self.tokenizer,
            BlockingStrategy {
                padding: Padding::Right,
                truncation: Truncation::Left,
                max_length: self.config.max_length,
            },
        )?;

        let mut batch_stats = Vec::new();
        for (i, batch) in eval_data.batches(self.config.eval_loss_bsize).iter().enumerate() {
            if let Some(cap) = self.config.eval_loss_batches {
                if i >= cap {
                    break;
                }
            }
            batch_stats.push(backend.eval_loss(batch).await?);
        }
        let loss_metrics = aggregate_loss(&batch_stats);

        let episodes = self.run_rollouts(&policy, subkey).await?;

        for episode in &episodes {
            println!("{}", "=".repeat(25));
            print!("{}", history_to_str(&episode.transcript));
            println!("{}", "=".repeat(25));
        }

        let generation_metrics = summarize_episodes(&episodes);
        info!(
            loss = loss_metrics.loss,
            eval_batches = loss_metrics.num_batches,
            rollouts = generation_metrics.n_rollouts,
            success_rate = generation_metrics.success_rate,
            mean_questions = generation_metrics.mean_questions,
            "evaluation complete"
        );

        let report = EvalReport {
            loss: loss_metrics.loss,
            loss_metrics,
            generation_metrics,
        };
        Ok((report, next_key))
    }

    /// Run the configured number of rollouts in chunks of `policy_bsize`.
    async fn run_rollouts<B: PolicyBackend>(
        &mut self,
        policy: &SamplingPolicy<'_, B>,
        subkey: EvalKey,
    ) -> Result<Vec<RolloutEpisode>> {
        let mut rng = StdRng::seed_from_u64(subkey.0);
        let mut episodes = Vec::with_capacity(self.config.policy_n_rollouts);

        let mut remaining = self.config.policy_n_rollouts;
        while remaining > 0 {
            let chunk = remaining.min(self.config.policy_bsize);
            episodes.extend(self.run_chunk(policy, &mut rng, chunk).await?);
            remaining -= chunk;
        }
        Ok(episodes)
    }

    /// Run `chunk` episodes in lockstep: every round collects the histories
    /// of all still-live episodes and decodes their next questions in one
    /// batched generate request.
    async fn run_chunk<B: PolicyBackend>(
        &mut self,
        policy: &SamplingPolicy<'_, B>,
        rng: &mut StdRng,
        chunk: usize,
    ) -> Result<Vec<RolloutEpisode>> {
        let mut envs: Vec<TwentyQuestionsEnv<O>> = (0..chunk)
            .map(|_| {
                let mut env = self.env.clone();
                env.reset(rng);
                env
            })
            .collect();
        let mut rewards = vec![0.0; chunk];

        while envs.iter().any(|env| !env.is_done()) {
            let live: Vec<usize> = envs
                .iter()
                .enumerate()
                .filter(|(_, env)| !env.is_done())
                .map(|(i, _)| i)
                .collect();
            let questions = {
                let histories: Vec<&[Turn]> =
                    live.iter().map(|&i| envs[i].history()).collect();
                policy.ask(&histories).await?
            };
            if questions.len() != live.len() {
                bail!(
                    "policy returned {} questions for {} live episodes",
                    questions.len(),
                    live.len()
                );
            }
            for (&i, question) in live.iter().zip(&questions) {
                let outcome = envs[i].step(question).await?;
                rewards[i] += outcome.reward;
            }
        }

        Ok(envs
            .iter()
            .zip(rewards)
            .map(|(env, reward)| RolloutEpisode {
                id: Uuid::new_v4().to_string(),
                word: env.secret_word().to_string(),
                transcript: env.history().to_vec(),
                reward,
                questions: env.questions_asked(),
                won: env.won(),
            })
            .collect())
    }
}

fn summarize_episodes(episodes: &[RolloutEpisode]) -> GenerationMetrics {
    let n = episodes.len();
    if n == 0 {
        return GenerationMetrics {
            n_rollouts: 0,
            mean_reward: 0.0,
            mean_questions: 0.0,
            success_rate: 0.0,
        };
    }
    let mean_reward = episodes.iter().map(|e| e.reward).sum::<f64>() / n as f64;
    let mean_questions = episodes.iter().map(|e| e.questions as f64).sum::<f64>() / n as f64;
    let wins = episodes.iter().filter(|e| e.won).count();
    GenerationMetrics {
        n_rollouts: n,
        mean_reward,
        mean_questions,
        success_rate: wins as f64 / n as f64,
    }
}
