//! The training loop.
//!
//! Drives the model server through epochs of masked batches, interleaving
//! evaluations and checkpoints on the configured cadences. Loop progress
//! (step, epoch, best eval loss) is persisted alongside each checkpoint so an
//! interrupted run can resume where it left off.

use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::data::MaskDataset;
use crate::env::oracle::Oracle;
use crate::eval::{EvalKey, EvalReport, Evaluator};
use crate::model::optimizer::OptimizerSettings;
use crate::model::{PolicyBackend, SaveRequest};

const LOOP_STATE_FILE: &str = "loop_state.json";

/// Resumable loop progress, stored as JSON in the run directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopState {
    /// Optimizer steps taken so far.
    pub step: usize,
    /// Completed epochs.
    pub epoch: usize,
    /// Lowest evaluation loss seen so far.
    pub best_loss: Option<f64>,
}

impl LoopState {
    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(LOOP_STATE_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read loop state from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse loop state at {}", path.display()))
    }

    pub fn save(&self, run_dir: &Path) -> Result<()> {
        let path = run_dir.join(LOOP_STATE_FILE);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write loop state to {}", path.display()))
    }
}

/// The epoch/step loop over a materialized training dataset.
pub struct TrainLoop<'a, B, O> {
    config: &'a RunConfig,
    backend: &'a B,
    evaluator: Evaluator<'a, O>,
    optimizer: OptimizerSettings,
    run_dir: PathBuf,
    /// Step checkpoints eligible for pruning, oldest first.
    saved_checkpoints: VecDeque<PathBuf>,
}

impl<'a, B: PolicyBackend, O: Oracle + Clone> TrainLoop<'a, B, O> {
    pub fn new(
        config: &'a RunConfig,
        backend: &'a B,
        evaluator: Evaluator<'a, O>,
        run_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            backend,
            evaluator,
            optimizer: OptimizerSettings::from_config(config),
            run_dir,
            saved_checkpoints: VecDeque::new(),
        }
    }

    /// Run the configured number of epochs (or until `max_steps`) over the
    /// training data. Returns the final loop state.
    pub async fn run(&mut self, train_data: &MaskDataset) -> Result<LoopState> {
        let mut state = if self.config.should_restore_loop_state {
            let restored = LoopState::load(&self.run_dir)?;
            info!(
                step = restored.step,
                epoch = restored.epoch,
                best_loss = restored.best_loss,
                "restored loop state"
            );
            restored
        } else {
            LoopState::default()
        };

        let mut key = EvalKey::from_seed(self.config.eval_seed);
        let batches = train_data.batches(self.config.train_bsize);
        info!(
            blocks = train_data.len(),
            batches_per_epoch = batches.len(),
            epochs = self.config.epochs,
            "starting training"
        );

        if self.config.eval_at_beginning {
            key = self.evaluate_and_track(&mut state, key).await?;
        }
        if self.config.save_at_beginning {
            self.save_checkpoint(&state, &format!("step_{}", state.step))
                .await?;
        }

        'epochs: while state.epoch < self.config.epochs {
            for batch in &batches {
                if let Some(max) = self.config.max_steps {
                    if state.step >= max {
                        info!(step = state.step, "reached max_steps");
                        break 'epochs;
                    }
                }

                let lr = self.optimizer.learning_rate_at(state.step);
                let stats = self.backend.train_step(batch, lr).await?;
                state.step += 1;

                if state.step % self.config.log_every == 0 {
                    info!(
                        step = state.step,
                        epoch = state.epoch,
                        loss = stats.loss,
                        lr,
                        "train step"
                    );
                }

                if let Some(every) = self.config.eval_every_steps {
                    if every > 0 && state.step % every == 0 {
                        key = self.evaluate_and_track(&mut state, key).await?;
                    }
                }
                if let Some(every) = self.config.save_every_steps {
                    if every > 0 && state.step % every == 0 {
                        self.save_checkpoint(&state, &format!("step_{}", state.step))
                            .await?;
                    }
                }
            }

            state.epoch += 1;

            if let Some(every) = self.config.eval_every_epochs {
                if every > 0 && state.epoch % every == 0 {
                    key = self.evaluate_and_track(&mut state, key).await?;
                }
            }
            if let Some(every) = self.config.save_every_epochs {
                if every > 0 && state.epoch % every == 0 {
                    self.save_checkpoint(&state, &format!("epoch_{}", state.epoch))
                        .await?;
                }
            }
        }

        if self.config.eval_at_end {
            self.evaluate_and_track(&mut state, key).await?;
        }
        if self.config.save_at_end {
            self.save_checkpoint(&state, &format!("step_{}", state.step))
                .await?;
        }

        state.save(&self.run_dir)?;
        info!(
            step = state.step,
            epoch = state.epoch,
            best_loss = state.best_loss,
            "training complete"
        );
        Ok(state)
    }

    /// Run one evaluation, update the best-loss tracker, and save a "best"
    /// checkpoint on improvement.
    async fn evaluate_and_track(
        &mut self,
        state: &mut LoopState,
        key: EvalKey,
    ) -> Result<EvalKey> {
        let (report, next_key) = self.evaluator.evaluate(self.backend, key).await?;
        self.record_eval(state, &report).await?;
        Ok(next_key)
    }

    async fn record_eval(&mut self, state: &mut LoopState, report: &EvalReport) -> Result<()> {
        let improved = state
            .best_loss
            .map_or(true, |best| report.loss < best);
        if improved {
            state.best_loss = Some(report.loss);
            if self.config.save_best {
                info!(loss = report.loss, "new best eval loss");
                self.save_checkpoint(state, "best").await?;
            }
        }
        Ok(())
    }

    /// Ask the server for a snapshot, persist loop state next to it, and
    /// prune old step checkpoints past `max_checkpoints`.
    async fn save_checkpoint(&mut self, state: &LoopState, tag: &str) -> Result<()> {
        let request = SaveRequest {
            dir: self.run_dir.display().to_string(),
            tag: tag.to_string(),
            save_train_state: !self.config.save_only_params,
            save_bf16: self.config.save_bf16,
        };
        self.backend.save_checkpoint(&request).await?;
        state.save(&self.run_dir)?;
        info!(tag, step = state.step, "saved checkpoint");

        // The "best" checkpoint is never pruned.
        if tag != "best" {
            self.saved_checkpoints.push_back(self.run_dir.join(tag));
            if let Some(max) = self.config.max_checkpoints {
                while self.saved_checkpoints.len() > max {
                    if let Some(old) = self.saved_checkpoints.pop_front() {
                        prune_dir(&old);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Remove a stale checkpoint directory. Missing directories are fine (the
/// server may store snapshots elsewhere); other errors are logged and
/// ignored so pruning never kills a run.
fn prune_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => info!(path = %path.display(), "pruned checkpoint"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to prune checkpoint"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::data::tokenizer::word_level_for_tests;
    use crate::data::trajectory::{Trajectory, Turn};
    use crate::data::{
        BcTokenizer, BlockingStrategy, MaskBatch, Padding, Segment, Truncation,
    };
    use crate::env::oracle::MockOracle;
    use crate::env::twenty_questions::TwentyQuestionsEnv;
    use crate::model::{GenerationSettings, LossStats, RunInit, StepStats};
    use clap::Parser;
    use std::sync::Mutex;

    /// Backend that records every call and returns scripted eval losses.
    #[derive(Default)]
    struct RecordingBackend {
        train_lrs: Mutex<Vec<f64>>,
        eval_losses: Mutex<Vec<f64>>,
        saved_tags: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn with_eval_losses(losses: &[f64]) -> Self {
            Self {
                eval_losses: Mutex::new(losses.to_vec()),
                ..Self::default()
            }
        }
    }

    impl PolicyBackend for RecordingBackend {
        async fn configure(&self, _init: &RunInit) -> Result<()> {
            Ok(())
        }

        async fn train_step(&self, _batch: &MaskBatch, lr: f64) -> Result<StepStats> {
            self.train_lrs.lock().unwrap().push(lr);
            Ok(StepStats { loss: 1.0 })
        }

        async fn eval_loss(&self, batch: &MaskBatch) -> Result<LossStats> {
            let mut losses = self.eval_losses.lock().unwrap();
            let loss = if losses.len() > 1 {
                losses.remove(0)
            } else {
                losses.first().copied().unwrap_or(1.0)
            };
            Ok(LossStats {
                loss,
                num_tokens: batch.num_loss_tokens(),
            })
        }

        async fn generate(
            &self,
            input_ids: &[Vec<u32>],
            _settings: &GenerationSettings,
        ) -> Result<Vec<String>> {
            Ok(vec!["is it a cat ?\n".into(); input_ids.len()])
        }

        async fn save_checkpoint(&self, request: &SaveRequest) -> Result<()> {
            self.saved_tags.lock().unwrap().push(request.tag.clone());
            Ok(())
        }
    }

    fn test_config(extra: &[&str]) -> RunConfig {
        let mut args = vec![
            "twentyq-bc",
            "hf",
            "gpt2",
            "train.json",
            "eval.json",
            "http://localhost:8001",
            "--train-bsize",
            "2",
            "--max-length",
            "8",
            "--policy-max-input-length",
            "8",
            "--policy-n-rollouts",
            "1",
            "--eval-loss-bsize",
            "1",
            "--log-every",
            "1",
        ];
        args.extend_from_slice(extra);
        let cfg = RunConfig::parse_from(args);
        cfg.validate().unwrap();
        cfg
    }

    fn test_tokenizer() -> BcTokenizer {
        word_level_for_tests(&["is", "it", "a", "cat", "yes", "no", "?", ".", "!"])
    }

    fn trajectories() -> Vec<Trajectory> {
        vec![Trajectory {
            word: "cat".into(),
            turns: vec![Turn::action("is it a cat ?\n"), Turn::context("yes .\n")],
        }]
    }

    fn train_dataset(tokenizer: &BcTokenizer, n: usize) -> MaskDataset {
        let lists: Vec<Vec<Segment>> = (0..n)
            .map(|_| {
                vec![Segment {
                    text: "is it a cat ?".into(),
                    is_action: true,
                }]
            })
            .collect();
        MaskDataset::from_segment_lists(
            lists,
            tokenizer,
            BlockingStrategy {
                padding: Padding::Right,
                truncation: Truncation::Left,
                max_length: 8,
            },
        )
        .unwrap()
    }

    fn evaluator<'a>(
        config: &'a RunConfig,
        tokenizer: &'a BcTokenizer,
        eval_trajectories: &'a [Trajectory],
    ) -> Evaluator<'a, MockOracle> {
        let env = TwentyQuestionsEnv::new(MockOracle::new(), vec!["cat".into()], 20);
        Evaluator::new(config, tokenizer, eval_trajectories, env)
    }

    #[tokio::test]
    async fn runs_all_batches_and_reports_final_state() {
        let config = test_config(&["--eval-every-steps", "1000"]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 6); // 3 batches at bsize 2
        let backend = RecordingBackend::with_eval_losses(&[0.5]);
        let dir = tempfile::tempdir().unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        let state = train.run(&data).await.unwrap();

        assert_eq!(state.step, 3);
        assert_eq!(state.epoch, 1);
        assert_eq!(backend.train_lrs.lock().unwrap().len(), 3);
        // eval_at_end defaults to true.
        assert_eq!(state.best_loss, Some(0.5));
    }

    #[tokio::test]
    async fn max_steps_caps_the_run() {
        let config = test_config(&[
            "--max-steps",
            "2",
            "--epochs",
            "5",
            "--eval-every-steps",
            "1000",
        ]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 6);
        let backend = RecordingBackend::with_eval_losses(&[0.5]);
        let dir = tempfile::tempdir().unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        let state = train.run(&data).await.unwrap();

        assert_eq!(state.step, 2);
        assert_eq!(backend.train_lrs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn learning_rate_follows_schedule() {
        let config = test_config(&[
            "--init-lr",
            "0.0",
            "--lr",
            "0.1",
            "--end-lr",
            "0.0",
            "--lr-warmup-steps",
            "2",
            "--lr-decay-steps",
            "4",
            "--eval-every-steps",
            "1000",
        ]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 8); // 4 steps
        let backend = RecordingBackend::with_eval_losses(&[0.5]);
        let dir = tempfile::tempdir().unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        train.run(&data).await.unwrap();

        let lrs = backend.train_lrs.lock().unwrap();
        assert!((lrs[0] - 0.0).abs() < 1e-12); // warmup start
        assert!((lrs[1] - 0.05).abs() < 1e-12); // warmup midpoint
        assert!((lrs[2] - 0.1).abs() < 1e-12); // peak
        assert!((lrs[3] - 0.05).abs() < 1e-12); // decay midpoint
    }

    #[tokio::test]
    async fn best_checkpoint_tracks_improving_loss() {
        // Two evals (one per step, eval_at_end disabled via epoch exhaustion):
        // losses 0.8 then 0.4 then 0.9; best saved twice.
        let config = test_config(&["--eval-every-steps", "1"]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 4); // 2 steps
        let backend = RecordingBackend::with_eval_losses(&[0.8, 0.4, 0.9]);
        let dir = tempfile::tempdir().unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        let state = train.run(&data).await.unwrap();

        assert_eq!(state.best_loss, Some(0.4));
        let tags = backend.saved_tags.lock().unwrap();
        assert_eq!(tags.iter().filter(|t| *t == "best").count(), 2);
    }

    #[tokio::test]
    async fn loop_state_round_trips_through_the_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let state = LoopState {
            step: 17,
            epoch: 2,
            best_loss: Some(0.75),
        };
        state.save(dir.path()).unwrap();

        let restored = LoopState::load(dir.path()).unwrap();
        assert_eq!(restored.step, 17);
        assert_eq!(restored.epoch, 2);
        assert_eq!(restored.best_loss, Some(0.75));
    }

    #[tokio::test]
    async fn restore_skips_completed_epochs() {
        let config = test_config(&[
            "--should-restore-loop-state",
            "--epochs",
            "2",
            "--eval-every-steps",
            "1000",
        ]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 4); // 2 batches per epoch
        let backend = RecordingBackend::with_eval_losses(&[0.5]);
        let dir = tempfile::tempdir().unwrap();

        LoopState {
            step: 2,
            epoch: 1,
            best_loss: Some(0.6),
        }
        .save(dir.path())
        .unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        let state = train.run(&data).await.unwrap();

        // Only the second epoch runs: 2 more steps on top of the restored 2.
        assert_eq!(state.step, 4);
        assert_eq!(state.epoch, 2);
        assert_eq!(backend.train_lrs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn save_every_steps_emits_step_tags() {
        let config = test_config(&[
            "--save-every-steps",
            "1",
            "--max-checkpoints",
            "2",
            "--eval-every-steps",
            "1000",
        ]);
        let tokenizer = test_tokenizer();
        let eval_trajectories = trajectories();
        let data = train_dataset(&tokenizer, 6); // 3 steps
        let backend = RecordingBackend::with_eval_losses(&[0.5]);
        let dir = tempfile::tempdir().unwrap();

        let mut train = TrainLoop::new(
            &config,
            &backend,
            evaluator(&config, &tokenizer, &eval_trajectories),
            dir.path().to_path_buf(),
        );
        train.run(&data).await.unwrap();

        let tags = backend.saved_tags.lock().unwrap();
        assert!(tags.contains(&"step_1".to_string()));
        assert!(tags.contains(&"step_2".to_string()));
        assert!(tags.contains(&"step_3".to_string()));
    }
}
