//! Behavioral-cloning trainer for a Twenty Questions guesser.
//!
//! Wires the pieces together: parse and freeze the run configuration, load
//! the recorded games, build the masked training dataset, configure the
//! model server, and hand control to the training loop.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use twentyq_bc::config::RunConfig;
use twentyq_bc::data::{
    load_trajectories, BcTokenizer, BlockingStrategy, MaskDataset, Padding, SegmentStream,
    Truncation,
};
use twentyq_bc::env::{default_word_list, AnyOracle, MockOracle, T5OracleClient, TwentyQuestionsEnv};
use twentyq_bc::eval::Evaluator;
use twentyq_bc::model::{ModelServerClient, PolicyBackend, RunInit};
use twentyq_bc::train::TrainLoop;

/// Question budget of the standard game.
const MAX_QUESTIONS: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RunConfig::parse();
    config.validate()?;

    let run_dir = prepare_run_dir(&config)?;
    info!(run_dir = %run_dir.display(), "run directory ready");

    let tokenizer = BcTokenizer::from_file(&config.tokenizer_path)?;
    info!(
        tokenizer = %config.tokenizer_path,
        vocab_size = tokenizer.vocab_size(),
        pad_id = tokenizer.pad_id(),
        "tokenizer loaded"
    );

    let train_trajectories = load_trajectories(&config.train_data_path)?;
    let eval_trajectories = load_trajectories(&config.eval_data_path)?;
    info!(
        train = train_trajectories.len(),
        eval = eval_trajectories.len(),
        "trajectories loaded"
    );

    let blocking = BlockingStrategy {
        padding: Padding::Right,
        truncation: Truncation::Left,
        max_length: config.max_length,
    };
    let train_data = MaskDataset::from_segment_lists(
        SegmentStream::new(train_trajectories.iter(), "TRAIN", false),
        &tokenizer,
        blocking,
    )?;
    info!(blocks = train_data.len(), "training dataset built");

    let backend = ModelServerClient::new(&config.model_server_url)?;
    backend
        .configure(&RunInit::from_config(&config, tokenizer.pad_id()))
        .await
        .context("failed to configure the model server")?;
    info!(server = %config.model_server_url, "model server configured");

    let oracle = if config.mock_oracle {
        info!("using the built-in mock oracle");
        AnyOracle::Mock(MockOracle::new())
    } else {
        AnyOracle::T5(T5OracleClient::new(&config.oracle_url)?)
    };
    let env = TwentyQuestionsEnv::new(oracle, default_word_list(), MAX_QUESTIONS);
    let evaluator = Evaluator::new(&config, &tokenizer, &eval_trajectories, env);

    let mut train = TrainLoop::new(&config, &backend, evaluator, run_dir);
    train.run(&train_data).await?;

    Ok(())
}

/// Create the run directory and drop the frozen configuration manifest in it.
fn prepare_run_dir(config: &RunConfig) -> Result<PathBuf> {
    let name = match &config.exp_name {
        Some(name) => name.clone(),
        None => format!("bc.{}", Utc::now().format("%Y-%m-%d-%H-%M-%S")),
    };
    let run_dir = PathBuf::from(&config.outputs_path).join(name);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;

    let manifest = run_dir.join("config.json");
    let text = serde_json::to_string_pretty(config)?;
    fs::write(&manifest, text)
        .with_context(|| format!("failed to write config manifest to {}", manifest.display()))?;
    Ok(run_dir)
}
