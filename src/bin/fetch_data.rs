//! Download the recorded Twenty Questions games.
//!
//! Fetches the published dataset file and writes it verbatim to `train.json`
//! in the current directory, then parses it once to report how many
//! conversations it holds. Deliberately takes no arguments and performs no
//! retries or integrity checks.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DATA_URL: &str =
    "https://rail.eecs.berkeley.edu/datasets/rl-llm-bench-dataset/twenty-questions/train.json";

const OUTPUT_PATH: &str = "train.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(url = DATA_URL, "downloading dataset");
    let resp = reqwest::get(DATA_URL)
        .await
        .with_context(|| format!("failed to reach {DATA_URL}"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("dataset download failed with status {status}");
    }
    let body = resp.bytes().await.context("failed to read dataset body")?;

    std::fs::write(OUTPUT_PATH, &body)
        .with_context(|| format!("failed to write {OUTPUT_PATH}"))?;

    let (count, first) = inspect_dataset(&body)?;
    info!(path = OUTPUT_PATH, conversations = count, "dataset written");
    println!("{count}");
    if let Some(first) = first {
        println!("{}", serde_json::to_string_pretty(&first)?);
    }

    Ok(())
}

/// Parse the downloaded bytes as a JSON array and report its length and
/// first element. Fails on anything that is not an array.
fn inspect_dataset(body: &[u8]) -> Result<(usize, Option<serde_json::Value>)> {
    let records: Vec<serde_json::Value> =
        serde_json::from_slice(body).context("downloaded file is not a JSON array")?;
    let first = records.first().cloned();
    Ok((records.len(), first))
}
