//! The yes/no oracle.
//!
//! During evaluation rollouts every policy question is answered by an oracle
//! holding the secret word. The real oracle is a hosted seq2seq model behind
//! HTTP; [`MockOracle`] is a deterministic stand-in for tests and offline
//! smoke runs.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Oracle input truncation length in tokens (fixed, matching the hosted
/// model's serving configuration).
pub const ORACLE_MAX_INPUT_LENGTH: usize = 124;
/// Oracle decode length in tokens.
pub const ORACLE_MAX_OUTPUT_LENGTH: usize = 4;

/// An oracle verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleAnswer {
    Yes,
    No,
}

impl OracleAnswer {
    /// The answer as it appears in a conversation transcript.
    pub fn as_turn_text(self) -> &'static str {
        match self {
            Self::Yes => "Yes.\n",
            Self::No => "No.\n",
        }
    }
}

/// Anything that can answer a yes/no question about a secret word.
#[allow(async_fn_in_trait)]
pub trait Oracle: Send + Sync {
    async fn answer(&self, word: &str, question: &str) -> Result<OracleAnswer>;
}

// ---------------------------------------------------------------------------
// HTTP oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    word: &'a str,
    question: &'a str,
    max_input_length: usize,
    max_output_length: usize,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

/// Client for the hosted T5 oracle service.
#[derive(Debug, Clone)]
pub struct T5OracleClient {
    base_url: String,
    http: reqwest::Client,
}

impl T5OracleClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build oracle HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl Oracle for T5OracleClient {
    async fn answer(&self, word: &str, question: &str) -> Result<OracleAnswer> {
        let url = format!("{}/answer", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&AnswerRequest {
                word,
                question,
                max_input_length: ORACLE_MAX_INPUT_LENGTH,
                max_output_length: ORACLE_MAX_OUTPUT_LENGTH,
            })
            .send()
            .await
            .with_context(|| format!("failed to reach oracle at {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("oracle returned {status}: {text}");
        }

        let body: AnswerResponse = resp
            .json()
            .await
            .context("failed to parse oracle response")?;

        let verdict = parse_answer(&body.answer);
        debug!(word, question, raw = %body.answer, ?verdict, "oracle answered");
        Ok(verdict)
    }
}

/// Interpret the oracle model's free-text decode as a verdict. Anything that
/// does not start with "yes" counts as a no.
fn parse_answer(raw: &str) -> OracleAnswer {
    if raw.trim().to_lowercase().starts_with("yes") {
        OracleAnswer::Yes
    } else {
        OracleAnswer::No
    }
}

// ---------------------------------------------------------------------------
// Mock oracle
// ---------------------------------------------------------------------------

/// A deterministic oracle: yes when the question names the secret word,
/// otherwise no. Coarse, but episode mechanics (termination, rewards,
/// transcripts) exercise exactly as with the hosted model.
#[derive(Debug, Clone, Default)]
pub struct MockOracle;

impl MockOracle {
    pub fn new() -> Self {
        Self
    }
}

impl Oracle for MockOracle {
    async fn answer(&self, word: &str, question: &str) -> Result<OracleAnswer> {
        if question.to_lowercase().contains(&word.to_lowercase()) {
            Ok(OracleAnswer::Yes)
        } else {
            Ok(OracleAnswer::No)
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Enum dispatch over the concrete oracles, enabling runtime selection
/// without `dyn` (incompatible with async trait methods).
#[derive(Debug, Clone)]
pub enum AnyOracle {
    T5(T5OracleClient),
    Mock(MockOracle),
}

impl Oracle for AnyOracle {
    async fn answer(&self, word: &str, question: &str) -> Result<OracleAnswer> {
        match self {
            Self::T5(o) => o.answer(word, question).await,
            Self::Mock(o) => o.answer(word, question).await,
        }
    }
}
