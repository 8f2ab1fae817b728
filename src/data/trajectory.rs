//! Trajectory types and the conversation-file loader.
//!
//! A trajectory is one recorded Twenty Questions game: an ordered sequence of
//! turns alternating between the guesser's questions (policy actions, trained
//! on) and the oracle's answers (context, masked out of the loss). Records
//! come from the public dataset fetched by the `fetch-data` binary.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// The turn text, newline-terminated (newline is the generation stop token).
    pub text: String,
    /// Whether the turn was produced by the policy (true) or is oracle/context
    /// text (false). Only action turns contribute to the training loss.
    pub is_action: bool,
}

impl Turn {
    /// An action (guesser) turn.
    pub fn action(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_action: true,
        }
    }

    /// A context (oracle) turn.
    pub fn context(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_action: false,
        }
    }
}

/// One full recorded game. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    /// The secret word (first variant when the record lists several).
    pub word: String,
    /// Ordered turns, starting with the guesser's first question.
    pub turns: Vec<Turn>,
}

// ---------------------------------------------------------------------------
// Raw record schema
// ---------------------------------------------------------------------------

/// The `word` field appears both as a bare string and as a list of accepted
/// variants in the published dataset.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WordField {
    Single(String),
    Variants(Vec<String>),
}

impl WordField {
    fn primary(&self) -> String {
        match self {
            Self::Single(w) => w.clone(),
            Self::Variants(ws) => ws.first().cloned().unwrap_or_default(),
        }
    }
}

/// One raw conversation record as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConversation {
    pub word: WordField,
    /// Each line holds a question and the oracle's reply, e.g.
    /// `"Is it an animal? No."`.
    pub lines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read a conversations JSON file and convert every record into a
/// [`Trajectory`]. The result is materialized: downstream consumers may
/// iterate it any number of times.
pub fn load_trajectories(path: impl AsRef<Path>) -> Result<Vec<Trajectory>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read conversations from {}", path.display()))?;
    let raw: Vec<RawConversation> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse conversations from {}", path.display()))?;
    Ok(trajectories_from_conversations(&raw))
}

/// Convert raw conversation records into trajectories.
///
/// Each line is split at its last `?`: the question becomes an action turn,
/// the remainder an oracle turn. Lines without a `?` (e.g. a bare final
/// guess) become a single action turn. All turn texts are trimmed and
/// newline-terminated.
pub fn trajectories_from_conversations(conversations: &[RawConversation]) -> Vec<Trajectory> {
    conversations
        .iter()
        .map(|conv| {
            let mut turns = Vec::with_capacity(conv.lines.len() * 2);
            for line in &conv.lines {
                match line.rfind('?') {
                    Some(idx) => {
                        let question = line[..=idx].trim();
                        let answer = line[idx + 1..].trim();
                        turns.push(Turn::action(format!("{question}\n")));
                        if !answer.is_empty() {
                            turns.push(Turn::context(format!("{answer}\n")));
                        }
                    }
                    None => {
                        let text = line.trim();
                        if !text.is_empty() {
                            turns.push(Turn::action(format!("{text}\n")));
                        }
                    }
                }
            }
            Trajectory {
                word: conv.word.primary(),
                turns,
            }
        })
        .collect()
}
