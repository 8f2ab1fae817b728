//! The Twenty Questions conversation environment.
//!
//! One episode: the environment samples a secret word, the policy asks up to
//! twenty yes/no questions, the oracle answers each, and the episode ends on
//! a correct guess or at the question cap. Reward is -1 per question asked,
//! so shorter winning games score higher.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::data::trajectory::Turn;

use super::oracle::{Oracle, OracleAnswer};

/// The outcome of one environment step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The oracle's answer turn as appended to the transcript.
    pub answer: String,
    pub reward: f64,
    pub done: bool,
}

/// The Twenty Questions environment.
#[derive(Debug, Clone)]
pub struct TwentyQuestionsEnv<O> {
    oracle: O,
    words: Vec<String>,
    max_questions: usize,
    word: String,
    history: Vec<Turn>,
    questions_asked: usize,
    done: bool,
    won: bool,
}

impl<O: Oracle> TwentyQuestionsEnv<O> {
    /// Create an environment over the given word list. `max_questions` is 20
    /// in the standard game.
    pub fn new(oracle: O, words: Vec<String>, max_questions: usize) -> Self {
        Self {
            oracle,
            words,
            max_questions,
            word: String::new(),
            history: Vec::new(),
            questions_asked: 0,
            done: true,
            won: false,
        }
    }

    /// Start a new episode, sampling the secret word from the provided rng.
    pub fn reset(&mut self, rng: &mut StdRng) {
        self.word = self
            .words
            .choose(rng)
            .cloned()
            .unwrap_or_default();
        self.history.clear();
        self.questions_asked = 0;
        self.done = false;
        self.won = false;
        debug!(word = %self.word, "episode reset");
    }

    /// Ask one question. The question and the answer are both appended to
    /// the transcript; the episode terminates on a correct guess or when the
    /// question budget is spent.
    pub async fn step(&mut self, question: &str) -> Result<StepOutcome> {
        if self.done {
            bail!("cannot step a finished episode");
        }

        let question = normalize_question(question);
        self.questions_asked += 1;

        let guessed = mentions_word(&question, &self.word);
        let answer = if guessed {
            self.won = true;
            format!("Yes! It's {}.\n", self.word)
        } else {
            match self.oracle.answer(&self.word, question.trim_end()).await? {
                OracleAnswer::Yes => OracleAnswer::Yes.as_turn_text().to_string(),
                OracleAnswer::No => OracleAnswer::No.as_turn_text().to_string(),
            }
        };

        self.history.push(Turn::action(question));
        self.history.push(Turn::context(answer.clone()));

        if guessed || self.questions_asked >= self.max_questions {
            self.done = true;
        }

        Ok(StepOutcome {
            answer,
            reward: -1.0,
            done: self.done,
        })
    }

    /// The transcript so far, including the last exchange.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the last episode ended in a correct guess.
    pub fn won(&self) -> bool {
        self.won
    }

    pub fn questions_asked(&self) -> usize {
        self.questions_asked
    }

    pub fn max_questions(&self) -> usize {
        self.max_questions
    }

    /// The current secret word (test and logging use only).
    pub fn secret_word(&self) -> &str {
        &self.word
    }
}

/// Normalize a generated question to exactly one trailing newline.
pub fn normalize_question(question: &str) -> String {
    let mut q = question.trim_end_matches('\n').to_string();
    q.push('\n');
    q
}

/// Word-boundary check: does the question name the secret word?
fn mentions_word(question: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let question = question.to_lowercase();
    let word = word.to_lowercase();
    question
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Render a transcript for printing: turns are newline-terminated, so a
/// transcript is their concatenation.
pub fn history_to_str(history: &[Turn]) -> String {
    history.iter().map(|t| t.text.as_str()).collect()
}
