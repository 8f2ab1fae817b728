//! The Twenty Questions evaluation environment.
//!
//! - [`oracle`] -- the yes/no answering service: an HTTP client for the
//!   hosted oracle model plus a deterministic mock for tests/offline runs.
//! - [`twenty_questions`] -- the conversation environment the policy plays
//!   against during evaluation rollouts.
//! - [`words`] -- the default secret-word list.

pub mod oracle;
pub mod twenty_questions;
pub mod words;

pub use oracle::{AnyOracle, MockOracle, Oracle, OracleAnswer, T5OracleClient};
pub use twenty_questions::{history_to_str, StepOutcome, TwentyQuestionsEnv};
pub use words::default_word_list;
