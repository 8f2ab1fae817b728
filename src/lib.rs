//! Behavioral cloning for a Twenty Questions guesser agent.
//!
//! The trainer fine-tunes a language-model policy on recorded games: it loads
//! conversation trajectories, tokenizes them into masked fixed-length blocks
//! (loss only over the policy's own questions), and drives an external model
//! server through the training schedule. Periodic evaluations measure
//! held-out loss and play live games against a yes/no oracle.

pub mod config;
pub mod data;
pub mod env;
pub mod eval;
pub mod model;
pub mod train;
