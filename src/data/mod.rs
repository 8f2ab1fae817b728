//! Conversation data handling: loading recorded Twenty Questions games,
//! reshaping them into maskable segments, and building fixed-length token
//! batches for the model server.
//!
//! - [`trajectory`] -- raw JSON records and the [`Trajectory`] type.
//! - [`segment`] -- the trajectory-to-segment converter.
//! - [`tokenizer`] -- thin wrapper over the HuggingFace `tokenizers` crate.
//! - [`dataset`] -- masked, blocked token batches.

pub mod dataset;
pub mod segment;
pub mod tokenizer;
pub mod trajectory;

pub use dataset::{BlockingStrategy, MaskBatch, MaskBlock, MaskDataset, Padding, Truncation};
pub use segment::{Segment, SegmentStream};
pub use tokenizer::BcTokenizer;
pub use trajectory::{load_trajectories, Trajectory, Turn};
