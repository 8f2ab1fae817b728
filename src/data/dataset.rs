//! Masked, blocked token datasets.
//!
//! A segment list becomes one fixed-length block: segment texts are
//! tokenized and concatenated, the loss mask is 1 over action-segment tokens
//! and 0 over context and padding, and the whole block is truncated/padded
//! to `max_length` according to a [`BlockingStrategy`]. Batches of blocks are
//! the wire unit sent to the model server's train/eval endpoints.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::segment::Segment;
use super::tokenizer::BcTokenizer;

/// Which side short blocks are padded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    Left,
    Right,
}

/// Which side overlong blocks are truncated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Drop the oldest tokens, keeping the end of the conversation.
    Left,
    Right,
}

/// Fixed blocking rule applied to every sequence in a dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockingStrategy {
    pub padding: Padding,
    pub truncation: Truncation,
    pub max_length: usize,
}

/// One fixed-length training sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskBlock {
    pub input_ids: Vec<u32>,
    /// 1.0 on tokens the loss covers, 0.0 on context and padding.
    pub loss_mask: Vec<f32>,
}

/// A batch of blocks, shaped for the server's train/eval endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub loss_masks: Vec<Vec<f32>>,
}

impl MaskBatch {
    /// Number of sequences in the batch.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of loss-bearing token positions across the batch.
    pub fn num_loss_tokens(&self) -> f64 {
        self.loss_masks
            .iter()
            .flat_map(|m| m.iter())
            .map(|&v| v as f64)
            .sum()
    }
}

/// An in-memory dataset of masked blocks.
#[derive(Debug, Clone, Default)]
pub struct MaskDataset {
    blocks: Vec<MaskBlock>,
}

impl MaskDataset {
    /// Tokenize and block a sequence of per-trajectory segment lists.
    ///
    /// Lists that tokenize to zero tokens are dropped.
    pub fn from_segment_lists(
        lists: impl IntoIterator<Item = Vec<Segment>>,
        tokenizer: &BcTokenizer,
        strategy: BlockingStrategy,
    ) -> Result<Self> {
        let mut blocks = Vec::new();
        for list in lists {
            let mut ids: Vec<u32> = Vec::new();
            let mut mask: Vec<f32> = Vec::new();
            for segment in &list {
                let segment_ids = tokenizer.encode(&segment.text)?;
                let value = if segment.is_action { 1.0 } else { 0.0 };
                mask.extend(std::iter::repeat(value).take(segment_ids.len()));
                ids.extend(segment_ids);
            }
            if ids.is_empty() {
                debug!("dropping segment list that tokenized to zero tokens");
                continue;
            }
            blocks.push(block(ids, mask, tokenizer.pad_id(), strategy));
        }
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[MaskBlock] {
        &self.blocks
    }

    /// Split into batches of `bsize` blocks; the last batch may be short.
    pub fn batches(&self, bsize: usize) -> Vec<MaskBatch> {
        if bsize == 0 || self.blocks.is_empty() {
            return Vec::new();
        }
        self.blocks
            .chunks(bsize)
            .map(|chunk| MaskBatch {
                input_ids: chunk.iter().map(|b| b.input_ids.clone()).collect(),
                loss_masks: chunk.iter().map(|b| b.loss_mask.clone()).collect(),
            })
            .collect()
    }
}

/// Apply a blocking strategy to one id/mask pair.
fn block(
    mut ids: Vec<u32>,
    mut mask: Vec<f32>,
    pad_id: u32,
    strategy: BlockingStrategy,
) -> MaskBlock {
    let max = strategy.max_length;

    if ids.len() > max {
        match strategy.truncation {
            Truncation::Left => {
                let start = ids.len() - max;
                ids.drain(..start);
                mask.drain(..start);
            }
            Truncation::Right => {
                ids.truncate(max);
                mask.truncate(max);
            }
        }
    }

    if ids.len() < max {
        let deficit = max - ids.len();
        match strategy.padding {
            Padding::Right => {
                ids.extend(std::iter::repeat(pad_id).take(deficit));
                mask.extend(std::iter::repeat(0.0).take(deficit));
            }
            Padding::Left => {
                let mut padded = vec![pad_id; deficit];
                padded.extend(ids);
                ids = padded;
                let mut padded_mask = vec![0.0; deficit];
                padded_mask.extend(mask);
                mask = padded_mask;
            }
        }
    }

    MaskBlock {
        input_ids: ids,
        loss_mask: mask,
    }
}

/// Block a bare decode input: left-truncate to `max_input_length`, then
/// left-pad with `pad_id`. Guarantees every generate request carries a
/// fixed-size input regardless of how long the conversation has grown.
pub fn block_decode_input(ids: &[u32], pad_id: u32, max_input_length: usize) -> Vec<u32> {
    let kept: &[u32] = if ids.len() > max_input_length {
        &ids[ids.len() - max_input_length..]
    } else {
        ids
    };
    let mut out = vec![pad_id; max_input_length - kept.len()];
    out.extend_from_slice(kept);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenizer::word_level_for_tests;

    fn segment(text: &str, is_action: bool) -> Segment {
        Segment {
            text: text.into(),
            is_action,
        }
    }

    fn strategy(padding: Padding, max_length: usize) -> BlockingStrategy {
        BlockingStrategy {
            padding,
            truncation: Truncation::Left,
            max_length,
        }
    }

    #[test]
    fn mask_covers_only_action_tokens() {
        let tokenizer = word_level_for_tests(&["is", "it", "alive", "?", "no", "."]);
        let lists = vec![vec![
            segment("is it alive ?", true),
            segment("no .", false),
        ]];

        let dataset =
            MaskDataset::from_segment_lists(lists, &tokenizer, strategy(Padding::Right, 8))
                .unwrap();

        assert_eq!(dataset.len(), 1);
        let blk = &dataset.blocks()[0];
        assert_eq!(blk.input_ids.len(), 8);
        assert_eq!(blk.loss_mask.len(), 8);
        // 4 question tokens trained on, 2 answer tokens masked, 2 pad.
        assert_eq!(blk.loss_mask, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let pad = tokenizer.pad_id();
        assert_eq!(&blk.input_ids[6..], &[pad, pad]);
    }

    #[test]
    fn left_truncation_keeps_the_newest_tokens() {
        let tokenizer = word_level_for_tests(&["a", "b", "c", "d"]);
        let lists = vec![vec![segment("a b", false), segment("c d", true)]];

        let dataset =
            MaskDataset::from_segment_lists(lists, &tokenizer, strategy(Padding::Right, 3))
                .unwrap();

        let blk = &dataset.blocks()[0];
        // "a" dropped; "b c d" kept with mask 0 1 1.
        assert_eq!(blk.input_ids, tokenizer.encode("b c d").unwrap());
        assert_eq!(blk.loss_mask, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn left_padding_prefixes_pad_tokens() {
        let tokenizer = word_level_for_tests(&["x"]);
        let lists = vec![vec![segment("x", true)]];

        let dataset =
            MaskDataset::from_segment_lists(lists, &tokenizer, strategy(Padding::Left, 3))
                .unwrap();

        let blk = &dataset.blocks()[0];
        let pad = tokenizer.pad_id();
        assert_eq!(blk.input_ids[..2], [pad, pad]);
        assert_eq!(blk.loss_mask, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn empty_lists_are_dropped() {
        let tokenizer = word_level_for_tests(&["x"]);
        let lists = vec![Vec::new(), vec![segment("x", true)]];
        let dataset =
            MaskDataset::from_segment_lists(lists, &tokenizer, strategy(Padding::Right, 2))
                .unwrap();
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn batches_chunk_with_short_tail() {
        let tokenizer = word_level_for_tests(&["x"]);
        let lists: Vec<Vec<Segment>> = (0..5).map(|_| vec![segment("x", true)]).collect();
        let dataset =
            MaskDataset::from_segment_lists(lists, &tokenizer, strategy(Padding::Right, 2))
                .unwrap();

        let batches = dataset.batches(2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
        assert!((batches[0].num_loss_tokens() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn batches_with_zero_bsize_are_empty() {
        let dataset = MaskDataset::default();
        assert!(dataset.batches(0).is_empty());
        assert!(dataset.batches(4).is_empty());
    }

    #[test]
    fn decode_input_is_left_padded_and_left_truncated() {
        let padded = block_decode_input(&[7, 8], 0, 4);
        assert_eq!(padded, vec![0, 0, 7, 8]);

        let truncated = block_decode_input(&[1, 2, 3, 4, 5], 0, 3);
        assert_eq!(truncated, vec![3, 4, 5]);
    }
}
