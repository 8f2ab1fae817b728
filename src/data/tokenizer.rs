//! Tokenizer wrapper over the HuggingFace `tokenizers` crate.
//!
//! Loads a `tokenizer.json`, guarantees a pad token exists (the published
//! GPT-2 vocabulary ships without one), and adapts the crate's boxed errors
//! to `anyhow`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tokenizers::{AddedToken, Tokenizer};

/// The pad token appended to vocabularies that lack one.
pub const PAD_TOKEN: &str = "<|pad|>";

/// Tokenizer used for dataset blocking and decode-input construction.
pub struct BcTokenizer {
    inner: Tokenizer,
    pad_id: u32,
}

impl BcTokenizer {
    /// Load from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        Self::from_tokenizer(inner)
    }

    /// Load from raw `tokenizer.json` bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = Tokenizer::from_bytes(bytes)
            .map_err(|e| anyhow!("failed to load tokenizer from bytes: {e}"))?;
        Self::from_tokenizer(inner)
    }

    fn from_tokenizer(mut inner: Tokenizer) -> Result<Self> {
        if inner.token_to_id(PAD_TOKEN).is_none() {
            inner.add_special_tokens(&[AddedToken::from(PAD_TOKEN.to_string(), true)]);
        }
        let pad_id = inner
            .token_to_id(PAD_TOKEN)
            .context("pad token missing after registration")?;
        Ok(Self { inner, pad_id })
    }

    /// Encode text to token ids, without special-token insertion.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("encoding failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token ids back to text, skipping special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow!("decoding failed: {e}"))
    }

    /// Id of the pad token.
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Build a tiny word-level tokenizer for tests: whitespace pre-tokenization
/// over the given vocabulary, with `<unk>` for everything else.
#[cfg(test)]
pub(crate) fn word_level_for_tests(tokens: &[&str]) -> BcTokenizer {
    let mut vocab = serde_json::Map::new();
    vocab.insert("<unk>".to_string(), serde_json::json!(0));
    for (i, tok) in tokens.iter().enumerate() {
        vocab.insert(tok.to_string(), serde_json::json!(i as u32 + 1));
    }

    let definition = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    });

    BcTokenizer::from_bytes(definition.to_string().as_bytes()).expect("test tokenizer must load")
}
