// ============================================================
// Layer 4 - Vocabulary Codec
// ============================================================
// Maps caption words to integer ids and back.
//
// Internally this is a HuggingFace word-level `Tokenizer`, so the
// vocabulary serialises to the standard tokenizer.json format. Four
// ids are reserved and always present:
//
//   <PAD>   = 0   right-padding inside a batch, ignored by the loss
//   <START> = 1   first token of every caption sequence
//   <END>   = 2   last token, stops greedy decoding
//   <UNK>   = 3   any word that did not make the cut
//
// A tokenizer file missing one of the first three cannot drive the
// training loop, so loading it fails straight away.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str::FromStr;
use tokenizers::Tokenizer;

use crate::domain::error::CaptionError;

pub const PAD_TOKEN:   &str = "<PAD>";
pub const START_TOKEN: &str = "<START>";
pub const END_TOKEN:   &str = "<END>";
pub const UNK_TOKEN:   &str = "<UNK>";

const RESERVED: [&str; 4] = [PAD_TOKEN, START_TOKEN, END_TOKEN, UNK_TOKEN];

pub struct Vocabulary {
    tokenizer: Tokenizer,
    pad_id:    u32,
    start_id:  u32,
    end_id:    u32,
}

impl Vocabulary {
    /// Wrap a tokenizer, resolving the reserved ids.
    pub fn from_tokenizer(tokenizer: Tokenizer) -> std::result::Result<Self, CaptionError> {
        let lookup = |token: &'static str| {
            tokenizer
                .token_to_id(token)
                .ok_or(CaptionError::MissingReservedToken(token))
        };
        let pad_id   = lookup(PAD_TOKEN)?;
        let start_id = lookup(START_TOKEN)?;
        let end_id   = lookup(END_TOKEN)?;
        Ok(Self { tokenizer, pad_id, start_id, end_id })
    }

    /// Parse a tokenizer.json document.
    pub fn from_json(json: &str) -> Result<Self> {
        let tokenizer = Tokenizer::from_str(json)
            .map_err(|e| anyhow::anyhow!("Cannot parse tokenizer JSON: {e}"))?;
        Ok(Self::from_tokenizer(tokenizer)?)
    }

    /// Serialise back to tokenizer.json.
    pub fn to_json(&self) -> Result<String> {
        self.tokenizer
            .to_string(true)
            .map_err(|e| anyhow::anyhow!("Cannot serialise tokenizer: {e}"))
    }

    /// Build a vocabulary from cleaned captions.
    ///
    /// Words are ranked by frequency (ties broken alphabetically so the
    /// result does not depend on hash order). Words seen fewer than
    /// `min_freq` times are dropped, and the total size including the
    /// four reserved tokens is capped at `max_size`.
    pub fn build(captions: &[String], max_size: usize, min_freq: usize) -> Result<Self> {
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for caption in captions {
            for word in caption.split_whitespace() {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        let mut words: Vec<(&str, usize)> = freq
            .into_iter()
            .filter(|(w, n)| *n >= min_freq && !RESERVED.contains(w))
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        words.truncate(max_size.saturating_sub(RESERVED.len()));

        let mut vocab = serde_json::Map::new();
        for (id, token) in RESERVED.iter().enumerate() {
            vocab.insert((*token).to_string(), serde_json::json!(id));
        }
        for (offset, (word, _)) in words.iter().enumerate() {
            vocab.insert((*word).to_string(), serde_json::json!(RESERVED.len() + offset));
        }

        let added_tokens: Vec<serde_json::Value> = RESERVED
            .iter()
            .enumerate()
            .map(|(id, token)| {
                serde_json::json!({
                    "id": id, "content": token, "single_word": false,
                    "lstrip": false, "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let vocab = Self::from_json(&tokenizer_json.to_string())
            .context("Freshly built vocabulary failed to load")?;
        tracing::info!(
            "Vocabulary built: {} tokens ({} words kept, min_freq={})",
            vocab.len(),
            words.len(),
            min_freq
        );
        Ok(vocab)
    }

    /// Number of ids, reserved tokens included.
    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn start_id(&self) -> u32 {
        self.start_id
    }

    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.tokenizer.id_to_token(id)
    }

    /// `<START> w1 w2 ... <END>` for a cleaned caption.
    pub fn encode_caption(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;

        let mut ids = Vec::with_capacity(enc.get_ids().len() + 2);
        ids.push(self.start_id);
        ids.extend_from_slice(enc.get_ids());
        ids.push(self.end_id);
        Ok(ids)
    }

    /// Words for `ids`, joined by spaces. Pad/start/end ids are dropped;
    /// ids outside the vocabulary render as `<UNK>`.
    pub fn ids_to_text(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter(|&&id| id != self.pad_id && id != self.start_id && id != self.end_id)
            .map(|&id| self.id_to_token(id).unwrap_or_else(|| UNK_TOKEN.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("len", &self.len())
            .field("pad_id", &self.pad_id)
            .field("start_id", &self.start_id)
            .field("end_id", &self.end_id)
            .finish()
    }
}
