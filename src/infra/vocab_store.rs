// ============================================================
// Layer 6 - Vocabulary Store
// ============================================================
// Persists the caption vocabulary next to the checkpoints as a
// HuggingFace tokenizer.json, so inference decodes ids with the
// exact mapping training used.
//
// The vocabulary is always rebuilt from the training captions at
// the start of a run and then written here; inference only ever
// loads it.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};

use crate::data::vocabulary::Vocabulary;

const VOCAB_FILE: &str = "tokenizer.json";

pub struct VocabStore {
    dir: PathBuf,
}

impl VocabStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(VOCAB_FILE)
    }

    /// Write the vocabulary, creating the directory if needed.
    pub fn save(&self, vocab: &Vocabulary) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let path = self.path();
        fs::write(&path, vocab.to_json()?)
            .with_context(|| format!("Cannot write vocabulary to '{}'", path.display()))?;

        tracing::info!("Vocabulary ({} tokens) saved to '{}'", vocab.len(), path.display());
        Ok(path)
    }

    /// Load a previously saved vocabulary.
    pub fn load(&self) -> Result<Vocabulary> {
        let path = self.path();
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read vocabulary from '{}'. Make sure you have run 'train' first.",
                path.display()
            )
        })?;
        Vocabulary::from_json(&json)
            .with_context(|| format!("Invalid vocabulary in '{}'", path.display()))
    }
}
