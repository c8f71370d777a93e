// ============================================================
// Layer 5 - Inferencer
// ============================================================
// Captions new images with a trained checkpoint.
//
//   train_config.json ──▶ architecture ──▶ fresh model
//   epoch_<N>_model_state ──────────────▶ weights
//   tokenizer.json ─────────────────────▶ ids → words
//   image file ──decode──▶ [1,3,S,S] ──greedy decode──▶ caption
//
// The model is rebuilt with dropout 0; decoding is greedy and
// never sees a reference caption.

use std::path::Path;

use anyhow::Result;
use burn::prelude::*;

use crate::data::{
    image::{ImageLoader, ImageTensor},
    vocabulary::Vocabulary,
};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::CaptionModel;

/// A generated caption with the attention behind each word.
#[derive(Debug, Clone)]
pub struct CaptionOutput {
    pub text:      String,
    pub token_ids: Vec<u32>,
    /// One row of weights over image positions per word
    pub attention: Vec<Vec<f32>>,
    /// Checkpoint epoch the model came from
    pub epoch:     usize,
}

/// Where the decoder looked while emitting one word.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionFocus {
    pub word:     String,
    pub position: usize,
    pub weight:   f32,
}

impl CaptionOutput {
    /// Strongest attended image position for each generated word.
    pub fn focus(&self, vocab: &Vocabulary) -> Vec<AttentionFocus> {
        self.token_ids
            .iter()
            .zip(&self.attention)
            .map(|(&id, weights)| {
                let (position, weight) = weights
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, w)| if w > best.1 { (i, w) } else { best });
                AttentionFocus {
                    word: vocab.id_to_token(id).unwrap_or_default(),
                    position,
                    weight,
                }
            })
            .collect()
    }
}

pub struct Captioner<B: Backend> {
    model:  CaptionModel<B>,
    vocab:  Vocabulary,
    loader: ImageLoader,
    epoch:  usize,
    device: B::Device,
}

impl<B: Backend> Captioner<B> {
    pub fn new(
        model:  CaptionModel<B>,
        vocab:  Vocabulary,
        loader: ImageLoader,
        epoch:  usize,
        device: B::Device,
    ) -> Self {
        Self { model, vocab, loader, epoch, device }
    }

    /// Rebuild the model saved in `checkpoints` at `epoch` (latest when `None`).
    pub fn from_checkpoint(
        checkpoints: &CheckpointManager,
        vocab:       Vocabulary,
        epoch:       Option<usize>,
        device:      B::Device,
    ) -> Result<Self> {
        let cfg   = checkpoints.load_config()?;
        let model = cfg
            .model_config(vocab.len())
            .with_dropout(0.0)
            .init::<B>(&vocab, &device)?;
        let (model, epoch) = checkpoints.load(model, epoch, &device)?;
        tracing::info!("Model loaded from checkpoint (epoch {})", epoch);

        Ok(Self::new(model, vocab, cfg.image_loader(), epoch, device))
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Decode an image file and caption it.
    pub fn caption_file(&self, path: &Path) -> Result<CaptionOutput> {
        let image = self.loader.load(path)?;
        self.caption_image(&image)
    }

    /// Caption an already decoded image.
    pub fn caption_image(&self, image: &ImageTensor) -> Result<CaptionOutput> {
        let generated = self.model.infer(image.to_batch::<B>(&self.device))?;
        let text      = self.vocab.ids_to_text(&generated.token_ids);
        tracing::debug!("Generated {} words: '{}'", generated.token_ids.len(), text);

        Ok(CaptionOutput {
            text,
            token_ids: generated.token_ids,
            attention: generated.attention,
            epoch:     self.epoch,
        })
    }
}
