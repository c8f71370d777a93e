// ============================================================
// Layer 5 - Caption Model
// ============================================================
// Thin composition of a frozen feature extractor and a trainable
// attention decoder.
//
//   images [B,3,S,S] ──extractor──▶ [B,P,F] ──swap──▶ [P,B,F] ──decoder──▶ logits [B,T,V]
//
// Only decoder parameters ever receive gradients. The extractor's
// parameters are switched to no-grad when the model is built and
// again after every record load, so the autodiff graph never
// reaches them.

use std::path::Path;

use burn::{prelude::*, tensor::TensorData};

use crate::data::vocabulary::Vocabulary;
use crate::domain::error::CaptionError;
use crate::ml::decoder::{AttentionDecoder, DecoderConfig, DecoderState};
use crate::ml::encoder::{BackboneKind, FeatureExtractor, ImageEncoder};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally, do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct CaptionModelConfig {
    pub backbone:           BackboneKind,
    pub image_size:         usize,
    pub image_features_dim: usize,
    pub embed_size:         usize,
    pub vocab_size:         usize,
    pub caption_max_length: usize,
    #[config(default = 512)]
    pub hidden_size:        usize,
    #[config(default = 256)]
    pub attention_dim:      usize,
    #[config(default = 0.5)]
    pub dropout:            f64,
}

impl CaptionModelConfig {
    /// Build a fresh model whose special ids come from `vocab`.
    ///
    /// # Errors
    /// `Shape` when `vocab` or the backbone disagree with the declared
    /// sizes, `InvalidConfig` for an image too small for the backbone.
    pub fn init<B: Backend>(
        &self,
        vocab:  &Vocabulary,
        device: &B::Device,
    ) -> Result<CaptionModel<B>, CaptionError> {
        if vocab.len() != self.vocab_size {
            return Err(CaptionError::shape(format!(
                "model declares {} output classes but the vocabulary has {} tokens",
                self.vocab_size,
                vocab.len()
            )));
        }
        if self.backbone.feature_dim() != self.image_features_dim {
            return Err(CaptionError::shape(format!(
                "image_features_dim is {} but the {} backbone produces {}-d features",
                self.image_features_dim,
                self.backbone,
                self.backbone.feature_dim()
            )));
        }
        if self.image_size < self.backbone.min_image_size() {
            return Err(CaptionError::config(format!(
                "image_size {} is below the {} backbone minimum of {}",
                self.image_size,
                self.backbone,
                self.backbone.min_image_size()
            )));
        }

        let encoder = self.backbone.init(device);
        let decoder = DecoderConfig::new(
            self.image_features_dim,
            self.embed_size,
            self.hidden_size,
            self.attention_dim,
            self.vocab_size,
        )
        .with_dropout(self.dropout)
        .init(device);

        let model = CaptionModel {
            encoder,
            decoder,
            pad_id:             vocab.pad_id() as usize,
            start_id:           vocab.start_id() as usize,
            end_id:             vocab.end_id() as usize,
            caption_max_length: self.caption_max_length,
        };
        Ok(model.freeze_encoder())
    }
}

#[derive(Module, Debug)]
pub struct CaptionModel<B: Backend> {
    encoder:            FeatureExtractor<B>,
    decoder:            AttentionDecoder<B>,
    pad_id:             usize,
    start_id:           usize,
    end_id:             usize,
    caption_max_length: usize,
}

/// A greedily decoded caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Word ids, without <START> and without <END>
    pub token_ids: Vec<u32>,
    /// Attention weights over image positions, one row per emitted word
    pub attention: Vec<Vec<f32>>,
}

impl<B: Backend> CaptionModel<B> {
    /// Teacher-forced logits for a caption batch.
    ///
    /// images `[B, 3, S, S]`, captions `[B, T]` starting with <START>
    /// → logits `[B, T, vocab_size]`
    pub fn forward(
        &self,
        images:   Tensor<B, 4>,
        captions: Tensor<B, 2, Int>,
    ) -> Result<Tensor<B, 3>, CaptionError> {
        let [image_batch, _, _, _] = images.dims();
        let [caption_batch, seq_len] = captions.dims();
        if image_batch != caption_batch {
            return Err(CaptionError::shape(format!(
                "{image_batch} images but {caption_batch} captions in one batch"
            )));
        }
        if seq_len == 0 {
            return Err(CaptionError::shape("caption batch has zero length"));
        }

        let features = self.encode_features(images);
        self.decoder.forward(features, captions)
    }

    /// Greedy caption for a single image `[1, 3, S, S]`.
    pub fn infer(&self, image: Tensor<B, 4>) -> Result<Generated, CaptionError> {
        let [batch, _, _, _] = image.dims();
        if batch != 1 {
            return Err(CaptionError::shape(format!(
                "infer takes one image at a time, got a batch of {batch}"
            )));
        }

        let features = self.encode_features(image);
        let state    = self.decoder.init_hidden(&features);
        let steps    = GreedyDecode {
            decoder:   &self.decoder,
            features:  features.swap_dims(0, 1),
            state:     Some(state),
            token:     self.start_id as u32,
            end_id:    self.end_id as u32,
            remaining: self.caption_max_length,
        };

        let mut generated = Generated { token_ids: Vec::new(), attention: Vec::new() };
        for step in steps {
            let (token, weights) = step?;
            generated.token_ids.push(token);
            generated.attention.push(weights);
        }
        Ok(generated)
    }

    /// Extractor output, detached and reordered to `[positions, batch, feature_dim]`.
    fn encode_features(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        self.encoder.encode(images).detach().swap_dims(0, 1)
    }

    /// Swap in pretrained extractor weights; the extractor stays frozen.
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> anyhow::Result<Self> {
        self.encoder = self.encoder.load_weights(path, device)?;
        Ok(self.freeze_encoder())
    }

    /// Mark every extractor parameter as not requiring gradients.
    pub fn freeze_encoder(mut self) -> Self {
        self.encoder = self.encoder.no_grad();
        self
    }

    pub fn encoder(&self) -> &FeatureExtractor<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &AttentionDecoder<B> {
        &self.decoder
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id as u32
    }

    #[cfg(test)]
    pub(crate) fn always_predict(mut self, token: u32) -> Self {
        self.decoder = self.decoder.always_predict(token as usize);
        self
    }
}

// ─── Greedy decoding ──────────────────────────────────────────────────────────
/// Lazy token stream for one image.
///
/// Each item is the arg-max word of one decoder step, fed back as the
/// next input. The stream ends, and stays ended, once the decoder picks
/// <END> (which is not yielded) or `remaining` steps have run.
struct GreedyDecode<'a, B: Backend> {
    decoder:   &'a AttentionDecoder<B>,
    /// `[1, positions, feature_dim]`, swapped once for all steps
    features:  Tensor<B, 3>,
    state:     Option<DecoderState<B>>,
    token:     u32,
    end_id:    u32,
    remaining: usize,
}

impl<B: Backend> Iterator for GreedyDecode<'_, B> {
    type Item = Result<(u32, Vec<f32>), CaptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let state = self.state.take()?;
        self.remaining -= 1;

        let device = self.features.device();
        let input  = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![self.token as i64], [1]), &device);
        let step   = match self.decoder.step(&self.features, input, state) {
            Ok(step) => step,
            Err(e)   => return Some(Err(e)),
        };

        let next = step.logits.argmax(1).reshape([1]).into_scalar().elem::<i64>() as u32;
        if next == self.end_id {
            return None;
        }

        self.state = Some(step.state);
        self.token = next;
        let weights = step.attention.into_data().iter::<f32>().collect();
        Some(Ok((next, weights)))
    }
}
