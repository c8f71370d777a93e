// ============================================================
// Layer 5 - Image Feature Extractor
// ============================================================
// Turns an image batch into a grid of feature vectors, one per
// spatial position:
//
//   [B, 3, S, S] ──conv stages──▶ [B, F, h, w] ──flatten──▶ [B, h*w, F]
//
// Two backbones are available, chosen when the model is built:
//
//   vgg    five conv3x3 + ReLU + maxpool stages (64..512 channels)
//          F = 512, h = w = S / 32
//   patch  one 16x16 stride-16 patch projection + ReLU
//          F = 768, h = w = S / 16
//
// The extractor is never trained. The caption model marks its
// parameters as not requiring gradients, so the autodiff graph
// stops at the feature tensor.

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    record::Recorder,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};

use crate::infra::checkpoint::WeightRecorder;

const VGG_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];
const PATCH_SIZE:   usize      = 16;
const PATCH_DIM:    usize      = 768;

// ─── Backbone selection ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    Vgg,
    Patch,
}

impl BackboneKind {
    /// Length of each feature vector the backbone emits.
    pub fn feature_dim(self) -> usize {
        match self {
            Self::Vgg   => VGG_CHANNELS[VGG_CHANNELS.len() - 1],
            Self::Patch => PATCH_DIM,
        }
    }

    /// Side length that reduces to exactly one spatial position.
    pub fn min_image_size(self) -> usize {
        match self {
            Self::Vgg   => 1 << VGG_CHANNELS.len(),
            Self::Patch => PATCH_SIZE,
        }
    }

    /// Number of feature vectors for a square `image_size` input.
    pub fn positions(self, image_size: usize) -> usize {
        let side = image_size / self.min_image_size();
        side * side
    }

    pub fn init<B: Backend>(self, device: &B::Device) -> FeatureExtractor<B> {
        let stages = match self {
            Self::Vgg => {
                let mut in_ch = 3;
                VGG_CHANNELS
                    .iter()
                    .map(|&out_ch| {
                        let conv = Conv2dConfig::new([in_ch, out_ch], [3, 3])
                            .with_padding(PaddingConfig2d::Explicit(1, 1))
                            .init(device);
                        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
                        in_ch = out_ch;
                        ConvStage { conv, pool: Some(pool) }
                    })
                    .collect()
            }
            Self::Patch => {
                let conv = Conv2dConfig::new([3, PATCH_DIM], [PATCH_SIZE, PATCH_SIZE])
                    .with_stride([PATCH_SIZE, PATCH_SIZE])
                    .with_padding(PaddingConfig2d::Valid)
                    .init(device);
                vec![ConvStage { conv, pool: None }]
            }
        };
        FeatureExtractor { stages, feature_dim: self.feature_dim() }
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vgg   => write!(f, "vgg"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

// ─── ImageEncoder ─────────────────────────────────────────────────────────────
/// What the caption model needs from a backbone.
pub trait ImageEncoder<B: Backend> {
    /// `[B, C, H, W]` → `[B, positions, feature_dim]`
    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 3>;

    fn feature_dim(&self) -> usize;
}

// ─── FeatureExtractor ─────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv.forward(x));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None       => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    stages:      Vec<ConvStage<B>>,
    feature_dim: usize,
}

impl<B: Backend> FeatureExtractor<B> {
    /// Replace the random initial weights with a saved extractor record.
    /// `path` may be given with or without the `.mpk.gz` suffix.
    pub fn load_weights(self, path: &Path, device: &B::Device) -> Result<Self> {
        let stem = path
            .to_str()
            .and_then(|p| p.strip_suffix(".mpk.gz"))
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| path.to_path_buf());
        let record = WeightRecorder::new()
            .load(stem, device)
            .with_context(|| format!("Cannot load backbone weights from '{}'", path.display()))?;
        tracing::info!("Loaded backbone weights from '{}'", path.display());
        Ok(self.load_record(record))
    }
}

impl<B: Backend> ImageEncoder<B> for FeatureExtractor<B> {
    fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.stages.iter().fold(images, |x, stage| stage.forward(x));
        let [batch, channels, h, w] = x.dims();
        x.reshape([batch, channels, h * w]).swap_dims(1, 2)
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}
