// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration    (this layer)
//   Step 2: Load caption records          (Layer 4 - data)
//   Step 3: Clean caption text            (Layer 4 - data)
//   Step 4: Split train/test by image     (Layer 4 - data)
//   Step 5: Build + save the vocabulary   (Layer 4 data, Layer 6 infra)
//   Step 6: Encode captions, build dataset(Layer 4 - data)
//   Step 7: Save config for inference     (Layer 6 - infra)
//   Step 8: Build the model on a backend  (Layer 5 - ml)
//   Step 9: Run the training loop         (Layer 5 - ml)
//
// One StdRng seeded from `seed` drives the split, so the same
// config always produces the same train/test partition.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::{CaptionDataset, SubsetDataset},
    image::{ImageLoader, IMAGENET_MEAN, IMAGENET_STD},
    loader::Flickr8kLoader,
    preprocessor::Preprocessor,
    splitter::split_subsets,
    vocabulary::Vocabulary,
};
use crate::domain::{error::CaptionError, traits::CaptionSource};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::CsvMetricsSink,
    vocab_store::VocabStore,
};
use crate::ml::{
    encoder::BackboneKind,
    model::CaptionModelConfig,
    trainer::{train, TrainingReport},
};

// ─── Device selection ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// GPU through wgpu
    Wgpu,
    /// CPU through ndarray
    Cpu,
}

// ─── Training Configuration ──────────────────────────────────────────────────
// All options for a training run.
// Serialisable so it can be saved next to the checkpoints and
// reloaded for inference. Missing fields in a JSON file take
// their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data_dir:           String,
    pub checkpoint_dir:     String,
    pub device:             DeviceKind,
    pub backbone:           BackboneKind,
    pub backbone_weights:   Option<String>,
    pub image_size:         usize,
    pub image_features_dim: usize,
    pub image_mean:         [f32; 3],
    pub image_std:          [f32; 3],
    pub embed_size:         usize,
    pub hidden_size:        usize,
    pub attention_dim:      usize,
    pub dropout:            f64,
    pub vocab_size:         usize,
    pub min_word_freq:      usize,
    pub caption_max_length: usize,
    pub batch_size:         usize,
    pub learning_rate:      f64,
    pub lr_decay:           f64,
    pub grad_clip:          f64,
    pub epochs:             usize,
    pub checkpoint_every:   usize,
    pub train_fraction:     f64,
    pub all_captions:       bool,
    pub seed:               u64,
    pub num_workers:        usize,
    pub log_every:          usize,
    pub eval_images:        usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:           "data/flickr8k".to_string(),
            checkpoint_dir:     "checkpoints".to_string(),
            device:             DeviceKind::Wgpu,
            backbone:           BackboneKind::Vgg,
            backbone_weights:   None,
            image_size:         224,
            image_features_dim: 512,
            image_mean:         IMAGENET_MEAN,
            image_std:          IMAGENET_STD,
            embed_size:         256,
            hidden_size:        512,
            attention_dim:      256,
            dropout:            0.5,
            vocab_size:         5000,
            min_word_freq:      1,
            caption_max_length: 30,
            batch_size:         32,
            learning_rate:      1e-3,
            lr_decay:           0.95,
            grad_clip:          0.25,
            epochs:             10,
            checkpoint_every:   5,
            train_fraction:     0.8,
            all_captions:       true,
            seed:               42,
            num_workers:        1,
            log_every:          50,
            eval_images:        20,
        }
    }
}

impl TrainConfig {
    /// Range-check every option. Runs before any data is read.
    pub fn validate(&self) -> Result<(), CaptionError> {
        fn positive(name: &str, value: usize) -> Result<(), CaptionError> {
            if value == 0 {
                return Err(CaptionError::config(format!("{name} must be greater than 0")));
            }
            Ok(())
        }

        positive("epochs", self.epochs)?;
        positive("batch_size", self.batch_size)?;
        positive("embed_size", self.embed_size)?;
        positive("hidden_size", self.hidden_size)?;
        positive("attention_dim", self.attention_dim)?;
        positive("caption_max_length", self.caption_max_length)?;
        positive("checkpoint_every", self.checkpoint_every)?;
        positive("num_workers", self.num_workers)?;
        positive("log_every", self.log_every)?;
        positive("min_word_freq", self.min_word_freq)?;

        if self.vocab_size <= 4 {
            return Err(CaptionError::config(format!(
                "vocab_size must leave room for words beyond the 4 reserved tokens, got {}",
                self.vocab_size
            )));
        }
        if self.image_size < self.backbone.min_image_size() {
            return Err(CaptionError::config(format!(
                "image_size must be at least {} for the {} backbone, got {}",
                self.backbone.min_image_size(),
                self.backbone,
                self.image_size
            )));
        }
        if self.image_features_dim != self.backbone.feature_dim() {
            return Err(CaptionError::config(format!(
                "image_features_dim is {} but the {} backbone produces {}-d features",
                self.image_features_dim,
                self.backbone,
                self.backbone.feature_dim()
            )));
        }
        if self.image_std.iter().any(|&s| s <= 0.0) {
            return Err(CaptionError::config("image_std values must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(CaptionError::config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        if !(self.learning_rate > 0.0) {
            return Err(CaptionError::config("learning_rate must be positive"));
        }
        if !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return Err(CaptionError::config(format!("lr_decay must be in (0, 1], got {}", self.lr_decay)));
        }
        if !(self.grad_clip > 0.0) {
            return Err(CaptionError::config("grad_clip must be positive"));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(CaptionError::config(format!(
                "train_fraction must be in (0, 1], got {}",
                self.train_fraction
            )));
        }
        Ok(())
    }

    /// Architecture for a vocabulary of `vocab_len` tokens.
    pub fn model_config(&self, vocab_len: usize) -> CaptionModelConfig {
        CaptionModelConfig::new(
            self.backbone,
            self.image_size,
            self.image_features_dim,
            self.embed_size,
            vocab_len,
            self.caption_max_length,
        )
        .with_hidden_size(self.hidden_size)
        .with_attention_dim(self.attention_dim)
        .with_dropout(self.dropout)
    }

    pub fn image_loader(&self) -> ImageLoader {
        ImageLoader::new(self.image_size, self.image_mean, self.image_std)
    }

    /// Read a JSON config file. Absent fields keep their defaults.
    pub fn from_json_file(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{path}'"))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config file '{path}'"))
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingReport> {
        let cfg = &self.config;

        // ── Step 1: Validate before touching any data ─────────────────────────
        cfg.validate()?;
        CheckpointManager::ensure_unused(&cfg.checkpoint_dir)?;
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        // ── Step 2: Load caption records ──────────────────────────────────────
        let source  = Flickr8kLoader::new(&cfg.data_dir);
        let records = source.load_records()?;

        // ── Step 3: Clean caption text ────────────────────────────────────────
        let preprocessor = Preprocessor::new();
        let cleaned: Vec<String> = records.iter().map(|r| preprocessor.clean(&r.caption)).collect();

        // ── Step 4: Train / test split, whole images only ─────────────────────
        let (train_idx, test_idx) =
            split_subsets(records.len(), cfg.train_fraction, cfg.all_captions, &mut rng)?;
        tracing::info!(
            "Split: {} train captions, {} test captions",
            train_idx.len(),
            test_idx.len()
        );

        // ── Step 5: Vocabulary from training captions only ────────────────────
        let train_text: Vec<String> = train_idx.iter().map(|&i| cleaned[i].clone()).collect();
        let vocab = Vocabulary::build(&train_text, cfg.vocab_size, cfg.min_word_freq)?;
        VocabStore::new(&cfg.checkpoint_dir).save(&vocab)?;

        // ── Step 6: Encode captions and build the dataset ─────────────────────
        let encoded = cleaned
            .iter()
            .map(|c| vocab.encode_caption(c))
            .collect::<Result<Vec<_>>>()?;
        let dataset = Arc::new(CaptionDataset::from_files(
            &records,
            encoded,
            &source.images_dir(),
            cfg.image_loader(),
        )?);
        tracing::info!("Dataset ready: {} images", dataset.image_count());

        // ── Step 7: Save config for inference ─────────────────────────────────
        let checkpoints = CheckpointManager::new(&cfg.checkpoint_dir)?;
        checkpoints.save_config(cfg)?;

        let train_set = SubsetDataset::new(dataset.clone(), train_idx);
        let test_set  = SubsetDataset::new(dataset, test_idx);

        // ── Steps 8 + 9: Build the model and train on the chosen backend ─────
        match cfg.device {
            DeviceKind::Wgpu => {
                let device = burn::backend::wgpu::WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                run::<burn::backend::Autodiff<burn::backend::Wgpu>>(cfg, &vocab, &checkpoints, train_set, test_set, device)
            }
            DeviceKind::Cpu => {
                let device = burn::backend::ndarray::NdArrayDevice::default();
                tracing::info!("Using CPU (ndarray) device");
                run::<burn::backend::Autodiff<burn::backend::NdArray>>(cfg, &vocab, &checkpoints, train_set, test_set, device)
            }
        }
    }
}

fn run<B: AutodiffBackend>(
    cfg:         &TrainConfig,
    vocab:       &Vocabulary,
    checkpoints: &CheckpointManager,
    train_set:   SubsetDataset<CaptionDataset>,
    test_set:    SubsetDataset<CaptionDataset>,
    device:      B::Device,
) -> Result<TrainingReport> {
    let mut model = cfg.model_config(vocab.len()).init::<B>(vocab, &device)?;
    if let Some(weights) = &cfg.backbone_weights {
        model = model.load_backbone(&PathBuf::from(weights), &device)?;
    }
    tracing::info!(
        "Model ready: {} backbone ({} frozen params), decoder {} trainable params",
        cfg.backbone,
        model.encoder().num_params(),
        model.decoder().num_params()
    );

    let mut sink = CsvMetricsSink::new(&cfg.checkpoint_dir)?;
    let (_, report) = train(cfg, model, train_set, &test_set, vocab, checkpoints, &mut sink, &device)?;
    Ok(report)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let cfg = TrainConfig { epochs: 0, ..TrainConfig::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("epochs"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let cfg = TrainConfig { batch_size: 0, ..TrainConfig::default() };
        assert!(matches!(cfg.validate(), Err(CaptionError::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_fractions_rejected() {
        for cfg in [
            TrainConfig { train_fraction: 0.0, ..TrainConfig::default() },
            TrainConfig { train_fraction: 1.5, ..TrainConfig::default() },
            TrainConfig { lr_decay: 0.0, ..TrainConfig::default() },
            TrainConfig { dropout: 1.0, ..TrainConfig::default() },
            TrainConfig { learning_rate: f64::NAN, ..TrainConfig::default() },
        ] {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn test_image_too_small_for_backbone() {
        let cfg = TrainConfig { image_size: 16, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = TrainConfig {
            image_size:         16,
            backbone:           BackboneKind::Patch,
            image_features_dim: 768,
            ..TrainConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_feature_dim_must_match_backbone() {
        let cfg = TrainConfig { backbone: BackboneKind::Patch, ..TrainConfig::default() };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, CaptionError::InvalidConfig(_)));
        assert!(err.to_string().contains("image_features_dim"));

        let cfg = TrainConfig { image_features_dim: 768, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_existing_checkpoints_stop_a_new_run_before_any_write() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = dir.path().join("ckpt");
        std::fs::create_dir_all(&ckpt).unwrap();
        std::fs::write(ckpt.join("epoch_5_model_state.mpk.gz"), b"earlier run").unwrap();
        std::fs::write(ckpt.join("train_config.json"), "{}").unwrap();

        let cfg = TrainConfig {
            data_dir:       dir.path().join("nope").to_string_lossy().into_owned(),
            checkpoint_dir: ckpt.to_string_lossy().into_owned(),
            device:         DeviceKind::Cpu,
            ..TrainConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(format!("{err:#}").contains("already holds"));

        assert!(!ckpt.join("tokenizer.json").exists());
        assert_eq!(std::fs::read_to_string(ckpt.join("train_config.json")).unwrap(), "{}");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "epochs": 3, "device": "cpu", "backbone": "patch" }"#).unwrap();

        let cfg = TrainConfig::from_json_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.device, DeviceKind::Cpu);
        assert_eq!(cfg.backbone, BackboneKind::Patch);
        assert_eq!(cfg.batch_size, TrainConfig::default().batch_size);
    }

    #[test]
    fn test_missing_data_dir_fails_after_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            data_dir:       dir.path().join("nope").to_string_lossy().into_owned(),
            checkpoint_dir: dir.path().join("ckpt").to_string_lossy().into_owned(),
            device:         DeviceKind::Cpu,
            ..TrainConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(format!("{err:#}").contains("captions.txt"));
    }
}
