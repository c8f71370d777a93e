// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores caption models with Burn's named MessagePack
// recorder at full precision, so a restored model computes exactly
// what the trained one did.
//
// What gets saved:
//   1. epoch_<N>_model_state.mpk.gz  one per checkpointed epoch,
//                                    holding {epoch, model record}
//   2. train_config.json             architecture + hyperparameters
//
// Checkpoint files are write-once. Saving an epoch that already
// has a file is an error, never an overwrite, and nothing here
// deletes old epochs.
//
// Loading rebuilds nothing by itself: the caller constructs a
// model from train_config.json and this manager pours the saved
// record into it, checks the stored epoch number, and re-freezes
// the feature extractor.
//
// File layout:
//   checkpoints/
//     epoch_5_model_state.mpk.gz
//     epoch_10_model_state.mpk.gz
//     train_config.json
//     tokenizer.json          (written by VocabStore)
//     metrics.csv / examples.csv (written by CsvMetricsSink)

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Record, Recorder},
};
use std::{
    fs,
    path::PathBuf,
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::CaptionError;
use crate::ml::model::{CaptionModel, CaptionModelRecord};

const CONFIG_FILE:    &str = "train_config.json";
const FILE_PREFIX:    &str = "epoch_";
const FILE_SUFFIX:    &str = "_model_state";
const FILE_EXTENSION: &str = "mpk.gz";

/// Gzipped MessagePack, f32 weights stored as f32.
pub type WeightRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Everything one checkpoint file holds.
#[derive(Record)]
pub struct CheckpointRecord<B: Backend> {
    pub epoch: usize,
    pub model: CaptionModelRecord<B>,
}

/// Manages saving and loading of model checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Manager for an existing directory, as used at inference time.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            bail!(
                "Checkpoint directory '{}' does not exist. Have you run 'train' first?",
                dir.display()
            );
        }
        Ok(Self { dir })
    }

    /// Fails when `dir` already holds epoch checkpoints from an earlier
    /// run. Creates nothing, so a refused run leaves `dir` untouched.
    pub fn ensure_unused(dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Ok(());
        }
        let epochs = Self { dir: dir.clone() }.saved_epochs()?;
        if let (Some(first), Some(last)) = (epochs.first(), epochs.last()) {
            bail!(
                "Checkpoint directory '{}' already holds {} checkpoint(s) (epochs {}..={}). \
                 Pick a new --checkpoint-dir or move the previous run away.",
                dir.display(),
                epochs.len(),
                first,
                last
            );
        }
        Ok(())
    }

    /// Path the recorder is given; it appends `.mpk.gz` itself.
    fn record_stem(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{epoch}{FILE_SUFFIX}"))
    }

    /// Full path of the checkpoint file for `epoch`.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.record_stem(epoch).with_extension(FILE_EXTENSION)
    }

    /// Write `model` as the checkpoint for `epoch`.
    ///
    /// # Errors
    /// `CheckpointExists` if that epoch was already saved; recorder
    /// failures carry the target path.
    pub fn save<B: Backend>(&self, model: &CaptionModel<B>, epoch: usize) -> Result<PathBuf> {
        let path = self.checkpoint_path(epoch);
        if path.exists() {
            return Err(CaptionError::CheckpointExists { epoch, path }.into());
        }

        let record = CheckpointRecord { epoch, model: model.clone().into_record() };
        WeightRecorder::new()
            .record(record, self.record_stem(epoch))
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(path)
    }

    /// Epoch numbers with a checkpoint file, ascending.
    pub fn saved_epochs(&self) -> Result<Vec<usize>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?;

        let mut epochs = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(epoch) = name.to_str().and_then(parse_epoch) {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Highest saved epoch.
    pub fn latest_epoch(&self) -> Result<usize> {
        self.saved_epochs()?.last().copied().with_context(|| {
            format!(
                "No checkpoints found in '{}'. Have you run 'train' first?",
                self.dir.display()
            )
        })
    }

    /// Load the checkpoint for `epoch` (latest when `None`) into `model`.
    ///
    /// `model` must have the architecture the checkpoint was saved
    /// with. Returns the restored model and the epoch it came from.
    pub fn load<B: Backend>(
        &self,
        model:  CaptionModel<B>,
        epoch:  Option<usize>,
        device: &B::Device,
    ) -> Result<(CaptionModel<B>, usize)> {
        let epoch = match epoch {
            Some(e) => e,
            None    => self.latest_epoch()?,
        };
        let path = self.checkpoint_path(epoch);
        tracing::info!("Loading checkpoint from epoch {}", epoch);

        let record: CheckpointRecord<B> = WeightRecorder::new()
            .load(self.record_stem(epoch), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        if record.epoch != epoch {
            bail!(
                "Checkpoint '{}' claims epoch {} but was requested as epoch {}",
                path.display(),
                record.epoch,
                epoch
            );
        }

        Ok((model.load_record(record.model).freeze_encoder(), epoch))
    }

    /// Save the training configuration to JSON.
    ///
    /// Called before training starts so the inferencer can
    /// reconstruct the exact model architecture.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the training configuration from JSON.
    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'caption'.",
                path.display()
            )
        })?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config in '{}'", path.display()))
    }
}

/// `epoch_12_model_state.mpk.gz` → 12
fn parse_epoch(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}
