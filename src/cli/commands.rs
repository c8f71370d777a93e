// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `caption`, and their
// flags.
//
// Training options come from three places, later ones winning:
//   built-in defaults  <  --config FILE  <  individual flags
// so every training flag here is optional and only overrides the
// field it names.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::application::caption_use_case::CaptionRequest;
use crate::application::train_use_case::{DeviceKind, TrainConfig};
use crate::ml::encoder::BackboneKind;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the captioning model on a Flickr8k-style dataset
    Train(TrainArgs),

    /// Caption an image using a trained checkpoint
    Caption(CaptionArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON file with training options; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding captions.txt and Images/
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory for checkpoints, vocabulary and metrics
    #[arg(long)]
    pub checkpoint_dir: Option<String>,

    #[arg(long, value_enum)]
    pub device: Option<DeviceKind>,

    /// Feature extractor architecture
    #[arg(long, value_enum)]
    pub backbone: Option<BackboneKind>,

    /// Saved extractor weights to load before freezing
    #[arg(long)]
    pub backbone_weights: Option<String>,

    /// Images are resized to this many pixels square
    #[arg(long)]
    pub image_size: Option<usize>,

    /// Feature width the extractor produces
    #[arg(long)]
    pub image_features_dim: Option<usize>,

    #[arg(long)]
    pub embed_size: Option<usize>,

    /// LSTM hidden size
    #[arg(long)]
    pub hidden_size: Option<usize>,

    #[arg(long)]
    pub attention_dim: Option<usize>,

    #[arg(long)]
    pub dropout: Option<f64>,

    /// Vocabulary cap, reserved tokens included
    #[arg(long)]
    pub vocab_size: Option<usize>,

    #[arg(long)]
    pub min_word_freq: Option<usize>,

    /// Longest caption greedy decoding will produce
    #[arg(long)]
    pub caption_max_length: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    /// Learning rate multiplier applied after each epoch
    #[arg(long)]
    pub lr_decay: Option<f64>,

    /// Gradient norm limit
    #[arg(long)]
    pub grad_clip: Option<f64>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// Save a checkpoint every N epochs
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Share of images used for training
    #[arg(long)]
    pub train_fraction: Option<f64>,

    /// Train on only the first caption of each image
    #[arg(long)]
    pub first_caption_only: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Data loader worker threads
    #[arg(long)]
    pub num_workers: Option<usize>,

    /// Log a prediction preview every N batches
    #[arg(long)]
    pub log_every: Option<usize>,

    /// Test images captioned for BLEU after each epoch (0 disables)
    #[arg(long)]
    pub eval_images: Option<usize>,
}

impl TrainArgs {
    /// Effective config: defaults, then `--config`, then flags.
    pub fn resolve(self) -> Result<TrainConfig> {
        let base = match &self.config {
            Some(path) => TrainConfig::from_json_file(&path.display().to_string())?,
            None       => TrainConfig::default(),
        };
        Ok(self.apply(base))
    }

    /// Overlay every flag that was given onto `cfg`.
    pub fn apply(self, mut cfg: TrainConfig) -> TrainConfig {
        let args = self;
        macro_rules! overlay {
            ($src:ident => $dst:ident; $($arg:ident => $field:ident),* $(,)?) => {
                $(if let Some(v) = $src.$arg { $dst.$field = v; })*
            };
        }
        overlay!(
            args => cfg;
            data_dir           => data_dir,
            checkpoint_dir     => checkpoint_dir,
            device             => device,
            backbone           => backbone,
            image_size         => image_size,
            image_features_dim => image_features_dim,
            embed_size         => embed_size,
            hidden_size        => hidden_size,
            attention_dim      => attention_dim,
            dropout            => dropout,
            vocab_size         => vocab_size,
            min_word_freq      => min_word_freq,
            caption_max_length => caption_max_length,
            batch_size         => batch_size,
            lr                 => learning_rate,
            lr_decay           => lr_decay,
            grad_clip          => grad_clip,
            epochs             => epochs,
            checkpoint_every   => checkpoint_every,
            train_fraction     => train_fraction,
            seed               => seed,
            num_workers        => num_workers,
            log_every          => log_every,
            eval_images        => eval_images,
        );
        if args.backbone_weights.is_some() {
            cfg.backbone_weights = args.backbone_weights;
        }
        if args.first_caption_only {
            cfg.all_captions = false;
        }
        cfg
    }
}

/// All arguments for the `caption` command
#[derive(Args, Debug)]
pub struct CaptionArgs {
    /// Image file to caption
    #[arg(long)]
    pub image: PathBuf,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Checkpoint epoch to use (latest if omitted)
    #[arg(long)]
    pub epoch: Option<usize>,

    #[arg(long, value_enum, default_value = "wgpu")]
    pub device: DeviceKind,

    /// Also print the most attended image region for each word
    #[arg(long)]
    pub show_attention: bool,
}

impl From<&CaptionArgs> for CaptionRequest {
    fn from(a: &CaptionArgs) -> Self {
        CaptionRequest {
            image:          a.image.clone(),
            checkpoint_dir: a.checkpoint_dir.clone(),
            epoch:          a.epoch,
            device:         a.device,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_args(argv: &[&str]) -> TrainArgs {
        let mut full = vec!["image-captioner", "train"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Train(args) => args,
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_no_flags_keeps_defaults() {
        let cfg = train_args(&[]).resolve().unwrap();
        assert_eq!(cfg, TrainConfig::default());
    }

    #[test]
    fn test_flags_override_only_their_field() {
        let cfg = train_args(&["--epochs", "3", "--lr", "0.01", "--backbone", "patch", "--device", "cpu"])
            .resolve()
            .unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.learning_rate, 0.01);
        assert_eq!(cfg.backbone, BackboneKind::Patch);
        assert_eq!(cfg.device, DeviceKind::Cpu);
        assert_eq!(cfg.batch_size, TrainConfig::default().batch_size);
        assert!(cfg.all_captions);
    }

    #[test]
    fn test_flags_win_over_config_file() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(&path, r#"{ "epochs": 20, "batch_size": 4 }"#).unwrap();

        let cfg = train_args(&["--config", path.to_str().unwrap(), "--epochs", "2", "--first-caption-only"])
            .resolve()
            .unwrap();
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.batch_size, 4);
        assert!(!cfg.all_captions);
    }

    #[test]
    fn test_caption_args_parse() {
        let cli = Cli::try_parse_from([
            "image-captioner", "caption", "--image", "dog.jpg", "--epoch", "5", "--device", "cpu",
        ])
        .unwrap();
        let Commands::Caption(args) = cli.command else { panic!("expected caption") };
        let req = CaptionRequest::from(&args);
        assert_eq!(req.image, PathBuf::from("dog.jpg"));
        assert_eq!(req.checkpoint_dir, PathBuf::from("checkpoints"));
        assert_eq!(req.epoch, Some(5));
        assert_eq!(req.device, DeviceKind::Cpu);
        assert!(!args.show_attention);
    }

    #[test]
    fn test_caption_requires_image() {
        assert!(Cli::try_parse_from(["image-captioner", "caption"]).is_err());
    }
}
