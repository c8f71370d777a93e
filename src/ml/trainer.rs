// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Epoch loop using Burn's DataLoader and Adam.
//
// Per batch:
//   1. logits = model.forward(images, captions)      teacher forcing
//   2. loss   = CE(logits[:, :-1], captions[:, 1:])  pad positions ignored
//   3. non-finite loss → abort with NonFiniteLoss
//   4. backward, clip the decoder gradients to a joint L2 norm of
//      grad_clip, Adam step at the current lr
//
// Per epoch:
//   - every training sample must have been seen (IncompleteEpoch otherwise)
//   - lr *= lr_decay
//   - mean loss, and BLEU-4 on a few test images, go to the metrics sink
//   - checkpoint when epoch % checkpoint_every == 0
//
// Burn builds a fresh autodiff graph for every forward pass, so
// there is no gradient buffer to zero between batches. The frozen
// extractor has no-grad parameters, so `GradientsParams` only ever
// holds decoder gradients.
//
// Key Burn 0.20 insight:
//   - Training uses an Autodiff backend for gradients
//   - model.valid() returns the model on the inner backend with
//     dropout disabled, which is what evaluation needs

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{CaptionBatch, CaptionBatcher},
    dataset::CaptionItem,
    vocabulary::Vocabulary,
};
use crate::domain::{error::CaptionError, traits::MetricsSink};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    clip::clip_global_norm,
    evaluator::evaluate,
    loss::caption_loss,
    model::CaptionModel,
    scheduler::{EpochDecay, LrScheduler},
};

/// What one epoch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch:   usize,
    pub lr:      f64,
    pub loss:    f64,
    pub bleu:    Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs:      Vec<EpochSummary>,
    /// Epoch numbers that were written to disk
    pub checkpoints: Vec<usize>,
}

/// Train `model` for `cfg.epochs` epochs and return it with a summary.
#[allow(clippy::too_many_arguments)]
pub fn train<B, D, T>(
    cfg:         &TrainConfig,
    mut model:   CaptionModel<B>,
    train_set:   D,
    test_set:    &T,
    vocab:       &Vocabulary,
    checkpoints: &CheckpointManager,
    sink:        &mut dyn MetricsSink,
    device:      &B::Device,
) -> Result<(CaptionModel<B>, TrainingReport)>
where
    B: AutodiffBackend,
    D: Dataset<CaptionItem> + 'static,
    T: Dataset<CaptionItem> + ?Sized,
{
    let expected = train_set.len();
    if expected == 0 {
        return Err(CaptionError::config("training split is empty").into());
    }
    if cfg.eval_images > 0 && test_set.is_empty() {
        tracing::warn!("Test split is empty, BLEU will not be computed");
    }

    // ── Adam; clipping happens on the joint gradient before each step ────────
    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
    let trainable = model.decoder().trainable_params();
    let mut schedule = EpochDecay::new(cfg.learning_rate, cfg.lr_decay);

    let batcher = CaptionBatcher::<B>::new(vocab.pad_id());
    let loader  = DataLoaderBuilder::new(batcher)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .set_device(device.clone())
        .build(train_set);

    tracing::info!(
        "Training on {} captions for {} epochs (batch_size={}, lr={})",
        expected,
        cfg.epochs,
        cfg.batch_size,
        cfg.learning_rate
    );

    let mut report = TrainingReport::default();

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let lr = schedule.lr();
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;
        let mut seen     = 0usize;

        for batch in loader.iter() {
            batches += 1;
            seen    += batch.image_ids.len();

            let CaptionBatch { images, captions, .. } = batch;
            let logits = model.forward(images, captions.clone())?;

            if batches % cfg.log_every == 0 {
                log_preview(&logits, &captions, vocab, epoch, batches);
            }

            let loss  = caption_loss(logits, captions, model.pad_id())?;
            let value = finite_loss(loss.clone().into_scalar().elem::<f64>(), epoch, batches)?;
            loss_sum += value;
            tracing::debug!("epoch {epoch} batch {batches}: loss={value:.4}");

            let mut grads = GradientsParams::from_grads(loss.backward(), &model);
            let norm = clip_global_norm::<B::InnerBackend>(&mut grads, &trainable, cfg.grad_clip);
            if norm > cfg.grad_clip {
                tracing::trace!("epoch {epoch} batch {batches}: gradient norm {norm:.3} clipped");
            }
            model = optim.step(lr, model, grads);
        }

        if seen != expected {
            return Err(CaptionError::IncompleteEpoch { epoch, seen, expected }.into());
        }

        let mean_loss = loss_sum / batches as f64;
        schedule.step();
        sink.record_loss(epoch, mean_loss)?;

        // ── Evaluation on held-out images (inner backend, no dropout) ─────────
        let bleu = if cfg.eval_images > 0 && !test_set.is_empty() {
            let eval = evaluate(&model.valid(), test_set, vocab, cfg.eval_images, device)?;
            sink.record_bleu(epoch, eval.bleu)?;
            if let Some(example) = &eval.example {
                sink.record_example(epoch, example)?;
                tracing::info!(
                    "Example {}: '{}' (reference: '{}')",
                    example.image_id,
                    example.generated,
                    example.reference
                );
            }
            Some(eval.bleu)
        } else {
            None
        };

        tracing::info!(
            "Epoch {:>3}/{} | loss={:.4} | lr={:.2e} | bleu4={}",
            epoch,
            cfg.epochs,
            mean_loss,
            lr,
            bleu.map_or_else(|| "-".to_string(), |b| format!("{b:.4}")),
        );

        // ── Checkpoint ────────────────────────────────────────────────────────
        if epoch % cfg.checkpoint_every == 0 {
            let path = checkpoints.save(&model, epoch)?;
            tracing::info!("Checkpoint for epoch {} written to '{}'", epoch, path.display());
            report.checkpoints.push(epoch);
        }

        report.epochs.push(EpochSummary { epoch, lr, loss: mean_loss, bleu, samples: seen });
    }

    tracing::info!("Training complete!");
    Ok((model, report))
}

fn finite_loss(value: f64, epoch: usize, batch: usize) -> Result<f64, CaptionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CaptionError::NonFiniteLoss { epoch, batch, loss: value })
    }
}

/// Teacher-forced prediction for the first caption of the batch.
fn log_preview<B: Backend>(
    logits:   &Tensor<B, 3>,
    captions: &Tensor<B, 2, Int>,
    vocab:    &Vocabulary,
    epoch:    usize,
    batch:    usize,
) {
    let predicted: Vec<u32> = logits
        .clone()
        .narrow(0, 0, 1)
        .argmax(2)
        .into_data()
        .iter::<i64>()
        .map(|id| id as u32)
        .collect();
    let reference: Vec<u32> = captions
        .clone()
        .narrow(0, 0, 1)
        .into_data()
        .iter::<i64>()
        .map(|id| id as u32)
        .collect();

    tracing::debug!(
        "epoch {epoch} batch {batch} preview | predicted: '{}' | reference: '{}'",
        vocab.ids_to_text(&predicted),
        vocab.ids_to_text(&reference)
    );
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        dataset::{tests::synthetic_dataset, CaptionDataset, SubsetDataset},
        image::ImageLoader,
    };
    use crate::data::vocabulary::tests::sample_vocab;
    use crate::domain::caption::{CaptionRecord, GROUP_SIZE};
    use crate::domain::traits::NullMetricsSink;
    use crate::ml::encoder::ImageEncoder;
    use crate::ml::model::tests::tiny_config;
    use burn::backend::{Autodiff, NdArray};
    use std::sync::Arc;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_train_config(dir: &std::path::Path, epochs: usize) -> TrainConfig {
        TrainConfig {
            checkpoint_dir:   dir.to_string_lossy().into_owned(),
            epochs,
            batch_size:       4,
            learning_rate:    5e-3,
            checkpoint_every: 5,
            log_every:        2,
            eval_images:      0,
            num_workers:      1,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_twelve_epochs_checkpoint_at_five_and_ten() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = tiny_train_config(dir.path(), 12);
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();

        let model   = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();
        let data    = synthetic_dataset(4, 32);
        let test    = synthetic_dataset(1, 32);
        let (trained, report) =
            train(&cfg, model, data, &test, &vocab, &ckpts, &mut NullMetricsSink, &device).unwrap();

        assert_eq!(report.checkpoints, vec![5, 10]);
        assert_eq!(ckpts.saved_epochs().unwrap(), vec![5, 10]);
        assert_eq!(report.epochs.len(), 12);
        assert!(report.epochs.iter().all(|e| e.samples == 20));

        // Epoch 10 restores into a freshly built model
        let fresh = tiny_config(&vocab, 5).init::<NdArray>(&vocab, &device).unwrap();
        let (restored, epoch) = ckpts.load(fresh, Some(10), &device).unwrap();
        assert_eq!(epoch, 10);
        assert_eq!(trained.valid().decoder().num_params(), restored.decoder().num_params());
    }

    #[test]
    fn test_restored_checkpoint_matches_the_trained_model() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = tiny_train_config(dir.path(), 5);
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let (trained, report) =
            train(&cfg, model, synthetic_dataset(2, 32), &synthetic_dataset(1, 32), &vocab, &ckpts, &mut NullMetricsSink, &device)
                .unwrap();
        assert_eq!(report.checkpoints, vec![5]);

        let fresh = tiny_config(&vocab, 5).init::<NdArray>(&vocab, &device).unwrap();
        let (restored, _) = ckpts.load(fresh, None, &device).unwrap();

        let images = Tensor::<NdArray, 4>::ones([1, 3, 32, 32], &device);
        let tokens = Tensor::<NdArray, 2, Int>::from_data(
            burn::tensor::TensorData::new(vec![1i64, 4, 5, 2], [1, 4]),
            &device,
        );
        let a: Vec<f32> = trained.valid().forward(images.clone(), tokens.clone()).unwrap().into_data().iter::<f32>().collect();
        let b: Vec<f32> = restored.forward(images.clone(), tokens.clone()).unwrap().into_data().iter::<f32>().collect();
        assert_eq!(a, b);

        // and the restored weights are not the random ones of a fresh model
        let random = tiny_config(&vocab, 5).init::<NdArray>(&vocab, &device).unwrap();
        let r: Vec<f32> = random.forward(images, tokens).unwrap().into_data().iter::<f32>().collect();
        assert_ne!(a, r);
    }

    #[test]
    fn test_learning_rate_decays_per_epoch() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = TrainConfig { lr_decay: 0.5, ..tiny_train_config(dir.path(), 3) };
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();
        let data   = synthetic_dataset(2, 32);

        let (_, report) =
            train(&cfg, model, data, &synthetic_dataset(1, 32), &vocab, &ckpts, &mut NullMetricsSink, &device).unwrap();
        let lrs: Vec<f64> = report.epochs.iter().map(|e| e.lr).collect();
        assert_eq!(lrs, vec![5e-3, 2.5e-3, 1.25e-3]);
        assert!(report.checkpoints.is_empty());
    }

    #[test]
    fn test_extractor_is_frozen_and_decoder_learns() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = tiny_train_config(dir.path(), 2);
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let images = Tensor::<NdArray, 4>::ones([1, 3, 32, 32], &device);
        let tokens = Tensor::<NdArray, 2, Int>::from_data(
            burn::tensor::TensorData::new(vec![1i64, 4, 5, 2], [1, 4]),
            &device,
        );
        let before_features: Vec<f32> = model.valid().encoder().encode(images.clone()).into_data().iter::<f32>().collect();
        let before_logits: Vec<f32> = model.valid().forward(images.clone(), tokens.clone()).unwrap().into_data().iter::<f32>().collect();

        let (trained, _) =
            train(&cfg, model, synthetic_dataset(2, 32), &synthetic_dataset(1, 32), &vocab, &ckpts, &mut NullMetricsSink, &device)
                .unwrap();

        let trained = trained.valid();
        let after_features: Vec<f32> = trained.encoder().encode(images.clone()).into_data().iter::<f32>().collect();
        let after_logits: Vec<f32> = trained.forward(images, tokens).unwrap().into_data().iter::<f32>().collect();

        assert_eq!(before_features, after_features);
        assert_ne!(before_logits, after_logits);
    }

    #[test]
    fn test_loss_goes_down_on_a_tiny_dataset() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = TrainConfig { checkpoint_every: 100, ..tiny_train_config(dir.path(), 8) };
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let (_, report) =
            train(&cfg, model, synthetic_dataset(2, 32), &synthetic_dataset(1, 32), &vocab, &ckpts, &mut NullMetricsSink, &device)
                .unwrap();
        let first = report.epochs.first().unwrap().loss;
        let last  = report.epochs.last().unwrap().loss;
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn test_evaluation_runs_when_enabled() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = TrainConfig { eval_images: 2, ..tiny_train_config(dir.path(), 1) };
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let (_, report) =
            train(&cfg, model, synthetic_dataset(2, 32), &synthetic_dataset(3, 32), &vocab, &ckpts, &mut NullMetricsSink, &device)
                .unwrap();
        let bleu = report.epochs[0].bleu.unwrap();
        assert!((0.0..=1.0).contains(&bleu));
    }

    #[test]
    fn test_unreadable_images_abort_the_epoch() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let vocab  = sample_vocab();
        let cfg    = tiny_train_config(dir.path(), 1);
        let ckpts  = CheckpointManager::new(dir.path()).unwrap();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let images_dir = dir.path().join("Images");
        std::fs::create_dir_all(&images_dir).unwrap();
        std::fs::write(images_dir.join("corrupt.jpg"), b"not an image").unwrap();

        let records: Vec<_> = (0..GROUP_SIZE).map(|_| CaptionRecord::new("corrupt.jpg", "a dog")).collect();
        let data = CaptionDataset::from_files(
            &records,
            vec![vec![1, 4, 5, 2]; GROUP_SIZE],
            &images_dir,
            ImageLoader::new(32, [0.0; 3], [1.0; 3]),
        )
        .unwrap();
        let train_set = SubsetDataset::new(Arc::new(data), (0..GROUP_SIZE).collect());

        let err = train(&cfg, model, train_set, &synthetic_dataset(1, 32), &vocab, &ckpts, &mut NullMetricsSink, &device)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptionError>(),
            Some(CaptionError::IncompleteEpoch { epoch: 1, seen: 0, expected: 5 })
        ));
    }

    #[test]
    fn test_non_finite_loss_is_fatal() {
        assert!(finite_loss(1.5, 1, 1).is_ok());
        assert!(matches!(finite_loss(f64::NAN, 3, 7), Err(CaptionError::NonFiniteLoss { epoch: 3, batch: 7, .. })));
        assert!(finite_loss(f64::INFINITY, 1, 1).is_err());
    }
}
