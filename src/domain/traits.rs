// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The training pipeline talks to its collaborators through these
// traits so a different dataset layout or metrics backend can be
// plugged in without touching the training loop.
//
//   - Flickr8kLoader   implements CaptionSource
//   - CsvMetricsSink   implements MetricsSink
//   - NullMetricsSink  implements MetricsSink (no output)

use anyhow::Result;

use crate::domain::caption::{CaptionExample, CaptionRecord};

// ─── CaptionSource ────────────────────────────────────────────────────────────
/// Anything that can list the (image, caption) entries of a dataset.
///
/// Entries must come back grouped: all captions of one image are
/// contiguous, `GROUP_SIZE` per image.
pub trait CaptionSource {
    fn load_records(&self) -> Result<Vec<CaptionRecord>>;
}

// ─── MetricsSink ──────────────────────────────────────────────────────────────
/// Observational output for training progress.
/// Nothing written here feeds back into training.
pub trait MetricsSink {
    /// Mean training loss for an epoch
    fn record_loss(&mut self, epoch: usize, loss: f64) -> Result<()>;

    /// Secondary quality metric (corpus BLEU-4) for an epoch
    fn record_bleu(&mut self, epoch: usize, bleu: f64) -> Result<()>;

    /// A generated caption next to its reference
    fn record_example(&mut self, epoch: usize, example: &CaptionExample) -> Result<()>;
}

/// Sink that drops everything. Used when no output directory is wanted.
#[derive(Debug, Default)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record_loss(&mut self, _epoch: usize, _loss: f64) -> Result<()> {
        Ok(())
    }

    fn record_bleu(&mut self, _epoch: usize, _bleu: f64) -> Result<()> {
        Ok(())
    }

    fn record_example(&mut self, _epoch: usize, _example: &CaptionExample) -> Result<()> {
        Ok(())
    }
}
