// ============================================================
// Layer 3 - Core Error Taxonomy
// ============================================================
// Every failure the training/inference core can raise.
//
//   (a) preconditions   → UngroupedDataset, MissingReservedToken,
//                          InvalidConfig, MissingImages
//   (b) shape problems  → Shape, EmptyBatch, IncompleteEpoch
//   (c) numerics        → NonFiniteLoss
//   (d) checkpoint I/O  → CheckpointExists (recorder errors travel
//                          through anyhow with context)
//
// None of these are retried. The application layer wraps them in
// anyhow and the CLI prints the chain.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("dataset has {len} entries, which is not a multiple of the caption group size {group}")]
    UngroupedDataset { len: usize, group: usize },

    #[error("vocabulary has no entry for the reserved token {0}")]
    MissingReservedToken(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{missing} of {total} caption images are missing, first: '{}'", first.display())]
    MissingImages { missing: usize, total: usize, first: PathBuf },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("cannot collate an empty batch")]
    EmptyBatch,

    #[error("loss became {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f64 },

    #[error("epoch {epoch} consumed {seen} of {expected} training samples")]
    IncompleteEpoch { epoch: usize, seen: usize, expected: usize },

    #[error("checkpoint for epoch {epoch} already exists at '{}'", path.display())]
    CheckpointExists { epoch: usize, path: PathBuf },
}

impl CaptionError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let e = CaptionError::UngroupedDataset { len: 12, group: 5 };
        assert!(e.to_string().contains("12"));

        let e = CaptionError::MissingReservedToken("<END>");
        assert!(e.to_string().contains("<END>"));

        let e = CaptionError::CheckpointExists { epoch: 5, path: PathBuf::from("ckpt/epoch_5") };
        assert!(e.to_string().contains("ckpt/epoch_5"));

        let e = CaptionError::MissingImages { missing: 2, total: 9, first: PathBuf::from("Images/a.jpg") };
        assert!(e.to_string().contains("2 of 9"));
        assert!(e.to_string().contains("Images/a.jpg"));
    }
}
