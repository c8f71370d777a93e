// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from a dataset directory on disk to tensor batches.
//
//   captions.txt + Images/
//       │
//       ▼
//   Flickr8kLoader    → (image_id, caption) records, grouped by 5
//       │
//       ▼
//   Preprocessor      → lowercase, strip punctuation
//       │
//       ▼
//   Vocabulary        → <START> ids... <END>
//       │
//       ▼
//   CaptionDataset    → Burn Dataset, images decoded on demand
//       │
//       ▼
//   split_subsets     → train / test indices, whole groups only
//       │
//       ▼
//   CaptionBatcher    → stacked images + per-batch padded captions
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop

/// Reads captions.txt and checks the 5-captions-per-image layout
pub mod loader;

/// Normalises caption text before tokenisation
pub mod preprocessor;

/// Decodes, resizes and normalises image files
pub mod image;

/// Word-level vocabulary with reserved <PAD>/<START>/<END>/<UNK>
pub mod vocabulary;

/// Implements Burn's Dataset trait for (image, caption) entries
pub mod dataset;

/// Implements Burn's Batcher trait with per-batch padding
pub mod batcher;

/// Group-preserving train/test split
pub mod splitter;
