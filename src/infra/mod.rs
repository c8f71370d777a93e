// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Everything that touches the checkpoint directory on disk:
//
//   checkpoint.rs  - full precision epoch checkpoints through
//                    Burn's recorder, plus train_config.json so
//                    inference can rebuild the architecture
//
//   vocab_store.rs - tokenizer.json, written once per training
//                    run and read back for inference
//
//   metrics.rs     - metrics.csv and examples.csv, appended
//                    after every epoch
//
// The other layers hand these types plain values; none of them
// builds a path inside the checkpoint directory itself.

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Vocabulary persistence
pub mod vocab_store;

/// Training metrics CSV sink
pub mod metrics;
