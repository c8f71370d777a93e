// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here.
//
//   encoder.rs    - frozen convolutional feature extractor
//                   (VGG-style stack or 16x16 patch embedding)
//                   turning an image into a grid of feature vectors
//
//   attention.rs  - additive (Bahdanau) attention over that grid
//
//   decoder.rs    - LSTM caption decoder, one attention step per
//                   generated word
//
//   model.rs      - encoder + decoder, teacher-forced forward pass
//                   and greedy decoding
//
//   loss.rs       - shifted, padding-masked cross entropy
//
//   clip.rs       - global L2 norm clipping of decoder gradients
//
//   scheduler.rs  - per-epoch exponential learning rate decay
//
//   evaluator.rs  - corpus BLEU-4 over held-out images
//
//   trainer.rs    - the epoch loop: optimise, evaluate, checkpoint
//
//   inferencer.rs - restore a checkpoint and caption new images
//
// Reference: Xu et al. (2015) Show, Attend and Tell
//            Bahdanau et al. (2015) Neural Machine Translation by
//            Jointly Learning to Align and Translate

pub mod encoder;
pub mod attention;
pub mod decoder;

/// Encoder-decoder captioning model
pub mod model;

pub mod loss;
pub mod clip;
pub mod scheduler;
pub mod evaluator;

/// Full training loop with evaluation and checkpointing
pub mod trainer;

/// Inference engine: loads a checkpoint and captions images
pub mod inferencer;
