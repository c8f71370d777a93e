// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Orchestrates the other layers for one user-facing goal each.
//
// Rules for this layer:
//   - No tensor code here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - Only workflow coordination and backend selection

/// The training workflow and its configuration
pub mod train_use_case;

/// Captioning a single image with a trained checkpoint
pub mod caption_use_case;
