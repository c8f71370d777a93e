// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust types shared by every other layer.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only structs, enums, traits and the error taxonomy
//
// Anything that needs a tensor lives in Layer 4 (data) or
// Layer 5 (ml) and converts from these types at the boundary.

// Caption records, caption groups and generated examples
pub mod caption;

// Typed error enum for the training and inference core
pub mod error;

// Seams implemented by the data and infra layers
pub mod traits;
