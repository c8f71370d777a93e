// ============================================================
// Layer 5 - Caption Loss
// ============================================================
// Cross-entropy with the teacher-forcing offset and padding masked
// out.
//
// The decoder sees the whole caption, so its output at position t
// was produced after reading tokens 0..=t. It is therefore graded
// against token t+1:
//
//   caption:     <START>  a    b    <END>  <PAD>
//   logits at:      0     1    2      3      (4 dropped)
//   targets at:           1    2      3      4
//
// Positions whose target is <PAD> contribute nothing, and the sum
// is divided by the number of real targets only:
//
//   loss = - Σ_{target ≠ pad} log softmax(logits)[target] / #(target ≠ pad)

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::domain::error::CaptionError;

/// Align logits with their targets.
///
/// logits `[B, T, V]`, captions `[B, T]` →
/// (predictions `[B*(T-1), V]` from steps 0..T-1, targets `[B*(T-1)]` from steps 1..T)
pub fn teacher_forcing_pairs<B: Backend>(
    logits:   Tensor<B, 3>,
    captions: Tensor<B, 2, Int>,
) -> Result<(Tensor<B, 2>, Tensor<B, 1, Int>), CaptionError> {
    let [batch, steps, vocab] = logits.dims();
    let [caption_batch, caption_len] = captions.dims();
    if batch != caption_batch || steps != caption_len {
        return Err(CaptionError::shape(format!(
            "logits cover [{batch}, {steps}] but captions are [{caption_batch}, {caption_len}]"
        )));
    }
    if steps < 2 {
        return Err(CaptionError::shape(format!(
            "captions of length {steps} leave nothing to predict"
        )));
    }

    let n = batch * (steps - 1);
    let predictions = logits.narrow(1, 0, steps - 1).reshape([n, vocab]);
    let targets     = captions.narrow(1, 1, steps - 1).reshape([n]);
    Ok((predictions, targets))
}

/// Mean negative log-likelihood over targets that are not `pad_id`.
///
/// logits `[N, V]`, targets `[N]` → scalar `[1]`
pub fn masked_cross_entropy<B: Backend>(
    logits:  Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    pad_id:  u32,
) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let picked = log_softmax(logits, 1)
        .gather(1, targets.clone().reshape([n, 1]))
        .reshape([n]);

    let is_pad = targets.equal_elem(pad_id as i64);
    let real   = is_pad.clone().bool_not().float().sum().clamp_min(1.0);

    picked.mask_fill(is_pad, 0.0).sum().neg() / real
}

/// Teacher-forced, pad-masked loss for one batch.
pub fn caption_loss<B: Backend>(
    logits:   Tensor<B, 3>,
    captions: Tensor<B, 2, Int>,
    pad_id:   u32,
) -> Result<Tensor<B, 1>, CaptionError> {
    let (predictions, targets) = teacher_forcing_pairs(logits, captions)?;
    Ok(masked_cross_entropy(predictions, targets, pad_id))
}
