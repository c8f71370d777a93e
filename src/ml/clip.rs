// ============================================================
// Layer 5 - Global Gradient Norm Clipping
// ============================================================
// Scales the decoder's gradients together so that their joint
// L2 norm never exceeds `max_norm`:
//
//   norm = sqrt(Σ_p ||g_p||²)
//   if norm > max_norm:  g_p *= max_norm / norm   for every p
//
// All gradients share one coefficient, so the update keeps its
// direction. Only the decoder is listed; the frozen extractor has
// no gradients to clip.

use burn::{
    module::ParamId,
    nn::{Embedding, Linear},
    optim::GradientsParams,
    prelude::*,
};

/// Ids of the trainable tensors, grouped by rank.
#[derive(Debug, Clone, Default)]
pub struct ParamIds {
    matrices: Vec<ParamId>,
    vectors:  Vec<ParamId>,
}

impl ParamIds {
    pub fn linear<B: Backend>(&mut self, layer: &Linear<B>) {
        self.matrices.push(layer.weight.id);
        if let Some(bias) = &layer.bias {
            self.vectors.push(bias.id);
        }
    }

    pub fn embedding<B: Backend>(&mut self, layer: &Embedding<B>) {
        self.matrices.push(layer.weight.id);
    }

    pub fn len(&self) -> usize {
        self.matrices.len() + self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Joint L2 norm of every listed gradient present in `grads`.
///
/// `B` is the backend the gradients live on, the inner backend
/// when they come from an autodiff pass.
pub fn global_norm<B: Backend>(grads: &GradientsParams, params: &ParamIds) -> f64 {
    let matrices = params
        .matrices
        .iter()
        .filter_map(|&id| grads.get::<B, 2>(id))
        .map(|g| squared_sum(g.flatten::<1>(0, 1)));
    let vectors = params
        .vectors
        .iter()
        .filter_map(|&id| grads.get::<B, 1>(id))
        .map(squared_sum);

    matrices.chain(vectors).sum::<f64>().sqrt()
}

/// Rescale the listed gradients so their joint norm is at most
/// `max_norm`. Returns the norm measured before clipping.
pub fn clip_global_norm<B: Backend>(
    grads:    &mut GradientsParams,
    params:   &ParamIds,
    max_norm: f64,
) -> f64 {
    let norm = global_norm::<B>(grads, params);
    if norm <= max_norm || !norm.is_finite() {
        return norm;
    }

    let scale = max_norm / norm;
    for &id in &params.matrices {
        if let Some(g) = grads.remove::<B, 2>(id) {
            grads.register::<B, 2>(id, g.mul_scalar(scale));
        }
    }
    for &id in &params.vectors {
        if let Some(g) = grads.remove::<B, 1>(id) {
            grads.register::<B, 1>(id, g.mul_scalar(scale));
        }
    }
    norm
}

fn squared_sum<B: Backend>(g: Tensor<B, 1>) -> f64 {
    g.powf_scalar(2.0).sum().into_scalar().elem::<f64>()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::vocabulary::tests::sample_vocab;
    use crate::ml::loss::caption_loss;
    use crate::ml::model::tests::tiny_config;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type TestBackend = Autodiff<NdArray>;

    /// Decoder gradients of a loss blown up by `factor`.
    fn scaled_grads(factor: f64) -> (GradientsParams, ParamIds) {
        let device = Default::default();
        let vocab  = sample_vocab();
        let model  = tiny_config(&vocab, 5).init::<TestBackend>(&vocab, &device).unwrap();

        let images   = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let captions = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::new(vec![1i64, 4, 5, 2, 1, 5, 4, 2], [2, 4]),
            &device,
        );
        let logits = model.forward(images, captions.clone()).unwrap();
        let loss   = caption_loss(logits, captions, model.pad_id()).unwrap().mul_scalar(factor);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        (grads, model.decoder().trainable_params())
    }

    #[test]
    fn test_every_decoder_tensor_is_listed() {
        let (grads, params) = scaled_grads(1.0);
        // embedding, 3 attention layers, init_h, init_c, context gate,
        // input gates, hidden gates (no bias), output
        assert_eq!(params.len(), 1 + 6 + 2 * 2 + 2 + 2 + 1 + 2);
        assert!(global_norm::<NdArray>(&grads, &params) > 0.0);
    }

    #[test]
    fn test_large_gradients_are_scaled_to_the_limit_jointly() {
        let (mut grads, params) = scaled_grads(1000.0);
        let before = global_norm::<NdArray>(&grads, &params);
        assert!(before > 5.0, "gradient norm {before} too small to clip");

        let reported = clip_global_norm::<NdArray>(&mut grads, &params, 5.0);
        let after    = global_norm::<NdArray>(&grads, &params);

        assert!((reported - before).abs() < 1e-9 * before.max(1.0));
        assert!((after - 5.0).abs() < 1e-3, "clipped norm is {after}");
    }

    #[test]
    fn test_small_gradients_are_left_alone() {
        let (mut grads, params) = scaled_grads(1.0);
        let before = global_norm::<NdArray>(&grads, &params);

        clip_global_norm::<NdArray>(&mut grads, &params, before * 2.0);
        let after = global_norm::<NdArray>(&grads, &params);
        assert!((after - before).abs() < 1e-9 * before.max(1.0));
    }
}
