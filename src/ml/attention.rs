// ============================================================
// Layer 5 - Additive Attention
// ============================================================
// Scores every spatial feature vector against the decoder's
// current hidden state and returns a weighted summary:
//
//   e_p   = w · relu(W_f f_p + W_h h)      one score per position
//   alpha = softmax(e)                      weights sum to 1
//   ctx   = Σ_p alpha_p f_p                 [batch, feature_dim]
//
// alpha is kept for attention-map visualisation at inference time.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::activation::{relu, softmax},
};

use crate::ml::clip::ParamIds;

#[derive(Config, Debug)]
pub struct AttentionConfig {
    pub feature_dim:   usize,
    pub hidden_size:   usize,
    pub attention_dim: usize,
}

impl AttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Attention<B> {
        Attention {
            feature_proj: LinearConfig::new(self.feature_dim, self.attention_dim).init(device),
            hidden_proj:  LinearConfig::new(self.hidden_size, self.attention_dim).init(device),
            score:        LinearConfig::new(self.attention_dim, 1).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    feature_proj: Linear<B>,
    hidden_proj:  Linear<B>,
    score:        Linear<B>,
}

/// Output of one attention read.
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    /// `[batch, positions]`, each row sums to 1
    pub weights: Tensor<B, 2>,
    /// `[batch, feature_dim]`
    pub context: Tensor<B, 2>,
}

impl<B: Backend> Attention<B> {
    /// features: `[batch, positions, feature_dim]`, hidden: `[batch, hidden_size]`
    pub fn forward(&self, features: Tensor<B, 3>, hidden: Tensor<B, 2>) -> AttentionOutput<B> {
        let [batch, positions, feature_dim] = features.dims();

        let from_features = self.feature_proj.forward(features.clone());
        let from_hidden   = self.hidden_proj.forward(hidden).unsqueeze_dim::<3>(1);
        let scores = self
            .score
            .forward(relu(from_features + from_hidden))
            .reshape([batch, positions]);

        let weights = softmax(scores, 1);
        let context = (features * weights.clone().unsqueeze_dim::<3>(2))
            .sum_dim(1)
            .reshape([batch, feature_dim]);

        AttentionOutput { weights, context }
    }

    pub fn collect_params(&self, ids: &mut ParamIds) {
        ids.linear(&self.feature_proj);
        ids.linear(&self.hidden_proj);
        ids.linear(&self.score);
    }
}
