// ============================================================
// Layer 5 - Attention LSTM Decoder
// ============================================================
// Generates one vocabulary distribution per caption position.
// At every step the decoder looks at the image again through
// the attention module, gates the context, and feeds
// [word embedding ; gated context] into an LSTM cell:
//
//   h0, c0 = init_hidden(mean of image features)
//   for t:
//       ctx      = attention(features, h)
//       ctx      = sigmoid(W_beta h) * ctx
//       h, c     = lstm([embed(token_t) ; ctx], (h, c))
//       logits_t = fc(dropout(h))
//
// Two entry points:
//   forward  teacher forcing, tokens come from the ground truth,
//            features sequence-first [positions, batch, feature_dim]
//   step     one token in, one distribution out, for greedy decoding,
//            features already batch-first [batch, positions, feature_dim]

use burn::{
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, tanh},
};

use crate::domain::error::CaptionError;
use crate::ml::attention::{Attention, AttentionConfig};
use crate::ml::clip::ParamIds;

#[derive(Config, Debug)]
pub struct DecoderConfig {
    pub feature_dim:   usize,
    pub embed_size:    usize,
    pub hidden_size:   usize,
    pub attention_dim: usize,
    pub vocab_size:    usize,
    #[config(default = 0.5)]
    pub dropout:       f64,
}

impl DecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionDecoder<B> {
        let gate_width = 4 * self.hidden_size;
        AttentionDecoder {
            embedding:    EmbeddingConfig::new(self.vocab_size, self.embed_size).init(device),
            attention:    AttentionConfig::new(self.feature_dim, self.hidden_size, self.attention_dim)
                .init(device),
            init_h:       LinearConfig::new(self.feature_dim, self.hidden_size).init(device),
            init_c:       LinearConfig::new(self.feature_dim, self.hidden_size).init(device),
            context_gate: LinearConfig::new(self.hidden_size, self.feature_dim).init(device),
            input_gates:  LinearConfig::new(self.embed_size + self.feature_dim, gate_width).init(device),
            hidden_gates: LinearConfig::new(self.hidden_size, gate_width)
                .with_bias(false)
                .init(device),
            dropout:      DropoutConfig::new(self.dropout).init(),
            output:       LinearConfig::new(self.hidden_size, self.vocab_size).init(device),
            feature_dim:  self.feature_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct AttentionDecoder<B: Backend> {
    embedding:    Embedding<B>,
    attention:    Attention<B>,
    init_h:       Linear<B>,
    init_c:       Linear<B>,
    context_gate: Linear<B>,
    input_gates:  Linear<B>,
    hidden_gates: Linear<B>,
    dropout:      Dropout,
    output:       Linear<B>,
    feature_dim:  usize,
}

/// LSTM hidden and cell state, `[batch, hidden_size]` each.
#[derive(Debug, Clone)]
pub struct DecoderState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell:   Tensor<B, 2>,
}

/// Result of decoding a single position.
#[derive(Debug, Clone)]
pub struct DecoderStep<B: Backend> {
    /// `[batch, vocab_size]`
    pub logits:    Tensor<B, 2>,
    pub state:     DecoderState<B>,
    /// `[batch, positions]`
    pub attention: Tensor<B, 2>,
}

impl<B: Backend> AttentionDecoder<B> {
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Initial LSTM state from the mean feature vector of each image.
    pub fn init_hidden(&self, features: &Tensor<B, 3>) -> DecoderState<B> {
        let [_, batch, feature_dim] = features.dims();
        let mean = features.clone().mean_dim(0).reshape([batch, feature_dim]);
        DecoderState {
            hidden: self.init_h.forward(mean.clone()),
            cell:   self.init_c.forward(mean),
        }
    }

    /// Decode one position for every image in the batch.
    ///
    /// features: `[batch, positions, feature_dim]`, token: `[batch]`.
    /// Callers looping over steps swap the extractor output once up
    /// front instead of once per word.
    pub fn step(
        &self,
        features: &Tensor<B, 3>,
        token:    Tensor<B, 1, Int>,
        state:    DecoderState<B>,
    ) -> Result<DecoderStep<B>, CaptionError> {
        self.check_features(features)?;
        let [batch] = token.dims();
        let [feature_batch, _, _] = features.dims();
        if feature_batch != batch {
            return Err(CaptionError::shape(format!(
                "features are for {feature_batch} images but {batch} tokens were given"
            )));
        }
        let embedded = self.embedding.forward(token.reshape([batch, 1]));
        let [_, _, embed_size] = embedded.dims();

        Ok(self.step_embedded(features, embedded.reshape([batch, embed_size]), state))
    }

    /// Every tensor the optimizer updates.
    pub fn trainable_params(&self) -> ParamIds {
        let mut ids = ParamIds::default();
        ids.embedding(&self.embedding);
        self.attention.collect_params(&mut ids);
        for layer in [
            &self.init_h,
            &self.init_c,
            &self.context_gate,
            &self.input_gates,
            &self.hidden_gates,
            &self.output,
        ] {
            ids.linear(layer);
        }
        ids
    }

    /// Teacher-forced pass over a whole caption batch.
    ///
    /// features: `[positions, batch, feature_dim]`, tokens: `[batch, seq_len]`
    /// returns logits `[batch, seq_len, vocab_size]`
    pub fn forward(
        &self,
        features: Tensor<B, 3>,
        tokens:   Tensor<B, 2, Int>,
    ) -> Result<Tensor<B, 3>, CaptionError> {
        self.check_features(&features)?;
        let [_, feature_batch, _] = features.dims();
        let [batch, seq_len] = tokens.dims();
        if feature_batch != batch {
            return Err(CaptionError::shape(format!(
                "features are for {feature_batch} images but captions for {batch}"
            )));
        }

        let mut state    = self.init_hidden(&features);
        let batch_first  = features.swap_dims(0, 1);
        let embedded     = self.embedding.forward(tokens);
        let [_, _, embed_size] = embedded.dims();

        let mut logits = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let word = embedded.clone().narrow(1, t, 1).reshape([batch, embed_size]);
            let out  = self.step_embedded(&batch_first, word, state);
            logits.push(out.logits);
            state = out.state;
        }
        Ok(Tensor::stack(logits, 1))
    }

    fn step_embedded(
        &self,
        features: &Tensor<B, 3>,
        word:     Tensor<B, 2>,
        state:    DecoderState<B>,
    ) -> DecoderStep<B> {
        let read    = self.attention.forward(features.clone(), state.hidden.clone());
        let gate    = sigmoid(self.context_gate.forward(state.hidden.clone()));
        let context = gate * read.context;

        let input = Tensor::cat(vec![word, context], 1);
        let gates = self.input_gates.forward(input) + self.hidden_gates.forward(state.hidden);

        // Gate order: input, forget, candidate, output
        let [_, width] = gates.dims();
        let h = width / 4;
        let i = gates.clone().narrow(1, 0, h);
        let f = gates.clone().narrow(1, h, h);
        let g = gates.clone().narrow(1, 2 * h, h);
        let o = gates.narrow(1, 3 * h, h);

        let cell   = sigmoid(f) * state.cell + sigmoid(i) * tanh(g);
        let hidden = sigmoid(o) * tanh(cell.clone());
        let logits = self.output.forward(self.dropout.forward(hidden.clone()));

        DecoderStep {
            logits,
            state: DecoderState { hidden, cell },
            attention: read.weights,
        }
    }

    /// Make every step predict `token` regardless of input.
    #[cfg(test)]
    pub(crate) fn always_predict(mut self, token: usize) -> Self {
        use burn::module::Param;

        let [hidden, vocab] = self.output.weight.dims();
        let device = self.output.weight.device();
        let mut bias = vec![0.0f32; vocab];
        bias[token] = 100.0;
        self.output.weight = Param::from_tensor(Tensor::zeros([hidden, vocab], &device));
        self.output.bias   = Some(Param::from_tensor(Tensor::from_data(
            burn::tensor::TensorData::new(bias, [vocab]),
            &device,
        )));
        self
    }

    fn check_features(&self, features: &Tensor<B, 3>) -> Result<(), CaptionError> {
        let [_, _, feature_dim] = features.dims();
        if feature_dim != self.feature_dim {
            return Err(CaptionError::shape(format!(
                "decoder expects {}-d image features, extractor produced {}-d",
                self.feature_dim, feature_dim
            )));
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray;

    fn decoder(device: &<TestBackend as Backend>::Device) -> AttentionDecoder<TestBackend> {
        DecoderConfig::new(6, 4, 5, 3, 11).with_dropout(0.0).init(device)
    }

    #[test]
    fn test_forward_emits_one_distribution_per_position() {
        let device   = Default::default();
        let dec      = decoder(&device);
        let features = Tensor::<TestBackend, 3>::random([9, 2, 6], Distribution::Default, &device);
        let tokens   = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::new(vec![1i64, 4, 5, 2, 0, 1, 7, 2, 0, 0], [2, 5]),
            &device,
        );

        let logits = dec.forward(features, tokens).unwrap();
        assert_eq!(logits.dims(), [2, 5, 11]);
    }

    #[test]
    fn test_step_matches_forward_at_first_position() {
        let device   = Default::default();
        let dec      = decoder(&device);
        let features = Tensor::<TestBackend, 3>::random([4, 1, 6], Distribution::Default, &device);
        let tokens   = Tensor::<TestBackend, 2, Int>::from_data(TensorData::new(vec![1i64, 3], [1, 2]), &device);

        let full: Vec<f32> = dec
            .forward(features.clone(), tokens)
            .unwrap()
            .narrow(1, 0, 1)
            .into_data()
            .iter::<f32>()
            .collect();

        let state = dec.init_hidden(&features);
        let start = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![1i64], [1]), &device);
        let step  = dec.step(&features.swap_dims(0, 1), start, state).unwrap();
        assert_eq!(step.attention.dims(), [1, 4]);

        let one: Vec<f32> = step.logits.into_data().iter::<f32>().collect();
        for (a, b) in full.iter().zip(&one) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wrong_feature_width_is_a_shape_error() {
        let device   = Default::default();
        let dec      = decoder(&device);
        let features = Tensor::<TestBackend, 3>::zeros([4, 1, 7], &device);
        let tokens   = Tensor::<TestBackend, 2, Int>::zeros([1, 3], &device);
        assert!(matches!(dec.forward(features, tokens), Err(CaptionError::Shape(_))));
    }

    #[test]
    fn test_step_takes_batch_first_features() {
        let device = Default::default();
        let dec    = decoder(&device);
        // 3 images, 4 positions each
        let features = Tensor::<TestBackend, 3>::random([3, 4, 6], Distribution::Default, &device);
        let state    = dec.init_hidden(&features.clone().swap_dims(0, 1));
        let tokens   = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![1i64, 1, 1], [3]), &device);

        let step = dec.step(&features, tokens, state).unwrap();
        assert_eq!(step.attention.dims(), [3, 4]);
        assert_eq!(step.logits.dims(), [3, 11]);

        // the sequence-first layout is rejected rather than misread
        let one = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![1i64], [1]), &device);
        let seq_first = Tensor::<TestBackend, 3>::random([4, 1, 6], Distribution::Default, &device);
        let state     = dec.init_hidden(&seq_first);
        assert!(matches!(dec.step(&seq_first, one, state), Err(CaptionError::Shape(_))));
    }
}
