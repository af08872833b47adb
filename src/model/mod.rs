/// Pointer-generator network.
pub mod pgn;

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use tch::nn::{self, RNN};
use tch::{Kind, Tensor};

use crate::data::Batch;
use crate::error::Result;

/// Pointer-generator network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgnConfig {
    /// The vocabulary size.
    pub vocab_size: i64,
    /// The word embedding size.
    pub embed_size: i64,
    /// Hidden units of each direction of the encoder GRU.
    pub enc_units: i64,
    /// Hidden units of the attention.
    pub attn_units: i64,
    /// Copy words from the source through the attention.
    pub pointer_gen: bool,
    /// Feed the coverage vector to the attention.
    pub is_coverage: bool,
}

impl PgnConfig {
    /// Hidden units of the decoder GRU; the decoder starts from the
    /// concatenated final encoder states.
    pub fn dec_units(&self) -> i64 {
        2 * self.enc_units
    }

    /// Size of the encoder outputs.
    pub fn enc_output_units(&self) -> i64 {
        2 * self.enc_units
    }
}

/// Bidirectional GRU encoder.
#[derive(Debug)]
pub struct Encoder {
    embedding: nn::Embedding,
    gru: nn::GRU,
}

impl Encoder {
    /// Create a new Encoder.
    pub fn new<'a, T: Borrow<nn::Path<'a>>>(vs: T, config: &PgnConfig) -> Self {
        let vs = vs.borrow();
        let embedding = nn::embedding(
            vs / "embedding",
            config.vocab_size,
            config.embed_size,
            Default::default(),
        );
        let gru = nn::gru(
            vs / "gru",
            config.embed_size,
            config.enc_units,
            nn::RNNConfig {
                bidirectional: true,
                ..Default::default()
            },
        );
        Self { embedding, gru }
    }

    /// Encode a batch of source sequences.
    ///
    /// # Arguments
    /// - enc_input: shape \[b, l\]
    ///
    /// # Returns
    /// the outputs of shape \[b, l, 2 * enc_units\] and the final forward and
    /// backward states concatenated, of shape \[b, 2 * enc_units\].
    pub fn forward(&self, enc_input: &Tensor) -> (Tensor, Tensor) {
        let b = enc_input.size()[0];
        let emb = enc_input.apply(&self.embedding); // [b, l, embed_size]
        let (output, nn::GRUState(state)) = self.gru.seq(&emb); // state: [2, b, enc_units]
        let hidden = state.transpose(0, 1).reshape([b, -1]);
        (output, hidden)
    }
}

/// Additive attention with an optional coverage feature.
///
/// `score = v · tanh(W_h h + W_s s + W_c c)`
#[derive(Debug)]
pub struct BahdanauAttention {
    w_h: nn::Linear,
    w_s: nn::Linear,
    w_c: Option<nn::Linear>,
    v: nn::Linear,
}

impl BahdanauAttention {
    /// Create a new BahdanauAttention.
    pub fn new<'a, T: Borrow<nn::Path<'a>>>(vs: T, config: &PgnConfig) -> Self {
        let vs = vs.borrow();
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };
        let w_h = nn::linear(
            vs / "w_h",
            config.enc_output_units(),
            config.attn_units,
            no_bias,
        );
        let w_s = nn::linear(
            vs / "w_s",
            config.dec_units(),
            config.attn_units,
            Default::default(),
        );
        let w_c = if config.is_coverage {
            Some(nn::linear(vs / "w_c", 1, config.attn_units, no_bias))
        } else {
            None
        };
        let v = nn::linear(vs / "v", config.attn_units, 1, no_bias);
        Self { w_h, w_s, w_c, v }
    }

    /// Attend over the encoder outputs.
    ///
    /// # Arguments
    /// - dec_hidden: \[b, dec_units\]
    /// - enc_output: \[b, l, enc_output_units\]
    /// - enc_padding_mask: \[b, l\]
    /// - coverage: \[b, l\], the sum of the previous attention distributions
    ///
    /// # Returns
    /// `(context [b, enc_output_units], attention [b, l], coverage [b, l])`
    /// where the returned coverage includes this step's attention.
    pub fn forward(
        &self,
        dec_hidden: &Tensor,
        enc_output: &Tensor,
        enc_padding_mask: &Tensor,
        coverage: &Tensor,
    ) -> (Tensor, Tensor, Tensor) {
        let mut features = enc_output.apply(&self.w_h) + dec_hidden.apply(&self.w_s).unsqueeze(1);
        if let Some(w_c) = &self.w_c {
            features = features + coverage.unsqueeze(-1).apply(w_c);
        }
        let score = features.tanh().apply(&self.v).squeeze_dim(-1); // [b, l]

        let attn = masked_softmax(&score, enc_padding_mask);
        let context = (attn.unsqueeze(-1) * enc_output).sum_dim_intlist(
            Some(&[1_i64][..]),
            false,
            Kind::Float,
        );
        let coverage = coverage + &attn;
        (context, attn, coverage)
    }
}

/// Softmax over the last dimension restricted to the positions where `mask`
/// is 1.
pub fn masked_softmax(score: &Tensor, mask: &Tensor) -> Tensor {
    let attn = score.softmax(-1, Kind::Float) * mask;
    let norm = attn
        .sum_dim_intlist(Some(&[-1_i64][..]), true, Kind::Float)
        .clamp_min(1e-10);
    attn / norm
}

/// GRU decoder producing vocabulary logits.
#[derive(Debug)]
pub struct Decoder {
    embedding: nn::Embedding,
    gru: nn::GRU,
    fc: nn::Linear,
}

impl Decoder {
    /// Create a new Decoder.
    pub fn new<'a, T: Borrow<nn::Path<'a>>>(vs: T, config: &PgnConfig) -> Self {
        let vs = vs.borrow();
        let embedding = nn::embedding(
            vs / "embedding",
            config.vocab_size,
            config.embed_size,
            Default::default(),
        );
        let gru = nn::gru(
            vs / "gru",
            config.embed_size + config.enc_output_units(),
            config.dec_units(),
            Default::default(),
        );
        let fc = nn::linear(
            vs / "fc",
            config.dec_units() + config.enc_output_units(),
            config.vocab_size,
            Default::default(),
        );
        Self {
            embedding,
            gru,
            fc,
        }
    }

    /// Embed a decoder input step of shape \[b\].
    pub fn embed(&self, dec_input: &Tensor) -> Tensor {
        dec_input.apply(&self.embedding)
    }

    /// One decoding step.
    ///
    /// # Returns
    /// the new hidden state \[b, dec_units\] and the vocabulary logits
    /// \[b, vocab_size\].
    pub fn step(&self, emb: &Tensor, context: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        let x = Tensor::cat(&[emb, context], 1);
        let nn::GRUState(state) = self.gru.step(&x, &nn::GRUState(hidden.unsqueeze(0)));
        let hidden = state.squeeze_dim(0);
        let logits = Tensor::cat(&[&hidden, context], 1).apply(&self.fc);
        (hidden, logits)
    }
}

/// Generation probability `p_gen`.
#[derive(Debug)]
pub struct Pointer {
    w_c: nn::Linear,
    w_s: nn::Linear,
    w_x: nn::Linear,
}

impl Pointer {
    /// Create a new Pointer.
    pub fn new<'a, T: Borrow<nn::Path<'a>>>(vs: T, config: &PgnConfig) -> Self {
        let vs = vs.borrow();
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };
        Self {
            w_c: nn::linear(vs / "w_c", config.enc_output_units(), 1, no_bias),
            w_s: nn::linear(vs / "w_s", config.dec_units(), 1, no_bias),
            w_x: nn::linear(vs / "w_x", config.embed_size, 1, Default::default()),
        }
    }

    /// `p_gen` of shape \[b, 1\].
    pub fn forward(&self, context: &Tensor, hidden: &Tensor, emb: &Tensor) -> Tensor {
        (context.apply(&self.w_c) + hidden.apply(&self.w_s) + emb.apply(&self.w_x)).sigmoid()
    }
}

/// Mix the vocabulary and copy distributions.
///
/// The vocabulary distribution weighted by `p_gen` is extended with
/// `max_oov_len` zeros, then the attention weighted by `1 - p_gen` is added
/// at the extended ids of the source words.
pub fn final_distribution(
    vocab_dist: &Tensor,
    attn: &Tensor,
    p_gen: &Tensor,
    extended_enc_input: &Tensor,
    max_oov_len: i64,
) -> Tensor {
    let vocab_dist = vocab_dist * p_gen;
    let copy_dist = attn * (p_gen.neg() + 1.0);

    let extended = if max_oov_len > 0 {
        let b = vocab_dist.size()[0];
        let zeros = Tensor::zeros([b, max_oov_len], (Kind::Float, vocab_dist.device()));
        Tensor::cat(&[vocab_dist, zeros], 1)
    } else {
        vocab_dist
    };
    extended.scatter_add(1, extended_enc_input, &copy_dist)
}

/// Outputs of a teacher-forced pass, stacked over the decoder steps.
#[derive(Debug)]
pub struct PgnOutput {
    /// \[b, t, vocab_size\]
    pub vocab_logits: Tensor,
    /// \[b, t, vocab_size + max_oov_len\] with the pointer, otherwise the
    /// vocabulary distribution.
    pub final_dists: Tensor,
    /// \[b, t, l\]
    pub attentions: Tensor,
    /// \[b, t, l\], coverage after each step.
    pub coverages: Tensor,
}

/// A sequence-to-sequence summarization model.
pub trait SummarizationModel {
    /// Teacher-forced pass over a batch.
    fn forward_batch(&self, batch: &Batch) -> PgnOutput;

    /// Greedy decoding of at most `max_len` tokens per example.
    ///
    /// # Returns
    /// the decoded ids, possibly extended ids, without `[STOP]`.
    fn greedy_decode(&self, batch: &Batch, max_len: i64) -> Result<Vec<Vec<i64>>>;

    /// The model configuration.
    fn config(&self) -> &PgnConfig;
}

#[cfg(test)]
mod tests {
    use tch::{Device, Kind, Tensor};

    use super::*;

    fn config() -> PgnConfig {
        PgnConfig {
            vocab_size: 10,
            embed_size: 4,
            enc_units: 3,
            attn_units: 5,
            pointer_gen: true,
            is_coverage: true,
        }
    }

    #[test]
    fn test_masked_softmax() {
        let score = Tensor::from_slice(&[1f32, 1., 5.]).view([1, 3]);
        let mask = Tensor::from_slice(&[1f32, 1., 0.]).view([1, 3]);
        let attn: Vec<f32> = masked_softmax(&score, &mask).view(-1).try_into().unwrap();
        assert!((attn[0] - 0.5).abs() < 1e-6);
        assert!((attn[1] - 0.5).abs() < 1e-6);
        assert_eq!(attn[2], 0.);
    }

    #[test]
    fn test_final_distribution() {
        let vocab_dist = Tensor::from_slice(&[0.5f32, 0.5, 0.0]).view([1, 3]);
        let attn = Tensor::from_slice(&[0.25f32, 0.75]).view([1, 2]);
        let p_gen = Tensor::from_slice(&[0.8f32]).view([1, 1]);
        // second source word is the first OOV (id 3)
        let ext = Tensor::from_slice(&[1i64, 3]).view([1, 2]);

        let dist = final_distribution(&vocab_dist, &attn, &p_gen, &ext, 1);
        let dist: Vec<f32> = dist.view(-1).try_into().unwrap();
        let expected = [0.4, 0.4 + 0.2 * 0.25, 0.0, 0.2 * 0.75];
        assert_eq!(dist.len(), 4);
        for (d, e) in dist.iter().zip(expected) {
            assert!((d - e).abs() < 1e-6, "{:?}", dist);
        }
    }

    #[test]
    fn test_encoder_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = config();
        let encoder = Encoder::new(vs.root() / "encoder", &config);
        let xs = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 6]).view([2, 3]);
        let (output, hidden) = encoder.forward(&xs);
        assert_eq!(output.size(), &[2, 3, 6]);
        assert_eq!(hidden.size(), &[2, 6]);
    }

    #[test]
    fn test_attention_is_a_distribution() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = config();
        let attention = BahdanauAttention::new(vs.root() / "attention", &config);

        let enc_output = Tensor::randn([2, 4, 6], (Kind::Float, Device::Cpu));
        let dec_hidden = Tensor::randn([2, 6], (Kind::Float, Device::Cpu));
        let mask = Tensor::from_slice(&[1f32, 1., 1., 1., 1., 1., 0., 0.]).view([2, 4]);
        let coverage = mask.zeros_like();

        let (context, attn, coverage) = attention.forward(&dec_hidden, &enc_output, &mask, &coverage);
        assert_eq!(context.size(), &[2, 6]);
        let sums: Vec<f32> = attn.sum_dim_intlist(Some(&[1_i64][..]), false, Kind::Float).try_into().unwrap();
        for s in sums {
            assert!((s - 1.).abs() < 1e-5);
        }
        let padded: Vec<f32> = attn.narrow(1, 2, 2).narrow(0, 1, 1).view(-1).try_into().unwrap();
        assert_eq!(padded, vec![0., 0.]);
        assert!(coverage.equal(&attn));
    }
}
