use tch::{nn, Device, Kind, Tensor};

use crate::data::{Batch, START_ID, STOP_ID, UNK_ID};
use crate::error::Result;
use crate::model::{
    final_distribution, BahdanauAttention, Decoder, Encoder, PgnConfig, PgnOutput, Pointer,
    SummarizationModel,
};

/// Pgn is a pointer-generator network with coverage.
#[derive(Debug)]
pub struct Pgn {
    config: PgnConfig,
    encoder: Encoder,
    attention: BahdanauAttention,
    decoder: Decoder,
    /// None when the model only generates from the vocabulary.
    pointer: Option<Pointer>,
}

/// Source-side tensors shared by all the decoding steps.
struct Source<'a> {
    enc_output: &'a Tensor,
    enc_padding_mask: &'a Tensor,
    extended_enc_input: &'a Tensor,
    max_oov_len: i64,
}

/// Outputs of one decoding step.
struct Step {
    hidden: Tensor,
    vocab_logits: Tensor,
    final_dist: Tensor,
    attn: Tensor,
    coverage: Tensor,
}

impl Pgn {
    /// Create a new Pgn
    /// # Arguments
    /// * `vs` - The path to the module.
    /// * `config` - The model configuration. See [PgnConfig].
    /// # Returns
    /// A new Pgn.
    pub fn new(vs: &nn::Path, config: PgnConfig) -> Self {
        let encoder = Encoder::new(vs / "encoder", &config);
        let attention = BahdanauAttention::new(vs / "attention", &config);
        let decoder = Decoder::new(vs / "decoder", &config);
        let pointer = if config.pointer_gen {
            Some(Pointer::new(vs / "pointer", &config))
        } else {
            None
        };

        Self {
            config,
            encoder,
            attention,
            decoder,
            pointer,
        }
    }

    /// Encode the source side of a batch.
    pub fn call_encoder(&self, enc_input: &Tensor) -> (Tensor, Tensor) {
        self.encoder.forward(enc_input)
    }

    fn step(&self, dec_input: &Tensor, hidden: &Tensor, coverage: &Tensor, src: &Source) -> Step {
        let (context, attn, coverage) =
            self.attention
                .forward(hidden, src.enc_output, src.enc_padding_mask, coverage);

        let emb = self.decoder.embed(dec_input);
        let (hidden, vocab_logits) = self.decoder.step(&emb, &context, hidden);
        let vocab_dist = vocab_logits.softmax(-1, Kind::Float);

        let final_dist = match &self.pointer {
            Some(pointer) => {
                let p_gen = pointer.forward(&context, &hidden, &emb);
                final_distribution(
                    &vocab_dist,
                    &attn,
                    &p_gen,
                    src.extended_enc_input,
                    src.max_oov_len,
                )
            }
            None => vocab_dist,
        };

        Step {
            hidden,
            vocab_logits,
            final_dist,
            attn,
            coverage,
        }
    }
}

impl SummarizationModel for Pgn {
    fn forward_batch(&self, batch: &Batch) -> PgnOutput {
        let (enc_output, enc_hidden) = self.call_encoder(&batch.enc_input);
        let src = Source {
            enc_output: &enc_output,
            enc_padding_mask: &batch.enc_padding_mask,
            extended_enc_input: &batch.extended_enc_input,
            max_oov_len: batch.max_oov_len,
        };

        let steps = batch.dec_input.size()[1];

        let mut hidden = enc_hidden;
        let mut coverage = batch.enc_padding_mask.zeros_like();

        let mut vocab_logits = Vec::with_capacity(steps as usize);
        let mut final_dists = Vec::with_capacity(steps as usize);
        let mut attentions = Vec::with_capacity(steps as usize);
        let mut coverages = Vec::with_capacity(steps as usize);

        // teacher forcing
        for t in 0..steps {
            let step = self.step(&batch.dec_input.select(1, t), &hidden, &coverage, &src);
            hidden = step.hidden;
            coverage = step.coverage;
            vocab_logits.push(step.vocab_logits);
            final_dists.push(step.final_dist);
            attentions.push(step.attn);
            coverages.push(coverage.shallow_clone());
        }

        PgnOutput {
            vocab_logits: Tensor::stack(&vocab_logits, 1),
            final_dists: Tensor::stack(&final_dists, 1),
            attentions: Tensor::stack(&attentions, 1),
            coverages: Tensor::stack(&coverages, 1),
        }
    }

    fn greedy_decode(&self, batch: &Batch, max_len: i64) -> Result<Vec<Vec<i64>>> {
        tch::no_grad(|| {
            let (enc_output, enc_hidden) = self.call_encoder(&batch.enc_input);
            let device = enc_output.device();
            let src = Source {
                enc_output: &enc_output,
                enc_padding_mask: &batch.enc_padding_mask,
                extended_enc_input: &batch.extended_enc_input,
                max_oov_len: batch.max_oov_len,
            };

            let b = batch.size();
            let mut outputs = vec![vec![]; b];
            let mut done = vec![false; b];

            let mut hidden = enc_hidden;
            let mut coverage = batch.enc_padding_mask.zeros_like();
            let mut dec_input = Tensor::from_slice(&vec![START_ID; b]).to(device);

            for _ in 0..max_len {
                let step = self.step(&dec_input, &hidden, &coverage, &src);
                let next: Vec<i64> = step
                    .final_dist
                    .argmax(-1, false)
                    .to(Device::Cpu)
                    .try_into()?;

                for (i, &id) in next.iter().enumerate() {
                    if done[i] {
                        continue;
                    }
                    if id == STOP_ID {
                        done[i] = true;
                    } else {
                        outputs[i].push(id);
                    }
                }
                if done.iter().all(|&d| d) {
                    break;
                }

                // copied OOVs are fed back as UNK
                let next: Vec<i64> = next
                    .into_iter()
                    .map(|id| if id >= self.config.vocab_size { UNK_ID } else { id })
                    .collect();
                dec_input = Tensor::from_slice(&next).to(device);
                hidden = step.hidden;
                coverage = step.coverage;
            }

            Ok(outputs)
        })
    }

    fn config(&self) -> &PgnConfig {
        &self.config
    }
}
