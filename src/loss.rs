//! Training losses of the pointer-generator network.
//!
//! Step-indexed quantities are stacked along dimension 1: `[batch, steps, ..]`.
use tch::{Kind, Tensor};

use crate::config::LossConfig;
use crate::data::{Batch, PAD_ID};
use crate::model::PgnOutput;

/// Smallest probability fed to `log`.
const MIN_PROB: f64 = 1e-10;

/// Per-example number of non-padding steps, at least 1.
fn dec_lens(padding_mask: &Tensor) -> Tensor {
    padding_mask
        .sum_dim_intlist(Some(&[1_i64][..]), false, Kind::Float)
        .clamp_min(1.0)
}

/// Masked cross entropy computed from logits.
///
/// Steps whose target is [`PAD_ID`] are ignored; each example is normalized by
/// its own number of real steps before averaging over the batch.
///
/// # Arguments
/// - real: targets of shape \[batch, steps\]
/// - logits: shape \[batch, steps, vocab_size\]
pub fn masked_cross_entropy(real: &Tensor, logits: &Tensor) -> Tensor {
    let real = real.to_kind(Kind::Int64);
    let mask = real.ne(PAD_ID).to_kind(Kind::Float);

    let loss = -logits
        .to_kind(Kind::Float)
        .log_softmax(-1, Kind::Float)
        .gather(2, &real.unsqueeze(-1), false)
        .squeeze_dim(-1);

    mask_and_avg(&loss, &mask)
}

/// Apply the padding mask to per-step values and return the overall average.
///
/// # Arguments
/// - values: shape \[batch, steps\]
/// - padding_mask: shape \[batch, steps\] of 1s and 0s
pub fn mask_and_avg(values: &Tensor, padding_mask: &Tensor) -> Tensor {
    let padding_mask = padding_mask.to_kind(Kind::Float);
    let per_example = (values * &padding_mask).sum_dim_intlist(
        Some(&[1_i64][..]),
        false,
        Kind::Float,
    ) / dec_lens(&padding_mask);
    per_example.mean(Kind::Float)
}

/// Negative log likelihood of the gold targets under the final (extended)
/// distributions.
///
/// # Arguments
/// - real: extended targets of shape \[batch, steps\]
/// - final_dists: probabilities of shape \[batch, steps, extended_vocab_size\]
/// - padding_mask: shape \[batch, steps\]
pub fn pgn_log_loss(real: &Tensor, final_dists: &Tensor, padding_mask: &Tensor) -> Tensor {
    let gold_probs = final_dists
        .gather(2, &real.to_kind(Kind::Int64).unsqueeze(-1), false)
        .squeeze_dim(-1);
    let losses = -gold_probs.clamp_min(MIN_PROB).log();
    mask_and_avg(&losses, padding_mask)
}

/// Coverage loss of the attention distributions.
///
/// The coverage vector starts at zero. At each step the loss is the sum over
/// source positions of `min(attention, coverage)`, then the attention is added
/// to the coverage.
///
/// # Arguments
/// - attn_dists: shape \[batch, steps, enc_len\]
/// - padding_mask: shape \[batch, steps\]
pub fn coverage_loss(attn_dists: &Tensor, padding_mask: &Tensor) -> Tensor {
    let steps = attn_dists.size()[1];

    let mut coverage = attn_dists.select(1, 0).zeros_like();
    let mut covlosses = Vec::with_capacity(steps as usize);
    for t in 0..steps {
        let a = attn_dists.select(1, t);
        covlosses.push(a.minimum(&coverage).sum_dim_intlist(
            Some(&[1_i64][..]),
            false,
            Kind::Float,
        ));
        coverage = coverage + a;
    }

    mask_and_avg(&Tensor::stack(&covlosses, 1), padding_mask)
}

/// Loss of a teacher-forced pass.
///
/// With the pointer, the negative log likelihood of the extended targets under
/// the final distributions; without it, the masked cross entropy of the
/// vocabulary logits. With coverage, the coverage loss weighted by
/// `cov_loss_wt` is added.
pub fn total_loss(batch: &Batch, output: &PgnOutput, config: &LossConfig) -> Tensor {
    let loss = if config.pointer_gen {
        pgn_log_loss(
            &batch.extended_dec_target,
            &output.final_dists,
            &batch.dec_padding_mask,
        )
    } else {
        masked_cross_entropy(&batch.dec_target, &output.vocab_logits)
    };

    if config.is_coverage {
        loss + coverage_loss(&output.attentions, &batch.dec_padding_mask) * config.cov_loss_wt
    } else {
        loss
    }
}
