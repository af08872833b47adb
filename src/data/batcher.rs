use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::prelude::*;
use tch::{Device, Tensor};

use crate::data::vocab::{Vocab, PAD_ID, START_ID, STOP_ID};
use crate::error::{Error, Result};

/// A single article/abstract pair turned into ids.
#[derive(Debug, Clone)]
pub struct Example {
    /// Encoder input, OOV words mapped to UNK.
    pub enc_input: Vec<i64>,
    /// Encoder input with temporary ids for the article OOVs.
    pub extended_enc_input: Vec<i64>,
    /// Article words missing from the vocabulary.
    pub article_oovs: Vec<String>,
    /// `[START]` followed by the abstract ids.
    pub dec_input: Vec<i64>,
    /// Abstract ids followed by `[STOP]`.
    pub dec_target: Vec<i64>,
    /// [`Example::dec_target`] with the temporary ids of copied OOVs.
    pub extended_dec_target: Vec<i64>,
}

impl Example {
    /// Build an example from a segmented article and abstract.
    ///
    /// The article is truncated to `max_enc_len` words. Decoder input and
    /// target are truncated to `max_dec_len`; a truncated target has no
    /// `[STOP]`.
    pub fn new(
        article: &str,
        abstract_: &str,
        vocab: &Vocab,
        max_enc_len: usize,
        max_dec_len: usize,
    ) -> Self {
        let article_words: Vec<&str> = article.split_whitespace().take(max_enc_len).collect();
        let enc_input = article_words.iter().map(|w| vocab.word_to_id(w)).collect();
        let (extended_enc_input, article_oovs) = vocab.article_to_ids(&article_words);

        let abstract_words: Vec<&str> = abstract_.split_whitespace().collect();
        let abs_ids: Vec<i64> = abstract_words.iter().map(|w| vocab.word_to_id(w)).collect();
        let abs_ids_extended = vocab.abstract_to_ids(&abstract_words, &article_oovs);

        let (dec_input, dec_target) = dec_inp_targ_seqs(&abs_ids, max_dec_len);
        let (_, extended_dec_target) = dec_inp_targ_seqs(&abs_ids_extended, max_dec_len);

        Self {
            enc_input,
            extended_enc_input,
            article_oovs,
            dec_input,
            dec_target,
            extended_dec_target,
        }
    }

    /// Number of encoder tokens.
    pub fn enc_len(&self) -> usize {
        self.enc_input.len()
    }

    /// Number of decoder steps.
    pub fn dec_len(&self) -> usize {
        self.dec_input.len()
    }
}

fn dec_inp_targ_seqs(sequence: &[i64], max_len: usize) -> (Vec<i64>, Vec<i64>) {
    let mut inp = Vec::with_capacity(sequence.len() + 1);
    inp.push(START_ID);
    inp.extend_from_slice(sequence);
    let mut target = sequence.to_vec();
    if inp.len() > max_len {
        inp.truncate(max_len);
        target.truncate(max_len);
    } else {
        target.push(STOP_ID);
    }
    (inp, target)
}

/// Padded tensors for a group of examples.
#[derive(Debug)]
pub struct Batch {
    /// `[b, enc_len]` Int64
    pub enc_input: Tensor,
    /// `[b, enc_len]` Int64
    pub extended_enc_input: Tensor,
    /// `[b, enc_len]` Float, 1 for real tokens
    pub enc_padding_mask: Tensor,
    /// Size of the longest OOV list in the batch.
    pub max_oov_len: i64,
    /// Per-example article OOVs.
    pub article_oovs: Vec<Vec<String>>,
    /// `[b, dec_len]` Int64
    pub dec_input: Tensor,
    /// `[b, dec_len]` Int64
    pub dec_target: Tensor,
    /// `[b, dec_len]` Int64
    pub extended_dec_target: Tensor,
    /// `[b, dec_len]` Float, 1 for real tokens
    pub dec_padding_mask: Tensor,
}

fn pad_2d(rows: &[&[i64]], len: usize, device: Device) -> (Tensor, Tensor) {
    let mut data = Vec::with_capacity(rows.len() * len);
    let mut mask = Vec::with_capacity(rows.len() * len);
    for row in rows {
        data.extend_from_slice(row);
        data.extend(std::iter::repeat(PAD_ID).take(len - row.len()));
        mask.extend(std::iter::repeat(1f32).take(row.len()));
        mask.extend(std::iter::repeat(0f32).take(len - row.len()));
    }
    let shape = [rows.len() as i64, len as i64];
    (
        Tensor::from_slice(&data).view(shape).to(device),
        Tensor::from_slice(&mask).view(shape).to(device),
    )
}

impl Batch {
    /// Stack and pad examples to the longest sequences of the group.
    pub fn from_examples(examples: &[Example], device: Device) -> Self {
        let enc_len = examples.iter().map(Example::enc_len).max().unwrap_or(0);
        let dec_len = examples.iter().map(Example::dec_len).max().unwrap_or(0);

        let rows = |f: fn(&Example) -> &[i64]| examples.iter().map(f).collect::<Vec<_>>();

        let (enc_input, enc_padding_mask) = pad_2d(&rows(|e| e.enc_input.as_slice()), enc_len, device);
        let (extended_enc_input, _) = pad_2d(&rows(|e| e.extended_enc_input.as_slice()), enc_len, device);
        let (dec_input, dec_padding_mask) = pad_2d(&rows(|e| e.dec_input.as_slice()), dec_len, device);
        let (dec_target, _) = pad_2d(&rows(|e| e.dec_target.as_slice()), dec_len, device);
        let (extended_dec_target, _) = pad_2d(&rows(|e| e.extended_dec_target.as_slice()), dec_len, device);

        let max_oov_len = examples
            .iter()
            .map(|e| e.article_oovs.len())
            .max()
            .unwrap_or(0) as i64;

        Self {
            enc_input,
            extended_enc_input,
            enc_padding_mask,
            max_oov_len,
            article_oovs: examples.iter().map(|e| e.article_oovs.clone()).collect(),
            dec_input,
            dec_target,
            extended_dec_target,
            dec_padding_mask,
        }
    }

    /// Number of examples.
    pub fn size(&self) -> usize {
        self.article_oovs.len()
    }
}

/// Read a file of segmented lines.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    reader
        .lines()
        .map(|l| l.map_err(Error::from))
        .collect()
}

/// Dataloader for article/abstract pairs.
///
/// Batches are made of `batch_size` examples, in file order unless
/// [`Loader::shuffle`] has been called. The last incomplete batch is dropped
/// unless [`Loader::keep_last`] is set.
#[derive(Clone)]
pub struct Loader {
    examples: Vec<Example>,
    batch_size: usize,
    device: Device,
    keep_last: bool,
    /// The order of the examples
    order: Option<Vec<usize>>,
    /// The current position in the order
    pos: usize,
}

impl Loader {
    /// Create a loader from aligned article and abstract lines.
    ///
    /// Articles without any word are skipped. An empty abstract slice is
    /// accepted for inference and yields empty abstracts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        articles: &[String],
        abstracts: &[String],
        vocab: &Vocab,
        max_enc_len: usize,
        max_dec_len: usize,
        batch_size: usize,
        device: Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        if max_enc_len == 0 || max_dec_len == 0 {
            return Err(Error::InvalidConfig(format!(
                "sequence lengths must be positive (encoder: {}, decoder: {})",
                max_enc_len, max_dec_len
            )));
        }
        if !abstracts.is_empty() && abstracts.len() != articles.len() {
            return Err(Error::InvalidConfig(format!(
                "{} articles but {} abstracts",
                articles.len(),
                abstracts.len()
            )));
        }

        let mut examples = Vec::with_capacity(articles.len());
        for (i, article) in articles.iter().enumerate() {
            if article.split_whitespace().next().is_none() {
                tracing::warn!("skipping example {}: empty article", i);
                continue;
            }
            let abstract_ = abstracts.get(i).map(String::as_str).unwrap_or("");
            examples.push(Example::new(
                article,
                abstract_,
                vocab,
                max_enc_len,
                max_dec_len,
            ));
        }

        Ok(Self {
            examples,
            batch_size,
            device,
            keep_last: false,
            order: None,
            pos: 0,
        })
    }

    /// Create a loader from segmented files.
    pub fn from_files<P: AsRef<Path>>(
        articles: P,
        abstracts: Option<P>,
        vocab: &Vocab,
        max_enc_len: usize,
        max_dec_len: usize,
        batch_size: usize,
        device: Device,
    ) -> Result<Self> {
        let articles = read_lines(articles)?;
        let abstracts = match abstracts {
            Some(path) => read_lines(path)?,
            None => vec![],
        };
        Self::new(
            &articles,
            &abstracts,
            vocab,
            max_enc_len,
            max_dec_len,
            batch_size,
            device,
        )
    }

    /// Also yield the last incomplete batch.
    pub fn keep_last(mut self) -> Self {
        self.keep_last = true;
        self
    }

    /// Return the number of examples
    pub fn n_examples(&self) -> usize {
        self.examples.len()
    }

    /// Return the number of (complete) batches
    pub fn n_batches(&self) -> usize {
        self.examples.len() / self.batch_size
    }

    /// Return the batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pick a random order for the examples to be picked to make the batches
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        order.shuffle(rng);
        self.order = Some(order);
        self.pos = 0;
    }

    /// Restart from the first batch, keeping the current order.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Returns the next batch
    pub fn next_batch(&mut self) -> Option<Batch> {
        let n = self.examples.len();
        let end = if self.pos + self.batch_size <= n {
            self.pos + self.batch_size
        } else if self.keep_last && self.pos < n {
            n
        } else {
            return None;
        };

        let examples: Vec<Example> = (self.pos..end)
            .map(|i| {
                let idx = self.order.as_ref().map_or(i, |order| order[i]);
                self.examples[idx].clone()
            })
            .collect();

        self.pos = end;

        Some(Batch::from_examples(&examples, self.device))
    }
}
