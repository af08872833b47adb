use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use rayon::prelude::*;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::{
    NormalizedString, Normalizer, OffsetReferential, OffsetType, PreTokenizedString, PreTokenizer,
};

use crate::error::{Error, Result};

/// Read a stop-word file: one word per line.
pub fn read_stopwords<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut words = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            words.insert(line.to_string());
        }
    }
    Ok(words)
}

/// Parse a dialogue CSV file.
///
/// Training files have 6 columns (`QID, Brand, Model, Question, Dialogue,
/// Report`), test files have 5 (no `Report`). The source text is `Question`
/// and `Dialogue` joined by a space, the target is `Report`.
///
/// # Returns
/// `(sources, targets)`; `targets` is empty for 5-column files.
pub fn parse_data<P: AsRef<Path>>(path: P) -> Result<(Vec<String>, Vec<String>)> {
    let file = File::open(path)?;
    parse_reader(file)
}

fn parse_reader<R: std::io::Read>(reader: R) -> Result<(Vec<String>, Vec<String>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut sources = vec![];
    let mut targets = vec![];
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();
        match record.len() {
            6 => {
                sources.push(join_source(field(3), field(4)));
                targets.push(field(5).to_string());
            }
            5 => sources.push(join_source(field(3), field(4))),
            n => tracing::debug!("skipping a row with {} fields", n),
        }
    }
    Ok((sources, targets))
}

fn join_source(question: &str, dialogue: &str) -> String {
    format!("{} {}", question, dialogue).trim().to_string()
}

/// How lines are cut into tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CutType {
    /// Whitespace and punctuation boundaries; CJK characters stand alone.
    #[default]
    Word,
    /// One token per non-whitespace character.
    Char,
}

/// Turns a line of text into tokens.
pub trait Segmenter: Sync {
    /// Segment a line.
    fn segment(&self, text: &str) -> Result<Vec<String>>;
}

/// Segmenter based on the BERT normalizer and pre-tokenizer.
pub struct BertSegmenter {
    normalizer: BertNormalizer,
    pre_tokenizer: BertPreTokenizer,
}

impl Default for BertSegmenter {
    fn default() -> Self {
        Self {
            // clean text, isolate CJK characters, keep accents and case
            normalizer: BertNormalizer::new(true, true, Some(false), false),
            pre_tokenizer: BertPreTokenizer,
        }
    }
}

impl Segmenter for BertSegmenter {
    fn segment(&self, text: &str) -> Result<Vec<String>> {
        let mut normalized = NormalizedString::from(text);
        self.normalizer
            .normalize(&mut normalized)
            .map_err(|e| Error::Segmentation(e.to_string()))?;

        let mut pre_tokenized = PreTokenizedString::from(normalized);
        self.pre_tokenizer
            .pre_tokenize(&mut pre_tokenized)
            .map_err(|e| Error::Segmentation(e.to_string()))?;

        Ok(pre_tokenized
            .get_splits(OffsetReferential::Normalized, OffsetType::Byte)
            .into_iter()
            .map(|(s, _, _)| s.to_string())
            .filter(|s| !s.trim().is_empty())
            .collect())
    }
}

/// Character-level segmenter.
pub struct CharSegmenter;

impl Segmenter for CharSegmenter {
    fn segment(&self, text: &str) -> Result<Vec<String>> {
        Ok(text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(String::from)
            .collect())
    }
}

/// Build the segmenter for a cut type.
pub fn segmenter(cut_type: CutType) -> Box<dyn Segmenter> {
    match cut_type {
        CutType::Word => Box::<BertSegmenter>::default(),
        CutType::Char => Box::new(CharSegmenter),
    }
}

/// Segment every line in parallel, dropping stop words if any.
///
/// Blank lines stay blank so that source and target files remain aligned.
pub fn segment_lines(
    lines: &[String],
    segmenter: &dyn Segmenter,
    stopwords: Option<&HashSet<String>>,
) -> Result<Vec<String>> {
    lines
        .par_iter()
        .map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(String::new());
            }
            let tokens = segmenter.segment(line)?;
            Ok(tokens
                .into_iter()
                .filter(|t| stopwords.map_or(true, |sw| !sw.contains(t)))
                .join(" "))
        })
        .collect()
}

/// Write segmented lines to a file, one per line.
pub fn write_lines<P: AsRef<Path>>(path: P, lines: &[String]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// Output paths of [`save_data`].
pub struct SegmentedPaths<'a> {
    /// Training sources.
    pub train_x: &'a Path,
    /// Training targets.
    pub train_y: &'a Path,
    /// Test sources.
    pub test_x: &'a Path,
}

/// Segment the training sources, training targets and test sources and write
/// them to `paths`.
pub fn save_data(
    train_src: &[String],
    train_trg: &[String],
    test_src: &[String],
    paths: SegmentedPaths,
    segmenter: &dyn Segmenter,
    stopwords: Option<&HashSet<String>>,
) -> Result<()> {
    for (lines, path) in [
        (train_src, paths.train_x),
        (train_trg, paths.train_y),
        (test_src, paths.test_x),
    ] {
        let segmented = segment_lines(lines, segmenter, stopwords)?;
        write_lines(path, &segmented)?;
        tracing::info!("wrote {} lines to {}", segmented.len(), path.display());
    }
    Ok(())
}
