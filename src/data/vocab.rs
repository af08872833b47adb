use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Unknown word.
pub const UNKNOWN_TOKEN: &str = "[UNK]";
/// Padding.
pub const PAD_TOKEN: &str = "[PAD]";
/// First decoder input.
pub const START_DECODING: &str = "[START]";
/// End of a summary.
pub const STOP_DECODING: &str = "[STOP]";

/// Id of [`UNKNOWN_TOKEN`].
pub const UNK_ID: i64 = 0;
/// Id of [`PAD_TOKEN`].
pub const PAD_ID: i64 = 1;
/// Id of [`START_DECODING`].
pub const START_ID: i64 = 2;
/// Id of [`STOP_DECODING`].
pub const STOP_ID: i64 = 3;

const SPECIAL_TOKENS: [&str; 4] = [UNKNOWN_TOKEN, PAD_TOKEN, START_DECODING, STOP_DECODING];

/// Word vocabulary with the special tokens at fixed ids.
#[derive(Clone, Debug)]
pub struct Vocab {
    word2id: HashMap<String, i64>,
    id2word: Vec<String>,
}

impl Vocab {
    fn with_words<I: IntoIterator<Item = String>>(words: I) -> Self {
        let mut id2word: Vec<String> = SPECIAL_TOKENS.iter().map(|s| s.to_string()).collect();
        id2word.extend(words);
        let word2id = id2word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as i64))
            .collect();
        Self { word2id, id2word }
    }

    /// Build a vocabulary from segmented lines.
    ///
    /// Words are ranked by count (ties broken alphabetically) and the
    /// vocabulary holds at most `max_size` entries, special tokens included.
    pub fn build<'a, I: IntoIterator<Item = &'a str>>(lines: I, max_size: usize) -> Result<Self> {
        if max_size <= SPECIAL_TOKENS.len() {
            return Err(Error::InvalidConfig(format!(
                "vocabulary size must be larger than {}, got {}",
                SPECIAL_TOKENS.len(),
                max_size
            )));
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for line in lines {
            for word in line.split_whitespace() {
                if SPECIAL_TOKENS.contains(&word) {
                    continue;
                }
                *counts.entry(word).or_default() += 1;
            }
        }

        let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
        counts.sort_by(|(wa, ca), (wb, cb)| cb.cmp(ca).then_with(|| wa.cmp(wb)));

        let words = counts
            .into_iter()
            .take(max_size - SPECIAL_TOKENS.len())
            .map(|(w, _)| w.to_string());

        Ok(Self::with_words(words))
    }

    /// Load a vocabulary saved by [`Vocab::save`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut id2word: Vec<String> = vec![];
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (word, id) = match (parts.next(), parts.next()) {
                (Some(word), Some(id)) => (word, id),
                _ => {
                    return Err(Error::Vocab(format!(
                        "line {}: expected `word id`, got `{}`",
                        lineno + 1,
                        line
                    )))
                }
            };
            let id: usize = id
                .parse()
                .map_err(|_| Error::Vocab(format!("line {}: bad id `{}`", lineno + 1, id)))?;
            if id != id2word.len() {
                return Err(Error::Vocab(format!(
                    "line {}: ids must be contiguous, expected {} got {}",
                    lineno + 1,
                    id2word.len(),
                    id
                )));
            }
            id2word.push(word.to_string());
        }

        if id2word.len() < SPECIAL_TOKENS.len()
            || id2word[..SPECIAL_TOKENS.len()]
                .iter()
                .zip(SPECIAL_TOKENS)
                .any(|(w, s)| w != s)
        {
            return Err(Error::Vocab(format!(
                "the first entries must be {:?}",
                SPECIAL_TOKENS
            )));
        }

        Ok(Self::with_words(id2word.into_iter().skip(SPECIAL_TOKENS.len())))
    }

    /// Save as one `word id` pair per line.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (id, word) in self.id2word.iter().enumerate() {
            writeln!(writer, "{} {}", word, id)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Return the size of the vocabulary
    pub fn size(&self) -> usize {
        self.id2word.len()
    }

    /// Id of a word, [`UNK_ID`] if unknown.
    pub fn word_to_id(&self, word: &str) -> i64 {
        self.word2id.get(word).copied().unwrap_or(UNK_ID)
    }

    /// Word of an id.
    ///
    /// Ids past the vocabulary are resolved against `article_oovs`.
    pub fn id_to_word<'a>(&'a self, id: i64, article_oovs: &'a [String]) -> Option<&'a str> {
        let id = usize::try_from(id).ok()?;
        if id < self.id2word.len() {
            Some(self.id2word[id].as_str())
        } else {
            article_oovs.get(id - self.id2word.len()).map(String::as_str)
        }
    }

    /// Map article words to ids.
    ///
    /// Out-of-vocabulary words receive temporary ids `size + i` where `i` is
    /// their first-seen position in the returned OOV list.
    pub fn article_to_ids(&self, words: &[&str]) -> (Vec<i64>, Vec<String>) {
        let mut ids = Vec::with_capacity(words.len());
        let mut oovs: Vec<String> = vec![];
        for &word in words {
            match self.word2id.get(word) {
                Some(&id) if id != UNK_ID => ids.push(id),
                _ => {
                    let idx = match oovs.iter().position(|w| w == word) {
                        Some(idx) => idx,
                        None => {
                            oovs.push(word.to_string());
                            oovs.len() - 1
                        }
                    };
                    ids.push((self.size() + idx) as i64);
                }
            }
        }
        (ids, oovs)
    }

    /// Map abstract words to ids, using the article OOVs for words the
    /// vocabulary does not know.
    pub fn abstract_to_ids(&self, words: &[&str], article_oovs: &[String]) -> Vec<i64> {
        words
            .iter()
            .map(|&word| match self.word2id.get(word) {
                Some(&id) if id != UNK_ID => id,
                _ => match article_oovs.iter().position(|w| w == word) {
                    Some(idx) => (self.size() + idx) as i64,
                    None => UNK_ID,
                },
            })
            .collect()
    }

    /// Decode ids into words, stopping at [`STOP_DECODING`].
    pub fn decode(&self, ids: &[i64], article_oovs: &[String]) -> Vec<String> {
        ids.iter()
            .take_while(|&&id| id != STOP_ID)
            .map(|&id| {
                self.id_to_word(id, article_oovs)
                    .unwrap_or(UNKNOWN_TOKEN)
                    .to_string()
            })
            .collect()
    }
}
