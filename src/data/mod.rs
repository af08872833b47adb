/// Batching of article/abstract pairs.
pub mod batcher;
/// Word vocabulary and OOV handling.
pub mod vocab;

pub use batcher::{read_lines, Batch, Example, Loader};
pub use vocab::{Vocab, PAD_ID, START_ID, STOP_ID, UNK_ID};
