use thiserror::Error;

/// Errors raised by the summarization pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed CSV input.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Error raised by libtorch.
    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),
    /// Malformed JSON metadata.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The segmenter failed on some input.
    #[error("segmentation failed: {0}")]
    Segmentation(String),
    /// The vocabulary file is malformed or inconsistent.
    #[error("invalid vocabulary: {0}")]
    Vocab(String),
    /// No usable example in the dataset.
    #[error("dataset contains no usable example")]
    EmptyDataset,
    /// The training loss is NaN or infinite.
    #[error("non-finite loss: {0}")]
    NonFiniteLoss(f64),
    /// Training was stopped; the checkpoint holds the given step.
    #[error("interrupted after step {0}")]
    Interrupted(usize),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The checkpoint directory is inconsistent.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
