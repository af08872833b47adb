//! # The `pgnrs` crate
//!
//! Abstractive summarization with a pointer-generator network and coverage.

/// The `actions` module contains the entry points of the command line.
pub mod actions;

/// The `config` module contains the command line arguments and the training
/// configuration.
pub mod config;

/// The `data` module contains the vocabulary and the batching of
/// article/abstract pairs.
pub mod data;

/// Errors.
pub mod error;

/// The `estimate` module contains the validation loss estimation.
pub mod estimate;

/// The `learn` module contains the optimizer, checkpoints and progress
/// reporting of the training loop.
pub mod learn;

/// Training losses.
pub mod loss;

/// The `model` module contains the pointer-generator network.
pub mod model;

/// Parsing and segmentation of the raw CSV files.
pub mod preprocess;

pub use error::{Error, Result};
