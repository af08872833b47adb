use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::model::PgnConfig;
use crate::preprocess::CutType;

/// Torch device to use.
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum Device {
    /// CPU
    #[default]
    Cpu,
    /// CUDA if available
    Cuda,
    /// MPS
    #[cfg(target_arch = "aarch64")]
    Mps,
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda => tch::Device::cuda_if_available(),
            #[cfg(target_arch = "aarch64")]
            Device::Mps => tch::Device::Mps,
        }
    }
}

/// Arguments for the pointer-generator model.
#[derive(Parser, Debug, Clone)]
pub struct PgnArgs {
    /// The size of the word embeddings
    #[arg(long, default_value_t = 256)]
    pub embed_size: i64,
    /// Hidden units of each direction of the encoder
    #[arg(long, default_value_t = 256)]
    pub enc_units: i64,
    /// Hidden units of the attention
    #[arg(long, default_value_t = 512)]
    pub attn_units: i64,
    /// Copy words from the source
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub pointer_gen: bool,
    /// Use the coverage mechanism and loss
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub is_coverage: bool,
}

impl Default for PgnArgs {
    fn default() -> Self {
        Self {
            embed_size: 256,
            enc_units: 256,
            attn_units: 512,
            pointer_gen: true,
            is_coverage: true,
        }
    }
}

impl PgnArgs {
    /// Model configuration for a vocabulary of `vocab_size` words.
    pub fn to_config(&self, vocab_size: usize) -> PgnConfig {
        PgnConfig {
            vocab_size: vocab_size as i64,
            embed_size: self.embed_size,
            enc_units: self.enc_units,
            attn_units: self.attn_units,
            pointer_gen: self.pointer_gen,
            is_coverage: self.is_coverage,
        }
    }
}

/// Training parameters.
#[derive(Parser, Debug, Clone)]
pub struct TrainingParameters {
    /// Segmented training articles
    #[arg(long, default_value = "data/train_set.seg_x.txt")]
    pub train_x: PathBuf,
    /// Segmented training abstracts
    #[arg(long, default_value = "data/train_set.seg_y.txt")]
    pub train_y: PathBuf,
    /// Segmented validation articles
    #[arg(long, requires = "valid_y")]
    pub valid_x: Option<PathBuf>,
    /// Segmented validation abstracts
    #[arg(long, requires = "valid_x")]
    pub valid_y: Option<PathBuf>,
    /// Vocabulary file
    #[arg(long, default_value = "data/vocab.txt")]
    pub vocab_path: PathBuf,
    /// Checkpoint directory
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Learning rate
    #[arg(long, default_value_t = 0.15)]
    pub learning_rate: f64,
    /// Initial value of the Adagrad accumulators
    #[arg(long, default_value_t = 0.1)]
    pub adagrad_init_acc: f64,
    /// Maximum gradient norm - 0.0 means no clipping.
    #[arg(long, default_value_t = 2.0)]
    pub max_grad_norm: f64,
    /// Weight of the coverage loss
    #[arg(long, default_value_t = 1.0)]
    pub cov_loss_wt: f64,

    /// Batch size
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Maximum number of article words
    #[arg(long, default_value_t = 200)]
    pub max_enc_len: usize,
    /// Maximum number of decoder steps
    #[arg(long, default_value_t = 50)]
    pub max_dec_len: usize,

    /// Last training step
    #[arg(long, default_value_t = 10000)]
    pub max_steps: usize,
    /// Number of steps between checkpoints
    #[arg(long, default_value_t = 1000)]
    pub checkpoints_save_steps: usize,
    /// Number of checkpoints to keep
    #[arg(long, default_value_t = 5)]
    pub max_to_keep: usize,
    /// Number of batches to use for estimating the validation loss.
    #[arg(long, default_value_t = 100)]
    pub loss_estimation_steps: usize,

    /// Rng seed for the dataloader
    #[arg(long, default_value_t = 142)]
    pub dataloader_rng_seed: u64,
    /// Seed of the parameter initialization
    #[arg(long, default_value_t = 1337)]
    pub seed: i64,

    /// Name of the run
    #[arg(long)]
    pub run_name: Option<String>,

    /// Path to the tensorboard directory
    /// If not provided, no tensorboard logging will be done.
    #[arg(long)]
    pub tensorboard_dir: Option<String>,

    /// Do not display progress bars
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

/// Preprocessing parameters.
#[derive(Parser, Debug, Clone)]
pub struct PreprocessParameters {
    /// Training CSV (6 columns)
    #[arg(long, default_value = "data/AutoMaster_TrainSet.csv")]
    pub train_path: PathBuf,
    /// Test CSV (5 columns)
    #[arg(long, default_value = "data/AutoMaster_TestSet.csv")]
    pub test_path: PathBuf,
    /// Stop words, one per line
    #[arg(long)]
    pub stop_words_path: Option<PathBuf>,
    /// Output: segmented training articles
    #[arg(long, default_value = "data/train_set.seg_x.txt")]
    pub train_seg_path_x: PathBuf,
    /// Output: segmented training abstracts
    #[arg(long, default_value = "data/train_set.seg_y.txt")]
    pub train_seg_path_y: PathBuf,
    /// Output: segmented test articles
    #[arg(long, default_value = "data/test_set.seg_x.txt")]
    pub test_seg_path_x: PathBuf,
    /// How lines are cut into tokens
    #[arg(long, value_enum, default_value_t = CutType::Word)]
    pub cut_type: CutType,
}

/// Vocabulary parameters.
#[derive(Parser, Debug, Clone)]
pub struct VocabParameters {
    /// Segmented files to count words from
    #[arg(long, num_args = 1.., default_values = ["data/train_set.seg_x.txt", "data/train_set.seg_y.txt"])]
    pub inputs: Vec<PathBuf>,
    /// Output vocabulary file
    #[arg(long, default_value = "data/vocab.txt")]
    pub vocab_path: PathBuf,
    /// Maximum vocabulary size, special tokens included
    #[arg(long, default_value_t = 30000)]
    pub vocab_size: usize,
}

/// Summarization parameters.
#[derive(Parser, Debug, Clone)]
pub struct SummarizeParameters {
    /// Segmented articles
    #[arg(long, default_value = "data/test_set.seg_x.txt")]
    pub input: PathBuf,
    /// One summary per article line
    #[arg(long, default_value = "data/test_set.summaries.txt")]
    pub output: PathBuf,
    /// Vocabulary file
    #[arg(long, default_value = "data/vocab.txt")]
    pub vocab_path: PathBuf,
    /// Checkpoint directory
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,
    /// Batch size
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Maximum number of decoded words
    #[arg(long, default_value_t = 50)]
    pub max_dec_len: usize,
}

/// The action to run.
#[derive(Subcommand, Debug, Clone)]
pub enum Action {
    /// Parse and segment the CSV files
    Preprocess {
        /// Preprocessing parameters
        #[command(flatten)]
        params: PreprocessParameters,
    },
    /// Build the vocabulary from segmented files
    BuildVocab {
        /// Vocabulary parameters
        #[command(flatten)]
        params: VocabParameters,
    },
    /// Train the model
    Train {
        /// The arguments for the model
        #[command(flatten)]
        model: PgnArgs,
        /// Training parameters
        #[command(flatten)]
        training: TrainingParameters,
    },
    /// Summarize articles with the latest checkpoint
    Summarize {
        /// Summarization parameters
        #[command(flatten)]
        params: SummarizeParameters,
    },
}

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The device to use
    #[arg(short, long, value_enum, default_value_t = Device::Cpu)]
    pub device: Device,

    /// The action to run
    #[command(subcommand)]
    pub action: Action,
}

/// Which loss terms to use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossConfig {
    /// Likelihood of the final (copy-aware) distributions instead of the
    /// vocabulary cross entropy.
    pub pointer_gen: bool,
    /// Add the coverage loss.
    pub is_coverage: bool,
    /// Weight of the coverage loss.
    pub cov_loss_wt: f64,
}

/// The configuration for the learning process
#[derive(Debug, Clone)]
pub struct LearnConfig {
    /// Last training step
    pub max_steps: usize,
    /// Number of steps between checkpoints
    pub checkpoints_save_steps: usize,
    /// Number of batches used for the validation loss
    pub loss_estimation_steps: usize,
    /// Loss terms
    pub loss: LossConfig,
}

impl LearnConfig {
    /// Resolve the loop configuration from the model and training parameters.
    pub fn new(model: &PgnArgs, training: &TrainingParameters) -> Self {
        Self {
            max_steps: training.max_steps,
            checkpoints_save_steps: training.checkpoints_save_steps,
            loss_estimation_steps: training.loss_estimation_steps,
            loss: LossConfig {
                pointer_gen: model.pointer_gen,
                is_coverage: model.is_coverage,
                cov_loss_wt: training.cov_loss_wt,
            },
        }
    }
}

/// Parameters saved next to the checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedParams {
    /// Model architecture
    pub model: PgnConfig,
    /// Maximum number of article words seen in training
    pub max_enc_len: usize,
    /// Maximum number of decoder steps seen in training
    pub max_dec_len: usize,
}
