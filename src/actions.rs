use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use itertools::Itertools;
use rand::{Rng, SeedableRng};
use tch::nn::VarStore;

use crate::config::{
    LearnConfig, LossConfig, PgnArgs, PreprocessParameters, SavedParams, SummarizeParameters,
    TrainingParameters, VocabParameters,
};
use crate::data::{read_lines, Batch, Loader, Vocab};
use crate::error::{Error, Result};
use crate::estimate::LossEstimator;
use crate::learn::checkpoint::CheckpointManager;
use crate::learn::logger::TensorboardReporter;
use crate::learn::optim::{Adagrad, AdagradConfig};
use crate::learn::{Observer, PbProgressReporter, ProgressReporter, TracingReporter};
use crate::loss::total_loss;
use crate::model::pgn::Pgn;
use crate::model::{PgnConfig, SummarizationModel};
use crate::preprocess::{
    parse_data, read_stopwords, save_data, segmenter, write_lines, SegmentedPaths,
};

/// Parse the CSV files and write the segmented sources and targets.
pub fn preprocess(params: &PreprocessParameters) -> Result<()> {
    let (train_src, train_trg) = parse_data(&params.train_path)?;
    let (test_src, _) = parse_data(&params.test_path)?;
    tracing::info!(
        "parsed {} training rows and {} test rows",
        train_src.len(),
        test_src.len()
    );

    let stopwords = params
        .stop_words_path
        .as_ref()
        .map(read_stopwords)
        .transpose()?;
    if let Some(stopwords) = &stopwords {
        tracing::info!("{} stop words", stopwords.len());
    }

    let segmenter = segmenter(params.cut_type);
    save_data(
        &train_src,
        &train_trg,
        &test_src,
        SegmentedPaths {
            train_x: &params.train_seg_path_x,
            train_y: &params.train_seg_path_y,
            test_x: &params.test_seg_path_x,
        },
        segmenter.as_ref(),
        stopwords.as_ref(),
    )
}

/// Count the words of the segmented files and write the vocabulary.
pub fn build_vocab(params: &VocabParameters) -> Result<Vocab> {
    let mut lines = vec![];
    for path in &params.inputs {
        lines.extend(read_lines(path)?);
    }
    let vocab = Vocab::build(lines.iter().map(String::as_str), params.vocab_size)?;
    vocab.save(&params.vocab_path)?;
    tracing::info!(
        "wrote {} words to {}",
        vocab.size(),
        params.vocab_path.display()
    );
    Ok(vocab)
}

/// Create the model from its configuration
pub fn create_model(vs: &VarStore, config: PgnConfig) -> Box<dyn SummarizationModel> {
    Box::new(Pgn::new(&vs.root(), config))
}

fn nb_params(vs: &VarStore) -> i64 {
    vs.trainable_variables()
        .iter()
        .map(|t| t.size().iter().product::<i64>())
        .sum::<i64>()
}

/// Train the model, resuming from the latest checkpoint of
/// `training_params.checkpoint_dir` if there is one.
///
/// Raising `stop` (e.g. from a Ctrl-C handler) saves a checkpoint and ends
/// the training with [`Error::Interrupted`].
///
/// # Returns
/// the last trained step.
pub fn train(
    device: tch::Device,
    run_name: String,
    model_args: PgnArgs,
    training_params: TrainingParameters,
    stop: &AtomicBool,
) -> Result<usize> {
    let vocab = Vocab::from_file(&training_params.vocab_path)?;
    tracing::info!("vocab size: {}", vocab.size());

    let mut train_dataloader = Loader::from_files(
        &training_params.train_x,
        Some(&training_params.train_y),
        &vocab,
        training_params.max_enc_len,
        training_params.max_dec_len,
        training_params.batch_size,
        device,
    )?;
    tracing::info!(
        "train_dataloader: {} examples, {} batches",
        train_dataloader.n_examples(),
        train_dataloader.n_batches()
    );

    let mut valid_dataloader = match (&training_params.valid_x, &training_params.valid_y) {
        (Some(valid_x), Some(valid_y)) => {
            let loader = Loader::from_files(
                valid_x,
                Some(valid_y),
                &vocab,
                training_params.max_enc_len,
                training_params.max_dec_len,
                training_params.batch_size,
                device,
            )?
            .keep_last();
            tracing::info!("valid_dataloader: {} examples", loader.n_examples());
            Some(loader)
        }
        _ => None,
    };

    tch::manual_seed(training_params.seed);
    let mut vs = VarStore::new(device);
    let config = model_args.to_config(vocab.size());
    let model = create_model(&vs, config.clone());
    tracing::info!("nb parameters: {}", nb_params(&vs));

    let mut optimizer = Adagrad::new(
        &vs,
        AdagradConfig {
            lr: training_params.learning_rate,
            initial_accumulator_value: training_params.adagrad_init_acc,
            clip_norm: (training_params.max_grad_norm > 0.).then_some(training_params.max_grad_norm),
            ..Default::default()
        },
    );

    let mut manager =
        CheckpointManager::new(&training_params.checkpoint_dir, training_params.max_to_keep)?;
    let params = SavedParams {
        model: config,
        max_enc_len: training_params.max_enc_len,
        max_dec_len: training_params.max_dec_len,
    };
    if manager.latest_step().is_some() {
        let saved: SavedParams = manager.load_params()?;
        if saved.model != params.model {
            return Err(Error::Checkpoint(format!(
                "{} holds a different model: {:?}",
                manager.dir().display(),
                saved.model
            )));
        }
    }
    manager.save_params(&params)?;

    let first_step = match manager.restore(&mut vs, Some(&mut optimizer))? {
        Some(step) => step + 1,
        None => {
            tracing::info!("Initializing from scratch.");
            1
        }
    };

    let mut observer = Observer::default().with(Box::<TracingReporter>::default());
    if !training_params.no_progress {
        observer = observer.with(Box::<PbProgressReporter>::default());
    }
    if let Some(tensorboard_dir) = &training_params.tensorboard_dir {
        observer = observer.with(Box::new(TensorboardReporter::new(tensorboard_dir)));
    }

    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(training_params.dataloader_rng_seed);
    train_dataloader.shuffle(&mut rng);

    let learn_config = LearnConfig::new(&model_args, &training_params);
    train_model(
        &learn_config,
        run_name,
        first_step,
        &mut train_dataloader,
        valid_dataloader.as_mut(),
        &mut rng,
        &vs,
        model.as_ref(),
        &mut optimizer,
        &mut manager,
        &mut observer,
        stop,
    )
}

/// Run one optimization step on `batch`.
///
/// # Returns
/// the loss before the update. A NaN or infinite loss is an error and the
/// weights are left untouched.
pub fn train_step(
    model: &dyn SummarizationModel,
    batch: &Batch,
    loss_config: &LossConfig,
    optimizer: &mut Adagrad,
) -> Result<f64> {
    let output = model.forward_batch(batch);
    let loss = total_loss(batch, &output, loss_config);
    let value = loss.double_value(&[]);
    if !value.is_finite() {
        return Err(Error::NonFiniteLoss(value));
    }
    optimizer.backward_step(&loss);
    Ok(value)
}

/// Train the model from `first_step` up to `learn_config.max_steps`.
///
/// A checkpoint is saved every `checkpoints_save_steps` steps, followed by an
/// estimation of the validation loss when there is a validation loader, and
/// at the last step. When a step fails, a checkpoint is saved before
/// returning the error.
///
/// `stop` is checked before each step. Once raised, the last trained step is
/// saved and [`Error::Interrupted`] is returned.
///
/// # Returns
/// the last trained step.
#[allow(clippy::too_many_arguments)]
pub fn train_model<R: Rng>(
    learn_config: &LearnConfig,
    run_name: String,
    first_step: usize,
    train_dataloader: &mut Loader,
    mut valid_dataloader: Option<&mut Loader>,
    rng: &mut R,
    vs: &VarStore,
    model: &dyn SummarizationModel,
    optimizer: &mut Adagrad,
    manager: &mut CheckpointManager,
    observer: &mut impl ProgressReporter,
    stop: &AtomicBool,
) -> Result<usize> {
    let LearnConfig {
        max_steps,
        checkpoints_save_steps,
        loss_estimation_steps,
        loss,
    } = *learn_config;

    if checkpoints_save_steps == 0 {
        return Err(Error::InvalidConfig(
            "steps between checkpoints must be positive".into(),
        ));
    }
    if first_step > max_steps {
        tracing::info!(
            "checkpoint is at step {}, nothing to do (max steps: {})",
            first_step - 1,
            max_steps
        );
        return Ok(first_step - 1);
    }

    observer.train_start(run_name, first_step, max_steps);

    let mut step = first_step;
    let result = loop {
        if stop.load(Ordering::SeqCst) {
            let last = step - 1;
            tracing::warn!("interrupted, saving step {}", last);
            match manager.save(last, vs, optimizer) {
                Ok(path) => {
                    observer.checkpoint_saved(last, &path);
                    break Err(Error::Interrupted(last));
                }
                Err(e) => break Err(e),
            }
        }

        // get a batch - reshuffle if necessary
        let batch = match train_dataloader.next_batch() {
            Some(batch) => batch,
            None => {
                train_dataloader.shuffle(rng);
                match train_dataloader.next_batch() {
                    Some(batch) => batch,
                    None => break Err(Error::EmptyDataset),
                }
            }
        };

        let start = Instant::now();
        let loss_value = match train_step(model, &batch, &loss, optimizer) {
            Ok(loss_value) => loss_value,
            Err(e) => {
                tracing::error!("step {} failed: {}", step, e);
                match manager.save(step, vs, optimizer) {
                    Ok(path) => observer.checkpoint_saved(step, &path),
                    Err(save_err) => {
                        tracing::error!("cannot save checkpoint for step {}: {}", step, save_err)
                    }
                }
                break Err(e);
            }
        };
        observer.step_end(step, loss_value, start.elapsed());

        if step == max_steps {
            let path = manager.save(step, vs, optimizer)?;
            observer.checkpoint_saved(step, &path);
            break Ok(step);
        } else if step % checkpoints_save_steps == 0 {
            let path = manager.save(step, vs, optimizer)?;
            observer.checkpoint_saved(step, &path);

            if let Some(valid_dataloader) = valid_dataloader.as_deref_mut() {
                let mut estimator = LossEstimator::new(valid_dataloader, loss);
                if let Some(valid_loss) =
                    estimator.estimate_loss(model, loss_estimation_steps, &mut *observer)
                {
                    observer.estimate_end(step, valid_loss);
                }
            }
        }

        step += 1;
    };

    observer.train_end();
    result
}

/// Summarize each line of `params.input` with the latest checkpoint.
///
/// The output has one line per input line; blank articles get a blank
/// summary.
///
/// # Returns
/// the number of summarized articles.
pub fn summarize(device: tch::Device, params: &SummarizeParameters) -> Result<usize> {
    if !params.checkpoint_dir.is_dir() {
        return Err(Error::Checkpoint(format!(
            "{} does not exist",
            params.checkpoint_dir.display()
        )));
    }
    let vocab = Vocab::from_file(&params.vocab_path)?;
    let manager = CheckpointManager::new(&params.checkpoint_dir, 1)?;
    let saved: SavedParams = manager.load_params()?;
    if saved.model.vocab_size != vocab.size() as i64 {
        return Err(Error::Vocab(format!(
            "{} words but the model was trained with {}",
            vocab.size(),
            saved.model.vocab_size
        )));
    }

    let mut vs = VarStore::new(device);
    let model = create_model(&vs, saved.model.clone());
    if manager.restore(&mut vs, None)?.is_none() {
        return Err(Error::Checkpoint(format!(
            "no checkpoint in {}",
            params.checkpoint_dir.display()
        )));
    }
    vs.freeze();

    let lines = read_lines(&params.input)?;
    let (positions, articles): (Vec<usize>, Vec<String>) = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.split_whitespace().next().is_some())
        .map(|(i, line)| (i, line.clone()))
        .unzip();

    let mut loader = Loader::new(
        &articles,
        &[],
        &vocab,
        saved.max_enc_len,
        params.max_dec_len,
        params.batch_size,
        device,
    )?
    .keep_last();

    let mut summaries = Vec::with_capacity(articles.len());
    while let Some(batch) = loader.next_batch() {
        let decoded = model.greedy_decode(&batch, params.max_dec_len as i64)?;
        for (ids, oovs) in decoded.iter().zip(batch.article_oovs.iter()) {
            summaries.push(vocab.decode(ids, oovs).iter().join(" "));
        }
        tracing::debug!("summarized {} of {}", summaries.len(), articles.len());
    }

    let mut output = vec![String::new(); lines.len()];
    for (position, summary) in positions.into_iter().zip(summaries) {
        output[position] = summary;
    }
    write_lines(&params.output, &output)?;
    tracing::info!(
        "wrote {} summaries to {}",
        articles.len(),
        params.output.display()
    );

    Ok(articles.len())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use std::sync::Arc;

    use clap::Parser;
    use serial_test::serial;
    use tch::{Kind, Tensor};

    use super::*;
    use crate::model::PgnOutput;

    /// Model whose final distributions are all NaN.
    struct NanModel {
        config: PgnConfig,
        weight: Tensor,
    }

    impl NanModel {
        fn new(vs: &VarStore, vocab_size: usize) -> Self {
            Self {
                config: small_model().to_config(vocab_size),
                weight: vs.root().var("weight", &[3], tch::nn::Init::Const(0.5)),
            }
        }
    }

    impl SummarizationModel for NanModel {
        fn forward_batch(&self, batch: &Batch) -> PgnOutput {
            let b = batch.size() as i64;
            let steps = batch.dec_input.size()[1];
            let enc_len = batch.enc_input.size()[1];
            let v = self.config.vocab_size;
            let options = (Kind::Float, tch::Device::Cpu);
            PgnOutput {
                vocab_logits: Tensor::zeros([b, steps, v], options),
                final_dists: Tensor::full([b, steps, v + batch.max_oov_len], f64::NAN, options)
                    * self.weight.sum(Kind::Float),
                attentions: Tensor::zeros([b, steps, enc_len], options),
                coverages: Tensor::zeros([b, steps, enc_len], options),
            }
        }

        fn greedy_decode(&self, batch: &Batch, _max_len: i64) -> Result<Vec<Vec<i64>>> {
            Ok(vec![vec![]; batch.size()])
        }

        fn config(&self) -> &PgnConfig {
            &self.config
        }
    }

    /// Raises the stop flag once `step` is done.
    struct StopAfter {
        step: usize,
        flag: Arc<AtomicBool>,
    }

    impl crate::estimate::ProgressReporter for StopAfter {}

    impl ProgressReporter for StopAfter {
        fn step_end(&mut self, step: usize, _loss: f64, _elapsed: std::time::Duration) {
            if step == self.step {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    const ARTICLES: &str = "a b c d
b c e
d e a a
c a b
";
    const ABSTRACTS: &str = "a b
c e
d a
b
";

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgnrs_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn small_model() -> PgnArgs {
        PgnArgs {
            embed_size: 8,
            enc_units: 4,
            attn_units: 6,
            ..Default::default()
        }
    }

    fn training_params(dir: &Path, max_steps: usize) -> TrainingParameters {
        let arg = |name: &str| dir.join(name).display().to_string();
        TrainingParameters::try_parse_from([
            "train".to_string(),
            "--train-x".to_string(),
            arg("x.txt"),
            "--train-y".to_string(),
            arg("y.txt"),
            "--valid-x".to_string(),
            arg("x.txt"),
            "--valid-y".to_string(),
            arg("y.txt"),
            "--vocab-path".to_string(),
            arg("vocab.txt"),
            "--checkpoint-dir".to_string(),
            arg("ckpt"),
            "--batch-size".to_string(),
            "2".to_string(),
            "--max-steps".to_string(),
            max_steps.to_string(),
            "--checkpoints-save-steps".to_string(),
            "2".to_string(),
            "--max-to-keep".to_string(),
            "2".to_string(),
            "--loss-estimation-steps".to_string(),
            "2".to_string(),
            "--no-progress".to_string(),
        ])
        .unwrap()
    }

    fn write_dataset(dir: &Path) {
        fs::write(dir.join("x.txt"), ARTICLES).unwrap();
        fs::write(dir.join("y.txt"), ABSTRACTS).unwrap();
        build_vocab(&VocabParameters {
            inputs: vec![dir.join("x.txt"), dir.join("y.txt")],
            vocab_path: dir.join("vocab.txt"),
            vocab_size: 8,
        })
        .unwrap();
    }

    #[test]
    fn test_build_vocab() {
        let dir = temp_dir("actions_vocab");
        write_dataset(&dir);
        let vocab = Vocab::from_file(dir.join("vocab.txt")).unwrap();
        // 4 special tokens + the 4 most frequent words
        assert_eq!(vocab.size(), 8);
        assert_eq!(vocab.word_to_id("a"), 4);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_train_step_decreases_loss() {
        tch::manual_seed(3);
        let vocab = Vocab::build(["a b c d e"], 9).unwrap();
        let articles = vec!["a b c".to_string(), "d e a".to_string()];
        let abstracts = vec!["a c".to_string(), "e".to_string()];
        let mut loader =
            Loader::new(&articles, &abstracts, &vocab, 10, 10, 2, tch::Device::Cpu).unwrap();
        let batch = loader.next_batch().unwrap();

        let vs = VarStore::new(tch::Device::Cpu);
        let model = create_model(&vs, small_model().to_config(vocab.size()));
        let mut optimizer = Adagrad::new(
            &vs,
            AdagradConfig {
                lr: 0.15,
                clip_norm: Some(2.),
                ..Default::default()
            },
        );
        let loss_config = LossConfig {
            pointer_gen: true,
            is_coverage: true,
            cov_loss_wt: 1.,
        };

        let first = train_step(model.as_ref(), &batch, &loss_config, &mut optimizer).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = train_step(model.as_ref(), &batch, &loss_config, &mut optimizer).unwrap();
        }
        assert!(first.is_finite());
        assert!(last < first);
    }

    #[test]
    #[serial]
    fn test_train_model_saves_and_stops() {
        let dir = temp_dir("actions_loop");
        write_dataset(&dir);
        let params = training_params(&dir, 5);
        let vocab = Vocab::from_file(&params.vocab_path).unwrap();
        let mut loader = Loader::from_files(
            &params.train_x,
            Some(&params.train_y),
            &vocab,
            params.max_enc_len,
            params.max_dec_len,
            params.batch_size,
            tch::Device::Cpu,
        )
        .unwrap();

        tch::manual_seed(1);
        let vs = VarStore::new(tch::Device::Cpu);
        let model = create_model(&vs, small_model().to_config(vocab.size()));
        let mut optimizer = Adagrad::new(&vs, AdagradConfig::default());
        let mut manager = CheckpointManager::new(&params.checkpoint_dir, 10).unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);

        let mut learn_config = LearnConfig::new(&small_model(), &params);
        let last = train_model(
            &learn_config,
            "test".to_string(),
            1,
            &mut loader,
            None,
            &mut rng,
            &vs,
            model.as_ref(),
            &mut optimizer,
            &mut manager,
            &mut Observer::default(),
            &AtomicBool::new(false),
        )
        .unwrap();

        // 2 batches per pass: the loader is reshuffled twice
        assert_eq!(last, 5);
        assert_eq!(manager.steps(), &[2, 4, 5]);

        learn_config.checkpoints_save_steps = 0;
        assert!(train_model(
            &learn_config,
            "test".to_string(),
            1,
            &mut loader,
            None,
            &mut rng,
            &vs,
            model.as_ref(),
            &mut optimizer,
            &mut manager,
            &mut Observer::default(),
            &AtomicBool::new(false),
        )
        .is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_train_model_empty_dataset() {
        let dir = temp_dir("actions_empty");
        let vocab = Vocab::build(["a b"], 6).unwrap();
        // a single example never fills a batch of 2
        let mut loader = Loader::new(
            &["a b".to_string()],
            &["a".to_string()],
            &vocab,
            10,
            10,
            2,
            tch::Device::Cpu,
        )
        .unwrap();
        let vs = VarStore::new(tch::Device::Cpu);
        let model = create_model(&vs, small_model().to_config(vocab.size()));
        let mut optimizer = Adagrad::new(&vs, AdagradConfig::default());
        let mut manager = CheckpointManager::new(&dir, 1).unwrap();
        let learn_config = LearnConfig {
            max_steps: 3,
            checkpoints_save_steps: 1,
            loss_estimation_steps: 1,
            loss: LossConfig {
                pointer_gen: true,
                is_coverage: true,
                cov_loss_wt: 1.,
            },
        };

        let result = train_model(
            &learn_config,
            "empty".to_string(),
            1,
            &mut loader,
            None,
            &mut rand_chacha::ChaCha8Rng::seed_from_u64(0),
            &vs,
            model.as_ref(),
            &mut optimizer,
            &mut manager,
            &mut Observer::default(),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(Error::EmptyDataset)));
        assert_eq!(manager.latest_step(), None);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_train_model_failing_step_saves_untouched_weights() {
        let dir = temp_dir("actions_nan");
        let vocab = Vocab::build(["a b c"], 7).unwrap();
        let articles = vec!["a b".to_string(), "c a".to_string()];
        let abstracts = vec!["a".to_string(), "c".to_string()];
        let mut loader =
            Loader::new(&articles, &abstracts, &vocab, 10, 10, 2, tch::Device::Cpu).unwrap();

        let vs = VarStore::new(tch::Device::Cpu);
        let model = NanModel::new(&vs, vocab.size());
        let before = model.weight.copy();
        let mut optimizer = Adagrad::new(&vs, AdagradConfig::default());
        let mut manager = CheckpointManager::new(&dir, 3).unwrap();
        let learn_config = LearnConfig {
            max_steps: 10,
            checkpoints_save_steps: 5,
            loss_estimation_steps: 1,
            loss: LossConfig {
                pointer_gen: true,
                is_coverage: false,
                cov_loss_wt: 1.,
            },
        };

        let result = train_model(
            &learn_config,
            "nan".to_string(),
            4,
            &mut loader,
            None,
            &mut rand_chacha::ChaCha8Rng::seed_from_u64(0),
            &vs,
            &model,
            &mut optimizer,
            &mut manager,
            &mut Observer::default(),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(Error::NonFiniteLoss(_))));
        assert_eq!(manager.latest_step(), Some(4));
        assert!(manager.weights_path(4).exists());
        assert!(model.weight.allclose(&before, 1e-9, 1e-9, false));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_train_model_failing_step_keeps_step_error_when_save_fails() {
        let dir = temp_dir("actions_nan_nosave");
        let vocab = Vocab::build(["a b c"], 7).unwrap();
        let articles = vec!["a b".to_string(), "c a".to_string()];
        let abstracts = vec!["a".to_string(), "c".to_string()];
        let mut loader =
            Loader::new(&articles, &abstracts, &vocab, 10, 10, 2, tch::Device::Cpu).unwrap();

        let vs = VarStore::new(tch::Device::Cpu);
        let model = NanModel::new(&vs, vocab.size());
        let mut optimizer = Adagrad::new(&vs, AdagradConfig::default());
        let mut manager = CheckpointManager::new(&dir, 3).unwrap();
        // checkpoints can no longer be written
        fs::remove_dir_all(&dir).unwrap();

        let learn_config = LearnConfig {
            max_steps: 10,
            checkpoints_save_steps: 5,
            loss_estimation_steps: 1,
            loss: LossConfig {
                pointer_gen: true,
                is_coverage: false,
                cov_loss_wt: 1.,
            },
        };

        let result = train_model(
            &learn_config,
            "nan".to_string(),
            1,
            &mut loader,
            None,
            &mut rand_chacha::ChaCha8Rng::seed_from_u64(0),
            &vs,
            &model,
            &mut optimizer,
            &mut manager,
            &mut Observer::default(),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(Error::NonFiniteLoss(_))));
        assert_eq!(manager.latest_step(), None);
    }

    #[test]
    #[serial]
    fn test_train_model_stops_when_interrupted() {
        let dir = temp_dir("actions_stop");
        write_dataset(&dir);
        let params = training_params(&dir, 10);
        let vocab = Vocab::from_file(&params.vocab_path).unwrap();
        let mut loader = Loader::from_files(
            &params.train_x,
            Some(&params.train_y),
            &vocab,
            params.max_enc_len,
            params.max_dec_len,
            params.batch_size,
            tch::Device::Cpu,
        )
        .unwrap();

        tch::manual_seed(2);
        let vs = VarStore::new(tch::Device::Cpu);
        let model = create_model(&vs, small_model().to_config(vocab.size()));
        let mut optimizer = Adagrad::new(&vs, AdagradConfig::default());
        let mut manager = CheckpointManager::new(&params.checkpoint_dir, 5).unwrap();
        let learn_config = LearnConfig {
            checkpoints_save_steps: 100,
            ..LearnConfig::new(&small_model(), &params)
        };

        let flag = Arc::new(AtomicBool::new(false));
        let mut reporter = StopAfter {
            step: 3,
            flag: flag.clone(),
        };
        let result = train_model(
            &learn_config,
            "stop".to_string(),
            1,
            &mut loader,
            None,
            &mut rand_chacha::ChaCha8Rng::seed_from_u64(0),
            &vs,
            model.as_ref(),
            &mut optimizer,
            &mut manager,
            &mut reporter,
            &flag,
        );
        assert!(matches!(result, Err(Error::Interrupted(3))));
        assert_eq!(manager.steps(), &[3]);

        // the saved step resumes where it stopped
        let mut vs2 = VarStore::new(tch::Device::Cpu);
        let _model2 = create_model(&vs2, small_model().to_config(vocab.size()));
        let manager = CheckpointManager::new(&params.checkpoint_dir, 5).unwrap();
        assert_eq!(manager.restore(&mut vs2, None).unwrap(), Some(3));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_train_resume_and_summarize() {
        let dir = temp_dir("actions_e2e");
        write_dataset(&dir);

        let last = train(
            tch::Device::Cpu,
            "e2e".to_string(),
            small_model(),
            training_params(&dir, 3),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(last, 3);

        // resumes after step 3
        let last = train(
            tch::Device::Cpu,
            "e2e".to_string(),
            small_model(),
            training_params(&dir, 6),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(last, 6);
        let manager = CheckpointManager::new(dir.join("ckpt"), 2).unwrap();
        assert_eq!(manager.steps(), &[4, 6]);

        // nothing left to do
        let last = train(
            tch::Device::Cpu,
            "e2e".to_string(),
            small_model(),
            training_params(&dir, 6),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(last, 6);

        // a different architecture cannot reuse the checkpoints
        let other = PgnArgs {
            enc_units: 5,
            ..small_model()
        };
        assert!(train(
            tch::Device::Cpu,
            "e2e".to_string(),
            other,
            training_params(&dir, 8),
            &AtomicBool::new(false),
        )
        .is_err());

        fs::write(dir.join("test.txt"), "a b z\n\nc d\n").unwrap();
        let params = SummarizeParameters {
            input: dir.join("test.txt"),
            output: dir.join("summaries.txt"),
            vocab_path: dir.join("vocab.txt"),
            checkpoint_dir: dir.join("ckpt"),
            batch_size: 32,
            max_dec_len: 5,
        };
        assert_eq!(summarize(tch::Device::Cpu, &params).unwrap(), 2);
        let output = fs::read_to_string(dir.join("summaries.txt")).unwrap();
        let output: Vec<&str> = output.lines().collect();
        assert_eq!(output.len(), 3);
        assert_eq!(output[1], "");
        assert!(output
            .iter()
            .all(|line| line.split_whitespace().count() <= 5));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_summarize_without_checkpoint() {
        let dir = temp_dir("actions_no_ckpt");
        let params = SummarizeParameters {
            input: dir.join("test.txt"),
            output: dir.join("summaries.txt"),
            vocab_path: dir.join("vocab.txt"),
            checkpoint_dir: dir.join("missing"),
            batch_size: 2,
            max_dec_len: 5,
        };
        assert!(matches!(
            summarize(tch::Device::Cpu, &params),
            Err(Error::Checkpoint(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }
}
