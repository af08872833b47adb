use crate::config::LossConfig;
use crate::data::Loader;
use crate::loss::total_loss;
use crate::model::SummarizationModel;

/// Interface for a progress reporter.
#[allow(unused_variables)]
pub trait ProgressReporter {
    /// Called at the start of the loss estimation for the validation sets.
    fn valid_loss_start(&mut self, total_valid_batches: usize) {}
    /// Called to update the progress of the loss estimation for the validation
    /// sets.
    fn valid_loss_progress(&mut self, current_valid_batches: usize) {}
    /// Called at the end of the loss estimation for the validation sets.
    fn valid_loss_end(&mut self, valid_loss: f64) {}
}

/// A progress reporter that does nothing.
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Loss estimator.
pub struct LossEstimator<'a> {
    valid_dataloader: &'a mut Loader,
    loss_config: LossConfig,
}

impl<'a> LossEstimator<'a> {
    /// Create a new loss estimator.
    pub fn new(valid_dataloader: &'a mut Loader, loss_config: LossConfig) -> Self {
        Self {
            valid_dataloader,
            loss_config,
        }
    }

    /// Estimate the loss of a model on (at most `eval_iters` batches of) the
    /// validation set.
    ///
    /// # Returns
    /// the mean loss, `None` if the loader has no complete batch.
    pub fn estimate_loss(
        &mut self,
        model: &dyn SummarizationModel,
        eval_iters: usize,
        progress_callback: &mut impl ProgressReporter,
    ) -> Option<f64> {
        let mut valid_loss = 0.0;
        let mut n_valid_batches = 0;

        progress_callback.valid_loss_start(eval_iters);

        self.valid_dataloader.rewind();
        tch::no_grad(|| {
            while let Some(batch) = self.valid_dataloader.next_batch() {
                let output = model.forward_batch(&batch);
                valid_loss += total_loss(&batch, &output, &self.loss_config).double_value(&[]);
                n_valid_batches += 1;

                if n_valid_batches % 10 == 0 {
                    progress_callback.valid_loss_progress(n_valid_batches);
                }

                if n_valid_batches >= eval_iters {
                    break;
                }
            }
        });

        if n_valid_batches == 0 {
            return None;
        }

        let valid_loss = valid_loss / n_valid_batches as f64;

        progress_callback.valid_loss_end(valid_loss);

        Some(valid_loss)
    }
}
