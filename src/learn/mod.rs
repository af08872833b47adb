/// Checkpoint management.
pub mod checkpoint;
/// Logger for training.
pub mod logger;
/// Adagrad optimizer.
pub mod optim;

use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use crate::estimate;

/// A trait for reporting progress during training.
#[allow(unused_variables)]
pub trait ProgressReporter: estimate::ProgressReporter {
    /// Called before the first step.
    fn train_start(&mut self, run_name: String, first_step: usize, max_steps: usize) {}
    /// Called after each optimization step.
    fn step_end(&mut self, step: usize, loss: f64, elapsed: Duration) {}
    /// Called when a checkpoint has been written.
    fn checkpoint_saved(&mut self, step: usize, path: &Path) {}
    /// Called with the validation loss estimated at `step`.
    fn estimate_end(&mut self, step: usize, valid_loss: f64) {}
    /// Called when the training stops.
    fn train_end(&mut self) {}
}

/// Training observer.
#[derive(Default)]
pub struct Observer {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl Observer {
    /// Add a reporter to the observer.
    pub fn with(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl ProgressReporter for Observer {
    fn train_start(&mut self, run_name: String, first_step: usize, max_steps: usize) {
        for reporter in &mut self.reporters {
            reporter.train_start(run_name.clone(), first_step, max_steps);
        }
    }

    fn step_end(&mut self, step: usize, loss: f64, elapsed: Duration) {
        for reporter in &mut self.reporters {
            reporter.step_end(step, loss, elapsed);
        }
    }

    fn checkpoint_saved(&mut self, step: usize, path: &Path) {
        for reporter in &mut self.reporters {
            reporter.checkpoint_saved(step, path);
        }
    }

    fn estimate_end(&mut self, step: usize, valid_loss: f64) {
        for reporter in &mut self.reporters {
            reporter.estimate_end(step, valid_loss);
        }
    }

    fn train_end(&mut self) {
        for reporter in &mut self.reporters {
            reporter.train_end();
        }
    }
}

impl estimate::ProgressReporter for Observer {
    fn valid_loss_start(&mut self, total_valid_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.valid_loss_start(total_valid_batches);
        }
    }

    fn valid_loss_progress(&mut self, current_valid_batches: usize) {
        for reporter in &mut self.reporters {
            reporter.valid_loss_progress(current_valid_batches);
        }
    }

    fn valid_loss_end(&mut self, valid_loss: f64) {
        for reporter in &mut self.reporters {
            reporter.valid_loss_end(valid_loss);
        }
    }
}

/// Reporter writing one log line per step, through `tracing`.
#[derive(Default)]
pub struct TracingReporter;

impl estimate::ProgressReporter for TracingReporter {
    fn valid_loss_end(&mut self, valid_loss: f64) {
        tracing::info!("Valid loss {:.4}", valid_loss);
    }
}

impl ProgressReporter for TracingReporter {
    fn train_start(&mut self, run_name: String, first_step: usize, max_steps: usize) {
        tracing::info!(
            "Starting run {} at step {} (max steps: {})",
            run_name,
            first_step,
            max_steps
        );
    }

    fn step_end(&mut self, step: usize, loss: f64, elapsed: Duration) {
        tracing::info!(
            "Step {}, time {:.4}, Loss {:.4}",
            step,
            elapsed.as_secs_f64(),
            loss
        );
    }

    fn checkpoint_saved(&mut self, step: usize, path: &Path) {
        tracing::info!("Saved checkpoint for step {} ({})", step, path.display());
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key(
            "per_sec_short",
            |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:>7.1}/s", state.per_sec());
            },
        )
        .progress_chars("##-")
}

/// Progress reporter that uses the `indicatif` crate to display progress bars.
///
/// We want progress bar like: ```[198/200 35:16 < 00:21, 0.09/s]```
pub struct PbProgressReporter {
    mb: MultiProgress,
    train_bar: Option<ProgressBar>,
    estimate_bar: Option<ProgressBar>,
    last_valid_loss: Option<f64>,
}

impl Default for PbProgressReporter {
    fn default() -> Self {
        PbProgressReporter {
            mb: MultiProgress::new(),
            train_bar: None,
            estimate_bar: None,
            last_valid_loss: None,
        }
    }
}

impl ProgressReporter for PbProgressReporter {
    fn train_start(&mut self, _run_name: String, first_step: usize, max_steps: usize) {
        let train_bar = self.mb.add(ProgressBar::new(max_steps as u64));
        train_bar.set_style(bar_style(
            "{spinner:.green} TRAINING {bar:20.green/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
        ));
        train_bar.set_position(first_step.saturating_sub(1) as u64);
        train_bar.tick();
        self.train_bar = Some(train_bar);
    }

    fn step_end(&mut self, step: usize, loss: f64, _elapsed: Duration) {
        if let Some(train_bar) = &self.train_bar {
            train_bar.set_position(step as u64);
            match self.last_valid_loss {
                Some(valid_loss) => train_bar.set_message(format!(
                    "Loss: {:.4}, Valid loss: {:.4}",
                    loss, valid_loss
                )),
                None => train_bar.set_message(format!("Loss: {:.4}", loss)),
            }
        }
    }

    fn estimate_end(&mut self, _step: usize, valid_loss: f64) {
        self.last_valid_loss = Some(valid_loss);
    }

    fn train_end(&mut self) {
        if let Some(train_bar) = &self.train_bar {
            train_bar.finish(); // keep the bar
        }
        self.train_bar = None;
    }
}

impl estimate::ProgressReporter for PbProgressReporter {
    fn valid_loss_start(&mut self, total_valid_batches: usize) {
        let estimate_bar = self.mb.add(ProgressBar::new(total_valid_batches as u64));
        estimate_bar.set_style(bar_style(
            "{spinner:.green} EVAL     {bar:20.magenta/blue} [{pos:>7}/{len:7} {elapsed_precise} < {eta_precise}, {per_sec_short:.2}] {msg}",
        ));
        self.estimate_bar = Some(estimate_bar);
    }

    fn valid_loss_progress(&mut self, current_valid_batches: usize) {
        if let Some(estimate_bar) = &self.estimate_bar {
            estimate_bar.set_position(current_valid_batches as u64);
        }
    }

    fn valid_loss_end(&mut self, _valid_loss: f64) {
        if let Some(estimate_bar) = &self.estimate_bar {
            estimate_bar.finish_and_clear();
        }
        self.estimate_bar = None;
    }
}
