use std::path::Path;
use std::time::Duration;

use tensorboard_rs::summary_writer::SummaryWriter;

use crate::estimate;
use crate::learn::ProgressReporter;

/// Reporter for Tensorboard
pub struct TensorboardReporter {
    writer: Option<SummaryWriter>,
    base_dir: String,
}

impl TensorboardReporter {
    /// Create a new TensorboardReporter
    pub fn new(base_dir: &str) -> Self {
        Self {
            writer: None,
            base_dir: base_dir.to_string(),
        }
    }
}

impl estimate::ProgressReporter for TensorboardReporter {}

impl ProgressReporter for TensorboardReporter {
    fn train_start(&mut self, run_name: String, _first_step: usize, max_steps: usize) {
        let run_name = format!("run_{}_{}", run_name, max_steps);
        let logdir = Path::new(&self.base_dir).join(run_name);
        // create a new writer
        self.writer = Some(SummaryWriter::new(&logdir));
    }

    fn step_end(&mut self, step: usize, loss: f64, elapsed: Duration) {
        if let Some(writer) = &mut self.writer {
            writer.add_scalar("train_loss", loss as f32, step);
            writer.add_scalar("step_time", elapsed.as_secs_f32(), step);
        }
    }

    fn estimate_end(&mut self, step: usize, valid_loss: f64) {
        if let Some(writer) = &mut self.writer {
            writer.add_scalar("valid_loss", valid_loss as f32, step);
        }
    }

    fn train_end(&mut self) {
        if let Some(writer) = &mut self.writer {
            writer.flush();
        }
        // close the writer
        self.writer = None;
    }
}
