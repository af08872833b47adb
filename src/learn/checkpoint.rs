use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tch::nn::VarStore;
use tch::Tensor;

use crate::error::{Error, Result};
use crate::learn::optim::Adagrad;

const STATE_FILE: &str = "checkpoint.json";
const PARAMS_FILE: &str = "params.json";

/// Content of `checkpoint.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Step of the most recent checkpoint.
    pub latest_step: Option<usize>,
    /// Steps of the kept checkpoints, oldest first.
    pub steps: Vec<usize>,
}

/// Saves and restores model weights and optimizer state.
///
/// ```text
/// {dir}/
///   ckpt-{step}.safetensors        weights
///   ckpt-{step}.optim.safetensors  optimizer accumulators
///   checkpoint.json                kept steps
///   params.json                    model/training parameters
/// ```
///
/// At most `max_to_keep` checkpoints are kept; older ones are deleted.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
    state: CheckpointState,
}

impl CheckpointManager {
    /// Open (and create if needed) a checkpoint directory.
    pub fn new<P: AsRef<Path>>(dir: P, max_to_keep: usize) -> Result<Self> {
        if max_to_keep == 0 {
            return Err(Error::InvalidConfig(
                "checkpoints to keep must be positive".into(),
            ));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let state_path = dir.join(STATE_FILE);
        let state = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            CheckpointState::default()
        };

        Ok(Self {
            dir,
            max_to_keep,
            state,
        })
    }

    /// The checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Step of the most recent checkpoint.
    pub fn latest_step(&self) -> Option<usize> {
        self.state.latest_step
    }

    /// Steps of the kept checkpoints, oldest first.
    pub fn steps(&self) -> &[usize] {
        &self.state.steps
    }

    /// Path of the weights of a checkpoint.
    pub fn weights_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("ckpt-{}.safetensors", step))
    }

    fn optim_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("ckpt-{}.optim.safetensors", step))
    }

    /// Save the weights and the optimizer state at `step`.
    pub fn save(&mut self, step: usize, vs: &VarStore, optimizer: &Adagrad) -> Result<PathBuf> {
        let weights_path = self.weights_path(step);
        vs.save(&weights_path)?;
        Tensor::write_safetensors(&optimizer.state(), self.optim_path(step))?;

        self.state.steps.retain(|&s| s != step);
        self.state.steps.push(step);
        self.state.latest_step = Some(step);

        while self.state.steps.len() > self.max_to_keep {
            let old = self.state.steps.remove(0);
            for path in [self.weights_path(old), self.optim_path(old)] {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("cannot remove {}: {}", path.display(), e);
                }
            }
        }

        self.write_state()?;
        tracing::debug!("saved checkpoint for step {} to {}", step, weights_path.display());
        Ok(weights_path)
    }

    fn write_state(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(self.dir.join(STATE_FILE), json)?;
        Ok(())
    }

    /// Restore the most recent checkpoint.
    ///
    /// # Returns
    /// the step of the restored checkpoint, `None` if there is none.
    pub fn restore(&self, vs: &mut VarStore, optimizer: Option<&mut Adagrad>) -> Result<Option<usize>> {
        let step = match self.state.latest_step {
            Some(step) => step,
            None => return Ok(None),
        };

        let weights_path = self.weights_path(step);
        if !weights_path.exists() {
            return Err(Error::Checkpoint(format!(
                "{} is missing",
                weights_path.display()
            )));
        }
        vs.load(&weights_path)?;

        if let Some(optimizer) = optimizer {
            let state = Tensor::read_safetensors(self.optim_path(step))?;
            optimizer.load_state(state)?;
        }

        tracing::info!("restored checkpoint for step {}", step);
        Ok(Some(step))
    }

    /// Save the parameters the model was built with.
    pub fn save_params<T: Serialize>(&self, params: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(params)?;
        fs::write(self.dir.join(PARAMS_FILE), json)?;
        Ok(())
    }

    /// Load the parameters saved by [`CheckpointManager::save_params`].
    pub fn load_params<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join(PARAMS_FILE);
        if !path.exists() {
            return Err(Error::Checkpoint(format!("{} is missing", path.display())));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use tch::{Device, Kind};

    use super::*;
    use crate::learn::optim::AdagradConfig;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgnrs_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_and_restore() {
        let dir = temp_dir("ckpt_restore");
        let vs = VarStore::new(Device::Cpu);
        let x = vs.root().var("x", &[2], tch::nn::Init::Const(1.));
        let mut opt = Adagrad::new(&vs, AdagradConfig::default());
        opt.backward_step(&(&x * 3.).sum(Kind::Float));

        let mut manager = CheckpointManager::new(&dir, 2).unwrap();
        assert_eq!(manager.latest_step(), None);
        manager.save(7, &vs, &opt).unwrap();

        let mut vs2 = VarStore::new(Device::Cpu);
        let x2 = vs2.root().var("x", &[2], tch::nn::Init::Const(0.));
        let mut opt2 = Adagrad::new(&vs2, AdagradConfig::default());

        // a fresh manager reads checkpoint.json
        let manager = CheckpointManager::new(&dir, 2).unwrap();
        let step = manager.restore(&mut vs2, Some(&mut opt2)).unwrap();
        assert_eq!(step, Some(7));
        assert!(x2.allclose(&x, 1e-6, 1e-6, false));
        let acc: Vec<f32> = opt2.state()[0].1.shallow_clone().try_into().unwrap();
        // 0.1 + 3²
        assert!((acc[0] - 9.1).abs() < 1e-5);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_max_to_keep() {
        let dir = temp_dir("ckpt_keep");
        let vs = VarStore::new(Device::Cpu);
        let _x = vs.root().var("x", &[1], tch::nn::Init::Const(1.));
        let opt = Adagrad::new(&vs, AdagradConfig::default());

        let mut manager = CheckpointManager::new(&dir, 2).unwrap();
        for step in [10, 20, 30] {
            manager.save(step, &vs, &opt).unwrap();
        }
        assert_eq!(manager.steps(), &[20, 30]);
        assert_eq!(manager.latest_step(), Some(30));
        assert!(!manager.weights_path(10).exists());
        assert!(manager.weights_path(20).exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_restore_without_checkpoint() {
        let dir = temp_dir("ckpt_empty");
        let mut vs = VarStore::new(Device::Cpu);
        let manager = CheckpointManager::new(&dir, 1).unwrap();
        assert_eq!(manager.restore(&mut vs, None).unwrap(), None);
        assert!(manager.load_params::<CheckpointState>().is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_params_round_trip() {
        let dir = temp_dir("ckpt_params");
        let manager = CheckpointManager::new(&dir, 1).unwrap();
        let state = CheckpointState {
            latest_step: Some(3),
            steps: vec![3],
        };
        manager.save_params(&state).unwrap();
        assert_eq!(manager.load_params::<CheckpointState>().unwrap(), state);
        fs::remove_dir_all(&dir).unwrap();
    }
}
