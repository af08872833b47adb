use tch::nn::VarStore;
use tch::Tensor;

use crate::error::{Error, Result};

/// Adagrad configuration.
#[derive(Debug, Clone, Copy)]
pub struct AdagradConfig {
    /// Learning rate.
    pub lr: f64,
    /// Starting value of the squared-gradient accumulators.
    pub initial_accumulator_value: f64,
    /// Added to the root of the accumulators.
    pub eps: f64,
    /// Each gradient is rescaled to at most this norm.
    pub clip_norm: Option<f64>,
}

impl Default for AdagradConfig {
    fn default() -> Self {
        Self {
            lr: 0.001,
            initial_accumulator_value: 0.1,
            eps: 1e-7,
            clip_norm: None,
        }
    }
}

/// Adagrad over the trainable variables of a [`VarStore`].
///
/// `acc += g²; θ -= lr · g / (√acc + eps)`
#[derive(Debug)]
pub struct Adagrad {
    config: AdagradConfig,
    /// Trainable variables sorted by name.
    variables: Vec<(String, Tensor)>,
    accumulators: Vec<Tensor>,
}

impl Adagrad {
    /// Create the optimizer and its accumulators.
    pub fn new(vs: &VarStore, config: AdagradConfig) -> Self {
        let mut variables: Vec<(String, Tensor)> = vs
            .variables()
            .into_iter()
            .filter(|(_, t)| t.requires_grad())
            .collect();
        variables.sort_by(|(a, _), (b, _)| a.cmp(b));

        let accumulators = tch::no_grad(|| {
            variables
                .iter()
                .map(|(_, t)| t.full_like(config.initial_accumulator_value))
                .collect()
        });

        Self {
            config,
            variables,
            accumulators,
        }
    }

    /// Reset the gradients of all the variables.
    pub fn zero_grad(&mut self) {
        for (_, variable) in self.variables.iter_mut() {
            variable.zero_grad();
        }
    }

    /// Apply one update from the current gradients.
    pub fn step(&mut self) {
        let AdagradConfig {
            lr, eps, clip_norm, ..
        } = self.config;

        tch::no_grad(|| {
            for ((_, variable), acc) in self.variables.iter_mut().zip(self.accumulators.iter_mut())
            {
                let grad = variable.grad();
                if !grad.defined() {
                    continue;
                }
                let grad = match clip_norm {
                    Some(clip_norm) => clip_by_norm(&grad, clip_norm),
                    None => grad,
                };
                *acc += &grad * &grad;
                let update = grad * lr / (acc.sqrt() + eps);
                *variable -= update;
            }
        });
    }

    /// Zero the gradients, back-propagate `loss` and apply an update.
    pub fn backward_step(&mut self, loss: &Tensor) {
        self.zero_grad();
        loss.backward();
        self.step();
    }

    /// Accumulators named after their variables.
    pub fn state(&self) -> Vec<(String, Tensor)> {
        self.variables
            .iter()
            .zip(self.accumulators.iter())
            .map(|((name, _), acc)| (name.clone(), acc.shallow_clone()))
            .collect()
    }

    /// Restore accumulators saved by [`Adagrad::state`].
    pub fn load_state(&mut self, state: Vec<(String, Tensor)>) -> Result<()> {
        let mut state: std::collections::HashMap<String, Tensor> = state.into_iter().collect();
        for ((name, _), acc) in self.variables.iter().zip(self.accumulators.iter_mut()) {
            let saved = state.remove(name).ok_or_else(|| {
                Error::Checkpoint(format!("missing optimizer state for {}", name))
            })?;
            if saved.size() != acc.size() {
                return Err(Error::Checkpoint(format!(
                    "optimizer state for {} has shape {:?}, expected {:?}",
                    name,
                    saved.size(),
                    acc.size()
                )));
            }
            tch::no_grad(|| acc.copy_(&saved));
        }
        Ok(())
    }
}

/// Rescale `grad` so that its L2 norm is at most `clip_norm`.
pub fn clip_by_norm(grad: &Tensor, clip_norm: f64) -> Tensor {
    let norm = grad.norm().double_value(&[]);
    if norm > clip_norm {
        grad * (clip_norm / norm)
    } else {
        grad.shallow_clone()
    }
}
