use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::param::Parameter;
use crate::optim::adam::Adam;
use crate::optim::sgd::Sgd;

/// A parameter-update rule with serializable internal state.
pub trait Optimizer {
    /// Applies one update from the gradients currently stored in `params`.
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn state(&self) -> OptimizerState;

    /// Restores state captured by [`Optimizer::state`]. Fails without mutating
    /// anything if `state` belongs to a different optimizer kind.
    fn load_state(&mut self, state: &OptimizerState) -> Result<()>;
}

/// Which update rule to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Snapshot of an optimizer, stored inside checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    Sgd {
        learning_rate: f64,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        step: u64,
        first_moments: Vec<Vec<f64>>,
        second_moments: Vec<Vec<f64>>,
    },
}

impl OptimizerState {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerState::Sgd { .. } => OptimizerKind::Sgd,
            OptimizerState::Adam { .. } => OptimizerKind::Adam,
        }
    }
}

/// Builds a fresh optimizer. `beta1` is only used by Adam.
pub fn build_optimizer(kind: OptimizerKind, learning_rate: f64, beta1: f64) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Adam => Box::new(Adam::new(learning_rate, beta1, 0.999, 1e-8)),
        OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
    }
}
