use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layers::param::Parameter;
use crate::math::tensor::Tensor;

/// Training vs. inference behaviour of a trainable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Train,
    /// No activations are cached; backward passes are rejected.
    Eval,
}

/// Serialized parameter tensors keyed by parameter name.
pub type StateDict = BTreeMap<String, Tensor>;

/// Anything the trainer can optimize: exposes parameters, a mode switch and
/// serializable state.
pub trait Trainable {
    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    fn state_dict(&self) -> StateDict {
        self.parameters()
            .into_iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    /// Replaces every parameter from `state`. All entries are checked before
    /// any parameter is written, so a failed load leaves the unit untouched.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for p in self.parameters() {
            let stored = state
                .get(&p.name)
                .ok_or_else(|| Error::MissingParameter(p.name.clone()))?;
            if stored.shape() != p.value.shape() {
                return Err(Error::shape_mismatch(p.value.shape(), stored.shape()));
            }
        }
        for p in self.parameters_mut() {
            if let Some(stored) = state.get(&p.name) {
                p.value = stored.clone();
            }
        }
        Ok(())
    }
}

/// The segmentation predictor ("generator").
pub trait Segmenter: Trainable {
    /// Unnormalized per-class logits, `[N, C, H, W]`.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Accumulates parameter gradients from dL/d(logits).
    fn backward(&mut self, grad_logits: &Tensor) -> Result<()>;

    fn num_classes(&self) -> usize;
}

/// The adversarial critic ("discriminator"), conditioned on the input image.
pub trait Critic: Trainable {
    /// One unnormalized real-vs-fake logit per sample, `[N, 1]`.
    fn forward(&mut self, images: &Tensor, masks: &Tensor) -> Result<Tensor>;

    /// Accumulates parameter gradients from dL/d(scores) and returns
    /// dL/d(masks) so the generator objective can flow through the critic.
    fn backward(&mut self, grad_scores: &Tensor) -> Result<Tensor>;
}
