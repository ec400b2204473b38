use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::network::critic::ConditionalCritic;
use crate::network::network::PixelNet;

/// Serializable description of the reference generator/critic pair.
///
/// Stored inside `TrainConfig` so a resumed run rebuilds exactly the
/// architecture whose parameters the checkpoint holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Widths of the generator's hidden pointwise layers (input → output).
    pub hidden_channels: Vec<usize>,
    pub hidden_activation: ActivationFunction,
    /// Width of each critic branch before pooling.
    pub critic_features: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec {
            hidden_channels: vec![16, 16],
            hidden_activation: ActivationFunction::LeakyReLU { alpha: 0.01 },
            critic_features: 16,
        }
    }
}

impl ModelSpec {
    pub fn build_generator<R: Rng + ?Sized>(&self, in_channels: usize, num_classes: usize, rng: &mut R) -> PixelNet {
        PixelNet::new(in_channels, &self.hidden_channels, num_classes, self.hidden_activation, rng)
    }

    pub fn build_critic<R: Rng + ?Sized>(&self, in_channels: usize, num_classes: usize, rng: &mut R) -> ConditionalCritic {
        ConditionalCritic::new(in_channels, num_classes, self.critic_features, rng)
    }
}
