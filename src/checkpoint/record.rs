use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::module::{StateDict, Trainable};
use crate::optim::optimizer::OptimizerState;
use crate::optim::unit::TrainableUnit;
use crate::train::state::TrainingState;

/// Newest record layout this build reads and the one it writes.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Loop counters as written to disk.
///
/// `total_iterations` is optional so that records written before it was
/// tracked still load; see [`StoredProgress::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProgress {
    pub epoch: u64,
    pub iteration_in_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_iterations: Option<u64>,
    pub best_score: f64,
}

impl StoredProgress {
    /// Rebuilds the live state. Without a stored global counter it is
    /// reconstructed as `iteration_in_epoch + epoch_len * epoch`.
    pub fn resolve(&self, epoch_len: u64) -> TrainingState {
        TrainingState {
            epoch: self.epoch,
            iteration_in_epoch: self.iteration_in_epoch,
            total_iterations: self
                .total_iterations
                .unwrap_or(self.iteration_in_epoch + epoch_len * self.epoch),
            best_score: self.best_score,
        }
    }
}

impl From<&TrainingState> for StoredProgress {
    fn from(state: &TrainingState) -> Self {
        StoredProgress {
            epoch: state.epoch,
            iteration_in_epoch: state.iteration_in_epoch,
            total_iterations: Some(state.total_iterations),
            best_score: state.best_score,
        }
    }
}

/// Parameters and optimizer state of one trainable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub parameters: StateDict,
    pub optimizer: OptimizerState,
}

impl RoleSnapshot {
    pub fn capture<M: Trainable>(unit: &TrainableUnit<M>) -> Self {
        RoleSnapshot { parameters: unit.net.state_dict(), optimizer: unit.optimizer.state() }
    }

    /// Loads parameters and optimizer state into `unit`. The optimizer kind
    /// is checked up front so a mismatch leaves the unit untouched.
    pub fn restore<M: Trainable>(&self, unit: &mut TrainableUnit<M>) -> Result<()> {
        let live = unit.optimizer.state().kind();
        if self.optimizer.kind() != live {
            return Err(Error::OptimizerState(format!(
                "checkpoint holds {:?} state but the unit uses {:?}",
                self.optimizer.kind(),
                live
            )));
        }
        unit.net.load_state_dict(&self.parameters)?;
        unit.optimizer.load_state(&self.optimizer)
    }

    /// Name of the first parameter or optimizer field holding a NaN or an
    /// infinity, if any.
    fn first_non_finite(&self) -> Option<String> {
        for (name, tensor) in &self.parameters {
            if tensor.data().iter().any(|v| !v.is_finite()) {
                return Some(format!("parameter `{name}`"));
            }
        }
        match &self.optimizer {
            OptimizerState::Sgd { learning_rate } => {
                (!learning_rate.is_finite()).then(|| "optimizer learning_rate".to_string())
            }
            OptimizerState::Adam { learning_rate, beta1, beta2, epsilon, first_moments, second_moments, .. } => {
                if ![learning_rate, beta1, beta2, epsilon].iter().all(|v| v.is_finite()) {
                    return Some("optimizer hyperparameters".to_string());
                }
                let moments = |m: &[Vec<f64>]| m.iter().flatten().all(|v| v.is_finite());
                if !moments(first_moments) {
                    return Some("optimizer first moments".to_string());
                }
                (!moments(second_moments)).then(|| "optimizer second moments".to_string())
            }
        }
    }
}

/// One persisted training snapshot.
///
/// The discriminator block only exists when adversarial training was active
/// at save time, so loaders have to handle both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointRecord {
    GeneratorOnly {
        version: u32,
        progress: StoredProgress,
        generator: RoleSnapshot,
    },
    GeneratorAndDiscriminator {
        version: u32,
        progress: StoredProgress,
        generator: RoleSnapshot,
        discriminator: RoleSnapshot,
        gan_reg: f64,
    },
}

impl CheckpointRecord {
    pub fn generator_only(progress: StoredProgress, generator: RoleSnapshot) -> Self {
        CheckpointRecord::GeneratorOnly { version: CHECKPOINT_VERSION, progress, generator }
    }

    pub fn with_discriminator(
        progress: StoredProgress,
        generator: RoleSnapshot,
        discriminator: RoleSnapshot,
        gan_reg: f64,
    ) -> Self {
        CheckpointRecord::GeneratorAndDiscriminator {
            version: CHECKPOINT_VERSION,
            progress,
            generator,
            discriminator,
            gan_reg,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            CheckpointRecord::GeneratorOnly { version, .. }
            | CheckpointRecord::GeneratorAndDiscriminator { version, .. } => *version,
        }
    }

    pub fn progress(&self) -> &StoredProgress {
        match self {
            CheckpointRecord::GeneratorOnly { progress, .. }
            | CheckpointRecord::GeneratorAndDiscriminator { progress, .. } => progress,
        }
    }

    pub fn generator(&self) -> &RoleSnapshot {
        match self {
            CheckpointRecord::GeneratorOnly { generator, .. }
            | CheckpointRecord::GeneratorAndDiscriminator { generator, .. } => generator,
        }
    }

    /// The discriminator snapshot and the adversarial weight saved with it.
    pub fn discriminator(&self) -> Option<(&RoleSnapshot, f64)> {
        match self {
            CheckpointRecord::GeneratorOnly { .. } => None,
            CheckpointRecord::GeneratorAndDiscriminator { discriminator, gan_reg, .. } => {
                Some((discriminator, *gan_reg))
            }
        }
    }

    /// JSON has no NaN or infinity; serde_json writes them as `null`, which
    /// then fails to load. Rejects such records before they reach disk.
    pub fn ensure_finite(&self) -> Result<()> {
        let progress = self.progress();
        if !progress.best_score.is_finite() {
            return Err(Error::NonFiniteCheckpoint("best_score".to_string()));
        }
        if let Some(field) = self.generator().first_non_finite() {
            return Err(Error::NonFiniteCheckpoint(format!("generator {field}")));
        }
        if let Some((discriminator, gan_reg)) = self.discriminator() {
            if !gan_reg.is_finite() {
                return Err(Error::NonFiniteCheckpoint("gan_reg".to_string()));
            }
            if let Some(field) = discriminator.first_non_finite() {
                return Err(Error::NonFiniteCheckpoint(format!("discriminator {field}")));
            }
        }
        Ok(())
    }

    pub fn ensure_supported(&self) -> Result<()> {
        if self.version() > CHECKPOINT_VERSION {
            return Err(Error::CheckpointVersion { found: self.version(), supported: CHECKPOINT_VERSION });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tensor::Tensor;

    fn snapshot() -> RoleSnapshot {
        let mut parameters = StateDict::new();
        parameters.insert("layer0.weight".into(), Tensor::from_vec(&[1, 2], vec![0.1, -0.3]).unwrap());
        RoleSnapshot { parameters, optimizer: OptimizerState::Sgd { learning_rate: 0.1 } }
    }

    #[test]
    fn legacy_progress_reconstructs_the_global_counter() {
        let json = r#"{"epoch": 3, "iteration_in_epoch": 40, "best_score": 0.5}"#;
        let progress: StoredProgress = serde_json::from_str(json).unwrap();
        let state = progress.resolve(100);
        assert_eq!(state.total_iterations, 340);
        assert_eq!((state.epoch, state.iteration_in_epoch), (3, 40));
    }

    #[test]
    fn stored_global_counter_wins_over_reconstruction() {
        let progress = StoredProgress { epoch: 3, iteration_in_epoch: 40, total_iterations: Some(77), best_score: 0.0 };
        assert_eq!(progress.resolve(100).total_iterations, 77);
    }

    #[test]
    fn variants_are_tagged_on_disk() {
        let progress = StoredProgress { epoch: 0, iteration_in_epoch: 1, total_iterations: Some(1), best_score: 0.0 };
        let g = CheckpointRecord::generator_only(progress.clone(), snapshot());
        let gd = CheckpointRecord::with_discriminator(progress, snapshot(), snapshot(), 0.25);

        let g_json = serde_json::to_value(&g).unwrap();
        assert_eq!(g_json["kind"], "generator_only");
        assert!(g_json.get("discriminator").is_none());

        let back: CheckpointRecord = serde_json::from_value(serde_json::to_value(&gd).unwrap()).unwrap();
        assert_eq!(back.discriminator().map(|(_, reg)| reg), Some(0.25));
        assert_eq!(back, gd);
    }

    #[test]
    fn restore_refuses_a_different_optimizer_kind() {
        use crate::activation::activation::ActivationFunction;
        use crate::network::network::PixelNet;
        use crate::optim::optimizer::{build_optimizer, OptimizerKind};
        use rand::{rngs::StdRng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(2);
        let net = PixelNet::new(1, &[], 2, ActivationFunction::Identity, &mut rng);
        let mut unit = TrainableUnit::new(net, build_optimizer(OptimizerKind::Adam, 1e-3, 0.5));
        let before = unit.net.state_dict();

        let mut snap = RoleSnapshot::capture(&unit);
        snap.optimizer = OptimizerState::Sgd { learning_rate: 0.1 };
        for t in snap.parameters.values_mut() {
            t.data_mut().iter_mut().for_each(|v| *v += 1.0);
        }
        assert!(matches!(snap.restore(&mut unit), Err(Error::OptimizerState(_))));
        assert_eq!(unit.net.state_dict(), before);
    }

    #[test]
    fn non_finite_values_are_located() {
        let progress = StoredProgress { epoch: 0, iteration_in_epoch: 1, total_iterations: Some(1), best_score: 0.0 };
        let clean = CheckpointRecord::with_discriminator(progress.clone(), snapshot(), snapshot(), 0.1);
        assert!(clean.ensure_finite().is_ok());

        let mut critic = snapshot();
        critic.optimizer = OptimizerState::Adam {
            learning_rate: 1e-3,
            beta1: 0.5,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 3,
            first_moments: vec![vec![0.0, f64::INFINITY]],
            second_moments: vec![vec![0.0, 0.0]],
        };
        let record = CheckpointRecord::with_discriminator(progress.clone(), snapshot(), critic, 0.1);
        match record.ensure_finite() {
            Err(Error::NonFiniteCheckpoint(field)) => assert_eq!(field, "discriminator optimizer first moments"),
            other => panic!("unexpected {other:?}"),
        }

        let record = CheckpointRecord::with_discriminator(progress.clone(), snapshot(), snapshot(), f64::NAN);
        assert!(matches!(record.ensure_finite(), Err(Error::NonFiniteCheckpoint(_))));

        let nan_best = StoredProgress { best_score: f64::NAN, ..progress };
        let record = CheckpointRecord::generator_only(nan_best, snapshot());
        assert!(matches!(record.ensure_finite(), Err(Error::NonFiniteCheckpoint(_))));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let progress = StoredProgress { epoch: 0, iteration_in_epoch: 0, total_iterations: None, best_score: 0.0 };
        let record = CheckpointRecord::GeneratorOnly { version: CHECKPOINT_VERSION + 1, progress, generator: snapshot() };
        assert!(matches!(record.ensure_supported(), Err(Error::CheckpointVersion { .. })));
    }
}
