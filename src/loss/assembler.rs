use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::activation::activation::ActivationFunction;
use crate::data::batch::Batch;
use crate::error::Result;
use crate::loss::bce::BceWithLogitsLoss;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::tensor::{LabelMap, Tensor};
use crate::network::module::{Critic, Segmenter, Trainable};
use crate::optim::unit::TrainableUnit;

/// Hyperparameters of the composite objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSettings {
    /// λ in `seg + λ · adv`.
    pub gan_reg: f64,
    /// ε: real targets are drawn from [1-ε, 1], fake targets from [0, ε].
    pub label_smoothing: f64,
    /// Standard deviation of the Gaussian jitter added to critic inputs.
    pub noise_scale: f64,
    /// Gradient-norm ceiling for whichever unit is stepping.
    pub grad_clip: f64,
}

/// Result of one generator update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorStep {
    pub segmentation_loss: f64,
    /// `None` when no critic takes part.
    pub adversarial_loss: Option<f64>,
    pub total_loss: f64,
    pub grad_norm: f64,
}

/// Result of one discriminator update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscriminatorStep {
    pub loss: f64,
    pub grad_norm: f64,
    /// Fraction of ground-truth masks the critic scored as real.
    pub true_positive: f64,
    /// Fraction of generated masks the critic scored as fake.
    pub true_negative: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Real,
    Fake,
}

/// Builds the segmentation and adversarial losses and runs one optimizer
/// step for whichever unit the scheduler picked.
///
/// Convention for the critic inputs: the generator's logits are squashed with
/// tanh, the discriminator step sees them detached and jittered, and the
/// ground-truth mask is jittered the same way. Both target directions are
/// smoothed, including the generator's "real" target.
pub struct LossAssembler {
    settings: LossSettings,
    rng: StdRng,
}

impl LossAssembler {
    pub fn new(settings: LossSettings, seed: u64) -> Self {
        LossAssembler { settings, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn settings(&self) -> &LossSettings {
        &self.settings
    }

    pub fn set_gan_reg(&mut self, gan_reg: f64) {
        self.settings.gan_reg = gan_reg;
    }

    pub fn segmentation_loss(logits: &Tensor, labels: &LabelMap) -> Result<(f64, Tensor)> {
        CrossEntropyLoss::loss_and_grad(logits, labels)
    }

    fn smoothed_targets(&mut self, n: usize, target: Target) -> Result<Tensor> {
        let eps = self.settings.label_smoothing;
        let (lo, hi) = match target {
            Target::Real => (1.0 - eps, 1.0),
            Target::Fake => (0.0, eps),
        };
        let values = (0..n).map(|_| self.rng.gen_range(lo..=hi)).collect();
        Tensor::from_vec(&[n, 1], values)
    }

    fn jitter(&mut self, t: &Tensor) -> Result<Tensor> {
        let noise = Tensor::randn(t.shape(), self.settings.noise_scale, &mut self.rng);
        t.zip_map(&noise, |a, b| a + b)
    }

    /// Zeroes the generator's gradients, backpropagates
    /// `seg + gan_reg · adv` into it (adv only when `critic` is given), clips
    /// the generator's gradient norm and steps its optimizer.
    ///
    /// The critic's own gradients are written during this pass but never
    /// stepped here; the discriminator step zeroes them before use.
    pub fn generator_step<G: Segmenter, D: Critic>(
        &mut self,
        generator: &mut TrainableUnit<G>,
        critic: Option<&mut D>,
        batch: &Batch,
    ) -> Result<GeneratorStep> {
        generator.net.zero_grad();
        let logits = generator.net.forward(&batch.input)?;
        let (segmentation_loss, mut grad) = Self::segmentation_loss(&logits, &batch.target_labels)?;

        let mut adversarial_loss = None;
        if let Some(critic) = critic {
            let squash = ActivationFunction::Tanh;
            let converted = logits.map(|z| squash.function(z));
            let scores = critic.forward(&batch.input, &converted)?;
            let targets = self.smoothed_targets(batch.size(), Target::Real)?;
            let (g_loss, grad_scores) = BceWithLogitsLoss::loss_and_grad(&scores, &targets)?;
            let grad_mask = critic.backward(&grad_scores)?;

            // chain through tanh and weight by λ
            let gan_reg = self.settings.gan_reg;
            let through_tanh = logits.zip_map(&grad_mask, |z, g| gan_reg * g * squash.derivative(z))?;
            grad.add_assign(&through_tanh)?;
            adversarial_loss = Some(g_loss);
        }

        generator.net.backward(&grad)?;
        let grad_norm = generator.clip_and_step(self.settings.grad_clip)?;
        let total_loss = segmentation_loss + self.settings.gan_reg * adversarial_loss.unwrap_or(0.0);
        Ok(GeneratorStep { segmentation_loss, adversarial_loss, total_loss, grad_norm })
    }

    /// Zeroes the critic's gradients, scores a jittered detached generator
    /// mask as fake and the jittered ground-truth mask as real, backpropagates
    /// the summed BCE into the critic only, clips and steps it.
    pub fn discriminator_step<G: Segmenter, D: Critic>(
        &mut self,
        generator: &mut G,
        critic: &mut TrainableUnit<D>,
        batch: &Batch,
    ) -> Result<DiscriminatorStep> {
        critic.net.zero_grad();
        let n = batch.size();

        // Detached: the generator is only run forward here.
        let converted = generator.forward(&batch.input)?.map(f64::tanh);
        let fake_mask = self.jitter(&converted)?;
        let real_mask = self.jitter(&batch.target_mask)?;

        let fake_scores = critic.net.forward(&batch.input, &fake_mask)?;
        let fake_targets = self.smoothed_targets(n, Target::Fake)?;
        let (fake_loss, fake_grad) = BceWithLogitsLoss::loss_and_grad(&fake_scores, &fake_targets)?;
        critic.net.backward(&fake_grad)?;

        let real_scores = critic.net.forward(&batch.input, &real_mask)?;
        let real_targets = self.smoothed_targets(n, Target::Real)?;
        let (real_loss, real_grad) = BceWithLogitsLoss::loss_and_grad(&real_scores, &real_targets)?;
        critic.net.backward(&real_grad)?;

        let grad_norm = critic.clip_and_step(self.settings.grad_clip)?;
        let (true_positive, true_negative) = true_positive_and_negative(&real_scores, &fake_scores);
        Ok(DiscriminatorStep { loss: fake_loss + real_loss, grad_norm, true_positive, true_negative })
    }
}

/// Fractions of real scores above zero and fake scores below zero.
pub fn true_positive_and_negative(real_scores: &Tensor, fake_scores: &Tensor) -> (f64, f64) {
    let fraction = |t: &Tensor, hit: fn(f64) -> bool| {
        if t.is_empty() {
            0.0
        } else {
            t.data().iter().filter(|&&s| hit(s)).count() as f64 / t.len() as f64
        }
    };
    (fraction(real_scores, |s| s > 0.0), fraction(fake_scores, |s| s < 0.0))
}
