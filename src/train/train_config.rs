use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::synthetic::DataSpec;
use crate::error::{Error, Result};
use crate::loss::assembler::LossSettings;
use crate::network::spec::ModelSpec;
use crate::optim::optimizer::OptimizerKind;
use crate::train::schedule::AlternationScheduler;

/// Which stored record a resumed run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeFrom {
    /// The `last` record.
    #[default]
    Latest,
    /// The `best` record.
    Best,
    /// The record saved at a given global iteration.
    Step(u64),
}

/// Hyperparameters of one training run.
///
/// # Fields
/// - `epochs`            — passes over the training stream
/// - `batch_size`        — samples per mini-batch
/// - `image_size`        — side length of the (square) input images
/// - `print_every`       — ticks between progress lines; `0` disables them
/// - `eval_every`        — ticks between validation passes and checkpoints; `0` disables them
/// - `resume`            — restore state from the experiment directory before the first tick
/// - `resume_from`       — which record to restore
/// - `train_gan`         — enable the adversarial critic
/// - `disc_lr`, `gen_lr` — learning rates of the two optimizers
/// - `beta1`             — Adam first-moment decay
/// - `g_iters`, `d_iters`— generator / discriminator ticks per alternation window
/// - `grad_clip`         — gradient-norm ceiling applied before every optimizer step
/// - `label_smoothing`   — width of the smoothed real/fake target bands
/// - `noise_scale`       — std-dev of the Gaussian jitter on critic inputs
/// - `gan_reg`           — weight of the adversarial term in the generator objective
/// - `ignore_background` — score only the first `C - 1` classes during validation
/// - `eval_batches`      — cap on validation batches per evaluation
/// - `render_masks`      — write PNGs of the first validation batch
/// - `seed`              — seeds every RNG the run owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: u64,
    pub batch_size: usize,
    pub image_size: usize,
    pub print_every: u64,
    pub eval_every: u64,
    pub resume: bool,
    pub resume_from: ResumeFrom,
    pub train_gan: bool,
    pub disc_lr: f64,
    pub gen_lr: f64,
    pub beta1: f64,
    pub optimizer: OptimizerKind,
    pub g_iters: u64,
    pub d_iters: u64,
    pub grad_clip: f64,
    pub label_smoothing: f64,
    pub noise_scale: f64,
    pub gan_reg: f64,
    pub ignore_background: bool,
    pub eval_batches: Option<usize>,
    pub render_masks: bool,
    pub seed: u64,
    pub model: ModelSpec,
    pub data: DataSpec,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 20,
            batch_size: 8,
            image_size: 128,
            print_every: 100,
            eval_every: 500,
            resume: false,
            resume_from: ResumeFrom::Latest,
            train_gan: false,
            disc_lr: 1e-5,
            gen_lr: 1e-3,
            beta1: 0.5,
            optimizer: OptimizerKind::Adam,
            g_iters: 5,
            d_iters: 5,
            grad_clip: 0.1,
            label_smoothing: 0.1,
            noise_scale: 1e-2,
            gan_reg: 1e-2,
            ignore_background: true,
            eval_batches: None,
            render_masks: true,
            seed: 0,
            model: ModelSpec::default(),
            data: DataSpec::default(),
        }
    }
}

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::config(message))
    }
}

impl TrainConfig {
    /// Rejects settings the training loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure(self.batch_size > 0, "batch_size must be at least 1")?;
        ensure(self.image_size > 0, "image_size must be at least 1")?;
        ensure(self.gen_lr.is_finite() && self.gen_lr > 0.0, "gen_lr must be a positive number")?;
        ensure(self.disc_lr.is_finite() && self.disc_lr > 0.0, "disc_lr must be a positive number")?;
        ensure((0.0..1.0).contains(&self.beta1), "beta1 must lie in [0, 1)")?;
        ensure(self.grad_clip.is_finite() && self.grad_clip > 0.0, "grad_clip must be a positive number")?;
        ensure((0.0..0.5).contains(&self.label_smoothing), "label_smoothing must lie in [0, 0.5)")?;
        ensure(self.noise_scale.is_finite() && self.noise_scale >= 0.0, "noise_scale must be non-negative")?;
        ensure(self.gan_reg.is_finite() && self.gan_reg >= 0.0, "gan_reg must be non-negative")?;
        ensure(self.data.num_classes >= 2, "at least two classes are required")?;
        self.scheduler().map(|_| ())
    }

    pub fn scheduler(&self) -> Result<AlternationScheduler> {
        AlternationScheduler::new(self.train_gan, self.g_iters, self.d_iters)
    }

    pub fn loss_settings(&self) -> LossSettings {
        LossSettings {
            gan_reg: self.gan_reg,
            label_smoothing: self.label_smoothing,
            noise_scale: self.noise_scale,
            grad_clip: self.grad_clip,
        }
    }

    /// Serializes the configuration to a pretty-printed JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Reads a configuration written by [`TrainConfig::save_json`]. Missing
    /// fields take their default values.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<TrainConfig> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_alternation_window_is_rejected_only_with_gan() {
        let mut cfg = TrainConfig { g_iters: 0, d_iters: 0, ..TrainConfig::default() };
        cfg.validate().unwrap();
        cfg.train_gan = true;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let cases = [
            TrainConfig { batch_size: 0, ..TrainConfig::default() },
            TrainConfig { gen_lr: f64::NAN, ..TrainConfig::default() },
            TrainConfig { disc_lr: -1.0, ..TrainConfig::default() },
            TrainConfig { label_smoothing: 0.5, ..TrainConfig::default() },
            TrainConfig { grad_clip: 0.0, ..TrainConfig::default() },
            TrainConfig { beta1: 1.0, ..TrainConfig::default() },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn json_round_trip_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("args.json");
        let cfg = TrainConfig { train_gan: true, resume_from: ResumeFrom::Step(500), ..TrainConfig::default() };
        cfg.save_json(&path).unwrap();
        assert_eq!(TrainConfig::load_json(&path).unwrap(), cfg);

        std::fs::write(&path, r#"{"epochs": 3}"#).unwrap();
        let partial = TrainConfig::load_json(&path).unwrap();
        assert_eq!(partial.epochs, 3);
        assert_eq!(partial.batch_size, 8);
    }
}
