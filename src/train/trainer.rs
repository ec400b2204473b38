use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::record::{CheckpointRecord, RoleSnapshot, StoredProgress};
use crate::checkpoint::store::{CheckpointStore, CheckpointTag};
use crate::data::batch::Batch;
use crate::data::stream::DataStream;
use crate::error::{Error, Result};
use crate::eval::engine::{evaluate, EvalOptions, EvalReport};
use crate::loss::assembler::LossAssembler;
use crate::network::module::{Critic, Mode, Segmenter, Trainable};
use crate::optim::optimizer::build_optimizer;
use crate::optim::unit::TrainableUnit;
use crate::train::schedule::{AlternationScheduler, Role};
use crate::train::state::TrainingState;
use crate::train::telemetry::{self, NullSink, ScalarSink};
use crate::train::train_config::{ResumeFrom, TrainConfig};

/// Most recent value of each loss term, for the combined scalars.
#[derive(Debug, Clone, Copy, Default)]
struct LatestLosses {
    segmentation: f64,
    generator: f64,
    discriminator: f64,
}

/// Drives the alternating generator/discriminator optimization.
///
/// The trainer exclusively owns both trainable units and their optimizers.
/// The critic unit only exists when adversarial training is enabled.
pub struct Trainer<G: Segmenter, D: Critic> {
    config: TrainConfig,
    scheduler: AlternationScheduler,
    assembler: LossAssembler,
    generator: TrainableUnit<G>,
    discriminator: Option<TrainableUnit<D>>,
    store: CheckpointStore,
    sink: Box<dyn ScalarSink>,
    stop_flag: Option<Arc<AtomicBool>>,
    state: TrainingState,
    /// Legacy counters waiting for the epoch length of the training stream.
    restored: Option<StoredProgress>,
    latest: LatestLosses,
}

impl<G: Segmenter, D: Critic> Trainer<G, D> {
    /// Builds the trainer and, when `config.resume` is set, restores models,
    /// optimizers and counters from `experiment_dir` before anything else.
    pub fn new<P: Into<PathBuf>>(config: TrainConfig, experiment_dir: P, generator: G, critic: D) -> Result<Self> {
        config.validate()?;
        let scheduler = config.scheduler()?;
        let assembler = LossAssembler::new(config.loss_settings(), config.seed);

        let generator = TrainableUnit::new(generator, build_optimizer(config.optimizer, config.gen_lr, config.beta1));
        let discriminator = if config.train_gan {
            info!("Training GAN");
            Some(TrainableUnit::new(critic, build_optimizer(config.optimizer, config.disc_lr, config.beta1)))
        } else {
            info!("Running network without GAN loss");
            None
        };

        let mut trainer = Trainer {
            store: CheckpointStore::new(experiment_dir)?,
            config,
            scheduler,
            assembler,
            generator,
            discriminator,
            sink: Box::new(NullSink),
            stop_flag: None,
            state: TrainingState::default(),
            restored: None,
            latest: LatestLosses::default(),
        };
        if trainer.config.resume {
            trainer.restore()?;
        }
        Ok(trainer)
    }

    pub fn with_sink(mut self, sink: Box<dyn ScalarSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Training stops after the tick during which `flag` becomes `true`.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn generator(&self) -> &G {
        &self.generator.net
    }

    pub fn discriminator(&self) -> Option<&D> {
        self.discriminator.as_ref().map(|unit| &unit.net)
    }

    /// Adversarial weight currently in effect.
    pub fn gan_reg(&self) -> f64 {
        self.assembler.settings().gan_reg
    }

    fn resume_tag(&self) -> CheckpointTag {
        match self.config.resume_from {
            ResumeFrom::Latest => CheckpointTag::Last,
            ResumeFrom::Best => CheckpointTag::Best,
            ResumeFrom::Step(step) => CheckpointTag::Step(step),
        }
    }

    fn restore(&mut self) -> Result<()> {
        let tag = self.resume_tag();
        let path = self.store.path(tag);
        let Some(record) = self.store.load(tag)? else {
            info!("=> no checkpoint found at '{}'", path.display());
            return Ok(());
        };
        info!("=> loading checkpoint '{}'", path.display());

        record.generator().restore(&mut self.generator)?;
        match (record.discriminator(), self.discriminator.as_mut()) {
            (Some((snapshot, gan_reg)), Some(unit)) => {
                snapshot.restore(unit)?;
                self.assembler.set_gan_reg(gan_reg);
            }
            (None, Some(_)) => {
                warn!("checkpoint has no discriminator; keeping the freshly initialized critic");
            }
            (_, None) => {}
        }
        let progress = record.progress().clone();
        info!(
            "=> loaded checkpoint '{}' (epoch {}, iter {})",
            path.display(),
            progress.epoch,
            progress.iteration_in_epoch
        );
        if progress.total_iterations.is_some() {
            // epoch_len only matters when the global counter is missing
            self.state = progress.resolve(0);
        } else {
            self.restored = Some(progress);
        }
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn record(&self) -> CheckpointRecord {
        let progress = StoredProgress::from(&self.state.after_tick());
        let generator = RoleSnapshot::capture(&self.generator);
        match &self.discriminator {
            Some(unit) => CheckpointRecord::with_discriminator(progress, generator, RoleSnapshot::capture(unit), self.gan_reg()),
            None => CheckpointRecord::generator_only(progress, generator),
        }
    }

    /// Runs until `config.epochs` epochs are complete or the stop flag is
    /// raised, and returns the final counters.
    pub fn train(&mut self, train: &mut dyn DataStream, val: &mut dyn DataStream) -> Result<TrainingState> {
        let epoch_len = train.len() as u64;
        if epoch_len == 0 {
            return Err(Error::config("training stream yields no batches"));
        }
        if let Some(progress) = self.restored.take() {
            self.state = progress.resolve(epoch_len);
            info!("Total iterations start at {}", self.state.total_iterations);
        }

        while self.state.epoch < self.config.epochs {
            if self.state.iteration_in_epoch >= epoch_len {
                self.state.finish_epoch();
                continue;
            }
            info!("Starting epoch {}", self.state.epoch);
            let already_done = self.state.iteration_in_epoch as usize;
            for batch in train.batches().skip(already_done) {
                let batch = batch?;
                self.tick(&batch, &mut *val, epoch_len)?;
                if self.stop_requested() {
                    info!(step = self.state.total_iterations, "stop requested, leaving the training loop");
                    self.sink.flush()?;
                    return Ok(self.state);
                }
            }
            self.sink.flush()?;
            self.state.finish_epoch();
        }
        Ok(self.state)
    }

    fn tick(&mut self, batch: &Batch, val: &mut dyn DataStream, epoch_len: u64) -> Result<()> {
        let step = self.state.total_iterations;
        let role = self.scheduler.decide(step);
        debug!(step, %role, "tick");

        if role == Role::Discriminator && self.discriminator.is_some() {
            self.step_discriminator(batch, step)?;
        } else {
            self.step_generator(batch, step)?;
        }

        let LatestLosses { segmentation, generator, discriminator } = self.latest;
        let gan_reg = self.gan_reg();
        let adversarial = self.discriminator.is_some();
        self.sink.log_scalar(telemetry::SEGMENTATION_LOSS, segmentation, step)?;
        if adversarial {
            self.sink.log_scalar(telemetry::GENERATOR_LOSS, generator, step)?;
            self.sink.log_scalar(telemetry::GAN_LOSS, discriminator + generator, step)?;
            self.sink.log_scalar(telemetry::TOTAL_LOSS, gan_reg * (discriminator + generator) + segmentation, step)?;
        }

        let iter = self.state.iteration_in_epoch;
        if self.config.print_every > 0 && step % self.config.print_every == 0 {
            if adversarial {
                info!(
                    "D_loss {discriminator:.6}, G_loss {generator:.6}, Seg loss {segmentation:.6} at iteration {iter}/{}",
                    epoch_len - 1
                );
                info!(
                    "Overall loss at iteration {iter}/{}: {:.6}",
                    epoch_len - 1,
                    gan_reg * (discriminator + generator) + segmentation
                );
            } else {
                info!("Loss at iteration {iter}/{}: {segmentation:.6}", epoch_len - 1);
            }
        }

        if self.config.eval_every > 0 && step % self.config.eval_every == 0 {
            let report = self.validate(val, step)?;
            info!("Validation Mean IOU at iteration {iter}/{}: {:.6}", epoch_len - 1, report.mean_iou);
        }

        self.state.tick();
        Ok(())
    }

    fn step_generator(&mut self, batch: &Batch, step: u64) -> Result<()> {
        self.generator.net.set_mode(Mode::Train);
        let critic = self.discriminator.as_mut().map(|unit| {
            unit.net.set_mode(Mode::Train);
            &mut unit.net
        });
        let g = self.assembler.generator_step(&mut self.generator, critic, batch)?;
        self.latest.segmentation = g.segmentation_loss;
        self.latest.generator = g.adversarial_loss.unwrap_or(0.0);
        self.sink.log_scalar(telemetry::GENERATOR_GRAD_NORM, g.grad_norm, step)
    }

    fn step_discriminator(&mut self, batch: &Batch, step: u64) -> Result<()> {
        let Some(critic) = self.discriminator.as_mut() else {
            return Ok(());
        };
        critic.net.set_mode(Mode::Train);
        let d = self.assembler.discriminator_step(&mut self.generator.net, critic, batch)?;
        self.latest.discriminator = d.loss;
        self.sink.log_scalar(telemetry::DISCRIMINATOR_LOSS, d.loss, step)?;
        self.sink.log_scalar(telemetry::DISCRIMINATOR_GRAD_NORM, d.grad_norm, step)?;
        self.sink.log_scalar(telemetry::DISCRIMINATOR_TRUE_POSITIVE, d.true_positive, step)?;
        self.sink.log_scalar(telemetry::DISCRIMINATOR_TRUE_NEGATIVE, d.true_negative, step)
    }

    /// Evaluates on `val`, updates the best score and writes the step, last
    /// and (on improvement) best records before returning.
    fn validate(&mut self, val: &mut dyn DataStream, step: u64) -> Result<EvalReport> {
        let options = EvalOptions {
            ignore_background: self.config.ignore_background,
            max_batches: self.config.eval_batches,
            render_dir: self.config.render_masks.then(|| self.store.dir().join(step.to_string())),
        };
        let report = evaluate(&mut self.generator.net, val, &options)?;
        let improved = self.state.observe_score(report.mean_iou);

        let tag = CheckpointTag::Step(step);
        self.store.save(&self.record(), tag)?;
        self.store.mark_last(tag)?;
        if improved {
            self.store.promote_to_best(tag)?;
        }

        self.sink.log_scalar(telemetry::VAL_PIXEL_ACC, report.pixel_accuracy, step)?;
        self.sink.log_scalar(telemetry::VAL_MEAN_IOU, report.mean_iou, step)?;
        self.sink.log_scalar(telemetry::VAL_PER_CLASS_ACC, report.per_class_accuracy, step)?;
        Ok(report)
    }
}
