use std::path::Path;
use std::sync::mpsc;

use ferrite_seg::checkpoint::{CheckpointRecord, CheckpointStore, CheckpointTag, RoleSnapshot, StoredProgress};
use ferrite_seg::data::{DataSpec, InMemoryStream, SYNTHETIC_CHANNELS};
use ferrite_seg::train::{telemetry, ChannelSink, ResumeFrom, ScalarEvent};
use ferrite_seg::{
    build_optimizer, ConditionalCritic, DataStream, PixelNet, Segmenter, Trainable, TrainConfig, Trainer,
    TrainableUnit,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const CLASSES: usize = 2;

fn config(epochs: u64) -> TrainConfig {
    TrainConfig {
        epochs,
        batch_size: 1,
        image_size: 2,
        print_every: 0,
        eval_every: 0,
        render_masks: false,
        data: DataSpec { num_classes: CLASSES, train_samples: 50, val_samples: 2 },
        ..TrainConfig::default()
    }
}

fn streams(cfg: &TrainConfig) -> (InMemoryStream, InMemoryStream) {
    cfg.data.build(cfg.image_size, cfg.batch_size, 21).unwrap()
}

fn networks(cfg: &TrainConfig, seed: u64) -> (PixelNet, ConditionalCritic) {
    let mut rng = StdRng::seed_from_u64(seed);
    let g = cfg.model.build_generator(SYNTHETIC_CHANNELS, CLASSES, &mut rng);
    let d = cfg.model.build_critic(SYNTHETIC_CHANNELS, CLASSES, &mut rng);
    (g, d)
}

fn snapshots(cfg: &TrainConfig, seed: u64) -> (RoleSnapshot, RoleSnapshot) {
    let (g, d) = networks(cfg, seed);
    let g = TrainableUnit::new(g, build_optimizer(cfg.optimizer, cfg.gen_lr, cfg.beta1));
    let d = TrainableUnit::new(d, build_optimizer(cfg.optimizer, cfg.disc_lr, cfg.beta1));
    (RoleSnapshot::capture(&g), RoleSnapshot::capture(&d))
}

fn resumed(
    cfg: TrainConfig,
    dir: &Path,
) -> (Trainer<PixelNet, ConditionalCritic>, mpsc::Receiver<ScalarEvent>) {
    let (g, d) = networks(&cfg, 99);
    let (tx, rx) = mpsc::channel();
    let trainer = Trainer::new(TrainConfig { resume: true, ..cfg }, dir, g, d)
        .unwrap()
        .with_sink(Box::new(ChannelSink::new(tx)));
    (trainer, rx)
}

fn loss_steps(rx: &mpsc::Receiver<ScalarEvent>) -> Vec<u64> {
    rx.try_iter().filter(|e| e.name == telemetry::SEGMENTATION_LOSS).map(|e| e.step).collect()
}

#[test]
fn resume_continues_the_interrupted_epoch_at_the_saved_counter() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(4);
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (g, _) = snapshots(&cfg, 1);
    let progress = StoredProgress { epoch: 3, iteration_in_epoch: 40, total_iterations: Some(340), best_score: 0.25 };
    store.save(&CheckpointRecord::generator_only(progress, g), CheckpointTag::Last).unwrap();

    let (mut train, mut val) = streams(&cfg);
    let (mut trainer, rx) = resumed(cfg, dir.path());
    let state = trainer.train(&mut train, &mut val).unwrap();

    let steps = loss_steps(&rx);
    assert_eq!(steps.first(), Some(&340));
    assert_eq!(steps, (340..350).collect::<Vec<_>>());
    assert_eq!((state.epoch, state.iteration_in_epoch, state.total_iterations), (4, 0, 350));
    assert_eq!(state.best_score, 0.25);
}

#[test]
fn legacy_record_rebuilds_the_global_counter_from_the_epoch_length() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(4);
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (g, _) = snapshots(&cfg, 1);
    let progress = StoredProgress { epoch: 3, iteration_in_epoch: 40, total_iterations: None, best_score: 0.0 };
    store.save(&CheckpointRecord::generator_only(progress, g), CheckpointTag::Last).unwrap();

    let (mut train, mut val) = streams(&cfg);
    let (mut trainer, rx) = resumed(cfg, dir.path());
    trainer.train(&mut train, &mut val).unwrap();
    // 40 + 50 * 3
    assert_eq!(loss_steps(&rx).first(), Some(&190));
}

#[test]
fn missing_checkpoint_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(1);
    let (mut train, mut val) = streams(&cfg);
    let (mut trainer, rx) = resumed(cfg, dir.path());
    let state = trainer.train(&mut train, &mut val).unwrap();
    assert_eq!(loss_steps(&rx).first(), Some(&0));
    assert_eq!(state.total_iterations, 50);
}

#[test]
fn generator_only_record_leaves_a_requested_critic_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { train_gan: true, gan_reg: 0.3, ..config(4) };
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (g, _) = snapshots(&cfg, 1);
    let progress = StoredProgress { epoch: 0, iteration_in_epoch: 0, total_iterations: Some(0), best_score: 0.0 };
    store.save(&CheckpointRecord::generator_only(progress, g.clone()), CheckpointTag::Last).unwrap();

    let (_, fresh_critic) = networks(&cfg, 99);
    let (trainer, _rx) = resumed(cfg, dir.path());
    assert_eq!(trainer.generator().state_dict(), g.parameters);
    assert_eq!(trainer.discriminator().unwrap().state_dict(), fresh_critic.state_dict());
    assert_eq!(trainer.gan_reg(), 0.3);
}

#[test]
fn adversarial_record_restores_the_critic_and_its_weight() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { train_gan: true, gan_reg: 0.3, ..config(4) };
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (g, d) = snapshots(&cfg, 1);
    let progress = StoredProgress { epoch: 1, iteration_in_epoch: 2, total_iterations: Some(52), best_score: 0.1 };
    let record = CheckpointRecord::with_discriminator(progress, g, d.clone(), 0.05);
    store.save(&record, CheckpointTag::Step(51)).unwrap();

    let (trainer, _rx) = resumed(TrainConfig { resume_from: ResumeFrom::Step(51), ..cfg }, dir.path());
    assert_eq!(trainer.discriminator().unwrap().state_dict(), d.parameters);
    assert_eq!(trainer.gan_reg(), 0.05);
}

#[test]
fn saved_parameters_reproduce_forward_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { eval_every: 7, epochs: 1, ..config(1) };
    let (mut train, mut val) = streams(&cfg);
    let (g, d) = networks(&cfg, 3);
    let mut trainer = Trainer::new(cfg.clone(), dir.path(), g, d).unwrap();
    trainer.train(&mut train, &mut val).unwrap();

    // last evaluation happened at step 49
    let record = trainer.store().load(CheckpointTag::Last).unwrap().unwrap();
    assert_eq!(record.progress().total_iterations, Some(50));

    let (mut reloaded, _) = networks(&cfg, 1234);
    reloaded.load_state_dict(&record.generator().parameters).unwrap();
    let mut trained = trainer.generator().clone();
    let input = val.samples()[0].input.clone();
    assert_eq!(trained.forward(&input).unwrap(), reloaded.forward(&input).unwrap());
}

#[test]
fn resumed_counters_are_visible_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(4);
    let store = CheckpointStore::new(dir.path()).unwrap();
    let (g, _) = snapshots(&cfg, 1);
    let progress = StoredProgress { epoch: 0, iteration_in_epoch: 10, total_iterations: Some(10), best_score: 0.4 };
    store.save(&CheckpointRecord::generator_only(progress, g), CheckpointTag::Last).unwrap();

    let (trainer, _rx) = resumed(cfg, dir.path());
    let state = trainer.state();
    assert_eq!((state.epoch, state.iteration_in_epoch, state.total_iterations), (0, 10, 10));
    assert_eq!(state.best_score, 0.4);
}

#[test]
fn record_at_the_end_of_an_epoch_resumes_with_the_next_epoch() {
    let cfg = TrainConfig { data: DataSpec { num_classes: CLASSES, train_samples: 5, val_samples: 2 }, ..config(3) };
    for total_iterations in [Some(10), None] {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let (g, _) = snapshots(&cfg, 1);
        let progress = StoredProgress { epoch: 1, iteration_in_epoch: 5, total_iterations, best_score: 0.0 };
        store.save(&CheckpointRecord::generator_only(progress, g), CheckpointTag::Last).unwrap();

        let (mut train, mut val) = streams(&cfg);
        assert_eq!(train.len(), 5);
        let (mut trainer, rx) = resumed(cfg.clone(), dir.path());
        let state = trainer.train(&mut train, &mut val).unwrap();

        assert_eq!(loss_steps(&rx), (10..15).collect::<Vec<_>>(), "stored total {total_iterations:?}");
        assert_eq!((state.epoch, state.iteration_in_epoch, state.total_iterations), (3, 0, 15));
    }
}
