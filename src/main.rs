//! Command-line entry point: trains or evaluates the reference segmenter on
//! procedurally generated data, keeping everything for one run inside an
//! experiment directory.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferrite_seg::checkpoint::CheckpointTag;
use ferrite_seg::data::{DataStream, SYNTHETIC_CHANNELS};
use ferrite_seg::optim::TrainableUnit;
use ferrite_seg::train::{JsonlSink, ResumeFrom, TrainConfig, Trainer};
use ferrite_seg::{build_optimizer, confusion_matrix, evaluate, CheckpointStore, EvalOptions};

const ARGS_FILE: &str = "args.json";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tracing filter directive, e.g. `info` or `ferrite_seg=debug`.
    /// `RUST_LOG` is used when omitted.
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a segmenter, optionally with the adversarial critic.
    Train(TrainArgs),
    /// Score a saved checkpoint on the validation split.
    Eval(EvalArgs),
}

#[derive(Args)]
struct ExperimentArgs {
    /// Directory holding all experiments.
    #[arg(long, default_value = "checkpoints")]
    save_dir: PathBuf,

    /// Experiment name; defaults to the current Unix time.
    #[arg(short = 'n', long)]
    experiment_name: Option<String>,
}

impl ExperimentArgs {
    fn dir(&self) -> PathBuf {
        let name = self.experiment_name.clone().unwrap_or_else(|| {
            let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            secs.to_string()
        });
        self.save_dir.join(name)
    }
}

fn parse_resume_from(s: &str) -> Result<ResumeFrom, String> {
    match s {
        "latest" | "last" => Ok(ResumeFrom::Latest),
        "best" => Ok(ResumeFrom::Best),
        step => step
            .parse()
            .map(ResumeFrom::Step)
            .map_err(|_| format!("expected `latest`, `best` or a step number, got `{step}`")),
    }
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,

    /// Continue from the experiment's saved state and `args.json`.
    #[arg(long)]
    resume: bool,
    /// Record to resume from: `latest`, `best` or a step number.
    #[arg(long, value_parser = parse_resume_from)]
    resume_from: Option<ResumeFrom>,
    #[arg(long)]
    train_gan: bool,

    #[arg(long)]
    epochs: Option<u64>,
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,
    #[arg(short = 's', long)]
    size: Option<usize>,
    #[arg(short = 'p', long)]
    print_every: Option<u64>,
    #[arg(short = 'e', long)]
    eval_every: Option<u64>,
    #[arg(long)]
    disc_lr: Option<f64>,
    #[arg(long)]
    gen_lr: Option<f64>,
    #[arg(long)]
    beta1: Option<f64>,
    #[arg(long)]
    gan_reg: Option<f64>,
    #[arg(short = 'g', long)]
    g_iters: Option<u64>,
    #[arg(short = 'd', long)]
    d_iters: Option<u64>,
    #[arg(long)]
    grad_clip: Option<f64>,
    #[arg(long)]
    label_smoothing: Option<f64>,
    #[arg(long)]
    noise_scale: Option<f64>,
    #[arg(long)]
    num_classes: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn apply(&self, cfg: &mut TrainConfig) {
        macro_rules! set {
            ($($field:ident => $target:expr),* $(,)?) => {
                $(if let Some(v) = self.$field { $target = v; })*
            };
        }
        set! {
            epochs => cfg.epochs,
            batch_size => cfg.batch_size,
            size => cfg.image_size,
            print_every => cfg.print_every,
            eval_every => cfg.eval_every,
            disc_lr => cfg.disc_lr,
            gen_lr => cfg.gen_lr,
            beta1 => cfg.beta1,
            gan_reg => cfg.gan_reg,
            g_iters => cfg.g_iters,
            d_iters => cfg.d_iters,
            grad_clip => cfg.grad_clip,
            label_smoothing => cfg.label_smoothing,
            noise_scale => cfg.noise_scale,
            num_classes => cfg.data.num_classes,
            seed => cfg.seed,
            resume_from => cfg.resume_from,
        }
    }
}

#[derive(Args)]
struct EvalArgs {
    #[command(flatten)]
    experiment: ExperimentArgs,

    /// Record to evaluate: `latest`, `best` or a step number.
    #[arg(long, default_value = "best", value_parser = parse_resume_from)]
    checkpoint: ResumeFrom,

    /// Score the background class too.
    #[arg(long)]
    keep_background: bool,
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::builder().parse_lossy(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Fresh runs write `args.json`; resumed runs read it back and only take
/// `resume` and `train_gan` from the command line.
fn resolve_config(args: &TrainArgs, dir: &Path) -> anyhow::Result<TrainConfig> {
    let path = dir.join(ARGS_FILE);
    let mut cfg = if args.resume {
        let mut cfg = TrainConfig::load_json(&path).with_context(|| format!("reading {}", path.display()))?;
        if let Some(from) = args.resume_from {
            cfg.resume_from = from;
        }
        cfg
    } else {
        let mut cfg = TrainConfig::default();
        args.apply(&mut cfg);
        cfg
    };
    cfg.resume = args.resume;
    cfg.train_gan = args.train_gan;
    cfg.validate()?;
    if !args.resume {
        cfg.save_json(&path).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(cfg)
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let dir = args.experiment.dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let cfg = resolve_config(&args, &dir)?;

    let (mut train, mut val) = cfg.data.build(cfg.image_size, cfg.batch_size, cfg.seed)?;
    info!("Number of classes: {}", train.num_classes());

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let generator = cfg.model.build_generator(SYNTHETIC_CHANNELS, cfg.data.num_classes, &mut rng);
    let critic = cfg.model.build_critic(SYNTHETIC_CHANNELS, cfg.data.num_classes, &mut rng);

    let mut trainer = Trainer::new(cfg, &dir, generator, critic)?.with_sink(Box::new(JsonlSink::in_dir(&dir)?));

    let state = trainer.train(&mut train, &mut val)?;
    info!(
        epoch = state.epoch,
        total_iterations = state.total_iterations,
        best_mean_iou = state.best_score,
        "training finished"
    );
    Ok(())
}

fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    let dir = args.experiment.dir();
    let path = dir.join(ARGS_FILE);
    let cfg = TrainConfig::load_json(&path).with_context(|| format!("reading {}", path.display()))?;

    let store = CheckpointStore::new(&dir)?;
    let tag = match args.checkpoint {
        ResumeFrom::Latest => CheckpointTag::Last,
        ResumeFrom::Best => CheckpointTag::Best,
        ResumeFrom::Step(step) => CheckpointTag::Step(step),
    };
    let Some(record) = store.load(tag)? else {
        bail!("no checkpoint found at '{}'", store.path(tag).display());
    };
    if record.discriminator().is_some() {
        warn!("ignoring the critic stored in the checkpoint");
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let generator = cfg.model.build_generator(SYNTHETIC_CHANNELS, cfg.data.num_classes, &mut rng);
    let mut unit = TrainableUnit::new(generator, build_optimizer(cfg.optimizer, cfg.gen_lr, cfg.beta1));
    record.generator().restore(&mut unit)?;

    let (_, mut val) = cfg.data.build(cfg.image_size, cfg.batch_size, cfg.seed)?;
    let options = EvalOptions {
        ignore_background: !args.keep_background,
        max_batches: cfg.eval_batches,
        render_dir: None,
    };
    let report = evaluate(&mut unit.net, &mut val, &options)?;
    println!("pixel accuracy     {:.4}", report.pixel_accuracy);
    println!("mean IoU           {:.4}", report.mean_iou);
    println!("per-class accuracy {:.4}", report.per_class_accuracy);
    for (class, acc) in report.per_class.iter().enumerate() {
        match acc {
            Some(acc) => println!("  class {class:>3}: {acc:.4}"),
            None => println!("  class {class:>3}: n/a"),
        }
    }

    let matrix = confusion_matrix(&mut unit.net, &mut val)?;
    println!("confusion matrix (rows: predicted, columns: ground truth)");
    print!("{matrix}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref());

    match cli.command {
        Command::Train(args) => run_train(args),
        Command::Eval(args) => run_eval(args),
    }
}
