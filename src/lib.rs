pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod eval;
pub mod checkpoint;
pub mod train;

// Convenience re-exports
pub use error::{Error, Result};
pub use math::tensor::{LabelMap, Tensor};
pub use activation::activation::ActivationFunction;
pub use network::module::{Critic, Mode, Segmenter, StateDict, Trainable};
pub use network::critic::ConditionalCritic;
pub use network::network::PixelNet;
pub use network::spec::ModelSpec;
pub use loss::assembler::{LossAssembler, LossSettings};
pub use optim::optimizer::{build_optimizer, Optimizer, OptimizerKind};
pub use optim::unit::TrainableUnit;
pub use data::{Batch, DataSpec, DataStream, InMemoryStream};
pub use eval::{confusion_matrix, evaluate, ConfusionMatrix, EvalOptions, EvalReport};
pub use checkpoint::{CheckpointRecord, CheckpointStore, CheckpointTag};
pub use train::{AlternationScheduler, Role, TrainConfig, Trainer, TrainingState};
