pub mod adam;
pub mod clip;
pub mod optimizer;
pub mod sgd;
pub mod unit;

pub use adam::Adam;
pub use clip::clip_grad_norm;
pub use optimizer::{build_optimizer, Optimizer, OptimizerKind, OptimizerState};
pub use sgd::Sgd;
pub use unit::TrainableUnit;
