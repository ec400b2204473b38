pub mod assembler;
pub mod bce;
pub mod cross_entropy;

pub use assembler::{DiscriminatorStep, GeneratorStep, LossAssembler, LossSettings};
pub use bce::BceWithLogitsLoss;
pub use cross_entropy::CrossEntropyLoss;
