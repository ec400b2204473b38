pub mod critic;
pub mod module;
pub mod network;
pub mod spec;

pub use critic::ConditionalCritic;
pub use module::{Critic, Mode, Segmenter, StateDict, Trainable};
pub use network::PixelNet;
pub use spec::ModelSpec;
