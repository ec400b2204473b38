pub mod confusion;
pub mod engine;
pub mod metrics;
pub mod render;

pub use confusion::ConfusionMatrix;
pub use engine::{confusion_matrix, evaluate, EvalOptions, EvalReport};
pub use metrics::{MeanIou, PerClassAccuracy, PixelAccuracy, ScoredBatch, StreamingMetric};
