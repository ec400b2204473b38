use thiserror::Error;

/// Errors raised by training, evaluation and checkpointing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error("inconsistent batch: {0}")]
    InconsistentBatch(String),

    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("parameter `{0}` missing from state dict")]
    MissingParameter(String),

    #[error("optimizer state mismatch: {0}")]
    OptimizerState(String),

    #[error("unsupported checkpoint version {found} (newest supported is {supported})")]
    CheckpointVersion { found: u32, supported: u32 },

    #[error("refusing to save checkpoint: non-finite value in {0}")]
    NonFiniteCheckpoint(String),

    #[error("backward called on `{0}` without a cached training-mode forward pass")]
    NoForwardCache(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch { expected: expected.to_vec(), actual: actual.to_vec() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
