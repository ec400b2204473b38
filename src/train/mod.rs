pub mod schedule;
pub mod state;
pub mod telemetry;
pub mod train_config;
pub mod trainer;

pub use schedule::{AlternationScheduler, Role};
pub use state::TrainingState;
pub use telemetry::{ChannelSink, JsonlSink, MemorySink, NullSink, ScalarEvent, ScalarSink};
pub use train_config::{ResumeFrom, TrainConfig};
pub use trainer::Trainer;
