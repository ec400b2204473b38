pub mod batch;
pub mod stream;
pub mod synthetic;

pub use batch::Batch;
pub use stream::{DataStream, InMemoryStream, Sample};
pub use synthetic::{DataSpec, SyntheticShapes, SYNTHETIC_CHANNELS};
