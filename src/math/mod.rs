pub mod tensor;

pub use tensor::{LabelMap, Tensor};
