pub mod dense;
pub mod param;

pub use dense::Dense;
pub use param::Parameter;
