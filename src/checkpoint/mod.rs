pub mod record;
pub mod store;

pub use record::{CheckpointRecord, RoleSnapshot, StoredProgress, CHECKPOINT_VERSION};
pub use store::{CheckpointStore, CheckpointTag};
