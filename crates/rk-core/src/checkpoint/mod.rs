//! Per-pipeline checkpoints: the on-disk record format, storage backends and
//! the coordinator that plans, commits and recovers them.

mod coordinator;
mod record;
mod store;

pub use coordinator::{CheckpointCoordinator, CommitProgress};
pub use record::{BatchPlan, CHECKPOINT_VERSION, CheckpointRecord, decode_record, encode_record};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
