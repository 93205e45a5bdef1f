mod log;
mod storage;
mod types;
mod unstable;

pub use log::RaftLog;
pub use storage::{MemoryStorage, Storage, StorageError};
pub use types::{Entry, EntryType, HardState, Index, NodeId, Snapshot, SnapshotMetadata, Term, NO_LIMIT};
