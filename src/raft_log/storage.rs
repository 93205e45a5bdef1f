use crate::raft_log::types::{limit_size, Entry, HardState, Index, Snapshot, Term};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Errors from reading the log. `Compacted` and `Unavailable` are expected control flow, not failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// The requested index is below the first available index; it's only reachable through the
    /// snapshot. Leader reacts by sending InstallSnapshot.
    #[error("requested index is unavailable due to compaction")]
    Compacted,
    /// The requested index is beyond the last known index. Caller should try again later.
    #[error("requested entry at index is unavailable")]
    Unavailable,
    #[error("requested snapshot is older than the existing snapshot")]
    SnapshotOutOfDate,
    #[error("snapshot is temporarily unavailable")]
    SnapshotTemporarilyUnavailable,
}

/// Storage is the durable read path for log data that has already been persisted.
///
/// RaftLog only ever reads through this trait. Writes happen through the concrete type, by the
/// node, after the data has been fsynced by the Persister.
pub trait Storage {
    /// Hard state as of the last persist.
    fn initial_state(&self) -> HardState;

    /// Returns entries in `[low, high)`, limited to `max_size` bytes (always at least one entry
    /// if any are in range).
    fn entries(&self, low: Index, high: Index, max_size: u64) -> Result<Vec<Entry>, StorageError>;

    /// Term of the entry at `index`. `first_index() - 1` is valid and returns the snapshot term.
    fn term(&self, index: Index) -> Result<Term, StorageError>;

    /// Index of the first entry that may be read via `entries()`. Older entries are compacted.
    fn first_index(&self) -> Index;

    fn last_index(&self) -> Index;

    /// The most recent snapshot.
    fn snapshot(&self) -> Result<Snapshot, StorageError>;
}

struct MemoryStorageCore {
    hard_state: HardState,
    snapshot: Snapshot,
    // entries[0] is a dummy entry holding the (index, term) of the last compaction point.
    entries: Vec<Entry>,
}

impl MemoryStorageCore {
    fn offset(&self) -> Index {
        self.entries[0].index
    }

    fn first_index(&self) -> Index {
        self.offset() + 1
    }

    fn last_index(&self) -> Index {
        self.offset() + self.entries.len() as u64 - 1
    }
}

/// MemoryStorage is a cache of durable data, refilled from the Persister at startup.
///
/// It's a cheap handle; clones share the same underlying data. RaftLog holds one clone for reads
/// and the node holds another to record what it has persisted.
#[derive(Clone)]
pub struct MemoryStorage {
    core: Arc<RwLock<MemoryStorageCore>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            core: Arc::new(RwLock::new(MemoryStorageCore {
                hard_state: HardState::default(),
                snapshot: Snapshot::default(),
                entries: vec![Entry::dummy(0, 0)],
            })),
        }
    }

    fn rl(&self) -> RwLockReadGuard<'_, MemoryStorageCore> {
        self.core.read().expect("MemoryStorage read lock poison")
    }

    fn wl(&self) -> RwLockWriteGuard<'_, MemoryStorageCore> {
        self.core.write().expect("MemoryStorage write lock poison")
    }

    pub fn set_hard_state(&self, hard_state: HardState) {
        self.wl().hard_state = hard_state;
    }

    /// Replaces the contents of this storage with the snapshot. Anything the snapshot covers, and
    /// anything after it, is discarded.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Result<(), StorageError> {
        let mut core = self.wl();

        if core.snapshot.metadata.index >= snapshot.metadata.index && !core.snapshot.is_empty() {
            return Err(StorageError::SnapshotOutOfDate);
        }

        let metadata = snapshot.metadata;
        core.entries = vec![Entry::dummy(metadata.index, metadata.term)];
        if core.hard_state.commit < metadata.index {
            core.hard_state.commit = metadata.index;
        }
        if core.hard_state.term < metadata.term {
            core.hard_state.term = metadata.term;
        }
        core.snapshot = snapshot;

        Ok(())
    }

    /// Makes a snapshot that covers everything up to `index`, which must be in the stored range.
    /// This does not discard any entries; call `compact()` after.
    pub fn create_snapshot(&self, index: Index, data: bytes::Bytes) -> Result<Snapshot, StorageError> {
        let mut core = self.wl();

        if index <= core.snapshot.metadata.index {
            return Err(StorageError::SnapshotOutOfDate);
        }

        let offset = core.offset();
        let last_index = core.last_index();
        assert!(
            index <= last_index,
            "snapshot index {} is out of bound, last index {}",
            index,
            last_index
        );

        let term = core.entries[(index - offset) as usize].term;
        core.snapshot = Snapshot::new(index, term, data);

        Ok(core.snapshot.clone())
    }

    /// Discards every entry before `compact_index`. The entry at `compact_index` becomes the new
    /// dummy entry.
    pub fn compact(&self, compact_index: Index) -> Result<(), StorageError> {
        let mut core = self.wl();

        let offset = core.offset();
        if compact_index <= offset {
            return Err(StorageError::Compacted);
        }

        let last_index = core.last_index();
        assert!(
            compact_index <= last_index,
            "compact index {} is out of bound, last index {}",
            compact_index,
            last_index
        );

        let i = (compact_index - offset) as usize;
        let dummy = Entry::dummy(core.entries[i].index, core.entries[i].term);
        let mut remaining = Vec::with_capacity(core.entries.len() - i);
        remaining.push(dummy);
        remaining.extend(core.entries.drain(i + 1..));
        core.entries = remaining;

        Ok(())
    }

    /// Appends entries that have been made durable. Entries conflicting with existing ones
    /// truncate the stored suffix. Entries at or below the compaction point are ignored.
    pub fn append(&self, entries: &[Entry]) {
        if entries.is_empty() {
            return;
        }

        let mut core = self.wl();
        let first = core.first_index();
        let last_new = entries[0].index + entries.len() as u64 - 1;

        // Everything is already compacted away.
        if last_new < first {
            return;
        }

        // Skip the compacted prefix of `entries`.
        let entries = if first > entries[0].index {
            &entries[(first - entries[0].index) as usize..]
        } else {
            entries
        };

        let offset = entries[0].index - core.offset();
        let len = core.entries.len() as u64;
        if len > offset {
            core.entries.truncate(offset as usize);
            core.entries.extend_from_slice(entries);
        } else if len == offset {
            core.entries.extend_from_slice(entries);
        } else {
            panic!(
                "missing log entry [last: {}, append at: {}]",
                core.last_index(),
                entries[0].index
            );
        }
    }
}

impl Storage for MemoryStorage {
    fn initial_state(&self) -> HardState {
        self.rl().hard_state
    }

    fn entries(&self, low: Index, high: Index, max_size: u64) -> Result<Vec<Entry>, StorageError> {
        let core = self.rl();

        let offset = core.offset();
        if low <= offset {
            return Err(StorageError::Compacted);
        }
        if high > core.last_index() + 1 {
            panic!("entries' high({}) is out of bound lastindex({})", high, core.last_index());
        }

        let lo = (low - offset) as usize;
        let hi = (high - offset) as usize;
        let mut entries = core.entries[lo..hi].to_vec();
        limit_size(&mut entries, max_size);

        Ok(entries)
    }

    fn term(&self, index: Index) -> Result<Term, StorageError> {
        let core = self.rl();

        let offset = core.offset();
        if index < offset {
            return Err(StorageError::Compacted);
        }
        if index > core.last_index() {
            return Err(StorageError::Unavailable);
        }

        Ok(core.entries[(index - offset) as usize].term)
    }

    fn first_index(&self) -> Index {
        self.rl().first_index()
    }

    fn last_index(&self) -> Index {
        self.rl().last_index()
    }

    fn snapshot(&self) -> Result<Snapshot, StorageError> {
        Ok(self.rl().snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft_log::types::NO_LIMIT;
    use bytes::Bytes;

    fn ent(index: Index, term: Term) -> Entry {
        Entry::new(index, term, Bytes::from(format!("{}-{}", index, term)))
    }

    // Storage holding a snapshot at (3, 3) plus entries 4 and 5.
    fn storage_3_to_5() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .apply_snapshot(Snapshot::new(3, 3, Bytes::new()))
            .expect("fresh storage accepts any snapshot");
        storage.append(&[ent(4, 4), ent(5, 5)]);
        storage
    }

    #[test]
    fn term_at_compaction_boundaries() {
        let storage = storage_3_to_5();

        assert_eq!(storage.term(2), Err(StorageError::Compacted));
        assert_eq!(storage.term(3), Ok(3));
        assert_eq!(storage.term(4), Ok(4));
        assert_eq!(storage.term(5), Ok(5));
        assert_eq!(storage.term(6), Err(StorageError::Unavailable));
    }

    #[test]
    fn entries_below_first_index_are_compacted() {
        let storage = storage_3_to_5();

        assert_eq!(storage.first_index(), 4);
        assert_eq!(storage.last_index(), 5);
        assert_eq!(storage.entries(3, 5, NO_LIMIT), Err(StorageError::Compacted));
        assert_eq!(storage.entries(4, 6, NO_LIMIT), Ok(vec![ent(4, 4), ent(5, 5)]));
        assert_eq!(storage.entries(4, 6, 0), Ok(vec![ent(4, 4)]));
    }

    #[test]
    fn append_truncates_conflicting_suffix() {
        let storage = storage_3_to_5();

        // Conflict at index 5.
        storage.append(&[ent(5, 6), ent(6, 6)]);
        assert_eq!(storage.last_index(), 6);
        assert_eq!(storage.term(5), Ok(6));

        // Entries entirely below the compaction point are ignored.
        storage.append(&[ent(2, 2), ent(3, 3)]);
        assert_eq!(storage.last_index(), 6);

        // Partially compacted batch: only the tail is applied.
        storage.append(&[ent(3, 3), ent(4, 4), ent(5, 7)]);
        assert_eq!(storage.last_index(), 5);
        assert_eq!(storage.term(5), Ok(7));
    }

    #[test]
    fn compact_and_snapshot() {
        let storage = storage_3_to_5();

        assert_eq!(storage.compact(3), Err(StorageError::Compacted));

        let snapshot = storage.create_snapshot(4, Bytes::from("state")).unwrap();
        assert_eq!(snapshot.metadata.index, 4);
        assert_eq!(snapshot.metadata.term, 4);
        storage.compact(4).unwrap();

        assert_eq!(storage.first_index(), 5);
        assert_eq!(storage.term(4), Ok(4));
        assert_eq!(storage.term(3), Err(StorageError::Compacted));
        assert_eq!(storage.snapshot().unwrap(), snapshot);

        assert_eq!(
            storage.create_snapshot(4, Bytes::new()),
            Err(StorageError::SnapshotOutOfDate)
        );
    }

    #[test]
    fn apply_older_snapshot_is_rejected() {
        let storage = storage_3_to_5();

        assert_eq!(
            storage.apply_snapshot(Snapshot::new(2, 2, Bytes::new())),
            Err(StorageError::SnapshotOutOfDate)
        );

        storage.apply_snapshot(Snapshot::new(10, 6, Bytes::new())).unwrap();
        assert_eq!(storage.first_index(), 11);
        assert_eq!(storage.last_index(), 10);
        assert_eq!(storage.initial_state().commit, 10);
    }
}
