use bytes::Bytes;
use std::fmt;

/// NodeId identifies a member of the raft cluster.
pub type NodeId = u64;

/// Term is the raft leadership epoch. At most one leader is ever elected per term.
pub type Term = u64;

/// Index of a log entry. The first real entry lives at index 1. Index 0 is the "nothing" sentinel.
pub type Index = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryType {
    /// Carries a command proposed by the application. A leader's no-op is a `Normal` entry with
    /// empty data.
    Normal,
    /// Placeholder entry that only carries an (index, term) pair. Never handed to the application.
    Dummy,
}

/// A single log entry. Entries are immutable once created; a position in the log can only be
/// replaced by a newer leader's entry, never once it's committed.
#[derive(Clone, Eq, PartialEq)]
pub struct Entry {
    pub index: Index,
    pub term: Term,
    pub entry_type: EntryType,
    pub data: Bytes,
}

impl Entry {
    pub fn new(index: Index, term: Term, data: Bytes) -> Self {
        Entry {
            index,
            term,
            entry_type: EntryType::Normal,
            data,
        }
    }

    pub(crate) fn dummy(index: Index, term: Term) -> Self {
        Entry {
            index,
            term,
            entry_type: EntryType::Dummy,
            data: Bytes::new(),
        }
    }

    /// Approximate in-memory/on-wire footprint, used to bound batch sizes.
    pub(crate) fn size(&self) -> u64 {
        // index + term + type
        17 + self.data.len() as u64
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads can be large; only print their length.
        write!(
            f,
            "Entry(i={}, t={}, {:?}, {}B)",
            self.index,
            self.term,
            self.entry_type,
            self.data.len()
        )
    }
}

/// HardState is the minimal state that must survive a crash. It's written atomically with the log.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HardState {
    pub term: Term,
    pub vote: Option<NodeId>,
    pub commit: Index,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotMetadata {
    pub index: Index,
    pub term: Term,
}

/// A point-in-time compaction of every entry up to and including `metadata.index`.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Bytes,
}

impl Snapshot {
    pub fn new(index: Index, term: Term, data: Bytes) -> Self {
        Snapshot {
            metadata: SnapshotMetadata { index, term },
            data,
        }
    }

    /// `index == 0` denotes "no snapshot".
    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Snapshot(i={}, t={}, {}B)",
            self.metadata.index,
            self.metadata.term,
            self.data.len()
        )
    }
}

/// Returns the longest prefix of `entries` whose total size is within `max_size`. The first entry
/// is always kept, so callers can make progress even if a single entry exceeds the limit.
pub(crate) fn limit_size(entries: &mut Vec<Entry>, max_size: u64) {
    if entries.len() <= 1 {
        return;
    }

    let mut size = 0;
    let limit = entries
        .iter()
        .take_while(|e| {
            if size == 0 {
                size += e.size();
                return true;
            }
            size += e.size();
            size <= max_size
        })
        .count();

    entries.truncate(limit);
}

/// Use for `max_size` to disable size limiting.
pub const NO_LIMIT: u64 = u64::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_of_size(index: Index, data_len: usize) -> Entry {
        Entry::new(index, 1, Bytes::from(vec![0u8; data_len]))
    }

    #[test]
    fn limit_size_keeps_prefix_within_budget() {
        // Each entry is 17 + 3 = 20 bytes.
        let entries: Vec<Entry> = (1..=5).map(|i| entry_of_size(i, 3)).collect();

        let run = |max_size: u64| {
            let mut ents = entries.clone();
            limit_size(&mut ents, max_size);
            ents.len()
        };

        assert_eq!(run(NO_LIMIT), 5);
        assert_eq!(run(100), 5);
        assert_eq!(run(99), 4);
        assert_eq!(run(40), 2);
        assert_eq!(run(39), 1);
        // First entry is always returned.
        assert_eq!(run(0), 1);
    }

    #[test]
    fn empty_snapshot() {
        assert!(Snapshot::default().is_empty());
        assert!(!Snapshot::new(3, 1, Bytes::new()).is_empty());
    }
}
