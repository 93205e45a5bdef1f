use crate::raft_log::storage::{Storage, StorageError};
use crate::raft_log::types::{limit_size, Entry, Index, Snapshot, Term, NO_LIMIT};
use crate::raft_log::unstable::Unstable;
use slog::Logger;
use std::cmp;

/// RaftLog is the single gap-free view over the log that the node operates on. It stitches
/// together the already-persisted prefix (`Storage`) and the not-yet-persisted suffix
/// (`Unstable`), and tracks the commit and apply cursors.
///
/// ```text
///  snapshot/first.....applied....committed....stable.....last
///  --------|------------------------------------------------|
///                            log entries
/// ```
pub struct RaftLog<S: Storage> {
    store: S,
    unstable: Unstable,
    /// Highest index known to be replicated on a quorum.
    committed: Index,
    /// Highest index handed to the application. `applied <= committed` always.
    applied: Index,
    logger: Logger,
}

impl<S: Storage> RaftLog<S> {
    pub fn new(store: S, logger: Logger) -> Self {
        let first_index = store.first_index();
        let last_index = store.last_index();

        RaftLog {
            store,
            unstable: Unstable::new(last_index + 1, logger.clone()),
            committed: first_index - 1,
            applied: first_index - 1,
            logger,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn committed(&self) -> Index {
        self.committed
    }

    pub fn applied(&self) -> Index {
        self.applied
    }

    pub fn first_index(&self) -> Index {
        match self.unstable.maybe_first_index() {
            Some(idx) => idx,
            None => self.store.first_index(),
        }
    }

    pub fn last_index(&self) -> Index {
        match self.unstable.maybe_last_index() {
            Some(idx) => idx,
            None => self.store.last_index(),
        }
    }

    pub fn last_term(&self) -> Term {
        match self.term(self.last_index()) {
            Ok(t) => t,
            Err(e) => panic!(
                "unexpected error when getting the last term ({}): {:?}",
                self.last_index(),
                e
            ),
        }
    }

    /// Term of the entry at `index`. The index right before `first_index()` is the snapshot point
    /// and still has a known term.
    pub fn term(&self, index: Index) -> Result<Term, StorageError> {
        let dummy_index = self.first_index() - 1;
        if index < dummy_index {
            return Err(StorageError::Compacted);
        }
        if index > self.last_index() {
            return Err(StorageError::Unavailable);
        }

        match self.unstable.maybe_term(index) {
            Some(term) => Ok(term),
            None => self.store.term(index),
        }
    }

    pub fn match_term(&self, index: Index, term: Term) -> bool {
        self.term(index).map(|t| t == term).unwrap_or(false)
    }

    /// A candidate's log is at least as up-to-date as ours if its last term is newer, or if it has
    /// the same last term and is at least as long.
    pub fn is_up_to_date(&self, last_index: Index, last_term: Term) -> bool {
        last_term > self.last_term() || (last_term == self.last_term() && last_index >= self.last_index())
    }

    /// Follower side of AppendEntries. Returns the index of the last new entry if the log
    /// contains an entry at `prev_index` with `prev_term`, or `None` to reject.
    ///
    /// `entries` must start at `prev_index + 1` and be contiguous; callers check this for input
    /// that came off the wire.
    pub fn maybe_append(
        &mut self,
        prev_index: Index,
        prev_term: Term,
        leader_commit: Index,
        entries: &[Entry],
    ) -> Option<Index> {
        debug_assert!(
            entries.iter().zip(1u64..).all(|(e, offset)| e.index == prev_index + offset),
            "entries don't follow {}",
            prev_index
        );
        if !self.match_term(prev_index, prev_term) {
            return None;
        }

        let last_new_index = prev_index + entries.len() as u64;
        let conflict_index = self.find_conflict(entries);
        if conflict_index != 0 {
            assert!(
                conflict_index > self.committed,
                "entry {} conflicts with committed entry (committed {})",
                conflict_index,
                self.committed
            );
            let start = (conflict_index - (prev_index + 1)) as usize;
            self.append(&entries[start..]);
        }

        self.commit_to(cmp::min(leader_commit, last_new_index));
        Some(last_new_index)
    }

    /// Returns the index of the first entry in `entries` that is missing locally or disagrees on
    /// term, or 0 if every entry is already present.
    ///
    /// `entries` must be contiguous.
    pub fn find_conflict(&self, entries: &[Entry]) -> Index {
        for e in entries {
            if !self.match_term(e.index, e.term) {
                if e.index <= self.last_index() {
                    slog::info!(
                        self.logger,
                        "Found conflict at index {}, existing term: {:?}, conflicting term: {}",
                        e.index,
                        self.term(e.index).ok(),
                        e.term
                    );
                }
                return e.index;
            }
        }
        0
    }

    /// Conflict hint for a rejected AppendEntries whose previous entry is at `index`. If the log is
    /// shorter than `index`, points right past the end. Otherwise points at the first entry of the
    /// term we hold at `index`, so the leader can skip the whole term in one round trip.
    pub fn find_conflict_by_term(&self, index: Index) -> (Index, Option<Term>) {
        let last_index = self.last_index();
        if index > last_index {
            return (last_index + 1, None);
        }

        let our_term = match self.term(index) {
            Ok(t) => t,
            // Below the snapshot. The leader will fall back to InstallSnapshot if needed.
            Err(_) => return (self.first_index(), None),
        };

        let mut conflict_index = index;
        while conflict_index > self.committed + 1 {
            match self.term(conflict_index - 1) {
                Ok(t) if t == our_term => conflict_index -= 1,
                _ => break,
            }
        }

        (conflict_index, Some(our_term))
    }

    /// Leader side of the conflict hint. Last index in the log holding `term`, if any.
    pub fn last_index_of_term(&self, term: Term) -> Option<Index> {
        let first = self.first_index() - 1;
        let last = self.last_index();

        // Terms are non-decreasing along the log: find the last index whose term <= `term`.
        let (mut lo, mut hi) = (first, last + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.term(mid) {
                Ok(t) if t <= term => lo = mid + 1,
                Ok(_) => hi = mid,
                Err(_) => return None,
            }
        }

        if lo == first {
            return None;
        }
        match self.term(lo - 1) {
            Ok(t) if t == term => Some(lo - 1),
            _ => None,
        }
    }

    /// Appends entries to the unstable suffix, truncating any conflicting tail. Returns the new
    /// last index.
    pub fn append(&mut self, entries: &[Entry]) -> Index {
        if entries.is_empty() {
            return self.last_index();
        }

        let after = entries[0].index - 1;
        assert!(
            after >= self.committed,
            "append after {} is out of range [committed({})]",
            after,
            self.committed
        );

        self.unstable.truncate_and_append(entries);
        self.last_index()
    }

    /// Advances the commit cursor. Lower indexes are ignored; `committed` never regresses.
    pub fn commit_to(&mut self, to_commit: Index) {
        if self.committed >= to_commit {
            return;
        }
        assert!(
            self.last_index() >= to_commit,
            "to_commit {} is out of range [last_index {}]",
            to_commit,
            self.last_index()
        );
        self.committed = to_commit;
    }

    pub fn applied_to(&mut self, index: Index) {
        if index == 0 {
            return;
        }
        assert!(
            self.committed >= index && index >= self.applied,
            "applied({}) is out of range [prev_applied({}), committed({})]",
            index,
            self.applied,
            self.committed
        );
        self.applied = index;
    }

    /// Leader side of commit advancement. Only commits when the entry at `max_index` belongs to
    /// `term`; entries from earlier terms are committed indirectly.
    pub fn maybe_commit(&mut self, max_index: Index, term: Term) -> bool {
        if max_index > self.committed && self.term(max_index).map_or(false, |t| t == term) {
            slog::debug!(self.logger, "Committing index {} at term {}", max_index, term);
            self.commit_to(max_index);
            true
        } else {
            false
        }
    }

    /// Committed entries that are ready to be applied, bounded by `max_size` bytes.
    pub fn next_entries(&self, max_size: u64) -> Option<Vec<Entry>> {
        let offset = cmp::max(self.applied + 1, self.first_index());
        let committed = self.committed;
        if committed + 1 > offset {
            match self.slice(offset, committed + 1, max_size) {
                Ok(entries) => return Some(entries),
                Err(e) => panic!("unexpected error when reading committed entries: {}", e),
            }
        }
        None
    }

    pub fn has_next_entries(&self) -> bool {
        let offset = cmp::max(self.applied + 1, self.first_index());
        self.committed + 1 > offset
    }

    /// Entries starting at `from`, bounded by `max_size` bytes. Empty if `from` is past the end.
    pub fn entries(&self, from: Index, max_size: u64) -> Result<Vec<Entry>, StorageError> {
        let last = self.last_index();
        if from > last {
            return Ok(Vec::new());
        }
        self.slice(from, last + 1, max_size)
    }

    pub fn all_entries(&self) -> Vec<Entry> {
        let first_index = self.first_index();
        match self.entries(first_index, NO_LIMIT) {
            Ok(entries) => entries,
            // A concurrent compaction can't happen; the node holds its lock around every call.
            Err(e) => panic!("unexpected error when reading all entries: {}", e),
        }
    }

    pub fn unstable_entries(&self) -> &[Entry] {
        &self.unstable.entries
    }

    pub fn unstable_snapshot(&self) -> Option<&Snapshot> {
        self.unstable.snapshot.as_ref()
    }

    /// Pending snapshot if there is one, otherwise the one in Storage.
    pub fn snapshot(&self) -> Result<Snapshot, StorageError> {
        match &self.unstable.snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None => self.store.snapshot(),
        }
    }

    pub fn stable_to(&mut self, index: Index, term: Term) {
        self.unstable.stable_to(index, term)
    }

    pub fn stable_snap_to(&mut self, index: Index) {
        self.unstable.stable_snap_to(index)
    }

    /// Replaces the log with a snapshot: everything at or below it is summarized, nothing newer is
    /// known. Takes ownership of the snapshot.
    pub fn restore(&mut self, snapshot: Snapshot) {
        slog::info!(
            self.logger,
            "Log [committed={}, applied={}, last_index={}] restoring snapshot [index={}, term={}]",
            self.committed,
            self.applied,
            self.last_index(),
            snapshot.metadata.index,
            snapshot.metadata.term
        );
        let index = snapshot.metadata.index;
        assert!(index >= self.committed, "restoring snapshot {} below committed {}", index, self.committed);
        self.committed = index;
        self.unstable.restore(snapshot);
    }

    /// Entries in `[low, high)`, bounded by `max_size` bytes. Returns `Compacted` if `low` has
    /// been compacted away; the caller must fall back to snapshot transfer.
    pub fn slice(&self, low: Index, high: Index, max_size: u64) -> Result<Vec<Entry>, StorageError> {
        self.must_check_out_of_bounds(low, high)?;
        if low == high {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        if low < self.unstable.offset {
            let stored = self.store.entries(low, cmp::min(high, self.unstable.offset), max_size)?;

            // Storage already truncated to the size limit, nothing more to read.
            if (stored.len() as u64) < cmp::min(high, self.unstable.offset) - low {
                return Ok(stored);
            }
            entries = stored;
        }

        if high > self.unstable.offset {
            let lo = cmp::max(low, self.unstable.offset);
            entries.extend_from_slice(self.unstable.slice(lo, high));
        }

        limit_size(&mut entries, max_size);
        Ok(entries)
    }

    fn must_check_out_of_bounds(&self, low: Index, high: Index) -> Result<(), StorageError> {
        assert!(low <= high, "invalid slice {} > {}", low, high);

        let first_index = self.first_index();
        if low < first_index {
            return Err(StorageError::Compacted);
        }

        let length = self.last_index() + 1 - first_index;
        assert!(
            high <= first_index + length,
            "slice[{},{}) out of bound [{},{}]",
            low,
            high,
            first_index,
            self.last_index()
        );
        Ok(())
    }
}
