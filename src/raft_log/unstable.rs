use crate::raft_log::types::{Entry, Index, Snapshot, Term};
use slog::Logger;

/// Unstable holds entries and (at most one) snapshot that haven't been persisted yet.
///
/// Entries are at `offset`, `offset + 1`, ... There's no gap between the last entry in Storage
/// and `offset`, except while a snapshot is pending, in which case `offset == snapshot.index + 1`.
pub struct Unstable {
    pub snapshot: Option<Snapshot>,
    pub entries: Vec<Entry>,
    pub offset: Index,
    logger: Logger,
}

impl Unstable {
    pub fn new(offset: Index, logger: Logger) -> Self {
        Unstable {
            snapshot: None,
            entries: Vec::new(),
            offset,
            logger,
        }
    }

    /// First index only known if there's a pending snapshot. Entries alone don't determine
    /// the first index of the whole log.
    pub fn maybe_first_index(&self) -> Option<Index> {
        self.snapshot.as_ref().map(|snap| snap.metadata.index + 1)
    }

    pub fn maybe_last_index(&self) -> Option<Index> {
        match self.entries.len() {
            0 => self.snapshot.as_ref().map(|snap| snap.metadata.index),
            len => Some(self.offset + len as u64 - 1),
        }
    }

    pub fn maybe_term(&self, index: Index) -> Option<Term> {
        if index < self.offset {
            let snapshot = self.snapshot.as_ref()?;
            if snapshot.metadata.index == index {
                return Some(snapshot.metadata.term);
            }
            return None;
        }

        let last = self.maybe_last_index()?;
        if index > last {
            return None;
        }
        Some(self.entries[(index - self.offset) as usize].term)
    }

    /// Drops entries up to `index` once they've been written to Storage. Ignored if the entry
    /// at `index` has since been replaced by one of a different term.
    pub fn stable_to(&mut self, index: Index, term: Term) {
        let t = match self.maybe_term(index) {
            Some(t) => t,
            None => return,
        };

        if t == term && index >= self.offset {
            let start = (index + 1 - self.offset) as usize;
            self.entries.drain(..start);
            self.offset = index + 1;
        }
    }

    pub fn stable_snap_to(&mut self, index: Index) {
        if let Some(snap) = &self.snapshot {
            if snap.metadata.index == index {
                self.snapshot = None;
            }
        }
    }

    /// Takes ownership of the snapshot. Every unstable entry is discarded.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.entries.clear();
        self.offset = snapshot.metadata.index + 1;
        self.snapshot = Some(snapshot);
    }

    /// Appends entries, truncating any unstable entries that they overwrite.
    pub fn truncate_and_append(&mut self, entries: &[Entry]) {
        let first = match entries.first() {
            Some(e) => e.index,
            None => return,
        };

        if first == self.offset + self.entries.len() as u64 {
            // Directly follows the last unstable entry.
            self.entries.extend_from_slice(entries);
        } else if first <= self.offset {
            // Replaces every unstable entry.
            slog::info!(self.logger, "Replacing unstable entries from index {}", first);
            self.offset = first;
            self.entries.clear();
            self.entries.extend_from_slice(entries);
        } else {
            slog::info!(self.logger, "Truncating unstable entries from index {}", first);
            self.entries.truncate((first - self.offset) as usize);
            self.entries.extend_from_slice(entries);
        }
    }

    /// Returns unstable entries in `[lo, hi)`.
    pub fn slice(&self, lo: Index, hi: Index) -> &[Entry] {
        self.must_check_out_of_bounds(lo, hi);
        let l = (lo - self.offset) as usize;
        let h = (hi - self.offset) as usize;
        &self.entries[l..h]
    }

    fn must_check_out_of_bounds(&self, lo: Index, hi: Index) {
        assert!(lo <= hi, "invalid unstable.slice {} > {}", lo, hi);
        let upper = self.offset + self.entries.len() as u64;
        assert!(
            lo >= self.offset && hi <= upper,
            "unstable.slice[{}, {}) out of bound [{}, {}]",
            lo,
            hi,
            self.offset,
            upper
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ent(index: Index, term: Term) -> Entry {
        Entry::new(index, term, Bytes::new())
    }

    fn unstable(offset: Index, entries: Vec<Entry>, snapshot: Option<Snapshot>) -> Unstable {
        let mut u = Unstable::new(offset, Logger::root(slog::Discard, slog::o!()));
        u.entries = entries;
        u.snapshot = snapshot;
        u
    }

    #[test]
    fn first_and_last_index() {
        let u = unstable(5, vec![ent(5, 1)], None);
        assert_eq!(u.maybe_first_index(), None);
        assert_eq!(u.maybe_last_index(), Some(5));

        let u = unstable(5, vec![], Some(Snapshot::new(4, 1, Bytes::new())));
        assert_eq!(u.maybe_first_index(), Some(5));
        assert_eq!(u.maybe_last_index(), Some(4));

        let u = unstable(0, vec![], None);
        assert_eq!(u.maybe_last_index(), None);
    }

    #[test]
    fn term_lookup() {
        let u = unstable(5, vec![ent(5, 1)], Some(Snapshot::new(4, 1, Bytes::new())));
        assert_eq!(u.maybe_term(4), Some(1));
        assert_eq!(u.maybe_term(5), Some(1));
        assert_eq!(u.maybe_term(6), None);
        assert_eq!(u.maybe_term(3), None);
    }

    #[test]
    fn stable_to_ignores_replaced_entries() {
        let mut u = unstable(5, vec![ent(5, 1), ent(6, 1)], None);

        // Term mismatch: entry 5 has been replaced since the write was issued.
        u.stable_to(5, 2);
        assert_eq!(u.offset, 5);
        assert_eq!(u.entries.len(), 2);

        u.stable_to(5, 1);
        assert_eq!(u.offset, 6);
        assert_eq!(u.entries, vec![ent(6, 1)]);

        // Out of range is a no-op.
        u.stable_to(9, 1);
        assert_eq!(u.offset, 6);
    }

    #[test]
    fn truncate_and_append_cases() {
        // Append to the end.
        let mut u = unstable(5, vec![ent(5, 1)], None);
        u.truncate_and_append(&[ent(6, 1), ent(7, 1)]);
        assert_eq!(u.offset, 5);
        assert_eq!(u.entries, vec![ent(5, 1), ent(6, 1), ent(7, 1)]);

        // Replace everything.
        let mut u = unstable(5, vec![ent(5, 1)], None);
        u.truncate_and_append(&[ent(4, 2), ent(5, 2)]);
        assert_eq!(u.offset, 4);
        assert_eq!(u.entries, vec![ent(4, 2), ent(5, 2)]);

        // Truncate in the middle.
        let mut u = unstable(5, vec![ent(5, 1), ent(6, 1), ent(7, 1)], None);
        u.truncate_and_append(&[ent(6, 2)]);
        assert_eq!(u.offset, 5);
        assert_eq!(u.entries, vec![ent(5, 1), ent(6, 2)]);
    }

    #[test]
    fn restore_drops_entries() {
        let mut u = unstable(5, vec![ent(5, 1)], None);
        u.restore(Snapshot::new(10, 3, Bytes::new()));
        assert_eq!(u.offset, 11);
        assert!(u.entries.is_empty());
        assert_eq!(u.maybe_last_index(), Some(10));

        u.stable_snap_to(9);
        assert!(u.snapshot.is_some());
        u.stable_snap_to(10);
        assert!(u.snapshot.is_none());
    }
}
