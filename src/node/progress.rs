use crate::raft_log::{Index, NodeId};
use std::collections::HashMap;

/// Leader's view of one peer's log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Progress {
    /// > index of the next log entry to send to that server
    /// > (initialized to leader last log index + 1)
    pub next_index: Index,
    /// > index of highest log entry known to be replicated on server
    /// > (initialized to 0, increases monotonically)
    pub match_index: Index,
    /// A replication request to this peer hasn't been answered yet. We never have more than one
    /// outstanding, so replies can't arrive out of order.
    pub in_flight: bool,
}

impl Progress {
    fn new(last_index: Index) -> Self {
        Progress {
            next_index: last_index + 1,
            match_index: 0,
            in_flight: false,
        }
    }

    /// Records a successful append. Returns false for a stale reply that would move us backwards.
    pub fn maybe_update(&mut self, next_index: Index) -> bool {
        let matched = next_index.saturating_sub(1);
        if matched < self.match_index {
            return false;
        }
        self.match_index = matched;
        self.next_index = std::cmp::max(self.next_index, next_index);
        true
    }

    /// Moves `next_index` back after a rejection. Never below `match_index + 1`.
    pub fn back_off_to(&mut self, next_index: Index) {
        self.next_index = std::cmp::max(next_index, self.match_index + 1);
    }
}

pub struct ProgressTracker {
    peers: HashMap<NodeId, Progress>,
}

impl ProgressTracker {
    pub fn new<I: IntoIterator<Item = NodeId>>(peer_ids: I, last_index: Index) -> Self {
        ProgressTracker {
            peers: peer_ids.into_iter().map(|id| (id, Progress::new(last_index))).collect(),
        }
    }

    /// Forgets everything learned about peers. Used when becoming leader.
    pub fn reset(&mut self, last_index: Index) {
        for progress in self.peers.values_mut() {
            *progress = Progress::new(last_index);
        }
    }

    pub fn get(&self, peer_id: NodeId) -> Option<&Progress> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: NodeId) -> Option<&mut Progress> {
        self.peers.get_mut(&peer_id)
    }

    /// Number of votes (including our own) needed to win an election or commit an entry.
    pub fn majority(&self) -> usize {
        let cluster_size = self.peers.len() + 1;
        cluster_size / 2 + 1
    }

    /// Highest index stored on a majority of the cluster, counting the leader's own log, which
    /// holds everything up to `leader_last_index`.
    pub fn quorum_match_index(&self, leader_last_index: Index) -> Index {
        let mut matched: Vec<Index> = self.peers.values().map(|p| p.match_index).collect();
        matched.push(leader_last_index);
        matched.sort_unstable();

        // Everything from `quorum_idx` onward is a majority, all at least `matched[quorum_idx]`.
        let quorum_idx = matched.len() - self.majority();
        matched[quorum_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(matches: Vec<Index>) -> ProgressTracker {
        let mut tracker = ProgressTracker::new(1..=matches.len() as u64, 10);
        for (id, m) in (1..).zip(matches) {
            tracker.get_mut(id).unwrap().match_index = m;
        }
        tracker
    }

    #[test]
    fn quorum_match_index() {
        fn run(expected: Index, matches: Vec<Index>) {
            let tracker = tracker_with(matches.clone());
            assert_eq!(
                expected,
                tracker.quorum_match_index(10),
                "peer matches: {:?}",
                matches
            );
        }

        // 1-cluster
        run(10, vec![]);

        // 2-cluster
        run(0, vec![0]);
        run(9, vec![9]);

        // 3-cluster
        run(0, vec![0, 0]);
        run(9, vec![0, 9]);
        run(9, vec![8, 9]);

        // 4-cluster
        run(0, vec![0, 0, 0]);
        run(0, vec![0, 0, 9]);
        run(8, vec![0, 8, 9]);
        run(8, vec![7, 8, 9]);

        // 5-cluster
        run(0, vec![0, 0, 0, 0]);
        run(0, vec![0, 0, 0, 9]);
        run(8, vec![0, 0, 8, 9]);
        run(8, vec![0, 7, 8, 9]);
        run(7, vec![0, 6, 7, 9]);
        run(8, vec![9, 8, 7, 6]);
    }

    #[test]
    fn majority_sizes() {
        assert_eq!(tracker_with(vec![]).majority(), 1);
        assert_eq!(tracker_with(vec![0]).majority(), 2);
        assert_eq!(tracker_with(vec![0, 0]).majority(), 2);
        assert_eq!(tracker_with(vec![0, 0, 0]).majority(), 3);
        assert_eq!(tracker_with(vec![0, 0, 0, 0]).majority(), 3);
    }

    #[test]
    fn progress_updates() {
        let mut progress = Progress::new(10);
        assert_eq!(progress.next_index, 11);

        // Rejection hint: back off.
        progress.back_off_to(4);
        assert_eq!(progress.next_index, 4);

        assert!(progress.maybe_update(8));
        assert_eq!(progress.match_index, 7);
        assert_eq!(progress.next_index, 8);

        // Stale success reply.
        assert!(!progress.maybe_update(5));
        assert_eq!(progress.match_index, 7);

        // Never back off below what's known to match.
        progress.back_off_to(2);
        assert_eq!(progress.next_index, 8);
    }
}
