use crate::node::progress::ProgressTracker;
use crate::node::role::{Role, RoleNotifier, RoleSnapshot};
use crate::node::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
    RequestVoteReply,
};
use crate::node::timers::TimerHandle;
use crate::node::{CompactError, NodeStatus, ProposeError};
use crate::persist::Persister;
use crate::raft_log::{Entry, HardState, Index, MemoryStorage, NodeId, RaftLog, Snapshot, StorageError, Term};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

/// A replication request the leader has decided to send to one peer.
pub(super) enum ReplicationRequest {
    Append(AppendEntriesArgs),
    Snapshot(InstallSnapshotArgs),
}

/// Core is every piece of mutable node state. It lives behind the node's single mutex; nothing in
/// here blocks on the network.
pub(super) struct Core {
    pub(super) id: NodeId,
    pub(super) term: Term,
    pub(super) vote: Option<NodeId>,
    pub(super) leader_id: Option<NodeId>,
    pub(super) role: Role,
    pub(super) log: RaftLog<MemoryStorage>,
    /// Second handle on the storage `log` reads from. Only written after a successful persist.
    pub(super) storage: MemoryStorage,
    pub(super) persister: Persister,
    pub(super) last_persisted: HardState,
    pub(super) progress: ProgressTracker,
    pub(super) votes: HashSet<NodeId>,
    pub(super) election_timer: TimerHandle,
    pub(super) heartbeat_timer: TimerHandle,
    pub(super) role_notifier: RoleNotifier,
    /// Snapshot the application still has to load before any further entries.
    pub(super) pending_apply_snapshot: Option<Snapshot>,
    pub(super) apply_notify: Arc<Notify>,
    pub(super) max_size_per_msg: u64,
    pub(super) stopped: bool,
    pub(super) logger: slog::Logger,
}

impl Core {
    // ---------------- Role transitions ----------------

    /// Steps down (or stays) a follower. A newer term also clears our vote.
    pub(super) fn become_follower(&mut self, term: Term, leader_id: Option<NodeId>) {
        if term > self.term {
            slog::info!(self.logger, "Observed newer term {} (was {})", term, self.term);
            self.term = term;
            self.vote = None;
        }

        let was_follower = self.role == Role::Follower;
        self.role = Role::Follower;
        self.leader_id = leader_id;
        self.votes.clear();

        if !was_follower {
            slog::info!(self.logger, "Became follower at term {}", self.term);
            self.heartbeat_timer.stop();
            self.election_timer.start();
        }
        self.notify_role();
    }

    pub(super) fn become_candidate(&mut self) {
        self.term += 1;
        self.vote = Some(self.id);
        self.leader_id = None;
        self.role = Role::Candidate;
        self.votes.clear();
        self.votes.insert(self.id);

        slog::info!(self.logger, "Became candidate at term {}", self.term);
        self.persist();
        self.election_timer.start();
        self.notify_role();
    }

    pub(super) fn become_leader(&mut self) {
        assert_eq!(self.role, Role::Candidate, "only a candidate can become leader");

        self.role = Role::Leader;
        self.leader_id = Some(self.id);
        self.votes.clear();
        self.progress.reset(self.log.last_index());

        // Entries from earlier terms only commit once something from our own term does.
        let noop = Entry::new(self.log.last_index() + 1, self.term, Bytes::new());
        self.log.append(&[noop]);
        self.persist();

        slog::info!(
            self.logger,
            "Became leader at term {} with last index {}",
            self.term,
            self.log.last_index()
        );
        self.election_timer.stop();
        self.heartbeat_timer.start();
        self.notify_role();

        // A single-node cluster commits on its own.
        self.maybe_advance_commit();
    }

    pub(super) fn role_snapshot(&self) -> RoleSnapshot {
        RoleSnapshot {
            term: self.term,
            role: self.role,
            leader_id: self.leader_id,
        }
    }

    fn notify_role(&self) {
        self.role_notifier.notify(self.role_snapshot());
    }

    // ---------------- Durability ----------------

    /// Makes every change since the last call durable, then moves it into `storage`. Does nothing
    /// if nothing changed. A failed write is fatal: continuing could break promises already made.
    pub(super) fn persist(&mut self) {
        let hard_state = HardState {
            term: self.term,
            vote: self.vote,
            commit: self.log.committed(),
        };
        let snapshot = self.log.unstable_snapshot().cloned();
        if hard_state == self.last_persisted && snapshot.is_none() && self.log.unstable_entries().is_empty() {
            return;
        }

        let entries = self.log.all_entries();
        if let Err(e) = self.persister.persist(&hard_state, &entries, snapshot.as_ref()) {
            slog::crit!(self.logger, "Failed to persist raft state: {}", e);
            panic!("failed to persist raft state: {}", e);
        }

        if let Some(snapshot) = snapshot {
            let index = snapshot.metadata.index;
            if let Err(e) = self.storage.apply_snapshot(snapshot) {
                slog::warn!(self.logger, "Storage refused snapshot at {}: {}", index, e);
            }
            self.log.stable_snap_to(index);
        }

        let unstable = self.log.unstable_entries().to_vec();
        if let Some(last) = unstable.last() {
            self.storage.append(&unstable);
            self.log.stable_to(last.index, last.term);
        }

        self.storage.set_hard_state(hard_state);
        self.last_persisted = hard_state;
    }

    // ---------------- Inbound RPCs ----------------

    pub(super) fn handle_request_vote(&mut self, args: RequestVoteArgs) -> RequestVoteReply {
        if args.term < self.term {
            slog::debug!(
                self.logger,
                "Rejecting vote for {} with stale term {}",
                args.candidate_id,
                args.term
            );
            return self.request_vote_reply(false);
        }

        if args.term > self.term {
            self.become_follower(args.term, None);
        }

        let can_vote = match self.vote {
            None => true,
            Some(voted_for) => voted_for == args.candidate_id,
        };
        let granted = can_vote && self.log.is_up_to_date(args.last_log_index, args.last_log_term);

        if granted {
            slog::info!(self.logger, "Voting for {} at term {}", args.candidate_id, self.term);
            self.vote = Some(args.candidate_id);
            self.election_timer.reset();
        }
        self.persist();

        self.request_vote_reply(granted)
    }

    fn request_vote_reply(&self, vote_granted: bool) -> RequestVoteReply {
        RequestVoteReply {
            term: self.term,
            leader_id: self.leader_id,
            vote_granted,
        }
    }

    pub(super) fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> AppendEntriesReply {
        if args.term < self.term {
            return self.append_entries_reply(false, 0, None);
        }

        if !follows(args.prev_log_index, &args.entries) {
            slog::warn!(
                self.logger,
                "Rejecting AppendEntries from {}: entries don't follow prev index {}",
                args.leader_id,
                args.prev_log_index
            );
            return self.append_entries_reply(false, self.log.last_index() + 1, None);
        }

        self.accept_leader(args.term, args.leader_id);

        let committed_before = self.log.committed();
        let mut prev_index = args.prev_log_index;
        let mut prev_term = args.prev_log_term;
        let mut entries = &args.entries[..];

        // Our committed prefix already matches the leader's; only look at what comes after it.
        // This also keeps us from reading below a compacted prefix.
        if prev_index < committed_before {
            let skip = (committed_before - prev_index) as usize;
            if skip >= entries.len() {
                // accept_leader may have moved us to a newer term.
                self.persist();
                return self.append_entries_reply(true, committed_before + 1, None);
            }
            entries = &entries[skip..];
            prev_index = committed_before;
            prev_term = match self.log.term(committed_before) {
                Ok(term) => term,
                Err(e) => panic!("committed index {} has no term: {}", committed_before, e),
            };
        }

        let reply = match self.log.maybe_append(prev_index, prev_term, args.leader_commit, entries) {
            Some(last_new_index) => self.append_entries_reply(true, last_new_index + 1, None),
            None => {
                let (hint_index, hint_term) = self.log.find_conflict_by_term(prev_index);
                slog::debug!(
                    self.logger,
                    "Rejecting AppendEntries at prev ({}, {}), hint ({}, {:?})",
                    prev_index,
                    prev_term,
                    hint_index,
                    hint_term
                );
                self.append_entries_reply(false, hint_index, hint_term)
            }
        };

        if self.log.committed() > committed_before {
            self.apply_notify.notify_one();
        }
        self.persist();

        reply
    }

    fn append_entries_reply(&self, success: bool, next_index: Index, conflict_term: Option<Term>) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.term,
            leader_id: self.leader_id,
            success,
            next_index,
            conflict_term,
        }
    }

    pub(super) fn handle_install_snapshot(&mut self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        if args.term < self.term {
            return self.install_snapshot_reply();
        }

        self.accept_leader(args.term, args.leader_id);

        let snapshot = args.snapshot;
        let index = snapshot.metadata.index;
        let term = snapshot.metadata.term;
        if index <= self.log.committed() {
            slog::debug!(
                self.logger,
                "Ignoring snapshot at {}, already committed up to {}",
                index,
                self.log.committed()
            );
            self.persist();
            return self.install_snapshot_reply();
        }

        if self.log.match_term(index, term) {
            // We already hold everything the snapshot covers; just fast-forward the commit.
            slog::info!(self.logger, "Fast-forwarding commit to {} from snapshot", index);
            self.log.commit_to(index);
        } else {
            slog::info!(self.logger, "Installing snapshot [index={}, term={}]", index, term);
            self.pending_apply_snapshot = Some(snapshot.clone());
            self.log.restore(snapshot);
        }
        self.apply_notify.notify_one();
        self.persist();

        self.install_snapshot_reply()
    }

    fn install_snapshot_reply(&self) -> InstallSnapshotReply {
        InstallSnapshotReply {
            term: self.term,
            leader_id: self.leader_id,
        }
    }

    /// Common handling of a request from a leader whose term is at least ours.
    fn accept_leader(&mut self, term: Term, leader_id: NodeId) {
        if term > self.term || self.role != Role::Follower {
            self.become_follower(term, Some(leader_id));
        } else if self.leader_id != Some(leader_id) {
            self.leader_id = Some(leader_id);
            self.notify_role();
        }
        self.election_timer.reset();
    }

    // ---------------- Elections ----------------

    pub(super) fn request_vote_args(&self) -> RequestVoteArgs {
        RequestVoteArgs {
            term: self.term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    /// Returns true if this reply made us leader.
    pub(super) fn handle_request_vote_reply(&mut self, peer_id: NodeId, sent_term: Term, reply: RequestVoteReply) -> bool {
        if self.stopped {
            return false;
        }
        if reply.term > self.term {
            self.become_follower(reply.term, reply.leader_id);
            self.persist();
            return false;
        }
        if self.role != Role::Candidate || self.term != sent_term || !reply.vote_granted {
            return false;
        }

        self.votes.insert(peer_id);
        slog::debug!(
            self.logger,
            "Got vote from {} at term {} ({}/{})",
            peer_id,
            self.term,
            self.votes.len(),
            self.progress.majority()
        );
        if self.votes.len() >= self.progress.majority() {
            self.become_leader();
            return true;
        }
        false
    }

    // ---------------- Replication (leader side) ----------------

    /// Builds the next request for `peer_id` and marks it in flight. `None` if we aren't leader or
    /// a request to that peer is already outstanding.
    pub(super) fn build_replication(&mut self, peer_id: NodeId) -> Option<ReplicationRequest> {
        if self.stopped || self.role != Role::Leader {
            return None;
        }

        let next_index = match self.progress.get(peer_id) {
            Some(progress) if !progress.in_flight => progress.next_index,
            _ => return None,
        };
        let prev_index = next_index - 1;

        let request = match (self.log.term(prev_index), self.log.entries(next_index, self.max_size_per_msg)) {
            (Ok(prev_term), Ok(entries)) => ReplicationRequest::Append(AppendEntriesArgs {
                term: self.term,
                leader_id: self.id,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries,
                leader_commit: self.log.committed(),
            }),
            (Err(StorageError::Compacted), _) | (_, Err(StorageError::Compacted)) => {
                let snapshot = match self.log.snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        slog::warn!(self.logger, "Snapshot for peer {} unavailable: {}", peer_id, e);
                        return None;
                    }
                };
                slog::info!(
                    self.logger,
                    "Peer {} needs index {}, which is compacted; sending snapshot at {}",
                    peer_id,
                    next_index,
                    snapshot.metadata.index
                );
                ReplicationRequest::Snapshot(InstallSnapshotArgs {
                    term: self.term,
                    leader_id: self.id,
                    snapshot,
                })
            }
            (Err(e), _) | (_, Err(e)) => {
                slog::warn!(
                    self.logger,
                    "Can't build request for peer {} at index {}: {}",
                    peer_id,
                    next_index,
                    e
                );
                if let Some(progress) = self.progress.get_mut(peer_id) {
                    progress.back_off_to(self.log.last_index() + 1);
                }
                return None;
            }
        };

        if let Some(progress) = self.progress.get_mut(peer_id) {
            progress.in_flight = true;
        }
        Some(request)
    }

    pub(super) fn clear_in_flight(&mut self, peer_id: NodeId) {
        if let Some(progress) = self.progress.get_mut(peer_id) {
            progress.in_flight = false;
        }
    }

    /// Applies a peer's answer to our AppendEntries. Returns true if the peer should get another
    /// request right away.
    pub(super) fn handle_append_entries_reply(
        &mut self,
        peer_id: NodeId,
        sent_term: Term,
        reply: AppendEntriesReply,
    ) -> bool {
        self.clear_in_flight(peer_id);

        if self.stopped {
            return false;
        }
        if reply.term > self.term {
            slog::info!(
                self.logger,
                "Peer {} is at newer term {}, stepping down",
                peer_id,
                reply.term
            );
            self.become_follower(reply.term, reply.leader_id);
            self.persist();
            return false;
        }
        if self.role != Role::Leader || self.term != sent_term {
            return false;
        }

        if reply.success {
            let updated = match self.progress.get_mut(peer_id) {
                Some(progress) => progress.maybe_update(reply.next_index),
                None => false,
            };
            if updated {
                self.maybe_advance_commit();
            }
        } else {
            let next_index = match reply.conflict_term.and_then(|t| self.log.last_index_of_term(t)) {
                // We have the follower's conflicting term; resume right after our last entry of it.
                Some(last_of_term) => last_of_term + 1,
                None => reply.next_index,
            };
            let next_index = std::cmp::min(next_index, self.log.last_index() + 1);
            if let Some(progress) = self.progress.get_mut(peer_id) {
                progress.back_off_to(next_index);
                slog::debug!(
                    self.logger,
                    "Peer {} rejected AppendEntries; next index now {}",
                    peer_id,
                    progress.next_index
                );
            }
        }

        let last_index = self.log.last_index();
        match self.progress.get(peer_id) {
            Some(progress) => !reply.success || progress.next_index <= last_index,
            None => false,
        }
    }

    /// Applies a peer's answer to our InstallSnapshot. Returns true if the peer should get another
    /// request right away.
    pub(super) fn handle_install_snapshot_reply(
        &mut self,
        peer_id: NodeId,
        sent_term: Term,
        snapshot_index: Index,
        reply: InstallSnapshotReply,
    ) -> bool {
        self.clear_in_flight(peer_id);

        if self.stopped {
            return false;
        }
        if reply.term > self.term {
            self.become_follower(reply.term, reply.leader_id);
            self.persist();
            return false;
        }
        if self.role != Role::Leader || self.term != sent_term {
            return false;
        }

        let updated = match self.progress.get_mut(peer_id) {
            Some(progress) => progress.maybe_update(snapshot_index + 1),
            None => false,
        };
        if updated {
            self.maybe_advance_commit();
        }

        let last_index = self.log.last_index();
        self.progress
            .get(peer_id)
            .map_or(false, |progress| progress.next_index <= last_index)
    }

    /// Commits the highest index replicated on a majority, if it's from our term.
    pub(super) fn maybe_advance_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }

        let quorum_index = self.progress.quorum_match_index(self.log.last_index());
        if self.log.maybe_commit(quorum_index, self.term) {
            self.apply_notify.notify_one();
            self.persist();
        }
    }

    // ---------------- Local API ----------------

    pub(super) fn propose(&mut self, data: Bytes) -> Result<Entry, ProposeError> {
        if self.stopped {
            return Err(ProposeError::Stopped);
        }
        if self.role != Role::Leader {
            return Err(ProposeError::NotLeader {
                leader_id: self.leader_id,
            });
        }

        let entry = Entry::new(self.log.last_index() + 1, self.term, data);
        self.log.append(&[entry.clone()]);
        self.persist();
        self.maybe_advance_commit();

        Ok(entry)
    }

    pub(super) fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            term: self.term,
            role: self.role,
            leader_id: self.leader_id,
            commit_index: self.log.committed(),
            applied_index: self.log.applied(),
            first_index: self.log.first_index(),
            last_index: self.log.last_index(),
        }
    }

    /// Drops every entry up to `index` in favor of a snapshot with the application's `data`.
    pub(super) fn compact(&mut self, index: Index, data: Bytes) -> Result<(), CompactError> {
        if self.stopped {
            return Err(CompactError::Stopped);
        }
        let snapshot_index = self.log.first_index() - 1;
        if index <= snapshot_index {
            return Err(CompactError::AlreadyCompacted { index, snapshot_index });
        }
        let applied = self.log.applied();
        if index > applied {
            return Err(CompactError::NotApplied { index, applied });
        }

        // Everything up to `applied` must be in storage before it can be snapshotted.
        self.persist();

        let snapshot = self.storage.create_snapshot(index, data)?;
        self.storage.compact(index)?;

        let entries = self.log.all_entries();
        if let Err(e) = self.persister.persist(&self.last_persisted, &entries, Some(&snapshot)) {
            slog::crit!(self.logger, "Failed to persist snapshot at {}: {}", index, e);
            panic!("failed to persist snapshot at {}: {}", index, e);
        }

        slog::info!(
            self.logger,
            "Compacted log through index {} (term {})",
            index,
            snapshot.metadata.term
        );
        Ok(())
    }

    // ---------------- Apply pipeline ----------------

    /// Next batch for the application: the pending snapshot alone, else committed entries.
    pub(super) fn next_apply_batch(&mut self, max_size: u64) -> ApplyBatch {
        if let Some(snapshot) = self.pending_apply_snapshot.take() {
            return ApplyBatch::Snapshot(snapshot);
        }
        match self.log.next_entries(max_size) {
            Some(entries) if !entries.is_empty() => ApplyBatch::Entries(entries),
            _ => ApplyBatch::Empty,
        }
    }

    pub(super) fn applied_to(&mut self, index: Index) {
        // A snapshot installed while the batch was out can leave `applied` ahead of it.
        if index > self.log.applied() {
            self.log.applied_to(index);
        }
    }
}

/// Entries in an AppendEntries batch must start right after `prev_index`, one index apart.
fn follows(prev_index: Index, entries: &[Entry]) -> bool {
    entries
        .iter()
        .zip(1u64..)
        .all(|(entry, offset)| prev_index.checked_add(offset) == Some(entry.index))
}

pub(super) enum ApplyBatch {
    Snapshot(Snapshot),
    Entries(Vec<Entry>),
    Empty,
}
