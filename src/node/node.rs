use crate::api::RaftConfig;
use crate::node::apply::{self, ApplyPublisher, ApplyStream};
use crate::node::progress::ProgressTracker;
use crate::node::role::{self, Role, RoleListener, RoleSnapshot};
use crate::node::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
    RequestVoteReply,
};
use crate::node::state::{ApplyBatch, Core, ReplicationRequest};
use crate::node::timers::{TimerEvent, TimerHandle};
use crate::node::{CompactError, NodeStatus, NodeStopped, ProposeError, RaftCreationError};
use crate::peer::RaftPeer;
use crate::persist::Persister;
use crate::raft_log::{Entry, Index, MemoryStorage, NodeId, RaftLog, Storage, Term};
use bytes::Bytes;
use std::cmp;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, Notify};

/// RaftNode is one member of a raft cluster. It's a cheap handle; clones share the same node.
///
/// Inbound RPCs arrive through the `handle_*` methods (usually from the gRPC server), outbound
/// RPCs go through the `RaftPeer` of each remote member, and committed entries come out of the
/// `ApplyStream` returned by `new()`.
#[derive(Clone)]
pub struct RaftNode {
    shared: Arc<Shared>,
}

struct Shared {
    id: NodeId,
    core: Mutex<Core>,
    peers: HashMap<NodeId, Arc<dyn RaftPeer>>,
    role_listener: RoleListener,
    apply_notify: Arc<Notify>,
    logger: slog::Logger,
}

impl RaftNode {
    /// Creates the node from whatever `persister` holds and starts its background tasks. Must be
    /// called within a tokio runtime.
    ///
    /// `peers` is every other cluster member; it must not contain `id`.
    pub fn new(
        id: NodeId,
        peers: HashMap<NodeId, Arc<dyn RaftPeer>>,
        persister: Persister,
        config: RaftConfig,
        logger: slog::Logger,
    ) -> Result<(RaftNode, ApplyStream), RaftCreationError> {
        if peers.contains_key(&id) {
            return Err(RaftCreationError::SelfAsPeer(id));
        }
        let logger = logger.new(slog::o!("NodeId" => id));

        let state = persister.load()?;
        let hard_state = state.hard_state;
        let storage = MemoryStorage::new();
        if let Some(snapshot) = state.snapshot.clone() {
            storage.apply_snapshot(snapshot).map_err(|e| {
                RaftCreationError::CorruptPersistedState(format!("can't restore snapshot: {}", e))
            })?;
        }
        // A consistent state file has committed at least up to the snapshot. If it hasn't, the
        // snapshot was written but the state file after it never was, and its entries are stale.
        let stale_entries = match &state.snapshot {
            Some(snapshot) => hard_state.commit < snapshot.metadata.index,
            None => false,
        };
        if stale_entries && !state.entries.is_empty() {
            slog::warn!(
                logger,
                "Dropping {} persisted entries older than the snapshot (commit {})",
                state.entries.len(),
                hard_state.commit
            );
        } else if let Some(first) = state.entries.first() {
            if first.index > storage.last_index() + 1 {
                return Err(RaftCreationError::CorruptPersistedState(format!(
                    "entries start at {} but the snapshot ends at {}",
                    first.index,
                    storage.last_index()
                )));
            }
            storage.append(&state.entries);
        }
        storage.set_hard_state(hard_state);

        let mut log = RaftLog::new(storage.clone(), logger.clone());
        if hard_state.commit > log.last_index() {
            return Err(RaftCreationError::CorruptPersistedState(format!(
                "commit index {} is beyond the last log index {}",
                hard_state.commit,
                log.last_index()
            )));
        }
        log.commit_to(hard_state.commit);

        // Whatever the application already holds isn't delivered again.
        let mut pending_apply_snapshot = None;
        match state.snapshot {
            Some(snapshot) if config.applied < snapshot.metadata.index => {
                pending_apply_snapshot = Some(snapshot);
            }
            _ => {
                let applied = cmp::min(config.applied, log.committed());
                if applied > log.applied() {
                    log.applied_to(applied);
                }
            }
        }

        slog::info!(
            logger,
            "Starting raft node [term={}, vote={:?}, commit={}, applied={}, first_index={}, last_index={}]",
            hard_state.term,
            hard_state.vote,
            log.committed(),
            log.applied(),
            log.first_index(),
            log.last_index()
        );

        let (timer_events_tx, timer_events_rx) = mpsc::channel(16);
        let election_timer = TimerHandle::election_timer(
            config.election_timeout_min,
            config.election_timeout_max,
            timer_events_tx.clone(),
        );
        let heartbeat_timer = TimerHandle::heartbeat_timer(config.heartbeat_interval, timer_events_tx);

        let (role_notifier, role_listener) = role::new(RoleSnapshot {
            term: hard_state.term,
            role: Role::Follower,
            leader_id: None,
        });
        let (apply_publisher, apply_stream) = apply::new(config.apply_channel_capacity);
        let apply_notify = Arc::new(Notify::new());

        let core = Core {
            id,
            term: hard_state.term,
            vote: hard_state.vote,
            leader_id: None,
            role: Role::Follower,
            progress: ProgressTracker::new(peers.keys().copied(), log.last_index()),
            log,
            storage,
            persister,
            last_persisted: hard_state,
            votes: HashSet::new(),
            election_timer,
            heartbeat_timer,
            role_notifier,
            pending_apply_snapshot,
            apply_notify: apply_notify.clone(),
            max_size_per_msg: config.max_size_per_msg,
            stopped: false,
            logger: logger.clone(),
        };
        core.election_timer.start();

        let shared = Arc::new(Shared {
            id,
            core: Mutex::new(core),
            peers,
            role_listener,
            apply_notify: apply_notify.clone(),
            logger: logger.clone(),
        });

        tokio::task::spawn(dispatch_timer_events(Arc::downgrade(&shared), timer_events_rx));
        tokio::task::spawn(run_applier(
            Arc::downgrade(&shared),
            apply_notify.clone(),
            apply_publisher,
            config.max_apply_batch_size,
            logger,
        ));
        // Restarted nodes may have committed entries the application hasn't seen.
        apply_notify.notify_one();

        Ok((RaftNode { shared }, apply_stream))
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Appends `data` to the log if this node is leader. The returned entry isn't committed yet;
    /// it shows up on the `ApplyStream` once it is.
    pub fn propose(&self, data: Bytes) -> Result<Entry, ProposeError> {
        let entry = self.shared.lock().propose(data)?;
        self.shared.broadcast();
        Ok(entry)
    }

    /// Current term, and whether this node believes it's the leader.
    pub fn get_state(&self) -> (Term, bool) {
        let core = self.shared.lock();
        (core.term, core.role == Role::Leader)
    }

    pub fn status(&self) -> NodeStatus {
        self.shared.lock().status()
    }

    /// Replaces the log up to and including `index` with a snapshot holding `data`, the
    /// application's state as of `index`. `index` must already be applied.
    pub fn compact(&self, index: Index, data: Bytes) -> Result<(), CompactError> {
        self.shared.lock().compact(index, data)
    }

    pub fn role_listener(&self) -> RoleListener {
        self.shared.role_listener.clone()
    }

    /// Stops the node for good. Timers stop, proposals and RPCs are refused, and the
    /// `ApplyStream` ends.
    pub fn stop(&self) {
        let mut core = self.shared.lock();
        if core.stopped {
            return;
        }
        slog::info!(self.shared.logger, "Stopping raft node at term {}", core.term);
        core.stopped = true;
        core.election_timer.shutdown();
        core.heartbeat_timer.shutdown();
        drop(core);

        self.shared.apply_notify.notify_one();
    }

    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, NodeStopped> {
        let mut core = self.shared.lock();
        if core.stopped {
            return Err(NodeStopped);
        }
        Ok(core.handle_request_vote(args))
    }

    pub fn handle_append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, NodeStopped> {
        let mut core = self.shared.lock();
        if core.stopped {
            return Err(NodeStopped);
        }
        Ok(core.handle_append_entries(args))
    }

    pub fn handle_install_snapshot(
        &self,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, NodeStopped> {
        let mut core = self.shared.lock();
        if core.stopped {
            return Err(NodeStopped);
        }
        Ok(core.handle_install_snapshot(args))
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<Core> {
        self.core.lock().expect("RaftNode core mutex guard poison")
    }

    /// Starts a replication round to every peer. Peers with a request in flight are skipped; their
    /// reply handling starts the next round.
    fn broadcast(self: &Arc<Self>) {
        for peer_id in self.peers.keys() {
            tokio::task::spawn(self.clone().replicate(*peer_id));
        }
    }

    async fn replicate(self: Arc<Self>, peer_id: NodeId) {
        let peer = match self.peers.get(&peer_id) {
            Some(peer) => peer.clone(),
            None => return,
        };

        loop {
            let (request, sent_term) = {
                let mut core = self.lock();
                match core.build_replication(peer_id) {
                    Some(request) => (request, core.term),
                    None => return,
                }
            };

            let follow_up = match request {
                ReplicationRequest::Append(args) => match peer.append_entries(args).await {
                    Ok(reply) => {
                        let mut core = self.lock();
                        core.handle_append_entries_reply(peer_id, sent_term, reply)
                    }
                    Err(e) => {
                        slog::debug!(self.logger, "AppendEntries failed: {}", e; "Peer" => peer_id);
                        self.lock().clear_in_flight(peer_id);
                        false
                    }
                },
                ReplicationRequest::Snapshot(args) => {
                    let snapshot_index = args.snapshot.metadata.index;
                    match peer.install_snapshot(args).await {
                        Ok(reply) => {
                            let mut core = self.lock();
                            core.handle_install_snapshot_reply(peer_id, sent_term, snapshot_index, reply)
                        }
                        Err(e) => {
                            slog::warn!(self.logger, "InstallSnapshot failed: {}", e; "Peer" => peer_id);
                            self.lock().clear_in_flight(peer_id);
                            false
                        }
                    }
                }
            };

            if !follow_up {
                return;
            }
        }
    }

    fn start_election(self: &Arc<Self>) {
        let args = {
            let mut core = self.lock();
            if core.stopped || core.role == Role::Leader {
                return;
            }
            core.become_candidate();
            if core.votes.len() >= core.progress.majority() {
                core.become_leader();
                None
            } else {
                Some(core.request_vote_args())
            }
        };

        let args = match args {
            Some(args) => args,
            None => {
                self.broadcast();
                return;
            }
        };
        for (peer_id, peer) in self.peers.iter() {
            tokio::task::spawn(self.clone().request_vote_from(*peer_id, peer.clone(), args.clone()));
        }
    }

    async fn request_vote_from(self: Arc<Self>, peer_id: NodeId, peer: Arc<dyn RaftPeer>, args: RequestVoteArgs) {
        let sent_term = args.term;
        let reply = match peer.request_vote(args).await {
            Ok(reply) => reply,
            Err(e) => {
                slog::debug!(self.logger, "RequestVote failed: {}", e; "Peer" => peer_id);
                return;
            }
        };

        let became_leader = {
            let mut core = self.lock();
            core.handle_request_vote_reply(peer_id, sent_term, reply)
        };
        if became_leader {
            self.broadcast();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Lets the applier notice the node is gone and close the stream.
        self.apply_notify.notify_one();
    }
}

async fn dispatch_timer_events(node: Weak<Shared>, mut events: mpsc::Receiver<TimerEvent>) {
    while let Some(event) = events.recv().await {
        let shared = match node.upgrade() {
            Some(shared) => shared,
            None => return,
        };
        match event {
            TimerEvent::ElectionTimeout => shared.start_election(),
            TimerEvent::Heartbeat => shared.broadcast(),
        }
    }
}

/// Hands committed entries to the application, in order, without holding the node's lock while
/// the application is slow to read.
async fn run_applier(
    node: Weak<Shared>,
    notify: Arc<Notify>,
    publisher: ApplyPublisher,
    max_batch_size: u64,
    logger: slog::Logger,
) {
    loop {
        notify.notified().await;

        loop {
            let batch = match node.upgrade() {
                Some(shared) => {
                    let mut core = shared.lock();
                    if core.stopped {
                        slog::debug!(logger, "Applier exiting, node stopped");
                        return;
                    }
                    core.next_apply_batch(max_batch_size)
                }
                None => return,
            };

            let last_index = match batch {
                ApplyBatch::Empty => break,
                ApplyBatch::Snapshot(snapshot) => {
                    let index = snapshot.metadata.index;
                    slog::info!(logger, "Handing snapshot at {} to the application", index);
                    if !publisher.publish(&logger, snapshot.into()).await {
                        return;
                    }
                    index
                }
                ApplyBatch::Entries(entries) => {
                    let mut last_index = 0;
                    for entry in entries {
                        last_index = entry.index;
                        if !publisher.publish(&logger, entry.into()).await {
                            return;
                        }
                    }
                    last_index
                }
            };

            match node.upgrade() {
                Some(shared) => {
                    let mut core = shared.lock();
                    core.applied_to(last_index);
                }
                None => return,
            }
        }
    }
}
