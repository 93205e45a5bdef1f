#![allow(dead_code)]

use bytes::Bytes;
use raft_node::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply, NodeId, PeerError,
    Persister, RaftConfig, RaftNode, RaftPeer, RequestVoteArgs, RequestVoteReply, Term,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

pub fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub fn test_config() -> RaftConfig {
    RaftConfig {
        heartbeat_interval: Duration::from_millis(20),
        election_timeout_min: Duration::from_millis(150),
        election_timeout_max: Duration::from_millis(300),
        rpc_timeout: Duration::from_millis(50),
        ..RaftConfig::default()
    }
}

/// In-process stand-in for the network. Nodes are looked up at call time, so a restarted node
/// is reachable under the same id.
#[derive(Clone, Default)]
pub struct Network {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<NodeId, RaftNode>,
    disconnected: HashSet<NodeId>,
}

impl Network {
    pub fn register(&self, node: RaftNode) {
        self.state.lock().unwrap().nodes.insert(node.id(), node);
    }

    /// Cuts `id` off from everyone, in both directions.
    pub fn disconnect(&self, id: NodeId) {
        self.state.lock().unwrap().disconnected.insert(id);
    }

    pub fn reconnect(&self, id: NodeId) {
        self.state.lock().unwrap().disconnected.remove(&id);
    }

    fn route(&self, from: NodeId, to: NodeId) -> Result<RaftNode, PeerError> {
        let state = self.state.lock().unwrap();
        if state.disconnected.contains(&from) || state.disconnected.contains(&to) {
            return Err(PeerError::Unreachable);
        }
        state.nodes.get(&to).cloned().ok_or(PeerError::Unreachable)
    }

    fn peer(&self, from: NodeId, to: NodeId) -> Arc<dyn RaftPeer> {
        Arc::new(LocalPeer {
            from,
            to,
            network: self.clone(),
        })
    }
}

struct LocalPeer {
    from: NodeId,
    to: NodeId,
    network: Network,
}

#[async_trait::async_trait]
impl RaftPeer for LocalPeer {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, PeerError> {
        let node = self.network.route(self.from, self.to)?;
        let reply = node.handle_request_vote(args).map_err(|_| PeerError::Unreachable)?;
        // The reply can be lost on the way back, too.
        self.network.route(self.to, self.from)?;
        Ok(reply)
    }

    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, PeerError> {
        let node = self.network.route(self.from, self.to)?;
        let reply = node.handle_append_entries(args).map_err(|_| PeerError::Unreachable)?;
        self.network.route(self.to, self.from)?;
        Ok(reply)
    }

    async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, PeerError> {
        let node = self.network.route(self.from, self.to)?;
        let reply = node.handle_install_snapshot(args).map_err(|_| PeerError::Unreachable)?;
        self.network.route(self.to, self.from)?;
        Ok(reply)
    }
}

struct Member {
    node: RaftNode,
    collector: JoinHandle<()>,
}

/// A cluster of in-process nodes, each with its own data directory and a record of everything
/// it handed to the application.
pub struct Cluster {
    pub ids: Vec<NodeId>,
    pub network: Network,
    dirs: HashMap<NodeId, TempDir>,
    members: HashMap<NodeId, Member>,
    applied: HashMap<NodeId, Arc<Mutex<Vec<ApplyMsg>>>>,
}

impl Cluster {
    pub fn new(size: u64) -> Self {
        let ids: Vec<NodeId> = (1..=size).collect();
        let mut cluster = Cluster {
            ids: ids.clone(),
            network: Network::default(),
            dirs: ids.iter().map(|id| (*id, tempfile::tempdir().unwrap())).collect(),
            members: HashMap::new(),
            applied: ids.iter().map(|id| (*id, Arc::new(Mutex::new(Vec::new())))).collect(),
        };
        for id in ids {
            cluster.start(id, 0);
        }
        cluster
    }

    /// (Re)starts `id` from its data directory. `applied` is what the application already holds.
    pub fn start(&mut self, id: NodeId, applied: u64) {
        let peers = self
            .ids
            .iter()
            .filter(|peer_id| **peer_id != id)
            .map(|peer_id| (*peer_id, self.network.peer(id, *peer_id)))
            .collect();
        let persister = Persister::new(self.dirs[&id].path(), logger()).unwrap();
        let config = RaftConfig {
            applied,
            ..test_config()
        };
        let (node, mut stream) = RaftNode::new(id, peers, persister, config, logger()).unwrap();

        let sink = self.applied[&id].clone();
        let collector = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                sink.lock().unwrap().push(msg);
            }
        });

        self.network.register(node.clone());
        self.members.insert(id, Member { node, collector });
    }

    /// Stops `id` and waits until its apply stream is closed.
    pub async fn stop(&mut self, id: NodeId) {
        if let Some(member) = self.members.remove(&id) {
            member.node.stop();
            member.collector.await.unwrap();
        }
    }

    pub async fn restart(&mut self, id: NodeId) {
        self.stop(id).await;
        let applied = self.applied(id).last().map_or(0, ApplyMsg::index);
        self.start(id, applied);
    }

    pub fn node(&self, id: NodeId) -> &RaftNode {
        &self.members[&id].node
    }

    pub fn applied(&self, id: NodeId) -> Vec<ApplyMsg> {
        self.applied[&id].lock().unwrap().clone()
    }

    /// Non-empty payloads delivered to `id`, in order.
    pub fn applied_data(&self, id: NodeId) -> Vec<Bytes> {
        self.applied(id)
            .into_iter()
            .filter_map(|msg| match msg {
                ApplyMsg::Entry { data, .. } if !data.is_empty() => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Waits until one of `among` is leader and none of them has seen a newer term.
    pub async fn wait_for_leader(&self, among: &[NodeId]) -> NodeId {
        let found = wait_until(Duration::from_secs(10), || {
            let states: Vec<(NodeId, Term, bool)> = among
                .iter()
                .map(|id| {
                    let (term, is_leader) = self.node(*id).get_state();
                    (*id, term, is_leader)
                })
                .collect();
            let max_term = states.iter().map(|(_, term, _)| *term).max().unwrap_or(0);
            states
                .iter()
                .find(|(_, term, is_leader)| *is_leader && *term == max_term)
                .map(|(id, _, _)| *id)
        })
        .await;
        found.expect("no leader elected in time")
    }

    /// Proposes through whoever leads `among`, retrying across leader changes.
    pub async fn propose(&self, among: &[NodeId], data: &'static str) -> NodeId {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let leader = self.wait_for_leader(among).await;
            if self.node(leader).propose(Bytes::from(data)).is_ok() {
                return leader;
            }
            assert!(Instant::now() < deadline, "couldn't propose {:?}", data);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits until every node in `ids` has applied `data`.
    pub async fn wait_for_applied(&self, ids: &[NodeId], data: &'static str) {
        let expected = Bytes::from(data);
        let done = wait_until(Duration::from_secs(10), || {
            let all = ids.iter().all(|id| self.applied_data(*id).contains(&expected));
            if all {
                Some(())
            } else {
                None
            }
        })
        .await;
        assert!(done.is_some(), "{:?} not applied everywhere in time", data);
    }

    /// Applied indexes increase by one (a snapshot may jump ahead), and nodes agree on what sits
    /// at each index.
    pub fn assert_applied_logs_consistent(&self) {
        let mut by_index: HashMap<u64, (NodeId, ApplyMsg)> = HashMap::new();
        for id in &self.ids {
            let mut last = 0;
            for msg in self.applied(*id) {
                match &msg {
                    ApplyMsg::Entry { index, .. } => {
                        assert_eq!(*index, last + 1, "node {} applied {} after {}", id, index, last);
                    }
                    ApplyMsg::Snapshot { index, .. } => {
                        assert!(*index > last, "node {} went back to snapshot {}", id, index);
                    }
                }
                last = msg.index();

                if let ApplyMsg::Entry { index, .. } = &msg {
                    match by_index.get(index) {
                        Some((other, seen)) => {
                            assert_eq!(seen, &msg, "nodes {} and {} disagree at index {}", other, id, index)
                        }
                        None => {
                            by_index.insert(*index, (*id, msg.clone()));
                        }
                    }
                }
            }
        }
    }
}

/// Polls `check` until it returns something or `timeout` passes.
pub async fn wait_until<T, F>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
