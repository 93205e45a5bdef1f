mod apply;
mod node;
mod progress;
mod role;
mod rpc;
mod state;
mod timers;

pub use apply::ApplyMsg;
pub use apply::ApplyStream;
pub use node::RaftNode;
pub use role::Role;
pub use role::RoleListener;
pub use role::RoleSnapshot;
pub use rpc::AppendEntriesArgs;
pub use rpc::AppendEntriesReply;
pub use rpc::InstallSnapshotArgs;
pub use rpc::InstallSnapshotReply;
pub use rpc::RequestVoteArgs;
pub use rpc::RequestVoteReply;

use crate::persist::PersistError;
use crate::raft_log::{Index, NodeId, StorageError, Term};

/// Point-in-time view of a node, for operators and tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    pub id: NodeId,
    pub term: Term,
    pub role: Role,
    pub leader_id: Option<NodeId>,
    pub commit_index: Index,
    pub applied_index: Index,
    pub first_index: Index,
    pub last_index: Index,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftCreationError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("node {0} is not in the cluster member list")]
    SelfNotInCluster(NodeId),
    #[error("node {0} is listed as its own peer")]
    SelfAsPeer(NodeId),
    #[error("failed to load persisted state: {0}")]
    LoadPersistedState(#[from] PersistError),
    #[error("persisted state is inconsistent: {0}")]
    CorruptPersistedState(String),
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ProposeError {
    #[error("not the leader; current leader is {leader_id:?}")]
    NotLeader { leader_id: Option<NodeId> },
    #[error("raft node has stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum CompactError {
    #[error("can't compact to {index}, only applied up to {applied}")]
    NotApplied { index: Index, applied: Index },
    #[error("can't compact to {index}, log is already compacted to {snapshot_index}")]
    AlreadyCompacted { index: Index, snapshot_index: Index },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("raft node has stopped")]
    Stopped,
}

/// Returned by the RPC handlers of a stopped node.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[error("raft node has stopped")]
pub struct NodeStopped;
