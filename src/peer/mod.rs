mod grpc_peer;

pub use grpc_peer::GrpcRaftPeer;

use crate::node::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
    RequestVoteReply,
};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("failed to connect to peer: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("RPC timed out")]
    Timeout,
    #[error("peer is unreachable")]
    Unreachable,
}

/// RaftPeer is the outbound half of the raft protocol: how a node reaches one remote member.
///
/// Errors are never fatal; the node logs them and the next heartbeat or replication round tries
/// again.
#[async_trait::async_trait]
pub trait RaftPeer: Send + Sync {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, PeerError>;

    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, PeerError>;

    async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, PeerError>;
}
