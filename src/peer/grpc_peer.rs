use crate::convert;
use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::node::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
    RequestVoteReply,
};
use crate::peer::{PeerError, RaftPeer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

/// GrpcRaftPeer reaches a remote node over the `GrpcRaft` service.
///
/// The connection is made lazily on first use and cached. Any transport-level failure drops the
/// cached channel, so the next call reconnects from scratch.
pub struct GrpcRaftPeer {
    endpoint: Endpoint,
    client: Mutex<Option<GrpcRaftClient<Channel>>>,
    rpc_timeout: Duration,
    logger: slog::Logger,
}

impl GrpcRaftPeer {
    pub fn new(addr: SocketAddr, rpc_timeout: Duration, logger: slog::Logger) -> Self {
        let endpoint = Endpoint::from(
            format!("http://{}", addr)
                .parse::<tonic::transport::Uri>()
                // A SocketAddr always formats into a valid authority.
                .expect("socket address is a valid URI"),
        );

        GrpcRaftPeer {
            endpoint,
            client: Mutex::new(None),
            rpc_timeout,
            logger,
        }
    }

    async fn connected_client(&self) -> Result<GrpcRaftClient<Channel>, PeerError> {
        if let Some(client) = self.cached_client() {
            return Ok(client);
        }

        slog::debug!(self.logger, "Connecting to {}", self.endpoint.uri());
        let channel = self.endpoint.connect().await?;
        let client = GrpcRaftClient::new(channel);
        self.client
            .lock()
            .expect("GrpcRaftPeer client mutex guard poison")
            .replace(client.clone());

        Ok(client)
    }

    fn cached_client(&self) -> Option<GrpcRaftClient<Channel>> {
        self.client
            .lock()
            .expect("GrpcRaftPeer client mutex guard poison")
            .clone()
    }

    fn disconnect(&self) {
        self.client
            .lock()
            .expect("GrpcRaftPeer client mutex guard poison")
            .take();
    }

    /// Bounds the whole call, including connection setup, by `rpc_timeout`.
    async fn with_timeout<T, F>(&self, call: F) -> Result<T, PeerError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        let result = match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout),
        };

        match &result {
            Err(PeerError::Connect(_)) | Err(PeerError::Timeout) => self.disconnect(),
            Err(PeerError::Rpc(status)) if status.code() == Code::Unavailable || status.code() == Code::Unknown => {
                self.disconnect()
            }
            _ => {}
        }

        result
    }
}

#[async_trait::async_trait]
impl RaftPeer for GrpcRaftPeer {
    async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, PeerError> {
        self.with_timeout(async move {
            let mut client = self.connected_client().await?;
            let reply = client
                .request_vote(convert::request_vote_args_to_proto(args))
                .await?;
            Ok(convert::request_vote_reply_from_proto(reply.into_inner()))
        })
        .await
    }

    async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, PeerError> {
        self.with_timeout(async move {
            let mut client = self.connected_client().await?;
            let reply = client
                .append_entries(convert::append_entries_args_to_proto(args))
                .await?;
            Ok(convert::append_entries_reply_from_proto(reply.into_inner()))
        })
        .await
    }

    async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, PeerError> {
        self.with_timeout(async move {
            let mut client = self.connected_client().await?;
            let reply = client
                .install_snapshot(convert::install_snapshot_args_to_proto(args))
                .await?;
            Ok(convert::install_snapshot_reply_from_proto(reply.into_inner()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft_log::Snapshot;

    #[tokio::test]
    async fn unreachable_peer_is_an_error() {
        // Nothing listens on port 1 of localhost.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let peer = GrpcRaftPeer::new(
            addr,
            Duration::from_millis(200),
            slog::Logger::root(slog::Discard, slog::o!()),
        );

        let result = peer
            .install_snapshot(InstallSnapshotArgs {
                term: 1,
                leader_id: 1,
                snapshot: Snapshot::default(),
            })
            .await;
        assert!(result.is_err());
        assert!(peer.cached_client().is_none());
    }
}
