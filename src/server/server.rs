use crate::convert;
use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{
    ProtoAppendEntriesReply, ProtoAppendEntriesReq, ProtoInstallSnapshotReply, ProtoInstallSnapshotReq,
    ProtoRequestVoteReply, ProtoRequestVoteReq,
};
use crate::node::{NodeStopped, RaftNode};
use crate::server::RpcServerShutdownSignal;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the Raft gRPC interface.
pub struct RpcServer {
    logger: slog::Logger,
    node: RaftNode,
}

impl RpcServer {
    pub fn new(logger: slog::Logger, node: RaftNode) -> Self {
        RpcServer { logger, node }
    }

    pub async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal.wait())
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }
}

fn stopped_status(_: NodeStopped) -> Status {
    Status::unavailable("raft node has stopped")
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn request_vote(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::trace!(self.logger, "ServerWire - {:?}", rpc_request);
        let args = convert::request_vote_args_from_proto(rpc_request);
        let reply = self.node.handle_request_vote(args).map_err(stopped_status)?;
        let rpc_reply = convert::request_vote_reply_to_proto(reply);
        slog::trace!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        // Entries can be large; only log their count.
        slog::trace!(
            self.logger,
            "ServerWire - AppendEntries term={} prev=({}, {}) entries={} commit={}",
            rpc_request.term,
            rpc_request.prev_log_index,
            rpc_request.prev_log_term,
            rpc_request.entries.len(),
            rpc_request.leader_commit
        );
        let args = convert::append_entries_args_from_proto(rpc_request);
        let reply = self.node.handle_append_entries(args).map_err(stopped_status)?;
        let rpc_reply = convert::append_entries_reply_to_proto(reply);
        slog::trace!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }

    async fn install_snapshot(
        &self,
        rpc_request_wrapped: Request<ProtoInstallSnapshotReq>,
    ) -> Result<Response<ProtoInstallSnapshotReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        let args = convert::install_snapshot_args_from_proto(rpc_request);
        slog::debug!(
            self.logger,
            "ServerWire - InstallSnapshot term={} leader={} snapshot={:?}",
            args.term,
            args.leader_id,
            args.snapshot
        );
        let reply = self.node.handle_install_snapshot(args).map_err(stopped_status)?;
        let rpc_reply = convert::install_snapshot_reply_to_proto(reply);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }
}
