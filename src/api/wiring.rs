use crate::api::options::{RaftConfig, RaftOptions};
use crate::api::types::MemberInfo;
use crate::node::{ApplyStream, RaftCreationError, RaftNode};
use crate::peer::{GrpcRaftPeer, RaftPeer};
use crate::persist::Persister;
use crate::raft_log::NodeId;
use crate::server::{self, RpcServer, RpcServerShutdownHandle};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::Arc;

pub struct RaftNodeConfig {
    pub my_id: NodeId,
    /// Every member of the cluster, including this node.
    pub cluster_members: Vec<MemberInfo>,
    /// A directory where we can create files and sub-directories for the node's durable state.
    pub data_directory: PathBuf,
    pub logger: slog::Logger,
    pub options: RaftOptions,
}

/// A node with its gRPC server running. Dropping the handle stops the server; `shutdown()` also
/// stops the node.
pub struct RaftNodeHandle {
    node: RaftNode,
    server_shutdown: RpcServerShutdownHandle,
}

impl RaftNodeHandle {
    pub fn node(&self) -> &RaftNode {
        &self.node
    }

    pub fn shutdown(mut self) {
        self.node.stop();
        self.server_shutdown.shutdown();
    }
}

/// Builds a node that talks gRPC to the rest of `cluster_members` and starts serving its own
/// RPCs on the port listed for `my_id`.
pub async fn create_raft_node(config: RaftNodeConfig) -> Result<(RaftNodeHandle, ApplyStream), RaftCreationError> {
    let my_id = config.my_id;
    let root_logger = config.logger;

    let options =
        RaftConfig::try_from(config.options).map_err(|e| RaftCreationError::InvalidOptions(e.to_string()))?;

    let my_member_info = my_info(my_id, &config.cluster_members)
        .ok_or_else(|| RaftCreationError::SelfNotInCluster(my_id))?;
    let my_server_addr = my_member_info.socket_addr();

    let mut peers: HashMap<NodeId, Arc<dyn RaftPeer>> = HashMap::with_capacity(config.cluster_members.len());
    for member in config.cluster_members.iter().filter(|m| m.id != my_id) {
        let peer_logger = root_logger.new(slog::o!("NodeId" => my_id, "Peer" => member.id));
        let peer = GrpcRaftPeer::new(member.socket_addr(), options.rpc_timeout, peer_logger);
        peers.insert(member.id, Arc::new(peer));
    }

    let persister = Persister::new(&config.data_directory, root_logger.new(slog::o!("NodeId" => my_id)))?;
    let (node, apply_stream) = RaftNode::new(my_id, peers, persister, options, root_logger.clone())?;

    let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();
    let rpc_server = RpcServer::new(root_logger.new(slog::o!("NodeId" => my_id)), node.clone());
    tokio::spawn(rpc_server.run(my_server_addr, server_shutdown_signal));

    Ok((
        RaftNodeHandle {
            node,
            server_shutdown: server_shutdown_handle,
        },
        apply_stream,
    ))
}

fn my_info(my_id: NodeId, cluster_members: &[MemberInfo]) -> Option<&MemberInfo> {
    cluster_members.iter().find(|member| member.id == my_id)
}
