use crate::raft_log::NodeId;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Where to reach one cluster member's raft RPC server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberInfo {
    pub id: NodeId,
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl MemberInfo {
    pub(crate) fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.port))
    }
}
