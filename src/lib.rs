mod api;
mod convert;
mod logging;
mod node;
mod peer;
mod persist;
mod raft_log;
mod server;
mod grpc {
    include!("../generated/raft.rs");
}

pub use api::create_raft_node;
pub use api::MemberInfo;
pub use api::RaftConfig;
pub use api::RaftNodeConfig;
pub use api::RaftNodeHandle;
pub use api::RaftOptions;
pub use logging::file_logger;
pub use logging::stdout_logger;
pub use node::AppendEntriesArgs;
pub use node::AppendEntriesReply;
pub use node::ApplyMsg;
pub use node::ApplyStream;
pub use node::CompactError;
pub use node::InstallSnapshotArgs;
pub use node::InstallSnapshotReply;
pub use node::NodeStatus;
pub use node::NodeStopped;
pub use node::ProposeError;
pub use node::RaftCreationError;
pub use node::RaftNode;
pub use node::RequestVoteArgs;
pub use node::RequestVoteReply;
pub use node::Role;
pub use node::RoleListener;
pub use node::RoleSnapshot;
pub use peer::GrpcRaftPeer;
pub use peer::PeerError;
pub use peer::RaftPeer;
pub use persist::PersistError;
pub use persist::PersistedState;
pub use persist::Persister;
pub use persist::Snapshotter;
pub use raft_log::Entry;
pub use raft_log::EntryType;
pub use raft_log::HardState;
pub use raft_log::Index;
pub use raft_log::MemoryStorage;
pub use raft_log::NodeId;
pub use raft_log::RaftLog;
pub use raft_log::Snapshot;
pub use raft_log::SnapshotMetadata;
pub use raft_log::Storage;
pub use raft_log::StorageError;
pub use raft_log::Term;
pub use raft_log::NO_LIMIT;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
