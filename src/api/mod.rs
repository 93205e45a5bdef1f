//! This mod is meant to hold most of the code for the library's client-facing API.
mod options;
mod types;
mod wiring;

pub use options::RaftConfig;
pub use options::RaftOptions;
pub use types::MemberInfo;
pub use wiring::create_raft_node;
pub use wiring::RaftNodeConfig;
pub use wiring::RaftNodeHandle;
