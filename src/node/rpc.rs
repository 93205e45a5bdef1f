use crate::raft_log::{Entry, Index, NodeId, Snapshot, Term};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestVoteReply {
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub vote_granted: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<Entry>,
    pub leader_commit: Index,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub success: bool,
    /// On success, one past the last entry known to match the leader's log. On rejection, the
    /// index the leader should try next.
    pub next_index: Index,
    /// On rejection, the follower's term at `prev_log_index` if it has an entry there.
    pub conflict_term: Option<Term>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallSnapshotArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub snapshot: Snapshot,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallSnapshotReply {
    pub term: Term,
    pub leader_id: Option<NodeId>,
}
