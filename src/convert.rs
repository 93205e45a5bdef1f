//! Conversions between the log data model and its protobuf representation. Shared by the on-disk
//! formats and the RPC layer.

use crate::grpc::{
    ProtoAppendEntriesReply, ProtoAppendEntriesReq, ProtoEntryType, ProtoHardState, ProtoInstallSnapshotReply,
    ProtoInstallSnapshotReq, ProtoLogEntry, ProtoRequestVoteReply, ProtoRequestVoteReq, ProtoSnapshot,
    ProtoSnapshotMetadata,
};
use crate::node::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RequestVoteArgs,
    RequestVoteReply,
};
use crate::raft_log::{Entry, EntryType, HardState, NodeId, Snapshot};
use bytes::Bytes;

/// Wire/disk value for "no node".
const NO_NODE: i64 = -1;

pub(crate) fn node_id_to_proto(id: Option<NodeId>) -> i64 {
    match id {
        Some(id) => id as i64,
        None => NO_NODE,
    }
}

pub(crate) fn node_id_from_proto(id: i64) -> Option<NodeId> {
    if id < 0 {
        None
    } else {
        Some(id as NodeId)
    }
}

pub(crate) fn entry_to_proto(entry: &Entry) -> ProtoLogEntry {
    let entry_type = match entry.entry_type {
        EntryType::Normal => ProtoEntryType::Normal,
        EntryType::Dummy => ProtoEntryType::Dummy,
    };
    ProtoLogEntry {
        index: entry.index,
        term: entry.term,
        entry_type: entry_type as i32,
        data: entry.data.to_vec(),
    }
}

pub(crate) fn entry_from_proto(proto: ProtoLogEntry) -> Entry {
    let entry_type = match ProtoEntryType::from_i32(proto.entry_type) {
        Some(ProtoEntryType::Dummy) => EntryType::Dummy,
        // Unknown values decode as Normal, proto3's default.
        Some(ProtoEntryType::Normal) | None => EntryType::Normal,
    };
    Entry {
        index: proto.index,
        term: proto.term,
        entry_type,
        data: Bytes::from(proto.data),
    }
}

pub(crate) fn hard_state_to_proto(hard_state: &HardState) -> ProtoHardState {
    ProtoHardState {
        term: hard_state.term,
        vote: node_id_to_proto(hard_state.vote),
        commit: hard_state.commit,
    }
}

pub(crate) fn hard_state_from_proto(proto: ProtoHardState) -> HardState {
    HardState {
        term: proto.term,
        vote: node_id_from_proto(proto.vote),
        commit: proto.commit,
    }
}

pub(crate) fn snapshot_to_proto(snapshot: &Snapshot) -> ProtoSnapshot {
    ProtoSnapshot {
        metadata: Some(ProtoSnapshotMetadata {
            index: snapshot.metadata.index,
            term: snapshot.metadata.term,
        }),
        data: snapshot.data.to_vec(),
    }
}

pub(crate) fn snapshot_from_proto(proto: ProtoSnapshot) -> Snapshot {
    let metadata = proto.metadata.unwrap_or_default();
    Snapshot::new(metadata.index, metadata.term, Bytes::from(proto.data))
}

// -- RPC messages --

pub(crate) fn request_vote_args_to_proto(args: RequestVoteArgs) -> ProtoRequestVoteReq {
    ProtoRequestVoteReq {
        term: args.term,
        candidate_id: args.candidate_id,
        last_log_index: args.last_log_index,
        last_log_term: args.last_log_term,
    }
}

pub(crate) fn request_vote_args_from_proto(proto: ProtoRequestVoteReq) -> RequestVoteArgs {
    RequestVoteArgs {
        term: proto.term,
        candidate_id: proto.candidate_id,
        last_log_index: proto.last_log_index,
        last_log_term: proto.last_log_term,
    }
}

pub(crate) fn request_vote_reply_to_proto(reply: RequestVoteReply) -> ProtoRequestVoteReply {
    ProtoRequestVoteReply {
        term: reply.term,
        leader_id: node_id_to_proto(reply.leader_id),
        vote_granted: reply.vote_granted,
    }
}

pub(crate) fn request_vote_reply_from_proto(proto: ProtoRequestVoteReply) -> RequestVoteReply {
    RequestVoteReply {
        term: proto.term,
        leader_id: node_id_from_proto(proto.leader_id),
        vote_granted: proto.vote_granted,
    }
}

pub(crate) fn append_entries_args_to_proto(args: AppendEntriesArgs) -> ProtoAppendEntriesReq {
    ProtoAppendEntriesReq {
        term: args.term,
        leader_id: args.leader_id,
        prev_log_index: args.prev_log_index,
        prev_log_term: args.prev_log_term,
        entries: args.entries.iter().map(entry_to_proto).collect(),
        leader_commit: args.leader_commit,
    }
}

pub(crate) fn append_entries_args_from_proto(proto: ProtoAppendEntriesReq) -> AppendEntriesArgs {
    AppendEntriesArgs {
        term: proto.term,
        leader_id: proto.leader_id,
        prev_log_index: proto.prev_log_index,
        prev_log_term: proto.prev_log_term,
        entries: proto.entries.into_iter().map(entry_from_proto).collect(),
        leader_commit: proto.leader_commit,
    }
}

pub(crate) fn append_entries_reply_to_proto(reply: AppendEntriesReply) -> ProtoAppendEntriesReply {
    ProtoAppendEntriesReply {
        term: reply.term,
        leader_id: node_id_to_proto(reply.leader_id),
        success: reply.success,
        next_index: reply.next_index,
        // Term 0 never holds entries, so it doubles as "none".
        conflict_term: reply.conflict_term.unwrap_or(0),
    }
}

pub(crate) fn append_entries_reply_from_proto(proto: ProtoAppendEntriesReply) -> AppendEntriesReply {
    AppendEntriesReply {
        term: proto.term,
        leader_id: node_id_from_proto(proto.leader_id),
        success: proto.success,
        next_index: proto.next_index,
        conflict_term: if proto.conflict_term == 0 {
            None
        } else {
            Some(proto.conflict_term)
        },
    }
}

pub(crate) fn install_snapshot_args_to_proto(args: InstallSnapshotArgs) -> ProtoInstallSnapshotReq {
    ProtoInstallSnapshotReq {
        term: args.term,
        leader_id: args.leader_id,
        snapshot: Some(snapshot_to_proto(&args.snapshot)),
    }
}

pub(crate) fn install_snapshot_args_from_proto(proto: ProtoInstallSnapshotReq) -> InstallSnapshotArgs {
    InstallSnapshotArgs {
        term: proto.term,
        leader_id: proto.leader_id,
        snapshot: proto.snapshot.map(snapshot_from_proto).unwrap_or_default(),
    }
}

pub(crate) fn install_snapshot_reply_to_proto(reply: InstallSnapshotReply) -> ProtoInstallSnapshotReply {
    ProtoInstallSnapshotReply {
        term: reply.term,
        leader_id: node_id_to_proto(reply.leader_id),
    }
}

pub(crate) fn install_snapshot_reply_from_proto(proto: ProtoInstallSnapshotReply) -> InstallSnapshotReply {
    InstallSnapshotReply {
        term: proto.term,
        leader_id: node_id_from_proto(proto.leader_id),
    }
}
