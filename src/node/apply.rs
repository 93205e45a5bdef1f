use crate::raft_log::{Entry, Index, Snapshot, Term};
use bytes::Bytes;
use tokio::sync::mpsc;

/// A unit of work for the application's state machine. Delivered in strict index order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApplyMsg {
    /// A committed log entry. Empty `data` is a leader's no-op; apply it as nothing.
    Entry { index: Index, term: Term, data: Bytes },
    /// Replace the state machine with this snapshot; every entry up to `index` is contained in it.
    Snapshot { index: Index, term: Term, data: Bytes },
}

impl ApplyMsg {
    pub fn index(&self) -> Index {
        match self {
            ApplyMsg::Entry { index, .. } => *index,
            ApplyMsg::Snapshot { index, .. } => *index,
        }
    }
}

impl From<Entry> for ApplyMsg {
    fn from(entry: Entry) -> Self {
        ApplyMsg::Entry {
            index: entry.index,
            term: entry.term,
            data: entry.data,
        }
    }
}

impl From<Snapshot> for ApplyMsg {
    fn from(snapshot: Snapshot) -> Self {
        ApplyMsg::Snapshot {
            index: snapshot.metadata.index,
            term: snapshot.metadata.term,
            data: snapshot.data,
        }
    }
}

pub(super) fn new(capacity: usize) -> (ApplyPublisher, ApplyStream) {
    let (tx, rx) = mpsc::channel(capacity);

    (ApplyPublisher { sender: tx }, ApplyStream { receiver: rx })
}

pub(super) struct ApplyPublisher {
    sender: mpsc::Sender<ApplyMsg>,
}

impl ApplyPublisher {
    /// Waits for room in the channel. Returns false if the application dropped its stream.
    pub(super) async fn publish(&self, logger: &slog::Logger, msg: ApplyMsg) -> bool {
        if self.sender.send(msg).await.is_err() {
            slog::warn!(logger, "ApplyStream has disconnected.");
            return false;
        }
        true
    }
}

/// ApplyStream is how the application learns about committed entries.
pub struct ApplyStream {
    receiver: mpsc::Receiver<ApplyMsg>,
}

impl ApplyStream {
    /// Next message to apply to the state machine. `None` once the node has stopped.
    pub async fn next(&mut self) -> Option<ApplyMsg> {
        self.receiver.recv().await
    }
}
