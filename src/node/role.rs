use crate::raft_log::{NodeId, Term};
use tokio::sync::watch;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// What the node believes about the cluster's leadership at a point in time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RoleSnapshot {
    pub term: Term,
    pub role: Role,
    pub leader_id: Option<NodeId>,
}

pub(super) fn new(initial: RoleSnapshot) -> (RoleNotifier, RoleListener) {
    let (snd, rcv) = watch::channel(initial);

    (RoleNotifier { snd }, RoleListener { rcv })
}

pub(super) struct RoleNotifier {
    snd: watch::Sender<RoleSnapshot>,
}

impl RoleNotifier {
    /// Publishes only actual changes, so listeners don't wake on every heartbeat.
    pub(super) fn notify(&self, snapshot: RoleSnapshot) {
        if *self.snd.borrow() != snapshot {
            // Nobody listening is fine.
            let _ = self.snd.send(snapshot);
        }
    }
}

/// RoleListener observes leadership changes of a local node. It doesn't queue: if several changes
/// happen between calls to `next()`, only the latest one is returned.
#[derive(Clone)]
pub struct RoleListener {
    rcv: watch::Receiver<RoleSnapshot>,
}

impl RoleListener {
    pub fn current(&self) -> RoleSnapshot {
        *self.rcv.borrow()
    }

    /// Waits for the next change. `None` once the node is gone.
    pub async fn next(&mut self) -> Option<RoleSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }

    /// Waits until the node reaches a state matching `predicate`, which may be the current one.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<RoleSnapshot>
    where
        F: Fn(&RoleSnapshot) -> bool,
    {
        let current = self.current();
        if predicate(&current) {
            return Some(current);
        }
        loop {
            let snapshot = self.next().await?;
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
    }
}
