mod common;

use bytes::Bytes;
use common::{wait_until, Cluster};
use raft_node::{ApplyMsg, NodeId, RaftNode, Role, Term};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_and_replicate() {
    let cluster = Cluster::new(3);

    let leader = cluster.propose(&cluster.ids, "x").await;
    cluster.wait_for_applied(&cluster.ids, "x").await;

    for id in &cluster.ids {
        assert_eq!(cluster.applied_data(*id), vec![Bytes::from("x")]);
        if *id != leader {
            let role = cluster.node(*id).role_listener().current();
            assert_eq!(role.role, Role::Follower);
        }
    }
    cluster.assert_applied_logs_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partitioned_leader_steps_down_and_loses_its_entries() {
    let cluster = Cluster::new(3);
    let old_leader = cluster.wait_for_leader(&cluster.ids).await;
    let (old_term, _) = cluster.node(old_leader).get_state();

    cluster.network.disconnect(old_leader);
    // Still believes it leads, but can't commit anything.
    cluster
        .node(old_leader)
        .propose(Bytes::from("lost"))
        .expect("old leader doesn't know it's cut off yet");

    let majority: Vec<NodeId> = cluster.ids.iter().copied().filter(|id| *id != old_leader).collect();
    let new_leader = cluster.propose(&majority, "y").await;
    assert_ne!(new_leader, old_leader);
    cluster.wait_for_applied(&majority, "y").await;
    let (new_term, _) = cluster.node(new_leader).get_state();
    assert!(new_term > old_term);

    cluster.network.reconnect(old_leader);
    cluster.wait_for_applied(&cluster.ids, "y").await;
    let stepped_down = wait_until(Duration::from_secs(10), || {
        let (term, is_leader) = cluster.node(old_leader).get_state();
        if !is_leader && term >= new_term {
            Some(())
        } else {
            None
        }
    })
    .await;
    assert!(stepped_down.is_some());

    for id in &cluster.ids {
        assert!(!cluster.applied_data(*id).contains(&Bytes::from("lost")));
    }
    cluster.assert_applied_logs_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_leaders_hold_every_committed_entry() {
    let cluster = Cluster::new(3);

    // Watches every node's commit index for as long as the test runs.
    let nodes: Vec<RaftNode> = cluster.ids.iter().map(|id| cluster.node(*id).clone()).collect();
    let done = Arc::new(AtomicBool::new(false));
    let watcher = {
        let done = done.clone();
        tokio::spawn(async move {
            let mut seen: HashMap<NodeId, u64> = HashMap::new();
            while !done.load(Ordering::SeqCst) {
                for node in &nodes {
                    let commit = node.status().commit_index;
                    let before = seen.insert(node.id(), commit).unwrap_or(0);
                    assert!(commit >= before, "node {} commit went from {} to {}", node.id(), before, commit);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut committed: Vec<Bytes> = Vec::new();
    let mut committed_index = 0;
    let mut cut_off: Option<NodeId> = None;
    for data in &["a", "b", "c", "d"] {
        let connected: Vec<NodeId> = cluster.ids.iter().copied().filter(|id| Some(*id) != cut_off).collect();

        let leader = cluster.wait_for_leader(&connected).await;
        assert!(
            cluster.node(leader).status().last_index >= committed_index,
            "leader {} is missing committed entries",
            leader
        );
        let caught_up = wait_until(Duration::from_secs(10), || {
            let status = cluster.node(leader).status();
            if status.commit_index >= committed_index && cluster.applied_data(leader) == committed {
                Some(())
            } else {
                None
            }
        })
        .await;
        assert!(caught_up.is_some(), "leader {} lost committed entries", leader);

        cluster.propose(&connected, data).await;
        cluster.wait_for_applied(&connected, data).await;
        committed.push(Bytes::from(*data));
        committed_index = connected
            .iter()
            .map(|id| cluster.node(*id).status().commit_index)
            .min()
            .unwrap();

        // Force the next round onto a different leader.
        let leader = cluster.wait_for_leader(&connected).await;
        if let Some(previous) = cut_off {
            cluster.network.reconnect(previous);
        }
        cluster.network.disconnect(leader);
        cut_off = Some(leader);
    }

    done.store(true, Ordering::SeqCst);
    watcher.await.unwrap();
    cluster.assert_applied_logs_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lagging_follower_catches_up_through_snapshot() {
    let cluster = Cluster::new(3);
    let leader = cluster.wait_for_leader(&cluster.ids).await;
    let lagging = *cluster.ids.iter().find(|id| **id != leader).unwrap();
    let healthy: Vec<NodeId> = cluster.ids.iter().copied().filter(|id| *id != lagging).collect();

    cluster.network.disconnect(lagging);
    for data in &["a", "b", "c", "d", "e"] {
        cluster.propose(&healthy, data).await;
    }
    cluster.wait_for_applied(&healthy, "e").await;

    // Both healthy nodes drop their logs, so whoever leads has to send a snapshot.
    let compact_index = healthy
        .iter()
        .map(|id| cluster.node(*id).status().commit_index)
        .min()
        .unwrap();
    for id in &healthy {
        let applied = wait_until(Duration::from_secs(10), || {
            if cluster.node(*id).status().applied_index >= compact_index {
                Some(())
            } else {
                None
            }
        })
        .await;
        assert!(applied.is_some());
        cluster
            .node(*id)
            .compact(compact_index, Bytes::from("state-machine"))
            .unwrap();
        assert_eq!(cluster.node(*id).status().first_index, compact_index + 1);
    }

    cluster.network.reconnect(lagging);
    let got_snapshot = wait_until(Duration::from_secs(10), || {
        cluster.applied(lagging).into_iter().find_map(|msg| match msg {
            ApplyMsg::Snapshot { index, data, .. } => Some((index, data)),
            _ => None,
        })
    })
    .await;
    assert_eq!(got_snapshot, Some((compact_index, Bytes::from("state-machine"))));

    cluster.propose(&cluster.ids, "after").await;
    cluster.wait_for_applied(&cluster.ids, "after").await;
    assert!(cluster.node(lagging).status().first_index > compact_index);
    cluster.assert_applied_logs_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_restarts_from_persisted_state() {
    let mut cluster = Cluster::new(3);
    cluster.propose(&cluster.ids, "a").await;
    cluster.propose(&cluster.ids, "b").await;
    cluster.wait_for_applied(&cluster.ids, "b").await;
    let terms_before: HashMap<NodeId, Term> = cluster
        .ids
        .iter()
        .map(|id| (*id, cluster.node(*id).get_state().0))
        .collect();

    for id in cluster.ids.clone() {
        cluster.restart(id).await;
    }
    for id in &cluster.ids {
        let status = cluster.node(*id).status();
        assert!(status.term >= terms_before[id]);
        assert!(status.last_index >= 3);
    }

    cluster.propose(&cluster.ids, "c").await;
    cluster.wait_for_applied(&cluster.ids, "c").await;

    // Nothing the application already had was delivered again.
    for id in &cluster.ids {
        assert_eq!(
            cluster.applied_data(*id),
            vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
        );
    }
    cluster.assert_applied_logs_consistent();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_leader_per_term() {
    let cluster = Cluster::new(5);
    let mut leaders: HashMap<Term, NodeId> = HashMap::new();

    let mut record = |cluster: &Cluster| {
        for id in &cluster.ids {
            let (term, is_leader) = cluster.node(*id).get_state();
            if is_leader {
                let previous = leaders.entry(term).or_insert(*id);
                assert_eq!(*previous, *id, "two leaders in term {}", term);
            }
        }
    };

    for round in 0..4 {
        let leader = cluster.wait_for_leader(&cluster.ids).await;
        record(&cluster);

        // Knock out the leader and one more node; three out of five can still elect.
        let other = cluster.ids[(round + 1) % cluster.ids.len()];
        cluster.network.disconnect(leader);
        cluster.network.disconnect(other);

        for _ in 0..50 {
            record(&cluster);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cluster.network.reconnect(leader);
        cluster.network.reconnect(other);
    }

    let remaining = cluster.wait_for_leader(&cluster.ids).await;
    record(&cluster);
    assert!(cluster.ids.contains(&remaining));
    assert!(leaders.len() >= 2);
}
