//! End-to-end tests over the simulated network.

use concord_node::{Mechanism, ProposalError, ProtocolConfig, Value};
use concord_simulation::{NetworkConfig, SimulatedCluster, SimulationStats};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn network() -> NetworkConfig {
    NetworkConfig::default()
        .with_latency(Duration::from_millis(10))
        .with_jitter(0.0)
}

fn bft_config() -> ProtocolConfig {
    ProtocolConfig::new(Mechanism::Bft)
        .with_timeout(Duration::from_secs(1))
        .with_view_change_timeout(Duration::from_millis(500))
}

fn majority_config() -> ProtocolConfig {
    ProtocolConfig::new(Mechanism::MajorityVote).with_timeout(Duration::from_secs(1))
}

// ═══════════════════════════════════════════════════════════════════════════
// BFT
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_bft_commits_with_one_silent_member() {
    let mut cluster = SimulatedCluster::new(4, bft_config(), network(), 7).unwrap();
    let members = cluster.members();
    cluster.isolate(&members[3]);

    let mut handle = cluster.propose(&members[0], "mode", json!("safe")).unwrap();
    cluster.deliver_all();

    let result = handle.try_result().expect("settled");
    assert!(result.accepted);
    assert_eq!(result.votes.for_votes, 3);
    assert_eq!(result.votes.total, 4);

    for member in &members[..3] {
        assert_eq!(cluster.get(member, "mode"), Some(&json!("safe")));
    }
    assert_eq!(cluster.get(&members[3], "mode"), None);
}

#[traced_test]
#[test]
fn test_bft_follower_refuses_and_names_leader() {
    let mut cluster = SimulatedCluster::new(4, bft_config(), network(), 7).unwrap();
    let members = cluster.members();

    let mut handle = cluster.propose(&members[2], "k", json!(1)).unwrap();
    let result = handle.try_result().expect("settled immediately");

    assert!(!result.accepted);
    assert_eq!(result.proposal_id, None);
    assert_eq!(
        result.error,
        Some(ProposalError::NotLeader {
            leader: members[0].clone()
        })
    );
    assert_eq!(cluster.in_flight(), 0);
}

#[traced_test]
#[test]
fn test_bft_view_change_after_leader_isolated() {
    let mut cluster = SimulatedCluster::new(4, bft_config(), network(), 11).unwrap();
    let members = cluster.members();

    // node-3 misses the proposal entirely; node-0 is cut off right after
    // sending its pre-prepare, so nodes 1 and 2 prepare but cannot commit.
    cluster.isolate(&members[3]);
    let mut stalled = cluster.propose(&members[0], "a", json!(1)).unwrap();
    cluster.isolate(&members[0]);
    cluster.deliver_all();

    for member in &members[1..3] {
        assert_eq!(cluster.get(member, "a"), None);
    }

    cluster.reconnect(&members[3]);
    cluster.run_for(Duration::from_secs(2));

    let result = stalled.try_result().expect("leader timed out");
    assert_eq!(result.error, Some(ProposalError::Timeout { timeout_ms: 1000 }));

    for member in &members[1..] {
        assert_eq!(cluster.bft_view(member), Some(1), "{member} moved to view 1");
        assert_eq!(
            cluster.manager(member).and_then(|m| m.leader().cloned()),
            Some(members[1].clone())
        );
    }
    assert_eq!(cluster.bft_view(&members[0]), Some(0));

    // The new leader keeps numbering after the stalled slot.
    let mut handle = cluster.propose(&members[1], "b", json!(2)).unwrap();
    cluster.deliver_all();

    let result = handle.try_result().expect("settled");
    assert!(result.accepted);
    for member in &members[1..] {
        assert_eq!(cluster.get(member, "b"), Some(&json!(2)));
        assert_eq!(cluster.get(member, "a"), None);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Majority vote
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_majority_five_members_replicate() {
    let mut cluster = SimulatedCluster::new(5, majority_config(), network(), 3).unwrap();
    let members = cluster.members();

    let mut handle = cluster
        .propose(&members[2], "config", json!({"replicas": 3}))
        .unwrap();
    cluster.deliver_all();

    let result = handle.try_result().expect("settled");
    assert!(result.accepted);
    assert!(result.votes.for_votes >= 3);
    assert_eq!(result.votes.total, 5);

    for member in &members {
        assert_eq!(cluster.get(member, "config"), Some(&json!({"replicas": 3})));
    }
}

#[traced_test]
#[test]
fn test_majority_last_committed_value_wins() {
    let mut cluster = SimulatedCluster::new(3, majority_config(), network(), 5).unwrap();
    let members = cluster.members();

    let mut first = cluster.propose(&members[0], "k", json!(1)).unwrap();
    cluster.deliver_all();
    let mut second = cluster.propose(&members[1], "k", json!(2)).unwrap();
    cluster.deliver_all();

    assert!(first.try_result().is_some_and(|r| r.accepted));
    assert!(second.try_result().is_some_and(|r| r.accepted));
    for member in &members {
        assert_eq!(cluster.get(member, "k"), Some(&json!(2)));
    }
}

#[traced_test]
#[test]
fn test_majority_rejected_by_vote_policy() {
    let policy = Arc::new(|key: &str, _value: &Value| key != "forbidden");
    let mut cluster =
        SimulatedCluster::with_vote_policy(3, majority_config(), network(), 9, policy).unwrap();
    let members = cluster.members();

    let mut rejected = cluster.propose(&members[0], "forbidden", json!(true)).unwrap();
    cluster.deliver_all();

    let result = rejected.try_result().expect("settled");
    assert!(!result.accepted);
    assert_eq!(
        result.error,
        Some(ProposalError::QuorumUnreachable {
            against: 2,
            total: 3
        })
    );
    for member in &members {
        assert_eq!(cluster.get(member, "forbidden"), None);
    }

    let mut allowed = cluster.propose(&members[0], "allowed", json!(true)).unwrap();
    cluster.deliver_all();
    assert!(allowed.try_result().is_some_and(|r| r.accepted));
}

#[traced_test]
#[test]
fn test_majority_minority_partition_times_out_then_recovers() {
    let mut cluster = SimulatedCluster::new(5, majority_config(), network(), 13).unwrap();
    let members = cluster.members();
    cluster
        .network_mut()
        .partition_groups(&members[..2], &members[2..]);

    let mut handle = cluster.propose(&members[0], "k", json!("minority")).unwrap();
    cluster.run_for(Duration::from_millis(1500));

    let result = handle.try_result().expect("timed out");
    assert_eq!(result.error, Some(ProposalError::Timeout { timeout_ms: 1000 }));
    assert_eq!(result.votes.for_votes, 2);
    assert!(cluster.stats().messages_dropped_partition > 0);

    cluster.network_mut().heal_all();
    let mut handle = cluster.propose(&members[0], "k", json!("healed")).unwrap();
    cluster.deliver_all();

    assert!(handle.try_result().is_some_and(|r| r.accepted));
    for member in &members {
        assert_eq!(cluster.get(member, "k"), Some(&json!("healed")));
    }
}

#[traced_test]
#[test]
fn test_stop_settles_outstanding_proposal() {
    let mut cluster = SimulatedCluster::new(3, majority_config(), network(), 17).unwrap();
    let members = cluster.members();
    cluster.isolate(&members[0]);

    let mut handle = cluster.propose(&members[0], "k", json!(1)).unwrap();
    cluster.run_for(Duration::from_millis(100));
    assert!(handle.try_result().is_none());

    cluster.manager_mut(&members[0]).unwrap().stop();

    let result = handle.try_result().expect("settled by stop");
    assert!(!result.accepted);
    assert_eq!(result.proposal_id, None);
    assert_eq!(result.error, Some(ProposalError::Stopped));

    // A stopped member's timers no longer drive the clock.
    cluster.run_for(Duration::from_secs(2));
    assert_eq!(cluster.get(&members[0], "k"), None);
}

// ═══════════════════════════════════════════════════════════════════════════
// Determinism
// ═══════════════════════════════════════════════════════════════════════════

fn lossy_run(seed: u64) -> (SimulationStats, Vec<Option<bool>>, BTreeMap<String, Value>) {
    let network = NetworkConfig::default().with_packet_loss(0.2);
    let mut cluster = SimulatedCluster::new(5, majority_config(), network, seed).unwrap();
    let members = cluster.members();

    let mut handles = Vec::new();
    for i in 0..10 {
        let proposer = &members[i % members.len()];
        handles.push(cluster.propose(proposer, format!("key-{}", i % 3), json!(i)).unwrap());
        cluster.run_for(Duration::from_millis(50));
    }
    cluster.run_for(Duration::from_secs(3));

    let outcomes = handles
        .iter_mut()
        .map(|h| h.try_result().map(|r| r.accepted))
        .collect();
    let state = cluster.manager(&members[0]).unwrap().state();
    (cluster.stats().clone(), outcomes, state)
}

#[traced_test]
#[test]
fn test_same_seed_same_outcome() {
    let first = lossy_run(42);
    let second = lossy_run(42);

    assert_eq!(first, second);
    assert!(first.0.messages_dropped_loss > 0);
    // Every proposal settles within its timeout.
    assert!(first.1.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_handle_resolves_when_awaited() {
    let mut cluster = SimulatedCluster::new(3, majority_config(), network(), 21).unwrap();
    let members = cluster.members();

    let handle = cluster.propose(&members[1], "k", json!("v")).unwrap();
    cluster.deliver_all();

    let result = handle.await;
    assert!(result.accepted);
    assert_eq!(result.value, Some(json!("v")));
}
