//! Proposal lifecycle and result types.

use crate::{MemberId, ProposalId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a majority-vote proposal.
///
/// `Voting` is the only non-terminal status; once a proposal leaves it the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProposalStatus {
    Voting,
    Accepted,
    Rejected,
    TimedOut,
}

impl ProposalStatus {
    /// Whether the proposal reached a final outcome.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Voting)
    }
}

/// A candidate key/value update under majority voting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub key: String,
    pub value: Value,
    pub proposer_id: MemberId,
    pub timestamp_ms: u64,
    pub status: ProposalStatus,
    /// Latest vote per member. A member voting again replaces its earlier vote.
    pub votes: BTreeMap<MemberId, bool>,
}

impl Proposal {
    /// Create a new proposal in the `Voting` state with no votes.
    pub fn new(
        id: ProposalId,
        key: impl Into<String>,
        value: Value,
        proposer_id: MemberId,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            value,
            proposer_id,
            timestamp_ms,
            status: ProposalStatus::Voting,
            votes: BTreeMap::new(),
        }
    }

    /// Record a member's vote. Returns the vote it replaced, if any.
    pub fn record_vote(&mut self, member: MemberId, approve: bool) -> Option<bool> {
        self.votes.insert(member, approve)
    }

    /// Count of affirmative votes.
    pub fn votes_for(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }

    /// Count of negative votes.
    pub fn votes_against(&self) -> usize {
        self.votes.values().filter(|v| !**v).count()
    }

    /// Snapshot of the tally against a cluster of the given size.
    pub fn tally(&self, cluster_size: usize) -> VoteTally {
        VoteTally {
            for_votes: self.votes_for(),
            against: self.votes_against(),
            total: cluster_size,
        }
    }
}

/// Vote counts reported in a [`ProposalResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    #[serde(rename = "for")]
    pub for_votes: usize,
    pub against: usize,
    /// Cluster size the proposal was evaluated against.
    pub total: usize,
}

/// Caller-facing reasons a proposal did not commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ProposalError {
    /// Proposal was sent to a BFT follower. Retry against `leader`.
    #[error("not the leader; current leader is {leader}")]
    NotLeader { leader: MemberId },

    /// No outcome was reached before the proposal timeout.
    #[error("proposal timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Enough members voted against that quorum can no longer be reached.
    #[error("quorum unreachable: {against} of {total} members voted against")]
    QuorumUnreachable { against: usize, total: usize },

    /// The manager was stopped before the proposal settled.
    #[error("consensus manager stopped")]
    Stopped,
}

/// Immutable snapshot of a proposal's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalResult {
    /// Absent when the proposal was refused before an ID was minted.
    pub proposal_id: Option<ProposalId>,
    pub accepted: bool,
    pub key: String,
    pub value: Option<Value>,
    pub votes: VoteTally,
    pub error: Option<ProposalError>,
}

impl ProposalResult {
    /// A committed proposal.
    pub fn accepted(id: ProposalId, key: impl Into<String>, value: Value, votes: VoteTally) -> Self {
        Self {
            proposal_id: Some(id),
            accepted: true,
            key: key.into(),
            value: Some(value),
            votes,
            error: None,
        }
    }

    /// A proposal that will never commit.
    pub fn failed(
        id: Option<ProposalId>,
        key: impl Into<String>,
        votes: VoteTally,
        error: ProposalError,
    ) -> Self {
        Self {
            proposal_id: id,
            accepted: false,
            key: key.into(),
            value: None,
            votes,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_proposal_id;
    use serde_json::json;

    fn proposal() -> Proposal {
        let proposer = MemberId::new("a");
        Proposal::new(
            new_proposal_id(&proposer, 0, 1),
            "k",
            json!(1),
            proposer,
            0,
        )
    }

    #[test]
    fn test_last_vote_wins() {
        let mut p = proposal();
        assert_eq!(p.record_vote(MemberId::new("b"), false), None);
        assert_eq!(p.record_vote(MemberId::new("b"), true), Some(false));
        assert_eq!(p.votes_for(), 1);
        assert_eq!(p.votes_against(), 0);
    }

    #[test]
    fn test_tally() {
        let mut p = proposal();
        p.record_vote(MemberId::new("a"), true);
        p.record_vote(MemberId::new("b"), false);
        let tally = p.tally(5);
        assert_eq!(tally.for_votes, 1);
        assert_eq!(tally.against, 1);
        assert_eq!(tally.total, 5);
    }

    #[test]
    fn test_terminal_status() {
        assert!(!ProposalStatus::Voting.is_terminal());
        assert!(ProposalStatus::Accepted.is_terminal());
        assert!(ProposalStatus::Rejected.is_terminal());
        assert!(ProposalStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_tally_serializes_for_field() {
        let tally = VoteTally {
            for_votes: 3,
            against: 0,
            total: 5,
        };
        let encoded = serde_json::to_value(tally).unwrap();
        assert_eq!(encoded, json!({"for": 3, "against": 0, "total": 5}));
    }
}
