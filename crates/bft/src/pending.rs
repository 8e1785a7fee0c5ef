//! Per-proposal BFT tracking state.

use crate::VoteSet;
use concord_core::RequestId;
use concord_types::{Digest, ProposalId, Value};

/// Where a proposal is in the three-phase commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Pre-prepare accepted (or issued, on the leader); collecting prepares.
    PrePrepared,
    /// Prepare quorum reached and commit broadcast; collecting commits.
    Prepared,
    /// Commit quorum reached and the value applied.
    Committed,
    /// Deadline passed before commit.
    TimedOut,
    /// The view moved on before commit.
    Superseded,
}

impl Phase {
    /// Whether the proposal can still make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Committed | Phase::TimedOut | Phase::Superseded
        )
    }
}

/// A proposal tracked by one node.
///
/// Created by the leader on propose, or by a follower when it accepts the
/// leader's pre-prepare.
#[derive(Debug, Clone)]
pub struct PendingProposal {
    pub proposal_id: ProposalId,
    pub key: String,
    pub value: Value,
    pub sequence: u64,
    pub view: u64,
    pub digest: Digest,
    pub prepare_voters: VoteSet,
    pub commit_voters: VoteSet,
    pub phase: Phase,
    /// Caller waiting on the outcome. Only set on the leader that took the request.
    pub origin: Option<RequestId>,
}

impl PendingProposal {
    /// Start tracking a proposal in the `PrePrepared` phase.
    pub fn new(
        proposal_id: ProposalId,
        key: String,
        value: Value,
        sequence: u64,
        view: u64,
        origin: Option<RequestId>,
    ) -> Self {
        let digest = Digest::of_proposal(&key, &value);
        Self {
            proposal_id,
            key,
            value,
            sequence,
            view,
            digest,
            prepare_voters: VoteSet::new(),
            commit_voters: VoteSet::new(),
            phase: Phase::PrePrepared,
            origin,
        }
    }

    /// Check that a phase message refers to this proposal's slot and content.
    pub fn matches(&self, view: u64, sequence: u64, digest: &Digest) -> bool {
        self.view == view && self.sequence == sequence && self.digest == *digest
    }
}
