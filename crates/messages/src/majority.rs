//! Majority-vote messages.

use concord_types::{MemberId, ProposalId, Value};
use serde::{Deserialize, Serialize};

/// Majority-vote wire payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MajorityMessage {
    /// Proposer asks every member to vote on a key/value update.
    Proposal {
        proposal_id: ProposalId,
        key: String,
        value: Value,
        proposer_id: MemberId,
        timestamp_ms: u64,
    },

    /// A member's yes/no vote on a proposal.
    Vote {
        proposal_id: ProposalId,
        voter_id: MemberId,
        approve: bool,
    },

    /// Proposer announces the final outcome.
    Decision {
        proposal_id: ProposalId,
        proposer_id: MemberId,
        accepted: bool,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl MajorityMessage {
    /// Member claiming to have sent this message.
    pub fn sender(&self) -> &MemberId {
        match self {
            MajorityMessage::Proposal { proposer_id, .. } => proposer_id,
            MajorityMessage::Vote { voter_id, .. } => voter_id,
            MajorityMessage::Decision { proposer_id, .. } => proposer_id,
        }
    }

    /// Proposal this message refers to.
    pub fn proposal_id(&self) -> &ProposalId {
        match self {
            MajorityMessage::Proposal { proposal_id, .. }
            | MajorityMessage::Vote { proposal_id, .. }
            | MajorityMessage::Decision { proposal_id, .. } => proposal_id,
        }
    }
}
