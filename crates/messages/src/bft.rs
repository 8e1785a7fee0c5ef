//! BFT phase and view-change messages.

use concord_types::{Digest, MemberId, ProposalId, Value};
use serde::{Deserialize, Serialize};

/// Kind of a BFT message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BftMessageKind {
    /// Leader announces a proposal with its sequence number and digest.
    PrePrepare,
    /// Replica acknowledges a pre-prepare it accepted.
    Prepare,
    /// Replica reached prepare quorum and votes to commit.
    Commit,
    /// Replica asks to move to `view` after the leader stalled.
    ViewChange,
    /// New leader announces that `view` is active.
    NewView,
}

impl BftMessageKind {
    /// Whether this is one of the three per-proposal phases.
    pub fn is_phase(&self) -> bool {
        matches!(
            self,
            BftMessageKind::PrePrepare | BftMessageKind::Prepare | BftMessageKind::Commit
        )
    }
}

/// BFT wire payload.
///
/// Field names follow the cluster's JSON contract (`type`, `sequenceNumber`,
/// `senderId`, ...). View-change messages carry the target view in `view`
/// and a zero digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BftMessage {
    #[serde(rename = "type")]
    pub kind: BftMessageKind,
    pub view: u64,
    pub sequence_number: u64,
    pub digest: Digest,
    pub sender_id: MemberId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl BftMessage {
    /// Leader's announcement of a new proposal.
    pub fn pre_prepare(
        view: u64,
        sequence_number: u64,
        digest: Digest,
        sender_id: MemberId,
        proposal_id: ProposalId,
        key: String,
        value: Value,
    ) -> Self {
        Self {
            kind: BftMessageKind::PrePrepare,
            view,
            sequence_number,
            digest,
            sender_id,
            proposal_id: Some(proposal_id),
            key: Some(key),
            value: Some(value),
        }
    }

    /// Prepare vote for a pre-prepared proposal.
    pub fn prepare(
        view: u64,
        sequence_number: u64,
        digest: Digest,
        sender_id: MemberId,
        proposal_id: ProposalId,
    ) -> Self {
        Self::vote(BftMessageKind::Prepare, view, sequence_number, digest, sender_id, proposal_id)
    }

    /// Commit vote for a prepared proposal.
    pub fn commit(
        view: u64,
        sequence_number: u64,
        digest: Digest,
        sender_id: MemberId,
        proposal_id: ProposalId,
    ) -> Self {
        Self::vote(BftMessageKind::Commit, view, sequence_number, digest, sender_id, proposal_id)
    }

    fn vote(
        kind: BftMessageKind,
        view: u64,
        sequence_number: u64,
        digest: Digest,
        sender_id: MemberId,
        proposal_id: ProposalId,
    ) -> Self {
        Self {
            kind,
            view,
            sequence_number,
            digest,
            sender_id,
            proposal_id: Some(proposal_id),
            key: None,
            value: None,
        }
    }

    /// Vote to move the cluster to `new_view`.
    pub fn view_change(new_view: u64, sender_id: MemberId) -> Self {
        Self::view_message(BftMessageKind::ViewChange, new_view, sender_id)
    }

    /// New leader's announcement that `view` is active.
    pub fn new_view(view: u64, sender_id: MemberId) -> Self {
        Self::view_message(BftMessageKind::NewView, view, sender_id)
    }

    fn view_message(kind: BftMessageKind, view: u64, sender_id: MemberId) -> Self {
        Self {
            kind,
            view,
            sequence_number: 0,
            digest: Digest::ZERO,
            sender_id,
            proposal_id: None,
            key: None,
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::new_proposal_id;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let sender = MemberId::new("n0");
        let id = new_proposal_id(&sender, 100, 1);
        let digest = Digest::of_proposal("mode", &json!("safe"));
        let msg = BftMessage::pre_prepare(
            0,
            1,
            digest,
            sender,
            id,
            "mode".to_string(),
            json!("safe"),
        );

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["type"], "prePrepare");
        assert_eq!(encoded["sequenceNumber"], 1);
        assert_eq!(encoded["senderId"], "n0");
        assert_eq!(encoded["proposalId"], "n0-100-1");
        assert_eq!(encoded["digest"], digest.to_hex());
        assert_eq!(encoded["value"], "safe");
    }

    #[test]
    fn test_view_change_omits_payload() {
        let msg = BftMessage::view_change(3, MemberId::new("n2"));
        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(encoded["type"], "viewChange");
        assert_eq!(encoded["view"], 3);
        assert!(encoded.get("proposalId").is_none());
        assert!(encoded.get("key").is_none());
    }

    #[test]
    fn test_phase_kinds() {
        assert!(BftMessageKind::Prepare.is_phase());
        assert!(!BftMessageKind::NewView.is_phase());
    }
}
