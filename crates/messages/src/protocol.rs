//! Envelope for all protocol traffic.

use crate::{BftMessage, BftMessageKind, MajorityMessage};
use concord_types::MemberId;
use serde::{Deserialize, Serialize};

/// A message exchanged between cluster members.
///
/// The manager's single ingress point accepts this envelope and routes the
/// payload to the active protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "payload", rename_all = "camelCase")]
pub enum ProtocolMessage {
    /// Three-phase BFT traffic.
    Bft(BftMessage),

    /// Single-round majority-vote traffic.
    MajorityVote(MajorityMessage),
}

impl ProtocolMessage {
    /// Member claiming to have sent this message.
    pub fn sender(&self) -> &MemberId {
        match self {
            ProtocolMessage::Bft(msg) => &msg.sender_id,
            ProtocolMessage::MajorityVote(msg) => msg.sender(),
        }
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolMessage::Bft(msg) => match msg.kind {
                BftMessageKind::PrePrepare => "PrePrepare",
                BftMessageKind::Prepare => "Prepare",
                BftMessageKind::Commit => "Commit",
                BftMessageKind::ViewChange => "ViewChange",
                BftMessageKind::NewView => "NewView",
            },
            ProtocolMessage::MajorityVote(msg) => match msg {
                MajorityMessage::Proposal { .. } => "Proposal",
                MajorityMessage::Vote { .. } => "Vote",
                MajorityMessage::Decision { .. } => "Decision",
            },
        }
    }

    /// Check if this is a BFT message.
    pub fn is_bft(&self) -> bool {
        matches!(self, ProtocolMessage::Bft(_))
    }

    /// Check if this is a majority-vote message.
    pub fn is_majority_vote(&self) -> bool {
        matches!(self, ProtocolMessage::MajorityVote(_))
    }
}

impl From<BftMessage> for ProtocolMessage {
    fn from(msg: BftMessage) -> Self {
        ProtocolMessage::Bft(msg)
    }
}

impl From<MajorityMessage> for ProtocolMessage {
    fn from(msg: MajorityMessage) -> Self {
        ProtocolMessage::MajorityVote(msg)
    }
}
