//! Observable notifications.

use concord_types::{MemberId, ProposalError, ProposalId, Value};

/// Something observable happened inside a protocol.
///
/// The runner logs every notification; `StateChanged` also drives per-key
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ProposalCreated {
        proposal_id: ProposalId,
        key: String,
    },
    ProposalAccepted {
        proposal_id: ProposalId,
        key: String,
    },
    ProposalRejected {
        proposal_id: ProposalId,
        key: String,
        reason: ProposalError,
    },
    ProposalTimeout {
        proposal_id: ProposalId,
        key: String,
    },
    VoteReceived {
        proposal_id: ProposalId,
        voter: MemberId,
        approve: bool,
    },
    /// A committed value was applied to local state.
    StateChanged {
        key: String,
        value: Value,
        previous: Option<Value>,
    },
    LeaderElected {
        leader: MemberId,
        view: u64,
    },
    LeaderLost {
        leader: MemberId,
        view: u64,
    },
    NodeJoined {
        member: MemberId,
    },
    NodeLeft {
        member: MemberId,
    },
}

impl Notification {
    /// Get a human-readable name for this notification.
    pub fn type_name(&self) -> &'static str {
        match self {
            Notification::ProposalCreated { .. } => "proposal-created",
            Notification::ProposalAccepted { .. } => "proposal-accepted",
            Notification::ProposalRejected { .. } => "proposal-rejected",
            Notification::ProposalTimeout { .. } => "proposal-timeout",
            Notification::VoteReceived { .. } => "vote-received",
            Notification::StateChanged { .. } => "state-changed",
            Notification::LeaderElected { .. } => "leader-elected",
            Notification::LeaderLost { .. } => "leader-lost",
            Notification::NodeJoined { .. } => "node-joined",
            Notification::NodeLeft { .. } => "node-left",
        }
    }
}
