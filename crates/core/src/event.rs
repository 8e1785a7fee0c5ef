//! Event types for the deterministic state machine.

use crate::RequestId;
use concord_messages::{BftMessage, MajorityMessage};
use concord_types::{MemberId, ProposalId, Value};

/// All possible events a protocol can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════
    /// The runner started (or restarted after a stop).
    Started,

    /// The runner is stopping. Proposals this node was driving must become
    /// terminal; the runner settles their callers itself.
    Stopped,

    // ═══════════════════════════════════════════════════════════════════════
    // Client
    // ═══════════════════════════════════════════════════════════════════════
    /// A caller wants `key` set to `value`.
    ProposeRequested {
        request: RequestId,
        key: String,
        value: Value,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// A BFT message arrived. The runner has already checked that the
    /// transport-level sender matches `message.sender_id`.
    BftMessageReceived { message: BftMessage },

    /// A majority-vote message arrived, sender already checked.
    MajorityMessageReceived { message: MajorityMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// A proposal's deadline passed.
    ProposalTimeout { proposal_id: ProposalId },

    /// The BFT view-change timer fired.
    ViewChangeTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════
    /// View-change quorum was reached (or a new-view accepted) and the
    /// node moved to `new_view`.
    ViewChangeCompleted { new_view: u64 },

    // ═══════════════════════════════════════════════════════════════════════
    // Roster
    // ═══════════════════════════════════════════════════════════════════════
    /// A member joined the roster.
    MemberAdded { member: MemberId },

    /// A member left the roster.
    MemberRemoved { member: MemberId },
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Started => "Started",
            Event::Stopped => "Stopped",
            Event::ProposeRequested { .. } => "ProposeRequested",
            Event::BftMessageReceived { .. } => "BftMessageReceived",
            Event::MajorityMessageReceived { .. } => "MajorityMessageReceived",
            Event::ProposalTimeout { .. } => "ProposalTimeout",
            Event::ViewChangeTimer => "ViewChangeTimer",
            Event::ViewChangeCompleted { .. } => "ViewChangeCompleted",
            Event::MemberAdded { .. } => "MemberAdded",
            Event::MemberRemoved { .. } => "MemberRemoved",
        }
    }
}
