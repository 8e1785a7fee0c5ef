//! Action types for the deterministic state machine.

use crate::{Event, Notification, RequestId, TimerId};
use concord_messages::ProtocolMessage;
use concord_types::{MemberId, ProposalResult};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send the same message to each listed member.
    ///
    /// Never includes the local member; protocols account for their own
    /// votes directly.
    Broadcast {
        recipients: Vec<MemberId>,
        message: ProtocolMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration. Re-arming an armed timer
    /// replaces its deadline.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for immediate processing, before any
    /// further external input.
    EnqueueInternal { event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Caller-facing
    // ═══════════════════════════════════════════════════════════════════════
    /// Settle the caller waiting on `request`.
    ///
    /// Only emitted by the node that received the original propose call.
    EmitProposalResult {
        request: RequestId,
        result: ProposalResult,
    },

    /// Emit an observable notification (logging, telemetry, subscribers).
    EmitNotification { notification: Notification },
}

impl Action {
    /// Shorthand for [`Action::EmitNotification`].
    pub fn notify(notification: Notification) -> Self {
        Action::EmitNotification { notification }
    }

    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::EmitProposalResult { .. } => "EmitProposalResult",
            Action::EmitNotification { .. } => "EmitNotification",
        }
    }
}
