//! Shared fixtures for protocol unit tests.
//!
//! Protocol tests drive a single state machine directly and inspect the
//! returned actions; these helpers build rosters and pick actions apart.

use concord_core::{Action, Notification, RequestId, TimerId};
use concord_messages::{BftMessage, MajorityMessage, ProtocolMessage};
use concord_types::{MemberId, ProposalResult, Roster};
use std::time::Duration;

/// Deterministic member IDs `node-0 .. node-{n-1}`.
pub fn member_ids(n: usize) -> Vec<MemberId> {
    (0..n).map(|i| MemberId::new(format!("node-{i}"))).collect()
}

/// Roster of `n` members as seen by member `local`.
pub fn roster(local: usize, n: usize) -> Roster {
    let members = member_ids(n);
    Roster::with_members(members[local].clone(), members)
}

/// All broadcasts in `actions`, with their recipients.
pub fn broadcasts(actions: &[Action]) -> Vec<(&[MemberId], &ProtocolMessage)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Broadcast {
                recipients,
                message,
            } => Some((recipients.as_slice(), message)),
            _ => None,
        })
        .collect()
}

/// BFT payloads broadcast in `actions`.
pub fn bft_messages(actions: &[Action]) -> Vec<&BftMessage> {
    broadcasts(actions)
        .into_iter()
        .filter_map(|(_, m)| match m {
            ProtocolMessage::Bft(msg) => Some(msg),
            _ => None,
        })
        .collect()
}

/// Majority-vote payloads broadcast in `actions`.
pub fn majority_messages(actions: &[Action]) -> Vec<&MajorityMessage> {
    broadcasts(actions)
        .into_iter()
        .filter_map(|(_, m)| match m {
            ProtocolMessage::MajorityVote(msg) => Some(msg),
            _ => None,
        })
        .collect()
}

/// Result settled for `request`, if any.
pub fn result_for(actions: &[Action], request: RequestId) -> Option<&ProposalResult> {
    actions.iter().find_map(|a| match a {
        Action::EmitProposalResult { request: r, result } if *r == request => Some(result),
        _ => None,
    })
}

/// Every notification in `actions`.
pub fn notifications(actions: &[Action]) -> Vec<&Notification> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::EmitNotification { notification } => Some(notification),
            _ => None,
        })
        .collect()
}

/// Timers armed in `actions`.
pub fn timers_set(actions: &[Action]) -> Vec<(&TimerId, Duration)> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::SetTimer { id, duration } => Some((id, *duration)),
            _ => None,
        })
        .collect()
}

/// Timers cancelled in `actions`.
pub fn timers_cancelled(actions: &[Action]) -> Vec<&TimerId> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::CancelTimer { id } => Some(id),
            _ => None,
        })
        .collect()
}
