//! Core types for Concord consensus.
//!
//! This crate provides the foundational types shared by every protocol:
//!
//! - [`Event`]: All possible inputs to a protocol state machine
//! - [`Action`]: All possible outputs from a protocol state machine
//! - [`StateMachine`] / [`ConsensusProtocol`]: The traits protocols implement
//! - [`ProtocolConfig`]: Per-instance protocol configuration
//!
//! # Architecture
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutates self, but performs no I/O
//!
//! All I/O is handled by the runner (the consensus manager), which:
//! 1. Delivers events to the state machine
//! 2. Executes the returned actions (send messages, arm timers, settle callers)
//! 3. Feeds timer expiries and inbound messages back as events

mod action;
mod config;
mod error;
mod event;
mod notification;
mod request;
mod state;
mod traits;

pub use action::Action;
pub use config::{Mechanism, ProtocolConfig};
pub use error::ConsensusError;
pub use event::Event;
pub use notification::Notification;
pub use request::RequestId;
pub use state::CommittedState;
pub use traits::{ConsensusProtocol, StateMachine};

use concord_types::ProposalId;

/// Timers a protocol may arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Deadline for one pending proposal.
    ProposalTimeout(ProposalId),
    /// BFT follower's stalled-leader detection.
    ViewChange,
}
