//! Consensus manager.
//!
//! [`ConsensusManager`] binds one agreement protocol to a local member, its
//! callers and a [`Transport`]. It is the protocol's runner:
//!
//! - caller requests become `Event::ProposeRequested`, settled through a
//!   [`ProposalHandle`] future;
//! - inbound messages are checked against the claimed sender and the roster,
//!   then become protocol events;
//! - `SetTimer` / `CancelTimer` actions drive a [`TimerWheel`] advanced by
//!   [`ConsensusManager::tick`];
//! - `StateChanged` notifications fan out to per-key subscribers.

mod handle;
mod manager;
mod protocol;
mod subscribers;
mod timers;
mod transport;

pub use handle::ProposalHandle;
pub use manager::ConsensusManager;
pub use protocol::Protocol;
pub use subscribers::{StateChange, SubscriberRegistry, Subscription};
pub use timers::TimerWheel;
pub use transport::{NullTransport, Transport};

pub use concord_core::{ConsensusError, Mechanism, ProtocolConfig};
pub use concord_majority::{AcceptAll, VotePolicy};
pub use concord_types::{MemberId, ProposalError, ProposalResult, Value};
