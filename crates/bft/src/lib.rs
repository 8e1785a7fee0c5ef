//! BFT consensus state machine.
//!
//! This crate provides a synchronous three-phase commit (pre-prepare,
//! prepare, commit) tolerating `f = (n - 1) / 3` faulty members, with a
//! view-change sub-protocol that replaces a stalled leader.
//!
//! # Architecture
//!
//! The BFT state machine processes events synchronously:
//!
//! - `Event::ProposeRequested` → Leader assigns a sequence number, broadcasts pre-prepare
//! - `Event::BftMessageReceived` (pre-prepare) → Verify leader and digest, broadcast prepare
//! - `Event::BftMessageReceived` (prepare/commit) → Collect votes, advance on `2f + 1`
//! - `Event::ProposalTimeout` → Fail the proposal; a follower starts suspecting the leader
//! - `Event::ViewChangeTimer` → Vote for the next view while suspecting
//! - `Event::ViewChangeCompleted` → Retire proposals from the previous view
//!
//! All I/O is performed by the runner via returned `Action`s.

mod buffer;
mod pending;
mod state;
mod view_change;
mod vote_set;

pub use buffer::EarlyMessageBuffer;
pub use pending::{PendingProposal, Phase};
pub use state::BftState;
pub use view_change::ViewChangeState;
pub use vote_set::VoteSet;
