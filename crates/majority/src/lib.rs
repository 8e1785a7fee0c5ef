//! Majority-vote agreement state machine.
//!
//! Any member may propose. Every member casts one equally weighted yes/no
//! vote and the proposer decides as soon as the outcome is certain:
//!
//! - `Event::ProposeRequested` → Record own vote, ask peers to vote
//! - `Event::MajorityMessageReceived` (proposal) → Vote and reply to the proposer
//! - `Event::MajorityMessageReceived` (vote) → Re-check quorum, decide if settled
//! - `Event::MajorityMessageReceived` (decision) → Apply an accepted value
//! - `Event::ProposalTimeout` → Give up on an undecided proposal
//!
//! All I/O is performed by the runner via returned `Action`s.

mod policy;
mod state;

pub use policy::{AcceptAll, VotePolicy};
pub use state::MajorityVoteState;
