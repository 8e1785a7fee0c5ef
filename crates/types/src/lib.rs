//! Core types for Concord consensus.
//!
//! Identifiers, quorum arithmetic, digests, the cluster roster and the
//! proposal data model shared by every protocol implementation.

mod digest;
mod identifiers;
mod proposal;
mod quorum;
mod roster;

pub use digest::{Digest, HexError};
pub use identifiers::{new_proposal_id, MemberId, ProposalId, ProposalIdError, ProposalIdGenerator};
pub use proposal::{Proposal, ProposalError, ProposalResult, ProposalStatus, VoteTally};
pub use quorum::{
    bft_quorum_size, max_faulty, quorum_reachable, quorum_satisfied, required_quorum,
    DEFAULT_QUORUM_FRACTION,
};
pub use roster::Roster;

/// Opaque proposal payload.
pub type Value = serde_json::Value;
