//! Error types for protocol construction.

use crate::Mechanism;
use thiserror::Error;

/// Errors raised while building a protocol instance.
///
/// These are the only fatal errors; everything that can go wrong with an
/// individual proposal is reported through its `ProposalResult`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    /// The configured mechanism is recognised but not implemented.
    #[error("consensus mechanism {0:?} is not supported")]
    UnsupportedMechanism(Mechanism),

    /// The quorum override is outside `[0, 1)`.
    #[error("quorum fraction must be in [0, 1), got {0}")]
    InvalidQuorum(f64),

    /// The proposal timeout is zero.
    #[error("proposal timeout must be greater than zero")]
    InvalidTimeout,
}
