//! Simulation errors.

use concord_core::ConsensusError;
use concord_types::MemberId;
use thiserror::Error;

/// Errors from building or driving a simulated cluster.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("consensus configuration rejected: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("cluster needs at least one member")]
    EmptyCluster,

    #[error("no member named {0} in the cluster")]
    UnknownMember(MemberId),

    #[error("packet loss rate must be within [0, 1], got {0}")]
    InvalidPacketLoss(f64),

    #[error("jitter fraction must be within [0, 1], got {0}")]
    InvalidJitter(f64),
}
