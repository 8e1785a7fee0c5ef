//! Deterministic cluster simulation.
//!
//! Runs several [`concord_node::ConsensusManager`]s in one process over a
//! simulated network. Given the same seed and the same calls, a run produces
//! identical results every time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulatedCluster                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  managers: BTreeMap<MemberId, ConsensusManager>    │ │
//! │  │  each sends into a shared outbox                   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │ encode, route               │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  in flight: BTreeMap<(deliver_at, seq), bytes>     │ │
//! │  │  partitions and packet loss decided at send time   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │ decode, handle_message      │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  timers fire through ConsensusManager::tick        │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod cluster;
mod error;
mod network;

pub use cluster::{SimulatedCluster, SimulationStats};
pub use error::SimulationError;
pub use network::{NetworkConfig, Route, SimulatedNetwork};
