//! Simulated network with deterministic latency, packet loss, and partitions.

use crate::SimulationError;
use concord_types::MemberId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base one-way latency.
    pub latency: Duration,
    /// Jitter as a fraction of base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Packet loss rate (0.0 - 1.0). Messages are dropped with this probability.
    pub packet_loss_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
        }
    }
}

impl NetworkConfig {
    /// Set the base latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the jitter fraction.
    pub fn with_jitter(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    /// Set the packet loss rate.
    pub fn with_packet_loss(mut self, rate: f64) -> Self {
        self.packet_loss_rate = rate;
        self
    }

    /// Check that rates are within `[0, 1]`.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(0.0..=1.0).contains(&self.packet_loss_rate) {
            return Err(SimulationError::InvalidPacketLoss(self.packet_loss_rate));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(SimulationError::InvalidJitter(self.jitter_fraction));
        }
        Ok(())
    }
}

/// Simulated network for deterministic message delivery.
///
/// Supports:
/// - Configurable latency with jitter
/// - Packet loss (probabilistic message drops)
/// - Network partitions (blocking communication between member pairs)
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Partitioned member pairs. If (a, b) is in this set, messages from a to b are dropped.
    /// Partitions are directional - add both (a, b) and (b, a) for bidirectional partition.
    partitions: HashSet<(MemberId, MemberId)>,
    /// Members cut off from everyone, including members added later.
    isolated: HashSet<MemberId>,
}

impl SimulatedNetwork {
    /// Create a new simulated network.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
            isolated: HashSet::new(),
        }
    }

    // ─── Partition Management ───

    /// Check if a message from `from` to `to` would be dropped by a partition.
    pub fn is_partitioned(&self, from: &MemberId, to: &MemberId) -> bool {
        self.isolated.contains(from)
            || self.isolated.contains(to)
            || self.partitions.contains(&(from.clone(), to.clone()))
    }

    /// Create a unidirectional partition: messages from `from` to `to` are dropped.
    pub fn partition_unidirectional(&mut self, from: &MemberId, to: &MemberId) {
        self.partitions.insert((from.clone(), to.clone()));
    }

    /// Create a bidirectional partition between two groups of members.
    pub fn partition_groups(&mut self, group_a: &[MemberId], group_b: &[MemberId]) {
        for a in group_a {
            for b in group_b {
                self.partitions.insert((a.clone(), b.clone()));
                self.partitions.insert((b.clone(), a.clone()));
            }
        }
    }

    /// Cut a member off from every other member.
    pub fn isolate(&mut self, member: &MemberId) {
        self.isolated.insert(member.clone());
    }

    /// Reconnect an isolated member. Pairwise partitions stay in place.
    pub fn reconnect(&mut self, member: &MemberId) {
        self.isolated.remove(member);
    }

    /// Heal all partitions - restore full network connectivity.
    pub fn heal_all(&mut self) {
        self.partitions.clear();
        self.isolated.clear();
    }

    /// Get the number of active partition pairs plus isolated members.
    pub fn partition_count(&self) -> usize {
        self.partitions.len() + self.isolated.len()
    }

    // ─── Packet Loss ───

    /// Check if a packet should be dropped based on the configured loss rate.
    pub fn should_drop_packet(&self, rng: &mut ChaCha8Rng) -> bool {
        self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate
    }

    /// Set the packet loss rate (clamped to 0.0 - 1.0).
    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.config.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    /// Get the current packet loss rate.
    pub fn packet_loss_rate(&self) -> f64 {
        self.config.packet_loss_rate
    }

    // ─── Message Delivery Decision ───

    /// Decide the fate of a message from `from` to `to`.
    pub fn route(&self, from: &MemberId, to: &MemberId, rng: &mut ChaCha8Rng) -> Route {
        // Check partition first (deterministic)
        if self.is_partitioned(from, to) {
            return Route::Partitioned;
        }

        // Check packet loss (probabilistic but deterministic with seeded RNG)
        if self.should_drop_packet(rng) {
            return Route::Lost;
        }

        Route::Deliver(self.sample_latency(rng))
    }

    /// Sample one-way latency.
    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.latency.as_secs_f64();
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.001))
    }

    /// Get network configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

/// What the network does with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Delivered after the given latency.
    Deliver(Duration),
    /// Dropped by a partition.
    Partitioned,
    /// Dropped by random packet loss.
    Lost,
}
