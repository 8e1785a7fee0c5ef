//! Deterministic cluster of consensus managers.
//!
//! Every manager sends through a shared outbox. The cluster drains the outbox
//! after each call into a manager, routes each message through the
//! [`SimulatedNetwork`] at send time, and delivers surviving messages after
//! their sampled latency. Messages cross the wire codec in both directions.

use crate::network::{NetworkConfig, Route, SimulatedNetwork};
use crate::SimulationError;
use concord_messages::{decode_message, encode_message, ProtocolMessage};
use concord_node::{
    ConsensusManager, Protocol, ProposalHandle, ProtocolConfig, Transport, VotePolicy,
};
use concord_types::{MemberId, Value};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// One message leaving a member.
#[derive(Debug, Clone)]
struct Envelope {
    from: MemberId,
    to: MemberId,
    message: ProtocolMessage,
}

/// Transport shared by every manager in a cluster.
#[derive(Debug, Default)]
struct Outbox {
    queued: Mutex<Vec<Envelope>>,
}

impl Outbox {
    fn drain(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.queued.lock())
    }
}

impl Transport for Outbox {
    fn send(&self, from: &MemberId, to: &MemberId, message: ProtocolMessage) {
        self.queued.lock().push(Envelope {
            from: from.clone(),
            to: to.clone(),
            message,
        });
    }
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Messages handed to the transport.
    pub messages_sent: u64,
    /// Messages delivered to their recipient.
    pub messages_delivered: u64,
    /// Messages dropped by partitions.
    pub messages_dropped_partition: u64,
    /// Messages dropped by random packet loss.
    pub messages_dropped_loss: u64,
    /// Messages that failed to encode or decode.
    pub codec_errors: u64,
}

impl SimulationStats {
    /// Total messages dropped for any reason.
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss + self.codec_errors
    }
}

/// A set of managers wired together over a simulated network.
///
/// Given the same seed and the same sequence of calls, runs are identical.
pub struct SimulatedCluster {
    managers: BTreeMap<MemberId, ConsensusManager>,
    outbox: Arc<Outbox>,
    /// In-flight messages, ordered by delivery time then send order.
    in_flight: BTreeMap<(Duration, u64), (MemberId, MemberId, Vec<u8>)>,
    sequence: u64,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    now: Duration,
    stats: SimulationStats,
}

impl SimulatedCluster {
    /// Build `size` members named `node-0 .. node-{size-1}`, each knowing all
    /// the others, and start them.
    pub fn new(
        size: usize,
        config: ProtocolConfig,
        network: NetworkConfig,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        Self::build(size, config, network, seed, None)
    }

    /// Like [`SimulatedCluster::new`], with every member deciding its votes on
    /// other members' majority-vote proposals through `policy`.
    pub fn with_vote_policy(
        size: usize,
        config: ProtocolConfig,
        network: NetworkConfig,
        seed: u64,
        policy: Arc<dyn VotePolicy>,
    ) -> Result<Self, SimulationError> {
        Self::build(size, config, network, seed, Some(policy))
    }

    fn build(
        size: usize,
        config: ProtocolConfig,
        network: NetworkConfig,
        seed: u64,
        policy: Option<Arc<dyn VotePolicy>>,
    ) -> Result<Self, SimulationError> {
        if size == 0 {
            return Err(SimulationError::EmptyCluster);
        }
        network.validate()?;

        let members: Vec<MemberId> = (0..size).map(|i| MemberId::new(format!("node-{i}"))).collect();
        let outbox = Arc::new(Outbox::default());

        let mut managers = BTreeMap::new();
        for member in &members {
            let transport = Arc::clone(&outbox);
            let mut manager = match &policy {
                Some(policy) => ConsensusManager::with_vote_policy(
                    member.clone(),
                    config.clone(),
                    transport,
                    Arc::clone(policy),
                )?,
                None => ConsensusManager::new(member.clone(), config.clone(), transport)?,
            };
            for peer in &members {
                manager.add_node(peer.clone());
            }
            manager.start();
            managers.insert(member.clone(), manager);
        }

        let mut cluster = Self {
            managers,
            outbox,
            in_flight: BTreeMap::new(),
            sequence: 0,
            network: SimulatedNetwork::new(network),
            rng: ChaCha8Rng::seed_from_u64(seed),
            now: Duration::ZERO,
            stats: SimulationStats::default(),
        };
        cluster.flush();
        Ok(cluster)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Member IDs in sorted order.
    pub fn members(&self) -> Vec<MemberId> {
        self.managers.keys().cloned().collect()
    }

    /// Member at `index` in sorted order.
    pub fn member(&self, index: usize) -> Option<&MemberId> {
        self.managers.keys().nth(index)
    }

    pub fn manager(&self, member: &MemberId) -> Option<&ConsensusManager> {
        self.managers.get(member)
    }

    /// Mutable access to a manager. Anything it sends is routed immediately
    /// when the next cluster method runs.
    pub fn manager_mut(&mut self, member: &MemberId) -> Option<&mut ConsensusManager> {
        self.managers.get_mut(member)
    }

    /// Committed value of `key` on `member`.
    pub fn get(&self, member: &MemberId, key: &str) -> Option<&Value> {
        self.managers.get(member)?.get(key)
    }

    /// BFT view on `member`, if it runs BFT.
    pub fn bft_view(&self, member: &MemberId) -> Option<u64> {
        match self.managers.get(member)?.protocol() {
            Protocol::Bft(state) => Some(state.view()),
            Protocol::MajorityVote(_) => None,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// Messages sent but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving
    // ═══════════════════════════════════════════════════════════════════════

    /// Propose on `member`. Outgoing messages are routed with the network as
    /// it is right now.
    pub fn propose(
        &mut self,
        member: &MemberId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<ProposalHandle, SimulationError> {
        let manager = self
            .managers
            .get_mut(member)
            .ok_or_else(|| SimulationError::UnknownMember(member.clone()))?;
        let handle = manager.propose_with_result(key, value);
        self.flush();
        Ok(handle)
    }

    /// Cut a member off from the rest of the cluster.
    pub fn isolate(&mut self, member: &MemberId) {
        debug!(member = %member, "Isolating member");
        self.network.isolate(member);
    }

    /// Reconnect an isolated member.
    pub fn reconnect(&mut self, member: &MemberId) {
        debug!(member = %member, "Reconnecting member");
        self.network.reconnect(member);
    }

    /// Route everything managers have sent since the last flush.
    fn flush(&mut self) {
        for envelope in self.outbox.drain() {
            self.stats.messages_sent += 1;
            let latency = match self.network.route(&envelope.from, &envelope.to, &mut self.rng) {
                Route::Deliver(latency) => latency,
                Route::Partitioned => {
                    trace!(from = %envelope.from, to = %envelope.to, "Dropped by partition");
                    self.stats.messages_dropped_partition += 1;
                    continue;
                }
                Route::Lost => {
                    trace!(from = %envelope.from, to = %envelope.to, "Dropped by packet loss");
                    self.stats.messages_dropped_loss += 1;
                    continue;
                }
            };
            let bytes = match encode_message(&envelope.message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Failed to encode message");
                    self.stats.codec_errors += 1;
                    continue;
                }
            };
            self.sequence += 1;
            self.in_flight
                .insert((self.now + latency, self.sequence), (envelope.from, envelope.to, bytes));
        }
    }

    fn deliver(&mut self, from: MemberId, to: MemberId, bytes: Vec<u8>) {
        let message = match decode_message(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "Failed to decode message");
                self.stats.codec_errors += 1;
                return;
            }
        };
        let Some(manager) = self.managers.get_mut(&to) else {
            debug!(to = %to, "Message for unknown member");
            return;
        };
        self.stats.messages_delivered += 1;
        manager.handle_message(&from, message);
        self.flush();
    }

    /// Earliest pending message or timer.
    fn next_event_time(&self) -> Option<Duration> {
        let next_message = self.in_flight.keys().next().map(|(at, _)| *at);
        let next_timer = self
            .managers
            .values()
            .filter(|m| m.is_running())
            .filter_map(ConsensusManager::next_deadline)
            .min();
        match (next_message, next_timer) {
            (Some(m), Some(t)) => Some(m.min(t)),
            (m, t) => m.or(t),
        }
    }

    fn tick_all(&mut self) {
        let now = self.now;
        for manager in self.managers.values_mut() {
            manager.tick(now);
        }
        self.flush();
    }

    /// Process every message delivery and timer due up to `end`, in time
    /// order, then leave the clock at `end`.
    pub fn run_until(&mut self, end: Duration) {
        self.flush();
        while let Some(at) = self.next_event_time() {
            if at > end {
                break;
            }
            self.now = self.now.max(at);

            // Timers due by now fire before messages arriving at the same instant.
            self.tick_all();

            let due = match self.in_flight.first_key_value() {
                Some((&(deliver_at, _), _)) => deliver_at <= self.now,
                None => false,
            };
            if due {
                if let Some((_, (from, to, bytes))) = self.in_flight.pop_first() {
                    self.deliver(from, to, bytes);
                }
            }
        }
        self.now = self.now.max(end);
        self.tick_all();
    }

    /// Advance the clock by `duration`.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now + duration);
    }

    /// Run until no message is in flight, letting time pass only as far as
    /// the last delivery needs.
    pub fn deliver_all(&mut self) {
        self.flush();
        while let Some((&(at, _), _)) = self.in_flight.first_key_value() {
            self.run_until(at);
        }
    }
}
