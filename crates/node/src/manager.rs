//! The consensus manager: runner for one member's protocol.

use crate::{
    NullTransport, Protocol, ProposalHandle, StateChange, SubscriberRegistry, Subscription,
    TimerWheel, Transport,
};
use concord_bft::BftState;
use concord_core::{
    Action, ConsensusError, ConsensusProtocol, Event, Mechanism, Notification, ProtocolConfig,
    RequestId, StateMachine, TimerId,
};
use concord_majority::{MajorityVoteState, VotePolicy};
use concord_messages::ProtocolMessage;
use concord_types::{MemberId, ProposalError, ProposalResult, Roster, Value, VoteTally};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

struct PendingRequest {
    key: String,
    responder: oneshot::Sender<ProposalResult>,
}

/// Binds a protocol to a member identity, its callers, and a transport.
///
/// The manager is the protocol's runner: it turns calls, inbound messages and
/// timer expiries into events, and executes the actions the protocol returns.
/// Time only moves when the owner calls [`ConsensusManager::tick`].
pub struct ConsensusManager {
    member_id: MemberId,
    protocol: Protocol,
    transport: Arc<dyn Transport>,
    timers: TimerWheel,
    pending: HashMap<RequestId, PendingRequest>,
    next_request_id: u64,
    subscribers: SubscriberRegistry,
    /// Events emitted via `Action::EnqueueInternal`, processed before any
    /// further external input.
    internal: VecDeque<Event>,
    running: bool,
    now: Duration,
}

impl std::fmt::Debug for ConsensusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusManager")
            .field("member_id", &self.member_id)
            .field("mechanism", &self.mechanism())
            .field("running", &self.running)
            .field("pending", &self.pending.len())
            .field("timers", &self.timers.len())
            .field("now", &self.now)
            .finish()
    }
}

impl ConsensusManager {
    /// Create a manager for `member_id` running the configured mechanism.
    ///
    /// Fails if the configuration is invalid or names an unsupported
    /// mechanism. The manager starts stopped.
    pub fn new(
        member_id: impl Into<MemberId>,
        config: ProtocolConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self, ConsensusError> {
        Self::build(member_id.into(), config, Arc::new(transport), None)
    }

    /// Like [`ConsensusManager::new`], voting on other members' majority-vote
    /// proposals with `policy`.
    pub fn with_vote_policy(
        member_id: impl Into<MemberId>,
        config: ProtocolConfig,
        transport: impl Transport + 'static,
        policy: Arc<dyn VotePolicy>,
    ) -> Result<Self, ConsensusError> {
        Self::build(member_id.into(), config, Arc::new(transport), Some(policy))
    }

    /// A single-member manager with no transport.
    pub fn standalone(
        member_id: impl Into<MemberId>,
        config: ProtocolConfig,
    ) -> Result<Self, ConsensusError> {
        Self::new(member_id, config, NullTransport)
    }

    fn build(
        member_id: MemberId,
        config: ProtocolConfig,
        transport: Arc<dyn Transport>,
        policy: Option<Arc<dyn VotePolicy>>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;

        let roster = Roster::new(member_id.clone());
        let protocol = match config.mechanism {
            Mechanism::MajorityVote => Protocol::MajorityVote(match policy {
                Some(policy) => MajorityVoteState::with_policy(roster, config.clone(), policy),
                None => MajorityVoteState::new(roster, config.clone()),
            }),
            Mechanism::Bft => {
                if policy.is_some() {
                    warn!(member = %member_id, "Vote policy has no effect under BFT");
                }
                Protocol::Bft(BftState::new(roster, config.clone()))
            }
            Mechanism::LogReplication => {
                return Err(ConsensusError::UnsupportedMechanism(config.mechanism))
            }
        };

        info!(
            member = %member_id,
            mechanism = ?config.mechanism,
            timeout_ms = config.timeout_ms,
            "Consensus manager created"
        );

        Ok(Self {
            member_id,
            protocol,
            transport,
            timers: TimerWheel::new(),
            pending: HashMap::new(),
            next_request_id: 0,
            subscribers: SubscriberRegistry::new(),
            internal: VecDeque::new(),
            running: false,
            now: Duration::ZERO,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    pub fn mechanism(&self) -> Mechanism {
        self.consensus().mechanism()
    }

    /// The running protocol, for inspection.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    fn consensus(&self) -> &dyn ConsensusProtocol {
        self.protocol.as_consensus()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Time of the last `tick`.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// When the next armed timer is due, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Callers still waiting on an outcome.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Start processing. Idempotent.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(member = %self.member_id, mechanism = ?self.mechanism(), "Consensus manager started");
        self.dispatch(Event::Started);
    }

    /// Stop processing. Idempotent.
    ///
    /// The protocol abandons the proposals it was driving, so a vote that
    /// arrives after a restart cannot apply them. Then every timer is
    /// disarmed and every waiting caller settles as not accepted with
    /// [`ProposalError::Stopped`].
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        let timers = self.timers.len();
        self.dispatch(Event::Stopped);
        self.timers.clear();
        self.internal.clear();

        let total = self.consensus().roster().len();
        let settled = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let result = ProposalResult::failed(
                None,
                pending.key,
                VoteTally {
                    total,
                    ..VoteTally::default()
                },
                ProposalError::Stopped,
            );
            let _ = pending.responder.send(result);
        }

        info!(
            member = %self.member_id,
            timers_cancelled = timers,
            requests_settled = settled,
            "Consensus manager stopped"
        );
    }

    /// Advance the clock to `now` and fire every timer due by then, in
    /// deadline order. A clock reading earlier than the last one is ignored.
    pub fn tick(&mut self, now: Duration) {
        if now < self.now {
            debug!(member = %self.member_id, ?now, last = ?self.now, "Ignoring clock going backwards");
            return;
        }
        self.now = now;
        if !self.running {
            return;
        }
        while let Some(timer) = self.timers.pop_due(now) {
            trace!(member = %self.member_id, ?timer, "Timer fired");
            let event = match timer {
                TimerId::ProposalTimeout(proposal_id) => Event::ProposalTimeout { proposal_id },
                TimerId::ViewChange => Event::ViewChangeTimer,
            };
            self.dispatch(event);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposing
    // ═══════════════════════════════════════════════════════════════════════

    /// Propose `key = value`; resolves to whether it was accepted.
    pub fn propose(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> impl Future<Output = bool> + Send + 'static {
        let handle = self.propose_with_result(key, value);
        async move { handle.await.accepted }
    }

    /// Propose `key = value`; resolves to the full outcome.
    pub fn propose_with_result(&mut self, key: impl Into<String>, value: Value) -> ProposalHandle {
        let key = key.into();
        let (responder, receiver) = oneshot::channel();
        let handle = ProposalHandle::new(key.clone(), receiver);

        if !self.running {
            debug!(member = %self.member_id, key = %key, "Refusing proposal, manager stopped");
            let total = self.consensus().roster().len();
            let _ = responder.send(ProposalResult::failed(
                None,
                key,
                VoteTally {
                    total,
                    ..VoteTally::default()
                },
                ProposalError::Stopped,
            ));
            return handle;
        }

        self.next_request_id += 1;
        let request = RequestId::new(self.next_request_id);
        self.pending.insert(
            request,
            PendingRequest {
                key: key.clone(),
                responder,
            },
        );
        self.dispatch(Event::ProposeRequested {
            request,
            key,
            value,
        });
        handle
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State
    // ═══════════════════════════════════════════════════════════════════════

    /// Last committed value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.consensus().get(key)
    }

    /// Snapshot of every committed value.
    pub fn state(&self) -> BTreeMap<String, Value> {
        self.consensus().committed().entries().clone()
    }

    /// Call `callback` on every committed change to `key`.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(key, callback)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Roster
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a member. Returns false if it was already present.
    pub fn add_node(&mut self, member: impl Into<MemberId>) -> bool {
        let member = member.into();
        if self.consensus().roster().contains(&member) {
            return false;
        }
        self.dispatch(Event::MemberAdded { member });
        true
    }

    /// Remove a member. The local member cannot be removed.
    pub fn remove_node(&mut self, member: &MemberId) -> bool {
        if *member == self.member_id || !self.consensus().roster().contains(member) {
            return false;
        }
        self.dispatch(Event::MemberRemoved {
            member: member.clone(),
        });
        true
    }

    /// Current members, sorted, including this one.
    pub fn nodes(&self) -> Vec<MemberId> {
        self.consensus().roster().members().cloned().collect()
    }

    pub fn is_leader(&self) -> bool {
        self.consensus().is_leader()
    }

    /// Current leader. Always `None` under majority voting.
    pub fn leader(&self) -> Option<&MemberId> {
        self.consensus().leader()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ingress
    // ═══════════════════════════════════════════════════════════════════════

    /// Deliver a message received from `from`.
    ///
    /// Messages whose claimed sender is not `from`, that come from outside the
    /// roster, or that belong to the other protocol are dropped.
    pub fn handle_message(&mut self, from: &MemberId, message: ProtocolMessage) {
        if !self.running {
            trace!(member = %self.member_id, from = %from, "Dropping message, manager stopped");
            return;
        }
        if message.sender() != from {
            warn!(
                member = %self.member_id,
                from = %from,
                claimed = %message.sender(),
                kind = message.type_name(),
                "Dropping message with forged sender"
            );
            return;
        }
        if !self.consensus().roster().contains(from) {
            debug!(member = %self.member_id, from = %from, "Dropping message from non-member");
            return;
        }

        let event = match (message, self.mechanism()) {
            (ProtocolMessage::Bft(message), Mechanism::Bft) => Event::BftMessageReceived { message },
            (ProtocolMessage::MajorityVote(message), Mechanism::MajorityVote) => {
                Event::MajorityMessageReceived { message }
            }
            (message, mechanism) => {
                debug!(
                    member = %self.member_id,
                    kind = message.type_name(),
                    ?mechanism,
                    "Dropping message for another mechanism"
                );
                return;
            }
        };
        self.dispatch(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Runner
    // ═══════════════════════════════════════════════════════════════════════

    fn dispatch(&mut self, event: Event) {
        self.internal.push_back(event);
        while let Some(event) = self.internal.pop_front() {
            trace!(member = %self.member_id, event = event.type_name(), "Dispatching event");
            self.protocol.set_time(self.now);
            let actions = self.protocol.handle(event);
            for action in actions {
                self.execute(action);
            }
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Broadcast {
                recipients,
                message,
            } => {
                trace!(
                    member = %self.member_id,
                    kind = message.type_name(),
                    recipients = recipients.len(),
                    "Broadcasting"
                );
                for to in recipients.iter().filter(|to| **to != self.member_id) {
                    self.transport.send(&self.member_id, to, message.clone());
                }
            }
            Action::SetTimer { id, duration } => {
                self.timers.set(id, self.now + duration);
            }
            Action::CancelTimer { id } => {
                self.timers.cancel(&id);
            }
            Action::EnqueueInternal { event } => {
                self.internal.push_back(event);
            }
            Action::EmitProposalResult { request, result } => {
                match self.pending.remove(&request) {
                    Some(pending) => {
                        if pending.responder.send(result).is_err() {
                            trace!(member = %self.member_id, %request, "Caller dropped its handle");
                        }
                    }
                    None => {
                        debug!(member = %self.member_id, %request, "Result for unknown request");
                    }
                }
            }
            Action::EmitNotification { notification } => {
                self.log_notification(&notification);
                if let Notification::StateChanged {
                    key,
                    value,
                    previous,
                } = notification
                {
                    self.subscribers.notify(&StateChange {
                        key,
                        value,
                        previous,
                    });
                }
            }
        }
    }

    fn log_notification(&self, notification: &Notification) {
        let member = &self.member_id;
        let kind = notification.type_name();
        match notification {
            Notification::ProposalCreated { proposal_id, key } => {
                debug!(%member, kind, %proposal_id, %key, "Proposal created");
            }
            Notification::ProposalAccepted { proposal_id, key } => {
                info!(%member, kind, %proposal_id, %key, "Proposal accepted");
            }
            Notification::ProposalRejected {
                proposal_id,
                key,
                reason,
            } => {
                info!(%member, kind, %proposal_id, %key, %reason, "Proposal rejected");
            }
            Notification::ProposalTimeout { proposal_id, key } => {
                warn!(%member, kind, %proposal_id, %key, "Proposal timed out");
            }
            Notification::VoteReceived {
                proposal_id,
                voter,
                approve,
            } => {
                trace!(%member, kind, %proposal_id, %voter, approve, "Vote received");
            }
            Notification::StateChanged { key, previous, .. } => {
                info!(%member, kind, %key, replaced = previous.is_some(), "State changed");
            }
            Notification::LeaderElected { leader, view } => {
                info!(%member, kind, %leader, view, "Leader elected");
            }
            Notification::LeaderLost { leader, view } => {
                info!(%member, kind, %leader, view, "Leader lost");
            }
            Notification::NodeJoined { member: joined } => {
                info!(%member, kind, %joined, "Node joined");
            }
            Notification::NodeLeft { member: left } => {
                info!(%member, kind, %left, "Node left");
            }
        }
    }
}
