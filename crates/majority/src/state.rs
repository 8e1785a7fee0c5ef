//! Majority-vote state machine.

use crate::{AcceptAll, VotePolicy};
use concord_core::{
    Action, CommittedState, ConsensusProtocol, Event, Mechanism, Notification, ProtocolConfig,
    RequestId, StateMachine, TimerId,
};
use concord_messages::{MajorityMessage, ProtocolMessage};
use concord_types::{
    quorum_reachable, quorum_satisfied, MemberId, Proposal, ProposalError, ProposalId,
    ProposalIdGenerator, ProposalResult, ProposalStatus, Roster, Value, VoteTally,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outcome of re-checking a proposal's votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Accepted,
    Rejected,
}

/// Leaderless single-round voting.
///
/// Every member keeps a copy of each proposal it has heard of, but only the
/// proposer decides. Peers learn the outcome from the proposer's decision
/// message and apply accepted values from it.
pub struct MajorityVoteState {
    roster: Roster,
    config: ProtocolConfig,
    ids: ProposalIdGenerator,

    /// Every proposal seen, own and remote. Terminal entries are kept so late
    /// votes and duplicate proposals are recognised.
    proposals: HashMap<ProposalId, Proposal>,

    /// Caller requests waiting on proposals minted here.
    origins: HashMap<ProposalId, RequestId>,

    committed: CommittedState,
    policy: Arc<dyn VotePolicy>,
    now: Duration,
}

impl std::fmt::Debug for MajorityVoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MajorityVoteState")
            .field("roster", &self.roster)
            .field("proposals", &self.proposals.len())
            .field("pending", &self.origins.len())
            .field("committed", &self.committed.len())
            .finish()
    }
}

impl MajorityVoteState {
    /// Create a new majority-vote instance for the given roster.
    pub fn new(roster: Roster, config: ProtocolConfig) -> Self {
        Self::with_policy(roster, config, Arc::new(AcceptAll))
    }

    /// Create an instance that votes on remote proposals with `policy`.
    pub fn with_policy(
        roster: Roster,
        config: ProtocolConfig,
        policy: Arc<dyn VotePolicy>,
    ) -> Self {
        let ids = ProposalIdGenerator::new(roster.local().clone());
        Self {
            roster,
            config,
            ids,
            proposals: HashMap::new(),
            origins: HashMap::new(),
            committed: CommittedState::new(),
            policy,
            now: Duration::ZERO,
        }
    }

    /// Look up a proposal this node has seen.
    pub fn proposal(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Number of own proposals still waiting for an outcome.
    pub fn pending_count(&self) -> usize {
        self.origins.len()
    }

    fn local(&self) -> &MemberId {
        self.roster.local()
    }

    fn broadcast(&self, message: MajorityMessage) -> Option<Action> {
        let recipients = self.roster.peers();
        if recipients.is_empty() {
            return None;
        }
        Some(Action::Broadcast {
            recipients,
            message: ProtocolMessage::MajorityVote(message),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposing
    // ═══════════════════════════════════════════════════════════════════════

    fn on_propose(&mut self, request: RequestId, key: String, value: Value) -> Vec<Action> {
        let now_ms = self.now.as_millis() as u64;
        let id = self.ids.next(now_ms);
        let local = self.local().clone();

        let mut proposal = Proposal::new(id.clone(), key.clone(), value.clone(), local.clone(), now_ms);
        proposal.record_vote(local.clone(), true);
        self.proposals.insert(id.clone(), proposal);
        self.origins.insert(id.clone(), request);

        info!(proposal_id = %id, key = %key, members = self.roster.len(), "Created proposal");

        let mut actions = vec![
            Action::notify(Notification::ProposalCreated {
                proposal_id: id.clone(),
                key: key.clone(),
            }),
            Action::SetTimer {
                id: TimerId::ProposalTimeout(id.clone()),
                duration: self.config.timeout(),
            },
        ];

        actions.extend(self.broadcast(MajorityMessage::Proposal {
            proposal_id: id.clone(),
            key,
            value,
            proposer_id: local,
            timestamp_ms: now_ms,
        }));

        actions.extend(self.evaluate(&id));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound messages
    // ═══════════════════════════════════════════════════════════════════════

    fn on_message(&mut self, message: MajorityMessage) -> Vec<Action> {
        if !self.roster.contains(message.sender()) {
            debug!(sender = %message.sender(), "Ignoring message from non-member");
            return vec![];
        }

        match message {
            MajorityMessage::Proposal {
                proposal_id,
                key,
                value,
                proposer_id,
                timestamp_ms,
            } => self.on_remote_proposal(proposal_id, key, value, proposer_id, timestamp_ms),
            MajorityMessage::Vote {
                proposal_id,
                voter_id,
                approve,
            } => self.on_vote(proposal_id, voter_id, approve),
            MajorityMessage::Decision {
                proposal_id,
                proposer_id,
                accepted,
                key,
                value,
            } => self.on_decision(proposal_id, proposer_id, accepted, key, value),
        }
    }

    fn on_remote_proposal(
        &mut self,
        proposal_id: ProposalId,
        key: String,
        value: Value,
        proposer_id: MemberId,
        timestamp_ms: u64,
    ) -> Vec<Action> {
        if proposer_id == *self.local() || proposal_id.member != proposer_id {
            warn!(
                proposal_id = %proposal_id,
                proposer = %proposer_id,
                "Ignoring proposal with inconsistent proposer"
            );
            return vec![];
        }
        if self.proposals.contains_key(&proposal_id) {
            trace!(proposal_id = %proposal_id, "Duplicate proposal");
            return vec![];
        }

        let approve = self.policy.approve(&key, &value);
        let local = self.local().clone();

        let mut proposal = Proposal::new(proposal_id.clone(), key, value, proposer_id.clone(), timestamp_ms);
        proposal.record_vote(proposer_id, true);
        proposal.record_vote(local.clone(), approve);
        self.proposals.insert(proposal_id.clone(), proposal);

        debug!(proposal_id = %proposal_id, approve, "Voting on proposal");

        self.broadcast(MajorityMessage::Vote {
            proposal_id,
            voter_id: local,
            approve,
        })
        .into_iter()
        .collect()
    }

    fn on_vote(&mut self, proposal_id: ProposalId, voter: MemberId, approve: bool) -> Vec<Action> {
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            debug!(proposal_id = %proposal_id, voter = %voter, "Vote for unknown proposal");
            return vec![];
        };
        if proposal.status.is_terminal() {
            trace!(proposal_id = %proposal_id, voter = %voter, "Vote for decided proposal");
            return vec![];
        }

        if let Some(previous) = proposal.record_vote(voter.clone(), approve) {
            if previous != approve {
                debug!(proposal_id = %proposal_id, voter = %voter, approve, "Voter changed its vote");
            }
        }

        let mut actions = vec![Action::notify(Notification::VoteReceived {
            proposal_id: proposal_id.clone(),
            voter,
            approve,
        })];
        actions.extend(self.evaluate(&proposal_id));
        actions
    }

    fn on_decision(
        &mut self,
        proposal_id: ProposalId,
        proposer_id: MemberId,
        accepted: bool,
        key: String,
        value: Option<Value>,
    ) -> Vec<Action> {
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            debug!(proposal_id = %proposal_id, "Decision for unknown proposal");
            return vec![];
        };
        if proposal.proposer_id != proposer_id || proposal.key != key {
            warn!(
                proposal_id = %proposal_id,
                sender = %proposer_id,
                "Ignoring decision that does not match the recorded proposal"
            );
            return vec![];
        }
        if proposal.status.is_terminal() {
            trace!(proposal_id = %proposal_id, "Decision for decided proposal");
            return vec![];
        }

        if !accepted {
            proposal.status = ProposalStatus::Rejected;
            debug!(proposal_id = %proposal_id, "Proposer reported rejection");
            return vec![];
        }

        let Some(value) = value else {
            warn!(proposal_id = %proposal_id, "Accepted decision without a value");
            return vec![];
        };
        if value != proposal.value {
            warn!(
                proposal_id = %proposal_id,
                sender = %proposer_id,
                "Ignoring decision whose value differs from the proposed one"
            );
            return vec![];
        }
        proposal.status = ProposalStatus::Accepted;

        info!(proposal_id = %proposal_id, key = %key, "Applying accepted proposal");

        vec![
            Action::notify(self.committed.apply(key.clone(), value)),
            Action::notify(Notification::ProposalAccepted { proposal_id, key }),
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Deciding
    // ═══════════════════════════════════════════════════════════════════════

    /// Re-check an own proposal's votes and decide if the outcome is certain.
    fn evaluate(&mut self, proposal_id: &ProposalId) -> Vec<Action> {
        if !self.origins.contains_key(proposal_id) {
            return vec![];
        }
        let Some(proposal) = self.proposals.get(proposal_id) else {
            return vec![];
        };
        if proposal.status.is_terminal() {
            return vec![];
        }

        let tally = self.tally(proposal);
        let fraction = self.config.quorum_fraction();
        let verdict = if quorum_satisfied(tally.for_votes, tally.total, fraction) {
            Verdict::Accepted
        } else if !quorum_reachable(
            tally.for_votes,
            tally.for_votes + tally.against,
            tally.total,
            fraction,
        ) {
            Verdict::Rejected
        } else {
            Verdict::Pending
        };

        trace!(
            proposal_id = %proposal_id,
            for_votes = tally.for_votes,
            against = tally.against,
            total = tally.total,
            ?verdict,
            "Evaluated quorum"
        );

        match verdict {
            Verdict::Pending => vec![],
            Verdict::Accepted => self.finalize(proposal_id, tally, None),
            Verdict::Rejected => {
                let reason = ProposalError::QuorumUnreachable {
                    against: tally.against,
                    total: tally.total,
                };
                self.finalize(proposal_id, tally, Some(reason))
            }
        }
    }

    /// Votes from current roster members, against the current roster size.
    fn tally(&self, proposal: &Proposal) -> VoteTally {
        let mut tally = VoteTally {
            total: self.roster.len(),
            ..VoteTally::default()
        };
        for (member, approve) in &proposal.votes {
            if !self.roster.contains(member) {
                continue;
            }
            if *approve {
                tally.for_votes += 1;
            } else {
                tally.against += 1;
            }
        }
        tally
    }

    /// Settle an own proposal. `rejection` is `None` for acceptance.
    fn finalize(
        &mut self,
        proposal_id: &ProposalId,
        tally: VoteTally,
        rejection: Option<ProposalError>,
    ) -> Vec<Action> {
        let Some(proposal) = self.proposals.get_mut(proposal_id) else {
            return vec![];
        };
        let key = proposal.key.clone();
        let value = proposal.value.clone();
        let accepted = rejection.is_none();
        proposal.status = if accepted {
            ProposalStatus::Accepted
        } else {
            ProposalStatus::Rejected
        };

        let mut actions = vec![Action::CancelTimer {
            id: TimerId::ProposalTimeout(proposal_id.clone()),
        }];

        let result = match rejection {
            None => {
                info!(
                    proposal_id = %proposal_id,
                    key = %key,
                    for_votes = tally.for_votes,
                    total = tally.total,
                    "Proposal accepted"
                );
                actions.push(Action::notify(self.committed.apply(key.clone(), value.clone())));
                actions.push(Action::notify(Notification::ProposalAccepted {
                    proposal_id: proposal_id.clone(),
                    key: key.clone(),
                }));
                ProposalResult::accepted(proposal_id.clone(), key.clone(), value.clone(), tally)
            }
            Some(reason) => {
                info!(
                    proposal_id = %proposal_id,
                    key = %key,
                    against = tally.against,
                    total = tally.total,
                    "Proposal rejected"
                );
                actions.push(Action::notify(Notification::ProposalRejected {
                    proposal_id: proposal_id.clone(),
                    key: key.clone(),
                    reason: reason.clone(),
                }));
                ProposalResult::failed(Some(proposal_id.clone()), key.clone(), tally, reason)
            }
        };

        if let Some(request) = self.origins.remove(proposal_id) {
            actions.push(Action::EmitProposalResult { request, result });
        }

        actions.extend(self.broadcast(MajorityMessage::Decision {
            proposal_id: proposal_id.clone(),
            proposer_id: self.local().clone(),
            accepted,
            key,
            value: accepted.then_some(value),
        }));

        actions
    }

    fn on_timeout(&mut self, proposal_id: ProposalId) -> Vec<Action> {
        let Some(request) = self.origins.remove(&proposal_id) else {
            trace!(proposal_id = %proposal_id, "Timeout for settled proposal");
            return vec![];
        };
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            return vec![];
        };
        if proposal.status.is_terminal() {
            return vec![];
        }
        proposal.status = ProposalStatus::TimedOut;
        let key = proposal.key.clone();
        let proposal = proposal.clone();
        let tally = self.tally(&proposal);

        warn!(
            proposal_id = %proposal_id,
            key = %key,
            for_votes = tally.for_votes,
            against = tally.against,
            total = tally.total,
            "Proposal timed out"
        );

        let error = ProposalError::Timeout {
            timeout_ms: self.config.timeout_ms,
        };
        let mut actions = vec![
            Action::notify(Notification::ProposalTimeout {
                proposal_id: proposal_id.clone(),
                key: key.clone(),
            }),
            Action::EmitProposalResult {
                request,
                result: ProposalResult::failed(Some(proposal_id.clone()), key.clone(), tally, error),
            },
        ];
        actions.extend(self.broadcast(MajorityMessage::Decision {
            proposal_id,
            proposer_id: self.local().clone(),
            accepted: false,
            key,
            value: None,
        }));
        actions
    }

    /// Abandon every proposal this node originated. Their timers are gone
    /// with the stop, so a vote arriving after a restart must not apply them.
    fn on_stopped(&mut self) -> Vec<Action> {
        let mut abandoned: Vec<ProposalId> = self.origins.drain().map(|(id, _)| id).collect();
        abandoned.sort();

        let mut actions = Vec::with_capacity(abandoned.len());
        for proposal_id in abandoned {
            if let Some(proposal) = self.proposals.get_mut(&proposal_id) {
                if !proposal.status.is_terminal() {
                    proposal.status = ProposalStatus::TimedOut;
                }
            }
            actions.push(Action::CancelTimer {
                id: TimerId::ProposalTimeout(proposal_id),
            });
        }
        if !actions.is_empty() {
            debug!(abandoned = actions.len(), "Abandoned own proposals on stop");
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Roster
    // ═══════════════════════════════════════════════════════════════════════

    fn on_member_added(&mut self, member: MemberId) -> Vec<Action> {
        if !self.roster.insert(member.clone()) {
            return vec![];
        }
        info!(member = %member, members = self.roster.len(), "Member joined");
        let mut actions = vec![Action::notify(Notification::NodeJoined { member })];
        actions.extend(self.reevaluate_pending());
        actions
    }

    fn on_member_removed(&mut self, member: MemberId) -> Vec<Action> {
        if !self.roster.remove(&member) {
            return vec![];
        }
        info!(member = %member, members = self.roster.len(), "Member left");
        let mut actions = vec![Action::notify(Notification::NodeLeft { member })];
        actions.extend(self.reevaluate_pending());
        actions
    }

    /// Cluster size changed; thresholds move with it.
    fn reevaluate_pending(&mut self) -> Vec<Action> {
        let mut pending: Vec<ProposalId> = self.origins.keys().cloned().collect();
        pending.sort();
        pending.iter().flat_map(|id| self.evaluate(id)).collect()
    }
}

impl StateMachine for MajorityVoteState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::ProposeRequested {
                request,
                key,
                value,
            } => self.on_propose(request, key, value),
            Event::MajorityMessageReceived { message } => self.on_message(message),
            Event::ProposalTimeout { proposal_id } => self.on_timeout(proposal_id),
            Event::MemberAdded { member } => self.on_member_added(member),
            Event::MemberRemoved { member } => self.on_member_removed(member),
            Event::Started => vec![],
            Event::Stopped => self.on_stopped(),
            other => {
                trace!(event = other.type_name(), "Event not handled by majority vote");
                vec![]
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

impl ConsensusProtocol for MajorityVoteState {
    fn mechanism(&self) -> Mechanism {
        Mechanism::MajorityVote
    }

    fn committed(&self) -> &CommittedState {
        &self.committed
    }

    fn roster(&self) -> &Roster {
        &self.roster
    }

    fn leader(&self) -> Option<&MemberId> {
        None
    }
}
