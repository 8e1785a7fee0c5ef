//! BFT consensus state machine.

use crate::{EarlyMessageBuffer, PendingProposal, Phase, ViewChangeState};
use concord_core::{
    Action, CommittedState, ConsensusProtocol, Event, Mechanism, Notification, ProtocolConfig,
    RequestId, StateMachine, TimerId,
};
use concord_messages::{BftMessage, BftMessageKind, ProtocolMessage};
use concord_types::{
    Digest, MemberId, ProposalError, ProposalId, ProposalIdGenerator, ProposalResult, Roster,
    Value, VoteTally,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Three-phase commit state for one member.
///
/// The leader of the current view assigns sequence numbers and issues
/// pre-prepares. Every member collects `2f + 1` prepares, then `2f + 1`
/// commits, before applying a value.
#[derive(Debug)]
pub struct BftState {
    roster: Roster,
    config: ProtocolConfig,
    ids: ProposalIdGenerator,

    /// Highest sequence number issued or accepted. Never reset.
    last_sequence: u64,

    /// Tracked proposals, including terminal ones so late messages are
    /// recognised.
    proposals: HashMap<ProposalId, PendingProposal>,

    /// Proposal occupying each `(view, sequence)` slot.
    slots: HashMap<(u64, u64), ProposalId>,

    buffer: EarlyMessageBuffer,
    view_change: ViewChangeState,
    committed: CommittedState,
    now: Duration,
}

impl BftState {
    /// Create a new BFT instance at view 0.
    pub fn new(roster: Roster, config: ProtocolConfig) -> Self {
        let ids = ProposalIdGenerator::new(roster.local().clone());
        let buffer = EarlyMessageBuffer::new(config.max_buffered_messages);
        let view_change = ViewChangeState::new(config.view_change_timeout());
        Self {
            roster,
            config,
            ids,
            last_sequence: 0,
            proposals: HashMap::new(),
            slots: HashMap::new(),
            buffer,
            view_change,
            committed: CommittedState::new(),
            now: Duration::ZERO,
        }
    }

    /// Current view number.
    pub fn view(&self) -> u64 {
        self.view_change.current_view()
    }

    /// Highest sequence number seen.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Look up a tracked proposal.
    pub fn proposal(&self, id: &ProposalId) -> Option<&PendingProposal> {
        self.proposals.get(id)
    }

    /// Whether this node currently suspects the leader.
    pub fn is_suspect(&self) -> bool {
        self.view_change.is_suspect()
    }

    /// Phase messages waiting for their pre-prepare.
    pub fn buffered_messages(&self) -> usize {
        self.buffer.len()
    }

    fn local(&self) -> &MemberId {
        self.roster.local()
    }

    fn current_leader(&self) -> &MemberId {
        self.roster.leader_for_view(self.view())
    }

    fn broadcast(&self, message: BftMessage) -> Option<Action> {
        let recipients = self.roster.peers();
        if recipients.is_empty() {
            return None;
        }
        Some(Action::Broadcast {
            recipients,
            message: ProtocolMessage::Bft(message),
        })
    }

    fn tally(&self, proposal: &PendingProposal) -> VoteTally {
        VoteTally {
            for_votes: proposal.commit_voters.count_in(&self.roster),
            against: 0,
            total: self.roster.len(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Leader: propose
    // ═══════════════════════════════════════════════════════════════════════

    fn on_propose(&mut self, request: RequestId, key: String, value: Value) -> Vec<Action> {
        let view = self.view();
        if !self.roster.is_leader_for_view(view) {
            let leader = self.current_leader().clone();
            debug!(key = %key, leader = %leader, view, "Refusing proposal, not the leader");
            let tally = VoteTally {
                total: self.roster.len(),
                ..VoteTally::default()
            };
            return vec![Action::EmitProposalResult {
                request,
                result: ProposalResult::failed(
                    None,
                    key,
                    tally,
                    ProposalError::NotLeader { leader },
                ),
            }];
        }

        let id = self.ids.next(self.now.as_millis() as u64);
        self.last_sequence += 1;
        let sequence = self.last_sequence;

        let mut proposal =
            PendingProposal::new(id.clone(), key.clone(), value.clone(), sequence, view, Some(request));
        proposal.prepare_voters.insert(self.local().clone());
        let digest = proposal.digest;

        info!(
            proposal_id = %id,
            key = %key,
            view,
            sequence,
            digest = ?digest,
            "Issuing pre-prepare"
        );

        self.slots.insert((view, sequence), id.clone());
        self.proposals.insert(id.clone(), proposal);

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
        actions.extend(self.broadcast(BftMessage::pre_prepare(
            view,
            sequence,
            digest,
            self.local().clone(),
            id.clone(),
            key,
            value,
        )));
        actions.extend(self.advance(&id));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound messages
    // ═══════════════════════════════════════════════════════════════════════

    fn on_message(&mut self, message: BftMessage) -> Vec<Action> {
        if !self.roster.contains(&message.sender_id) {
            debug!(sender = %message.sender_id, kind = ?message.kind, "Ignoring message from non-member");
            return vec![];
        }
        if message.sender_id == *self.local() {
            trace!(kind = ?message.kind, "Ignoring own message");
            return vec![];
        }

        match message.kind {
            BftMessageKind::ViewChange => {
                self.view_change
                    .on_view_change_vote(message.view, message.sender_id, &self.roster)
            }
            BftMessageKind::NewView => {
                self.view_change
                    .on_new_view(message.view, &message.sender_id, &self.roster)
            }
            BftMessageKind::PrePrepare | BftMessageKind::Prepare | BftMessageKind::Commit => {
                if message.view != self.view() {
                    debug!(
                        kind = ?message.kind,
                        sender = %message.sender_id,
                        message_view = message.view,
                        view = self.view(),
                        "Ignoring phase message from another view"
                    );
                    return vec![];
                }
                if message.kind == BftMessageKind::PrePrepare {
                    self.on_pre_prepare(message)
                } else {
                    self.on_phase_vote(message)
                }
            }
        }
    }

    fn on_pre_prepare(&mut self, message: BftMessage) -> Vec<Action> {
        let view = message.view;
        let sequence = message.sequence_number;
        let sender = message.sender_id;

        if sender != *self.roster.leader_for_view(view) {
            warn!(
                sender = %sender,
                leader = %self.roster.leader_for_view(view),
                view,
                "Pre-prepare from a member that does not lead this view"
            );
            return vec![];
        }
        let (Some(proposal_id), Some(key)) = (message.proposal_id, message.key) else {
            warn!(sender = %sender, "Pre-prepare without proposal id or key");
            return vec![];
        };
        let value = message.value.unwrap_or(Value::Null);

        if self.proposals.contains_key(&proposal_id) {
            trace!(proposal_id = %proposal_id, "Duplicate pre-prepare");
            return vec![];
        }

        let expected = Digest::of_proposal(&key, &value);
        if expected != message.digest {
            warn!(
                proposal_id = %proposal_id,
                sender = %sender,
                claimed = ?message.digest,
                computed = ?expected,
                "Pre-prepare digest mismatch"
            );
            return vec![];
        }

        if let Some(existing) = self.slots.get(&(view, sequence)) {
            warn!(
                view,
                sequence,
                existing = %existing,
                conflicting = %proposal_id,
                leader = %sender,
                "Leader reused a sequence slot"
            );
            return vec![];
        }

        debug!(
            proposal_id = %proposal_id,
            key = %key,
            view,
            sequence,
            "Accepted pre-prepare"
        );

        let local = self.local().clone();
        let mut proposal = PendingProposal::new(proposal_id.clone(), key, value, sequence, view, None);
        // The pre-prepare stands in for the leader's prepare.
        proposal.prepare_voters.insert(sender);
        proposal.prepare_voters.insert(local.clone());
        let digest = proposal.digest;

        self.last_sequence = self.last_sequence.max(sequence);
        self.slots.insert((view, sequence), proposal_id.clone());
        self.proposals.insert(proposal_id.clone(), proposal);

        let mut actions = vec![Action::SetTimer {
            id: TimerId::ProposalTimeout(proposal_id.clone()),
            duration: self.config.timeout(),
        }];
        actions.extend(self.broadcast(BftMessage::prepare(
            view,
            sequence,
            digest,
            local,
            proposal_id.clone(),
        )));

        let early = self.buffer.take(&proposal_id);
        if !early.is_empty() {
            debug!(proposal_id = %proposal_id, count = early.len(), "Replaying early messages");
        }
        for message in early {
            actions.extend(self.on_phase_vote(message));
        }

        actions.extend(self.advance(&proposal_id));
        actions
    }

    /// Record a prepare or commit vote.
    fn on_phase_vote(&mut self, message: BftMessage) -> Vec<Action> {
        let Some(proposal_id) = message.proposal_id.clone() else {
            warn!(sender = %message.sender_id, kind = ?message.kind, "Phase vote without proposal id");
            return vec![];
        };

        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            trace!(
                proposal_id = %proposal_id,
                kind = ?message.kind,
                sender = %message.sender_id,
                "Buffering phase vote until pre-prepare arrives"
            );
            self.buffer.push(proposal_id, message);
            return vec![];
        };

        if !proposal.matches(message.view, message.sequence_number, &message.digest) {
            warn!(
                proposal_id = %proposal_id,
                kind = ?message.kind,
                sender = %message.sender_id,
                "Phase vote does not match tracked proposal"
            );
            return vec![];
        }
        if proposal.phase.is_terminal() {
            trace!(proposal_id = %proposal_id, phase = ?proposal.phase, "Vote for finished proposal");
            return vec![];
        }

        let voters = match message.kind {
            BftMessageKind::Prepare => &mut proposal.prepare_voters,
            BftMessageKind::Commit => &mut proposal.commit_voters,
            _ => return vec![],
        };
        if !voters.insert(message.sender_id.clone()) {
            trace!(proposal_id = %proposal_id, sender = %message.sender_id, "Duplicate phase vote");
            return vec![];
        }

        self.advance(&proposal_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Phase transitions
    // ═══════════════════════════════════════════════════════════════════════

    /// Move a proposal forward as far as its current votes allow.
    fn advance(&mut self, proposal_id: &ProposalId) -> Vec<Action> {
        let quorum = self.roster.bft_quorum_size();
        let local = self.roster.local().clone();
        let Some(proposal) = self.proposals.get_mut(proposal_id) else {
            return vec![];
        };

        let mut actions = vec![];

        if proposal.phase == Phase::PrePrepared
            && proposal.prepare_voters.count_in(&self.roster) >= quorum
        {
            proposal.phase = Phase::Prepared;
            proposal.commit_voters.insert(local.clone());
            debug!(
                proposal_id = %proposal_id,
                prepares = proposal.prepare_voters.len(),
                quorum,
                "Prepared"
            );
            let commit = BftMessage::commit(
                proposal.view,
                proposal.sequence,
                proposal.digest,
                local,
                proposal_id.clone(),
            );
            actions.extend(self.broadcast(commit));
        }

        // Commits may arrive before this node is prepared; they only count once it is.
        let Some(proposal) = self.proposals.get(proposal_id) else {
            return actions;
        };
        if proposal.phase == Phase::Prepared
            && proposal.commit_voters.count_in(&self.roster) >= quorum
        {
            actions.extend(self.commit(proposal_id));
        }

        actions
    }

    fn commit(&mut self, proposal_id: &ProposalId) -> Vec<Action> {
        let Some(proposal) = self.proposals.get_mut(proposal_id) else {
            return vec![];
        };
        proposal.phase = Phase::Committed;
        let key = proposal.key.clone();
        let value = proposal.value.clone();
        let origin = proposal.origin.take();
        let sequence = proposal.sequence;
        let proposal = proposal.clone();
        let tally = self.tally(&proposal);

        info!(
            proposal_id = %proposal_id,
            key = %key,
            sequence,
            commits = tally.for_votes,
            "Committed"
        );

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::ProposalTimeout(proposal_id.clone()),
            },
            Action::notify(self.committed.apply(key.clone(), value.clone())),
            Action::notify(Notification::ProposalAccepted {
                proposal_id: proposal_id.clone(),
                key: key.clone(),
            }),
        ];
        if let Some(request) = origin {
            actions.push(Action::EmitProposalResult {
                request,
                result: ProposalResult::accepted(proposal_id.clone(), key, value, tally),
            });
        }
        actions.extend(self.view_change.on_progress());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════

    fn on_proposal_timeout(&mut self, proposal_id: ProposalId) -> Vec<Action> {
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            return vec![];
        };
        if proposal.phase.is_terminal() {
            trace!(proposal_id = %proposal_id, phase = ?proposal.phase, "Timeout for finished proposal");
            return vec![];
        }
        let stalled_in = proposal.phase;
        proposal.phase = Phase::TimedOut;
        let origin = proposal.origin.take();
        let proposal = proposal.clone();

        warn!(
            proposal_id = %proposal_id,
            key = %proposal.key,
            view = proposal.view,
            sequence = proposal.sequence,
            phase = ?stalled_in,
            prepares = proposal.prepare_voters.len(),
            commits = proposal.commit_voters.len(),
            "Proposal timed out"
        );

        let mut actions = vec![Action::notify(Notification::ProposalTimeout {
            proposal_id: proposal_id.clone(),
            key: proposal.key.clone(),
        })];
        if let Some(request) = origin {
            actions.push(Action::EmitProposalResult {
                request,
                result: ProposalResult::failed(
                    Some(proposal_id),
                    proposal.key.clone(),
                    self.tally(&proposal),
                    ProposalError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    },
                ),
            });
        }

        if !self.roster.is_leader_for_view(proposal.view) {
            actions.extend(self.view_change.suspect());
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View and roster changes
    // ═══════════════════════════════════════════════════════════════════════

    /// The view moved on: unfinished proposals from earlier views can no
    /// longer gather matching votes.
    fn on_view_change_completed(&mut self, new_view: u64) -> Vec<Action> {
        self.buffer.discard_before(new_view);
        let leader = self.roster.leader_for_view(new_view).clone();

        let mut stale: Vec<ProposalId> = self
            .proposals
            .values()
            .filter(|p| p.view < new_view && !p.phase.is_terminal())
            .map(|p| p.proposal_id.clone())
            .collect();
        stale.sort();

        let superseded = stale.len();
        let mut actions = vec![];
        for proposal_id in stale {
            let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
                continue;
            };
            proposal.phase = Phase::Superseded;
            let origin = proposal.origin.take();
            let key = proposal.key.clone();
            debug!(proposal_id = %proposal_id, new_view, "Proposal superseded by view change");

            actions.push(Action::CancelTimer {
                id: TimerId::ProposalTimeout(proposal_id.clone()),
            });
            if let Some(request) = origin {
                let tally = VoteTally {
                    total: self.roster.len(),
                    ..VoteTally::default()
                };
                actions.push(Action::EmitProposalResult {
                    request,
                    result: ProposalResult::failed(
                        Some(proposal_id),
                        key,
                        tally,
                        ProposalError::NotLeader {
                            leader: leader.clone(),
                        },
                    ),
                });
            }
        }

        info!(
            new_view,
            leader = %leader,
            is_leader = leader == *self.local(),
            superseded,
            "Entered new view"
        );
        actions
    }

    fn on_member_added(&mut self, member: MemberId) -> Vec<Action> {
        let leader_before = self.current_leader().clone();
        if !self.roster.insert(member.clone()) {
            return vec![];
        }
        info!(member = %member, members = self.roster.len(), "Member joined");
        let mut actions = vec![Action::notify(Notification::NodeJoined { member })];
        actions.extend(self.after_roster_change(leader_before));
        actions
    }

    fn on_member_removed(&mut self, member: MemberId) -> Vec<Action> {
        let leader_before = self.current_leader().clone();
        if !self.roster.remove(&member) {
            return vec![];
        }
        info!(member = %member, members = self.roster.len(), "Member left");
        let mut actions = vec![Action::notify(Notification::NodeLeft { member })];
        actions.extend(self.after_roster_change(leader_before));
        actions
    }

    /// Leader and quorum are derived from the roster, so both may have moved.
    fn after_roster_change(&mut self, leader_before: MemberId) -> Vec<Action> {
        let view = self.view();
        let mut actions = vec![];

        let leader_after = self.current_leader().clone();
        if leader_after != leader_before {
            info!(view, old = %leader_before, new = %leader_after, "Leader changed with roster");
            actions.push(Action::notify(Notification::LeaderLost {
                leader: leader_before,
                view,
            }));
            actions.push(Action::notify(Notification::LeaderElected {
                leader: leader_after,
                view,
            }));
        }

        let mut active: Vec<ProposalId> = self
            .proposals
            .values()
            .filter(|p| !p.phase.is_terminal())
            .map(|p| p.proposal_id.clone())
            .collect();
        active.sort();
        for proposal_id in active {
            actions.extend(self.advance(&proposal_id));
        }
        actions
    }

    /// Drop the proposals this node led for a caller. Their timers do not
    /// survive the stop, and the caller is told the request stopped.
    fn on_stopped(&mut self) -> Vec<Action> {
        let mut owned: Vec<ProposalId> = self
            .proposals
            .values()
            .filter(|p| p.origin.is_some() && !p.phase.is_terminal())
            .map(|p| p.proposal_id.clone())
            .collect();
        owned.sort();

        let mut actions = Vec::with_capacity(owned.len());
        for proposal_id in owned {
            if let Some(proposal) = self.proposals.get_mut(&proposal_id) {
                proposal.phase = Phase::TimedOut;
                proposal.origin = None;
            }
            actions.push(Action::CancelTimer {
                id: TimerId::ProposalTimeout(proposal_id),
            });
        }
        if !actions.is_empty() {
            debug!(abandoned = actions.len(), "Abandoned led proposals on stop");
        }
        actions
    }

    fn on_started(&mut self) -> Vec<Action> {
        let view = self.view();
        let leader = self.current_leader().clone();
        debug!(view, leader = %leader, "BFT started");
        let mut actions = vec![Action::notify(Notification::LeaderElected { leader, view })];
        actions.extend(self.view_change.on_start());
        actions
    }
}

impl StateMachine for BftState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Started => self.on_started(),
            Event::Stopped => self.on_stopped(),
            Event::ProposeRequested {
                request,
                key,
                value,
            } => self.on_propose(request, key, value),
            Event::BftMessageReceived { message } => self.on_message(message),
            Event::ProposalTimeout { proposal_id } => self.on_proposal_timeout(proposal_id),
            Event::ViewChangeTimer => self.view_change.on_view_change_timer(&self.roster),
            Event::ViewChangeCompleted { new_view } => self.on_view_change_completed(new_view),
            Event::MemberAdded { member } => self.on_member_added(member),
            Event::MemberRemoved { member } => self.on_member_removed(member),
            Event::MajorityMessageReceived { .. } => {
                trace!("Ignoring majority-vote message under BFT");
                vec![]
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.view_change.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

impl ConsensusProtocol for BftState {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Bft
    }

    fn committed(&self) -> &CommittedState {
        &self.committed
    }

    fn roster(&self) -> &Roster {
        &self.roster
    }

    fn leader(&self) -> Option<&MemberId> {
        Some(self.current_leader())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_test_helpers::{
        bft_messages, broadcasts, member_ids, notifications, result_for, roster, timers_set,
    };
    use serde_json::json;
    use tracing_test::traced_test;

    const REQUEST: RequestId = RequestId(7);

    fn config() -> ProtocolConfig {
        ProtocolConfig::new(Mechanism::Bft).with_timeout(Duration::from_millis(500))
    }

    fn propose(state: &mut BftState, key: &str, value: Value) -> Vec<Action> {
        state.handle(Event::ProposeRequested {
            request: REQUEST,
            key: key.to_string(),
            value,
        })
    }

    fn received(message: BftMessage) -> Event {
        Event::BftMessageReceived { message }
    }

    /// Leader's pre-prepare as produced by a real leader.
    fn leader_pre_prepare(key: &str, value: Value) -> BftMessage {
        let mut leader = BftState::new(roster(0, 4), config());
        let actions = propose(&mut leader, key, value);
        bft_messages(&actions)[0].clone()
    }

    fn vote_from(kind: BftMessageKind, pre_prepare: &BftMessage, sender: &MemberId) -> BftMessage {
        let id = pre_prepare.proposal_id.clone().expect("proposal id");
        let (view, seq, digest) = (pre_prepare.view, pre_prepare.sequence_number, pre_prepare.digest);
        match kind {
            BftMessageKind::Prepare => BftMessage::prepare(view, seq, digest, sender.clone(), id),
            _ => BftMessage::commit(view, seq, digest, sender.clone(), id),
        }
    }

    fn committed(actions: &[Action]) -> bool {
        notifications(actions)
            .iter()
            .any(|n| matches!(n, Notification::StateChanged { .. }))
    }

    #[traced_test]
    #[test]
    fn test_single_member_commits_immediately() {
        let mut state = BftState::new(roster(0, 1), config());
        let actions = propose(&mut state, "k", json!(1));

        assert!(broadcasts(&actions).is_empty());
        let result = result_for(&actions, REQUEST).expect("settled");
        assert!(result.accepted);
        assert_eq!(result.votes, VoteTally { for_votes: 1, against: 0, total: 1 });
        assert_eq!(state.get("k"), Some(&json!(1)));
    }

    #[traced_test]
    #[test]
    fn test_follower_refuses_proposal_with_leader() {
        let members = member_ids(4);
        let mut state = BftState::new(roster(2, 4), config());
        let actions = propose(&mut state, "k", json!(1));

        let result = result_for(&actions, REQUEST).expect("settled");
        assert!(!result.accepted);
        assert_eq!(result.proposal_id, None);
        assert_eq!(
            result.error,
            Some(ProposalError::NotLeader {
                leader: members[0].clone()
            })
        );
    }

    #[traced_test]
    #[test]
    fn test_leader_commits_after_two_phases() {
        let members = member_ids(4);
        let mut leader = BftState::new(roster(0, 4), config());
        let actions = propose(&mut leader, "mode", json!("safe"));

        let pre_prepare = bft_messages(&actions)[0].clone();
        assert_eq!(pre_prepare.kind, BftMessageKind::PrePrepare);
        assert_eq!(pre_prepare.sequence_number, 1);
        assert_eq!(broadcasts(&actions)[0].0.len(), 3);

        // Own pre-prepare + 1 prepare: 2 < 3.
        let actions = leader.handle(received(vote_from(BftMessageKind::Prepare, &pre_prepare, &members[1])));
        assert!(bft_messages(&actions).is_empty());

        let actions = leader.handle(received(vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2])));
        let msgs = bft_messages(&actions);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, BftMessageKind::Commit);

        leader.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, &members[1])));
        let actions = leader.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, &members[2])));

        assert!(committed(&actions));
        let result = result_for(&actions, REQUEST).expect("settled");
        assert!(result.accepted);
        assert_eq!(result.votes.for_votes, 3);
        assert_eq!(leader.get("mode"), Some(&json!("safe")));
    }

    #[traced_test]
    #[test]
    fn test_follower_prepares_on_valid_pre_prepare() {
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!({"a": 1}));

        let actions = follower.handle(received(pre_prepare.clone()));
        let msgs = bft_messages(&actions);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, BftMessageKind::Prepare);
        assert_eq!(msgs[0].digest, pre_prepare.digest);
        assert_eq!(timers_set(&actions).len(), 1);
        // Leader's pre-prepare plus own prepare.
        let id = pre_prepare.proposal_id.expect("id");
        assert_eq!(follower.proposal(&id).map(|p| p.prepare_voters.len()), Some(2));
    }

    #[traced_test]
    #[test]
    fn test_tampered_pre_prepare_rejected() {
        let mut follower = BftState::new(roster(1, 4), config());
        let mut pre_prepare = leader_pre_prepare("k", json!("honest"));
        pre_prepare.value = Some(json!("tampered"));

        assert!(follower.handle(received(pre_prepare.clone())).is_empty());
        assert!(follower
            .proposal(pre_prepare.proposal_id.as_ref().expect("id"))
            .is_none());
    }

    #[traced_test]
    #[test]
    fn test_pre_prepare_from_non_leader_rejected() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        let mut pre_prepare = leader_pre_prepare("k", json!(1));
        pre_prepare.sender_id = members[2].clone();

        assert!(follower.handle(received(pre_prepare)).is_empty());
    }

    #[traced_test]
    #[test]
    fn test_prepare_with_wrong_digest_ignored() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!(1));
        follower.handle(received(pre_prepare.clone()));

        let mut forged = vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2]);
        forged.digest = Digest::of_proposal("k", &json!(2));
        assert!(follower.handle(received(forged)).is_empty());

        let id = pre_prepare.proposal_id.expect("id");
        assert_eq!(follower.proposal(&id).map(|p| p.phase), Some(Phase::PrePrepared));
    }

    #[traced_test]
    #[test]
    fn test_early_votes_replayed_after_pre_prepare() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!(1));

        assert!(follower
            .handle(received(vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2])))
            .is_empty());
        follower.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, &members[2])));
        follower.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, &members[3])));
        assert_eq!(follower.buffered_messages(), 3);

        // Pre-prepare brings leader + self + buffered prepare = 3: prepared,
        // then own commit + two buffered commits = 3: committed.
        let actions = follower.handle(received(pre_prepare));
        assert!(committed(&actions));
        assert_eq!(follower.get("k"), Some(&json!(1)));
        assert_eq!(follower.buffered_messages(), 0);
        // Followers never settle callers.
        assert!(result_for(&actions, REQUEST).is_none());
    }

    #[traced_test]
    #[test]
    fn test_commits_wait_for_prepared() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!(1));
        follower.handle(received(pre_prepare.clone()));

        for sender in &members[2..4] {
            let actions = follower.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, sender)));
            assert!(!committed(&actions));
        }
        let id = pre_prepare.proposal_id.clone().expect("id");
        assert_eq!(follower.proposal(&id).map(|p| p.phase), Some(Phase::PrePrepared));

        let actions = follower.handle(received(vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2])));
        assert!(committed(&actions));
    }

    #[traced_test]
    #[test]
    fn test_repeated_votes_from_one_sender_do_not_advance() {
        let members = member_ids(4);
        let mut leader = BftState::new(roster(0, 4), config());
        let actions = propose(&mut leader, "k", json!(1));
        let pre_prepare = bft_messages(&actions)[0].clone();
        let id = pre_prepare.proposal_id.clone().expect("id");

        let prepare = vote_from(BftMessageKind::Prepare, &pre_prepare, &members[1]);
        leader.handle(received(prepare.clone()));
        assert!(leader.handle(received(prepare)).is_empty());
        assert_eq!(leader.proposal(&id).map(|p| p.phase), Some(Phase::PrePrepared));

        leader.handle(received(vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2])));
        assert_eq!(leader.proposal(&id).map(|p| p.phase), Some(Phase::Prepared));

        // Own commit plus node-1 twice is still two distinct voters.
        let commit = vote_from(BftMessageKind::Commit, &pre_prepare, &members[1]);
        leader.handle(received(commit.clone()));
        let actions = leader.handle(received(commit));
        assert!(!committed(&actions));
        assert!(result_for(&actions, REQUEST).is_none());
        assert_eq!(leader.proposal(&id).map(|p| p.phase), Some(Phase::Prepared));
        assert_eq!(leader.get("k"), None);

        let actions = leader.handle(received(vote_from(BftMessageKind::Commit, &pre_prepare, &members[2])));
        assert!(committed(&actions));
    }

    /// Deliver every broadcast and internal event until the cluster is quiet.
    fn settle(nodes: &mut [BftState], from: usize, actions: Vec<Action>) -> Vec<Action> {
        let members = member_ids(nodes.len());
        let mut settled = vec![];
        let mut queue: std::collections::VecDeque<(usize, Action)> =
            actions.into_iter().map(|a| (from, a)).collect();
        while let Some((at, action)) = queue.pop_front() {
            match action {
                Action::Broadcast {
                    recipients,
                    message: ProtocolMessage::Bft(message),
                } => {
                    for to in recipients.iter().filter_map(|r| members.iter().position(|m| m == r)) {
                        let produced = nodes[to].handle(received(message.clone()));
                        queue.extend(produced.into_iter().map(|a| (to, a)));
                    }
                }
                Action::EnqueueInternal { event } => {
                    let produced = nodes[at].handle(event);
                    queue.extend(produced.into_iter().map(|a| (at, a)));
                }
                other => settled.push(other),
            }
        }
        settled
    }

    #[traced_test]
    #[test]
    fn test_last_committed_value_wins_everywhere() {
        let mut nodes: Vec<BftState> = (0..4).map(|i| BftState::new(roster(i, 4), config())).collect();

        let first = propose(&mut nodes[0], "k", json!("A"));
        let outcome = settle(&mut nodes, 0, first);
        assert!(result_for(&outcome, REQUEST).is_some_and(|r| r.accepted));

        let second = propose(&mut nodes[0], "k", json!("B"));
        let outcome = settle(&mut nodes, 0, second);
        assert!(result_for(&outcome, REQUEST).is_some_and(|r| r.accepted));

        for node in &nodes {
            assert_eq!(node.get("k"), Some(&json!("B")));
            assert_eq!(node.last_sequence(), 2);
        }
    }

    #[traced_test]
    #[test]
    fn test_reused_sequence_slot_rejected() {
        let mut follower = BftState::new(roster(1, 4), config());
        let first = leader_pre_prepare("k", json!(1));
        follower.handle(received(first.clone()));

        // Same (view, sequence), different proposal.
        let leader = member_ids(4)[0].clone();
        let other_id = concord_types::new_proposal_id(&leader, 99, 42);
        let conflicting = BftMessage::pre_prepare(
            first.view,
            first.sequence_number,
            Digest::of_proposal("k", &json!(2)),
            leader,
            other_id.clone(),
            "k".to_string(),
            json!(2),
        );
        assert!(follower.handle(received(conflicting)).is_empty());
        assert!(follower.proposal(&other_id).is_none());
    }

    #[traced_test]
    #[test]
    fn test_leader_timeout_settles_caller() {
        let mut leader = BftState::new(roster(0, 4), config());
        let actions = propose(&mut leader, "k", json!(1));
        let id = match &bft_messages(&actions)[0].proposal_id {
            Some(id) => id.clone(),
            None => panic!("pre-prepare without id"),
        };

        let actions = leader.handle(Event::ProposalTimeout { proposal_id: id });
        let result = result_for(&actions, REQUEST).expect("settled");
        assert!(!result.accepted);
        assert_eq!(result.error, Some(ProposalError::Timeout { timeout_ms: 500 }));
        // The leader does not suspect itself.
        assert!(!leader.is_suspect());
    }

    #[traced_test]
    #[test]
    fn test_follower_timeout_starts_view_change() {
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!(1));
        follower.handle(received(pre_prepare.clone()));

        let id = pre_prepare.proposal_id.expect("id");
        let actions = follower.handle(Event::ProposalTimeout {
            proposal_id: id.clone(),
        });
        assert!(follower.is_suspect());
        assert!(timers_set(&actions)
            .iter()
            .any(|(timer, _)| **timer == TimerId::ViewChange));
        assert_eq!(follower.proposal(&id).map(|p| p.phase), Some(Phase::TimedOut));

        let actions = follower.handle(Event::ViewChangeTimer);
        let msgs = bft_messages(&actions);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, BftMessageKind::ViewChange);
        assert_eq!(msgs[0].view, 1);
    }

    #[traced_test]
    #[test]
    fn test_view_change_supersedes_leader_proposals() {
        let members = member_ids(4);
        let mut leader = BftState::new(roster(0, 4), config());
        propose(&mut leader, "k", json!(1));

        let mut actions = vec![];
        for voter in &members[1..4] {
            actions.extend(leader.handle(received(BftMessage::view_change(1, voter.clone()))));
        }
        let completed = actions.iter().find_map(|a| match a {
            Action::EnqueueInternal { event } => Some(event.clone()),
            _ => None,
        });
        let Some(event) = completed else {
            panic!("view change did not complete");
        };
        let actions = leader.handle(event);

        assert_eq!(leader.view(), 1);
        assert_eq!(leader.leader(), Some(&members[1]));
        let result = result_for(&actions, REQUEST).expect("settled");
        assert_eq!(
            result.error,
            Some(ProposalError::NotLeader {
                leader: members[1].clone()
            })
        );
    }

    #[traced_test]
    #[test]
    fn test_unbacked_new_view_keeps_leader_proposal() {
        let members = member_ids(4);
        let mut leader = BftState::new(roster(0, 4), config());
        let actions = propose(&mut leader, "k", json!(1));
        let id = bft_messages(&actions)[0].proposal_id.clone().expect("id");

        // node-3 leads view 3 but nobody voted for it.
        let actions = leader.handle(received(BftMessage::new_view(3, members[3].clone())));
        assert!(actions.is_empty());
        assert_eq!(leader.view(), 0);
        assert!(leader.is_leader());
        assert_eq!(leader.proposal(&id).map(|p| p.phase), Some(Phase::PrePrepared));
    }

    #[traced_test]
    #[test]
    fn test_sequence_continues_across_views() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        follower.handle(received(leader_pre_prepare("k", json!(1))));
        assert_eq!(follower.last_sequence(), 1);

        follower.handle(received(BftMessage::view_change(1, members[2].clone())));
        let actions = follower.handle(received(BftMessage::view_change(1, members[3].clone())));
        for action in actions {
            if let Action::EnqueueInternal { event } = action {
                follower.handle(event);
            }
        }
        assert!(follower.is_leader());

        let actions = propose(&mut follower, "k", json!(2));
        assert_eq!(bft_messages(&actions)[0].sequence_number, 2);
    }

    #[traced_test]
    #[test]
    fn test_phase_message_from_other_view_ignored() {
        let members = member_ids(4);
        let mut follower = BftState::new(roster(1, 4), config());
        let pre_prepare = leader_pre_prepare("k", json!(1));
        follower.handle(received(pre_prepare.clone()));

        let mut stale = vote_from(BftMessageKind::Prepare, &pre_prepare, &members[2]);
        stale.view = 3;
        assert!(follower.handle(received(stale)).is_empty());
        assert_eq!(follower.buffered_messages(), 0);
    }
}
