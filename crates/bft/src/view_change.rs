//! View change component for liveness.
//!
//! Handles stalled-leader detection and coordinated view increments.
//!
//! A follower whose tracked proposal times out becomes a *suspect* and arms
//! the view-change timer. When it fires the follower votes for `view + 1` and
//! keeps re-sending that vote on every firing until the view moves. Votes are
//! collected per target view:
//!
//! - `f + 1` votes for a view: at least one honest member is stuck, so this
//!   node joins with its own vote.
//! - `2f + 1` votes for a view: the view is adopted. The member that leads the
//!   new view announces it with `newView`.

use concord_core::{Action, Event, Notification, TimerId};
use concord_messages::{BftMessage, ProtocolMessage};
use concord_types::{MemberId, Roster};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// View change state for one BFT node.
#[derive(Debug)]
pub struct ViewChangeState {
    /// How long a suspect waits between view-change votes.
    timeout: Duration,

    /// Current view number.
    current_view: u64,

    /// Whether a tracked proposal stalled in the current view.
    suspect: bool,

    /// Collected view-change votes: target view -> voters.
    votes: BTreeMap<u64, BTreeSet<MemberId>>,

    /// Current time.
    now: Duration,
}

impl ViewChangeState {
    /// Create a new view change state starting at view 0.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            current_view: 0,
            suspect: false,
            votes: BTreeMap::new(),
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Public API
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set the current time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Get the current view.
    pub fn current_view(&self) -> u64 {
        self.current_view
    }

    /// Whether this node suspects the current leader.
    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    /// Voters recorded for a target view.
    pub fn votes_for(&self, view: u64) -> usize {
        self.votes.get(&view).map_or(0, BTreeSet::len)
    }

    /// Timer to arm on (re)start, if suspicion survived a stop.
    pub fn on_start(&self) -> Vec<Action> {
        if !self.suspect {
            return vec![];
        }
        vec![Action::SetTimer {
            id: TimerId::ViewChange,
            duration: self.timeout,
        }]
    }

    /// A tracked proposal stalled: start suspecting the leader.
    pub fn suspect(&mut self) -> Vec<Action> {
        if self.suspect {
            return vec![];
        }
        self.suspect = true;

        info!(
            view = self.current_view,
            timeout = ?self.timeout,
            "Suspecting leader, view change timer armed"
        );

        vec![Action::SetTimer {
            id: TimerId::ViewChange,
            duration: self.timeout,
        }]
    }

    /// Progress was made (a proposal committed): stop suspecting.
    pub fn on_progress(&mut self) -> Vec<Action> {
        if !self.suspect {
            return vec![];
        }
        self.suspect = false;
        debug!(view = self.current_view, "Progress made, leader no longer suspected");
        vec![Action::CancelTimer {
            id: TimerId::ViewChange,
        }]
    }

    /// Handle view change timer event.
    ///
    /// While suspecting, (re)broadcasts this node's vote for the next view and
    /// reschedules the timer.
    pub fn on_view_change_timer(&mut self, roster: &Roster) -> Vec<Action> {
        if !self.suspect {
            debug!(
                view = self.current_view,
                "View change timer fired but leader is not suspected"
            );
            return vec![];
        }

        let target = self.current_view + 1;
        info!(
            current_view = self.current_view,
            target_view = target,
            "View change timer fired, voting for next view"
        );

        let mut actions = vec![Action::SetTimer {
            id: TimerId::ViewChange,
            duration: self.timeout,
        }];
        actions.extend(self.cast_vote(target, roster));
        actions
    }

    /// Add a view change vote from another member.
    pub fn on_view_change_vote(
        &mut self,
        target: u64,
        voter: MemberId,
        roster: &Roster,
    ) -> Vec<Action> {
        // Ignore votes for views we've already passed
        if target <= self.current_view {
            debug!(
                target_view = target,
                current_view = self.current_view,
                voter = %voter,
                "Ignoring view change vote for old/current view"
            );
            return vec![];
        }

        if !roster.contains(&voter) {
            warn!(voter = %voter, "View change vote from unknown member");
            return vec![];
        }

        let voters = self.votes.entry(target).or_default();
        if !voters.insert(voter.clone()) {
            debug!(voter = %voter, target_view = target, "Ignoring duplicate view change vote");
            return vec![];
        }

        let count = self.count_votes(target, roster);
        debug!(
            target_view = target,
            voter = %voter,
            votes = count,
            quorum = roster.bft_quorum_size(),
            "View change vote added"
        );

        if count >= roster.bft_quorum_size() {
            return self.apply_view_change(target, roster);
        }

        // f+1 members are stuck: at least one of them is honest, so join.
        let local_voted = self
            .votes
            .get(&target)
            .is_some_and(|v| v.contains(roster.local()));
        if count > roster.max_faulty() && !local_voted {
            info!(
                target_view = target,
                votes = count,
                "Joining view change backed by f+1 members"
            );
            return self.cast_vote(target, roster);
        }

        vec![]
    }

    /// Handle a new leader's `newView` announcement.
    ///
    /// Adopted only when this node has already seen f+1 votes for that view,
    /// so a single member cannot force a view jump.
    pub fn on_new_view(&mut self, view: u64, sender: &MemberId, roster: &Roster) -> Vec<Action> {
        if view <= self.current_view {
            debug!(
                view,
                current_view = self.current_view,
                "Ignoring stale new-view"
            );
            return vec![];
        }
        if roster.leader_for_view(view) != sender {
            warn!(
                view,
                sender = %sender,
                expected = %roster.leader_for_view(view),
                "New-view from a member that does not lead that view"
            );
            return vec![];
        }
        let backing = self.count_votes(view, roster);
        if backing <= roster.max_faulty() {
            warn!(
                view,
                sender = %sender,
                votes = backing,
                "New-view without f+1 recorded view-change votes"
            );
            return vec![];
        }
        self.apply_view_change(view, roster)
    }

    /// Record and broadcast this node's vote for `target`.
    fn cast_vote(&mut self, target: u64, roster: &Roster) -> Vec<Action> {
        let local = roster.local().clone();
        self.votes.entry(target).or_default().insert(local.clone());

        let mut actions = vec![];
        let recipients = roster.peers();
        if !recipients.is_empty() {
            debug!(target_view = target, "Broadcasting view change vote");
            actions.push(Action::Broadcast {
                recipients,
                message: ProtocolMessage::Bft(BftMessage::view_change(target, local)),
            });
        }

        if self.count_votes(target, roster) >= roster.bft_quorum_size() {
            actions.extend(self.apply_view_change(target, roster));
        }
        actions
    }

    fn count_votes(&self, target: u64, roster: &Roster) -> usize {
        self.votes
            .get(&target)
            .map_or(0, |voters| voters.iter().filter(|v| roster.contains(v)).count())
    }

    /// Move to `new_view` after quorum or a valid new-view.
    fn apply_view_change(&mut self, new_view: u64, roster: &Roster) -> Vec<Action> {
        if new_view <= self.current_view {
            debug!(
                new_view,
                current_view = self.current_view,
                "View change already applied"
            );
            return vec![];
        }

        let old_view = self.current_view;
        let old_leader = roster.leader_for_view(old_view).clone();
        let new_leader = roster.leader_for_view(new_view).clone();

        self.current_view = new_view;
        self.suspect = false;
        self.cleanup_old_votes();

        info!(
            old_view,
            new_view,
            leader = %new_leader,
            "Applied coordinated view change"
        );

        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::ViewChange,
            },
            Action::notify(Notification::LeaderLost {
                leader: old_leader,
                view: old_view,
            }),
            Action::notify(Notification::LeaderElected {
                leader: new_leader.clone(),
                view: new_view,
            }),
        ];

        if new_leader == *roster.local() {
            let recipients = roster.peers();
            if !recipients.is_empty() {
                actions.push(Action::Broadcast {
                    recipients,
                    message: ProtocolMessage::Bft(BftMessage::new_view(new_view, new_leader)),
                });
            }
        }

        // Emit internal event for BFT state to react to
        actions.push(Action::EnqueueInternal {
            event: Event::ViewChangeCompleted { new_view },
        });

        actions
    }

    /// Drop votes for views we are already at or past.
    fn cleanup_old_votes(&mut self) {
        let current = self.current_view;
        self.votes.retain(|view, _| *view > current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_test_helpers::{bft_messages, member_ids, notifications, roster};
    use concord_messages::BftMessageKind;
    use tracing_test::traced_test;

    fn make_test_state(local: usize) -> (ViewChangeState, Roster) {
        (ViewChangeState::new(Duration::from_secs(5)), roster(local, 4))
    }

    fn completed_view(actions: &[Action]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            Action::EnqueueInternal {
                event: Event::ViewChangeCompleted { new_view },
            } => Some(*new_view),
            _ => None,
        })
    }

    #[traced_test]
    #[test]
    fn test_timer_without_suspicion_is_noop() {
        let (mut state, roster) = make_test_state(1);
        assert!(state.on_view_change_timer(&roster).is_empty());
    }

    #[traced_test]
    #[test]
    fn test_suspect_arms_timer_once() {
        let (mut state, _) = make_test_state(1);
        let actions = state.suspect();
        assert!(matches!(
            actions[..],
            [Action::SetTimer {
                id: TimerId::ViewChange,
                ..
            }]
        ));
        assert!(state.suspect().is_empty());
        assert!(state.is_suspect());
    }

    #[traced_test]
    #[test]
    fn test_timer_broadcasts_vote_for_next_view() {
        let (mut state, roster) = make_test_state(1);
        state.suspect();

        let actions = state.on_view_change_timer(&roster);
        let msgs = bft_messages(&actions);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, BftMessageKind::ViewChange);
        assert_eq!(msgs[0].view, 1);
        assert_eq!(state.votes_for(1), 1);

        // Re-firing re-sends without double counting.
        let actions = state.on_view_change_timer(&roster);
        assert_eq!(bft_messages(&actions).len(), 1);
        assert_eq!(state.votes_for(1), 1);
    }

    #[traced_test]
    #[test]
    fn test_joins_after_f_plus_one() {
        let members = member_ids(4);
        let (mut state, roster) = make_test_state(3);

        // f = 1: one vote is not enough to join.
        assert!(state
            .on_view_change_vote(1, members[1].clone(), &roster)
            .is_empty());

        let actions = state.on_view_change_vote(1, members[2].clone(), &roster);
        let msgs = bft_messages(&actions);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, BftMessageKind::ViewChange);

        // Own vote makes three: quorum for n = 4.
        assert_eq!(completed_view(&actions), Some(1));
        assert_eq!(state.current_view(), 1);
    }

    #[traced_test]
    #[test]
    fn test_new_leader_announces_view() {
        let members = member_ids(4);
        let (mut state, roster) = make_test_state(1);
        state.suspect();
        state.on_view_change_timer(&roster);
        state.on_view_change_vote(1, members[2].clone(), &roster);
        let actions = state.on_view_change_vote(1, members[3].clone(), &roster);

        assert_eq!(completed_view(&actions), Some(1));
        assert!(!state.is_suspect());
        assert!(bft_messages(&actions)
            .iter()
            .any(|m| m.kind == BftMessageKind::NewView && m.view == 1));
        assert!(notifications(&actions).iter().any(|n| matches!(
            n,
            Notification::LeaderElected { leader, view: 1 } if *leader == members[1]
        )));
    }

    #[traced_test]
    #[test]
    fn test_old_and_unknown_votes_ignored() {
        let members = member_ids(4);
        let (mut state, roster) = make_test_state(0);

        assert!(state
            .on_view_change_vote(0, members[1].clone(), &roster)
            .is_empty());
        assert!(state
            .on_view_change_vote(1, MemberId::new("outsider"), &roster)
            .is_empty());
        assert_eq!(state.votes_for(1), 0);
    }

    #[traced_test]
    #[test]
    fn test_new_view_only_from_its_leader() {
        let members = member_ids(4);
        let (mut state, roster) = make_test_state(0);
        // f + 1 = 2 votes recorded, one short of quorum.
        let voters = state.votes.entry(1).or_default();
        voters.insert(members[1].clone());
        voters.insert(members[2].clone());
        assert_eq!(state.votes_for(1), 2);
        assert_eq!(state.current_view(), 0);

        assert!(state.on_new_view(1, &members[2], &roster).is_empty());
        assert_eq!(state.current_view(), 0);

        let actions = state.on_new_view(1, &members[1], &roster);
        assert_eq!(completed_view(&actions), Some(1));

        // Duplicate is a no-op.
        assert!(state.on_new_view(1, &members[1], &roster).is_empty());
    }

    #[traced_test]
    #[test]
    fn test_new_view_without_votes_refused() {
        let members = member_ids(4);
        let (mut state, roster) = make_test_state(0);

        // The rightful leader of view 3, but nobody voted for it.
        assert!(state.on_new_view(3, &members[3], &roster).is_empty());
        assert_eq!(state.current_view(), 0);
        assert!(logs_contain("without f+1 recorded view-change votes"));

        // One vote is still within f.
        state.on_view_change_vote(3, members[3].clone(), &roster);
        assert!(state.on_new_view(3, &members[3], &roster).is_empty());
        assert_eq!(state.current_view(), 0);
    }
}
