//! Cluster roster and deterministic leader selection.

use crate::{bft_quorum_size, max_faulty, MemberId};
use std::collections::BTreeSet;

/// The set of members taking part in agreement, as seen by one node.
///
/// The local member is always present. Membership is kept sorted so every
/// node derives the same leader for a view from the same roster.
#[derive(Debug, Clone)]
pub struct Roster {
    local: MemberId,
    members: BTreeSet<MemberId>,
}

impl Roster {
    /// Create a roster containing only the local member.
    pub fn new(local: MemberId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(local.clone());
        Self { local, members }
    }

    /// Create a roster from a list of members. The local member is added if missing.
    pub fn with_members(local: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        let mut roster = Self::new(local);
        for member in members {
            roster.insert(member);
        }
        roster
    }

    /// Get the local member's ID.
    pub fn local(&self) -> &MemberId {
        &self.local
    }

    /// Add a member. Returns false if it was already present.
    pub fn insert(&mut self, member: MemberId) -> bool {
        self.members.insert(member)
    }

    /// Remove a member. The local member cannot be removed.
    ///
    /// Returns true if the member was present and removed.
    pub fn remove(&mut self, member: &MemberId) -> bool {
        if *member == self.local {
            return false;
        }
        self.members.remove(member)
    }

    /// Check whether a member is part of the roster.
    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    /// Number of members, including the local one.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false: the local member is always present.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// All members in sorted order.
    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.members.iter()
    }

    /// All members except the local one, in sorted order.
    pub fn peers(&self) -> Vec<MemberId> {
        self.members
            .iter()
            .filter(|m| **m != self.local)
            .cloned()
            .collect()
    }

    /// Whether the local member is alone.
    pub fn is_solo(&self) -> bool {
        self.members.len() == 1
    }

    /// Leader for a view: `sorted_members[view % n]`.
    pub fn leader_for_view(&self, view: u64) -> &MemberId {
        let index = (view % self.members.len() as u64) as usize;
        self.members
            .iter()
            .nth(index)
            .unwrap_or(&self.local)
    }

    /// Check whether the local member leads the given view.
    pub fn is_leader_for_view(&self, view: u64) -> bool {
        *self.leader_for_view(view) == self.local
    }

    /// Faulty members tolerated by the current roster size.
    pub fn max_faulty(&self) -> usize {
        max_faulty(self.len())
    }

    /// BFT phase quorum for the current roster size.
    pub fn bft_quorum_size(&self) -> usize {
        bft_quorum_size(self.len())
    }
}
