//! Sender-deduplicated vote collection.

use concord_types::{MemberId, Roster};
use std::collections::BTreeSet;

/// Members that sent a given phase message for one proposal.
///
/// Each member counts once no matter how often its message is delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteSet {
    voters: BTreeSet<MemberId>,
}

impl VoteSet {
    /// Create an empty vote set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote. Returns false if this member had already voted.
    pub fn insert(&mut self, voter: MemberId) -> bool {
        self.voters.insert(voter)
    }

    /// Check whether a member has voted.
    pub fn contains(&self, voter: &MemberId) -> bool {
        self.voters.contains(voter)
    }

    /// Number of distinct voters, members or not.
    pub fn len(&self) -> usize {
        self.voters.len()
    }

    /// Check if no votes were recorded.
    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Votes from members of `roster`. Members removed since they voted no
    /// longer count.
    pub fn count_in(&self, roster: &Roster) -> usize {
        self.voters.iter().filter(|v| roster.contains(v)).count()
    }

    /// Iterate over voters in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &MemberId> {
        self.voters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_test_helpers::{member_ids, roster};

    #[test]
    fn test_duplicate_vote_counts_once() {
        let members = member_ids(4);
        let mut votes = VoteSet::new();
        assert!(votes.insert(members[1].clone()));
        assert!(!votes.insert(members[1].clone()));
        assert_eq!(votes.len(), 1);
    }

    #[test]
    fn test_count_ignores_non_members() {
        let members = member_ids(4);
        let mut votes = VoteSet::new();
        votes.insert(members[0].clone());
        votes.insert(members[1].clone());
        votes.insert(MemberId::new("outsider"));

        assert_eq!(votes.len(), 3);
        assert_eq!(votes.count_in(&roster(0, 4)), 2);
    }
}
