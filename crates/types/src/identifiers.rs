//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cluster member identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Create a member ID from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Globally unique proposal identifier.
///
/// Minted locally without coordination: the issuing member's ID makes it
/// unique across the cluster, the counter makes it unique within the member.
/// Ordering is by issue time, then member, then counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalId {
    /// Clock reading (milliseconds) when the ID was issued.
    pub issued_at_ms: u64,
    /// Member that issued the ID.
    pub member: MemberId,
    /// Per-member monotonically increasing counter.
    pub counter: u64,
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.member, self.issued_at_ms, self.counter)
    }
}

/// Errors that can occur when parsing a proposal ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalIdError {
    /// The string does not have the `<member>-<ms>-<counter>` shape.
    #[error("malformed proposal id: {0}")]
    Malformed(String),
}

impl FromStr for ProposalId {
    type Err = ProposalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Member IDs may themselves contain dashes, so split from the right.
        let mut parts = s.rsplitn(3, '-');
        let counter = parts.next();
        let issued_at = parts.next();
        let member = parts.next();

        match (member, issued_at, counter) {
            (Some(member), Some(issued_at), Some(counter)) if !member.is_empty() => {
                let issued_at_ms = issued_at
                    .parse()
                    .map_err(|_| ProposalIdError::Malformed(s.to_string()))?;
                let counter = counter
                    .parse()
                    .map_err(|_| ProposalIdError::Malformed(s.to_string()))?;
                Ok(Self {
                    issued_at_ms,
                    member: MemberId::new(member),
                    counter,
                })
            }
            _ => Err(ProposalIdError::Malformed(s.to_string())),
        }
    }
}

impl Serialize for ProposalId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProposalId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Mints proposal IDs for one member.
#[derive(Debug, Clone)]
pub struct ProposalIdGenerator {
    member: MemberId,
    counter: u64,
}

impl ProposalIdGenerator {
    /// Create a generator for the given member.
    pub fn new(member: MemberId) -> Self {
        Self { member, counter: 0 }
    }

    /// Mint the next ID, stamped with the given clock reading.
    pub fn next(&mut self, issued_at_ms: u64) -> ProposalId {
        self.counter += 1;
        ProposalId {
            issued_at_ms,
            member: self.member.clone(),
            counter: self.counter,
        }
    }
}

/// Convenience wrapper around [`ProposalIdGenerator`] for one-off IDs.
pub fn new_proposal_id(member: &MemberId, issued_at_ms: u64, counter: u64) -> ProposalId {
    ProposalId {
        issued_at_ms,
        member: member.clone(),
        counter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let mut ids = ProposalIdGenerator::new(MemberId::new("node-a"));
        let first = ids.next(10);
        let second = ids.next(10);
        let third = ids.next(11);

        assert!(first < second);
        assert!(second < third);
        assert_ne!(first, second);
    }

    #[test]
    fn test_ids_from_different_members_differ() {
        let mut a = ProposalIdGenerator::new(MemberId::new("a"));
        let mut b = ProposalIdGenerator::new(MemberId::new("b"));
        assert_ne!(a.next(5), b.next(5));
    }

    #[test]
    fn test_display_parse_with_dashed_member() {
        let id = new_proposal_id(&MemberId::new("node-1"), 1234, 7);
        let text = id.to_string();
        assert_eq!(text, "node-1-1234-7");
        assert_eq!(text.parse::<ProposalId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nope".parse::<ProposalId>().is_err());
        assert!("a-b-c".parse::<ProposalId>().is_err());
        assert!("-1-2".parse::<ProposalId>().is_err());
    }
}
