//! Local voting policy.

use concord_types::Value;

/// Decides how this member votes on proposals from other members.
pub trait VotePolicy: Send + Sync {
    /// Return true to vote for the update, false to vote against it.
    fn approve(&self, key: &str, value: &Value) -> bool;
}

/// Votes for everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl VotePolicy for AcceptAll {
    fn approve(&self, _key: &str, _value: &Value) -> bool {
        true
    }
}

impl<F> VotePolicy for F
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    fn approve(&self, key: &str, value: &Value) -> bool {
        self(key, value)
    }
}
