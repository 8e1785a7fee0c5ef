//! Committed key/value state.

use crate::Notification;
use concord_types::Value;
use std::collections::BTreeMap;

/// Values agreed by the cluster, as applied on this node.
///
/// Only protocols mutate it, and only after quorum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommittedState {
    entries: BTreeMap<String, Value>,
}

impl CommittedState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed value, returning the matching `StateChanged` notification.
    pub fn apply(&mut self, key: String, value: Value) -> Notification {
        let previous = self.entries.insert(key.clone(), value.clone());
        Notification::StateChanged {
            key,
            value,
            previous,
        }
    }

    /// Current value for a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// All committed entries.
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_committed_wins() {
        let mut state = CommittedState::new();
        state.apply("k".to_string(), json!("A"));
        let notification = state.apply("k".to_string(), json!("B"));

        assert_eq!(state.get("k"), Some(&json!("B")));
        assert_eq!(
            notification,
            Notification::StateChanged {
                key: "k".to_string(),
                value: json!("B"),
                previous: Some(json!("A")),
            }
        );
    }
}
