//! Protocol configuration.

use crate::ConsensusError;
use concord_types::DEFAULT_QUORUM_FRACTION;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Agreement mechanism selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mechanism {
    /// Single-round yes/no voting, no leader.
    #[default]
    MajorityVote,
    /// Three-phase Byzantine-fault-tolerant commit with view changes.
    Bft,
    /// Leader-based log replication. Recognised but not supported.
    LogReplication,
}

impl Mechanism {
    /// Whether this crate family implements the mechanism.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Mechanism::LogReplication)
    }
}

/// Configuration for a protocol instance.
///
/// Immutable once the instance is built; unset fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolConfig {
    /// Which protocol to run.
    pub mechanism: Mechanism,

    /// Fraction of the cluster that affirmative votes must exceed under
    /// majority voting. `None` means a simple majority. BFT always uses `2f+1`.
    pub quorum: Option<f64>,

    /// How long a pending proposal waits before giving up.
    pub timeout_ms: u64,

    /// How long a BFT follower waits after a stalled proposal before voting
    /// for a view change. Defaults to `timeout_ms`.
    pub view_change_timeout_ms: Option<u64>,

    /// Upper bound on BFT phase messages held while their pre-prepare has
    /// not arrived yet.
    pub max_buffered_messages: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::default(),
            quorum: None,
            timeout_ms: 5_000,
            view_change_timeout_ms: None,
            max_buffered_messages: 1024,
        }
    }
}

impl ProtocolConfig {
    /// Create a config for the given mechanism with default settings.
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            ..Default::default()
        }
    }

    /// Override the majority-vote quorum fraction.
    pub fn with_quorum(mut self, fraction: f64) -> Self {
        self.quorum = Some(fraction);
        self
    }

    /// Set the proposal timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the BFT view-change timeout.
    pub fn with_view_change_timeout(mut self, timeout: Duration) -> Self {
        self.view_change_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the early-message buffer bound.
    pub fn with_max_buffered_messages(mut self, max: usize) -> Self {
        self.max_buffered_messages = max;
        self
    }

    /// Effective majority-vote fraction.
    pub fn quorum_fraction(&self) -> f64 {
        self.quorum.unwrap_or(DEFAULT_QUORUM_FRACTION)
    }

    /// Proposal timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Effective view-change timeout.
    pub fn view_change_timeout(&self) -> Duration {
        Duration::from_millis(self.view_change_timeout_ms.unwrap_or(self.timeout_ms))
    }

    /// Check the configuration before building a protocol from it.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if !self.mechanism.is_supported() {
            return Err(ConsensusError::UnsupportedMechanism(self.mechanism));
        }
        if let Some(q) = self.quorum {
            if !(0.0..1.0).contains(&q) {
                return Err(ConsensusError::InvalidQuorum(q));
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConsensusError::InvalidTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.mechanism, Mechanism::MajorityVote);
        assert_eq!(config.quorum_fraction(), 0.5);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.view_change_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_replication_is_rejected() {
        let config = ProtocolConfig::new(Mechanism::LogReplication);
        assert_eq!(
            config.validate(),
            Err(ConsensusError::UnsupportedMechanism(Mechanism::LogReplication))
        );
    }

    #[test]
    fn test_quorum_bounds() {
        assert!(ProtocolConfig::default().with_quorum(0.66).validate().is_ok());
        assert_eq!(
            ProtocolConfig::default().with_quorum(1.0).validate(),
            Err(ConsensusError::InvalidQuorum(1.0))
        );
        assert!(ProtocolConfig::default().with_quorum(-0.1).validate().is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let config = ProtocolConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConsensusError::InvalidTimeout));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ProtocolConfig =
            serde_json::from_str(r#"{"mechanism": "bft", "timeoutMs": 250}"#).unwrap();
        assert_eq!(config.mechanism, Mechanism::Bft);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.quorum, None);
        assert_eq!(config.max_buffered_messages, 1024);
    }
}
