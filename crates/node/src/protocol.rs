//! The protocol a manager runs, chosen at construction.

use concord_bft::BftState;
use concord_core::{Action, ConsensusProtocol, Event, StateMachine};
use concord_majority::MajorityVoteState;
use std::time::Duration;

/// Tagged variant over the supported protocols.
#[derive(Debug)]
pub enum Protocol {
    MajorityVote(MajorityVoteState),
    Bft(BftState),
}

impl Protocol {
    /// Read-side view shared by every protocol.
    pub fn as_consensus(&self) -> &dyn ConsensusProtocol {
        match self {
            Protocol::MajorityVote(state) => state,
            Protocol::Bft(state) => state,
        }
    }
}

impl StateMachine for Protocol {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match self {
            Protocol::MajorityVote(state) => state.handle(event),
            Protocol::Bft(state) => state.handle(event),
        }
    }

    fn set_time(&mut self, now: Duration) {
        match self {
            Protocol::MajorityVote(state) => state.set_time(now),
            Protocol::Bft(state) => state.set_time(now),
        }
    }

    fn now(&self) -> Duration {
        self.as_consensus().now()
    }
}
