//! Core traits for state machines.

use crate::{Action, CommittedState, Event, Mechanism};
use concord_types::{MemberId, Roster, Value};
use std::time::Duration;

/// A state machine that processes events.
///
/// This is the core abstraction for the consensus architecture.
/// All consensus logic is implemented as state machines that are:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions
/// - **Pure-ish**: Mutates self, but performs no I/O
///
/// # Example
///
/// ```ignore
/// impl StateMachine for BftState {
///     fn handle(&mut self, event: Event) -> Vec<Action> {
///         match event {
///             Event::BftMessageReceived { message } => self.on_message(message),
///             Event::ViewChangeTimer => self.view_change.on_view_change_timer(),
///             // ... etc
///         }
///     }
///
///     fn set_time(&mut self, now: Duration) {
///         self.now = now;
///     }
/// }
/// ```
pub trait StateMachine {
    /// Process an event, returning actions to perform.
    ///
    /// # Guarantees
    ///
    /// - **Synchronous**: This method never blocks or awaits
    /// - **Deterministic**: Given the same state and event, always returns the same actions
    /// - **No I/O**: All I/O is performed by the runner via the returned actions
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call to provide the
    /// current simulated or wall-clock time.
    fn set_time(&mut self, now: Duration);

    /// Get the time that was last set via `set_time()`.
    fn now(&self) -> Duration;
}

/// Read-side surface every agreement protocol exposes to the manager.
pub trait ConsensusProtocol: StateMachine {
    /// Which mechanism this protocol implements.
    fn mechanism(&self) -> Mechanism;

    /// Values committed on this node.
    fn committed(&self) -> &CommittedState;

    /// Members this node agrees with, including itself.
    fn roster(&self) -> &Roster;

    /// Current leader, if the protocol has one.
    fn leader(&self) -> Option<&MemberId>;

    /// Current committed value for a key.
    fn get(&self, key: &str) -> Option<&Value> {
        self.committed().get(key)
    }

    /// Whether this node is the current leader. Leaderless protocols say no.
    fn is_leader(&self) -> bool {
        self.leader() == Some(self.roster().local())
    }
}
