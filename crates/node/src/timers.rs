//! Deadline-ordered timer wheel.

use concord_core::TimerId;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Armed timers, ordered by deadline.
///
/// Each `TimerId` is armed at most once; re-arming replaces the old deadline.
/// Timers with equal deadlines fire in the order they were armed.
#[derive(Debug, Default)]
pub struct TimerWheel {
    by_deadline: BTreeMap<(Duration, u64), TimerId>,
    deadlines: HashMap<TimerId, (Duration, u64)>,
    sequence: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` to fire at `deadline`.
    pub fn set(&mut self, id: TimerId, deadline: Duration) {
        self.cancel(&id);
        self.sequence += 1;
        let slot = (deadline, self.sequence);
        self.by_deadline.insert(slot, id.clone());
        self.deadlines.insert(id, slot);
    }

    /// Disarm `id`. Returns false if it was not armed.
    pub fn cancel(&mut self, id: &TimerId) -> bool {
        match self.deadlines.remove(id) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<TimerId> {
        let (&slot, _) = self.by_deadline.first_key_value()?;
        if slot.0 > now {
            return None;
        }
        let id = self.by_deadline.remove(&slot)?;
        self.deadlines.remove(&id);
        Some(id)
    }

    /// Deadline of an armed timer.
    pub fn deadline(&self, id: &TimerId) -> Option<Duration> {
        self.deadlines.get(id).map(|(deadline, _)| *deadline)
    }

    /// Earliest deadline of any armed timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Disarm everything.
    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
