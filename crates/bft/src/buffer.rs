//! Holding area for phase messages that outran their pre-prepare.

use concord_messages::BftMessage;
use concord_types::ProposalId;
use indexmap::IndexMap;
use tracing::debug;

/// Prepare and commit messages for proposals this node has not accepted a
/// pre-prepare for yet.
///
/// Entries are kept in arrival order of their first message. When the total
/// exceeds the bound, whole entries are evicted oldest first.
#[derive(Debug)]
pub struct EarlyMessageBuffer {
    entries: IndexMap<ProposalId, Vec<BftMessage>>,
    len: usize,
    max: usize,
}

impl EarlyMessageBuffer {
    /// Create a buffer holding at most `max` messages.
    pub fn new(max: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            len: 0,
            max,
        }
    }

    /// Hold a message until its pre-prepare arrives.
    pub fn push(&mut self, proposal_id: ProposalId, message: BftMessage) {
        if self.max == 0 {
            return;
        }
        self.entries.entry(proposal_id).or_default().push(message);
        self.len += 1;

        while self.len > self.max {
            let Some((evicted, messages)) = self.entries.shift_remove_index(0) else {
                break;
            };
            self.len -= messages.len();
            debug!(
                proposal_id = %evicted,
                dropped = messages.len(),
                "Early message buffer full, evicting oldest proposal"
            );
        }
    }

    /// Remove and return everything held for a proposal.
    pub fn take(&mut self, proposal_id: &ProposalId) -> Vec<BftMessage> {
        let messages = self.entries.shift_remove(proposal_id).unwrap_or_default();
        self.len -= messages.len();
        messages
    }

    /// Drop messages from views before `view`.
    pub fn discard_before(&mut self, view: u64) {
        let mut removed = 0;
        self.entries.retain(|_, messages| {
            let before = messages.len();
            messages.retain(|m| m.view >= view);
            removed += before - messages.len();
            !messages.is_empty()
        });
        self.len -= removed;
    }

    /// Total messages held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
