//! Outbound message delivery.

use concord_messages::ProtocolMessage;
use concord_types::MemberId;
use std::sync::Arc;

/// Delivers protocol messages to other members.
///
/// Delivery is best effort and entirely the implementor's business; the
/// protocols tolerate loss, duplication and reordering. Receivers feed
/// messages back through `ConsensusManager::handle_message`.
pub trait Transport: Send + Sync {
    fn send(&self, from: &MemberId, to: &MemberId, message: ProtocolMessage);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, from: &MemberId, to: &MemberId, message: ProtocolMessage) {
        (**self).send(from, to, message)
    }
}

/// Transport that drops everything. Useful for single-member clusters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _from: &MemberId, _to: &MemberId, _message: ProtocolMessage) {}
}
