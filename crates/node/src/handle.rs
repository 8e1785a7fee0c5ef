//! Caller-side future for a proposal's outcome.

use concord_types::{ProposalError, ProposalResult, VoteTally};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves once the proposal reaches a terminal outcome.
///
/// If the manager is dropped before settling, the handle resolves as
/// not accepted with [`ProposalError::Stopped`].
#[derive(Debug)]
pub struct ProposalHandle {
    key: String,
    receiver: oneshot::Receiver<ProposalResult>,
}

impl ProposalHandle {
    pub(crate) fn new(key: String, receiver: oneshot::Receiver<ProposalResult>) -> Self {
        Self { key, receiver }
    }

    /// Key this proposal targets.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Take the result without waiting, if it has settled.
    pub fn try_result(&mut self) -> Option<ProposalResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(self.abandoned()),
        }
    }

    fn abandoned(&self) -> ProposalResult {
        ProposalResult::failed(None, self.key.clone(), VoteTally::default(), ProposalError::Stopped)
    }
}

impl Future for ProposalHandle {
    type Output = ProposalResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(self.abandoned()),
            Poll::Pending => Poll::Pending,
        }
    }
}
