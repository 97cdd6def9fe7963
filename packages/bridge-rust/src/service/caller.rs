//! Caller contexts and result delivery.
//!
//! A [`CallerContext`] is the requester-side inbox: every dispatched call
//! delivers exactly one [`Delivery`] into it, unless the context was torn down
//! first. Dropping the context (or calling [`CallerContext::cancel`]) cancels
//! its token, which suppresses all pending deliveries.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use platebridge_core::Envelope;

use crate::service::operation::CallId;

/// One completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub call_id: CallId,
    pub envelope: Envelope,
}

// ---------------------------------------------------------------------------
// CallerContext / CallerHandle
// ---------------------------------------------------------------------------

/// Requester-side inbox for call results.
pub struct CallerContext {
    rx: mpsc::UnboundedReceiver<Delivery>,
    handle: CallerHandle,
}

impl CallerContext {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            handle: CallerHandle {
                tx,
                token: CancellationToken::new(),
            },
        }
    }

    /// Cloneable address handed to the dispatcher.
    #[must_use]
    pub fn handle(&self) -> CallerHandle {
        self.handle.clone()
    }

    /// Waits for the next delivery. Returns `None` once the context is cancelled.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        if self.handle.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            () = self.handle.token.cancelled() => None,
            delivery = self.rx.recv() => delivery,
        }
    }

    /// Returns a delivery that has already arrived, if any.
    pub fn try_next_delivery(&mut self) -> Option<Delivery> {
        if self.handle.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Tears the context down; results still in flight are discarded.
    pub fn cancel(&self) {
        self.handle.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.token.is_cancelled()
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallerContext {
    fn drop(&mut self) {
        self.handle.token.cancel();
    }
}

/// Sending side of a [`CallerContext`].
#[derive(Debug, Clone)]
pub struct CallerHandle {
    tx: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
}

impl CallerHandle {
    /// Token cancelled when the owning context is torn down.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Single-use delivery right for one call.
///
/// `deliver` consumes the completion, so a call can produce at most one
/// envelope.
#[derive(Debug)]
pub struct Completion {
    call_id: CallId,
    target: CallerHandle,
}

impl Completion {
    #[must_use]
    pub fn new(call_id: CallId, target: CallerHandle) -> Self {
        Self { call_id, target }
    }

    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.target.cancellation()
    }

    /// Delivers `envelope` unless the caller has gone away.
    ///
    /// Returns whether the envelope reached the caller's inbox.
    pub fn deliver(self, envelope: Envelope) -> bool {
        if self.target.is_cancelled() {
            debug!(call_id = self.call_id, "caller context cancelled; dropping result");
            return false;
        }
        self.target
            .tx
            .send(Delivery {
                call_id: self.call_id,
                envelope,
            })
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use platebridge_core::{ErrorCode, Payload};

    use super::*;

    #[tokio::test]
    async fn delivery_reaches_inbox() {
        let mut ctx = CallerContext::new();
        let completion = Completion::new(7, ctx.handle());
        assert!(completion.deliver(Envelope::success(Payload::Bool(true))));

        let delivery = ctx.next_delivery().await.unwrap();
        assert_eq!(delivery.call_id, 7);
        assert_eq!(delivery.envelope, Envelope::success(Payload::Bool(true)));
        assert!(ctx.try_next_delivery().is_none());
    }

    #[tokio::test]
    async fn cancelled_context_receives_nothing() {
        let mut ctx = CallerContext::new();
        let completion = Completion::new(1, ctx.handle());
        ctx.cancel();

        assert!(!completion.deliver(Envelope::error(ErrorCode::Timeout, "late")));
        assert!(ctx.next_delivery().await.is_none());
        assert!(ctx.try_next_delivery().is_none());
    }

    #[test]
    fn dropping_context_cancels_handles() {
        let ctx = CallerContext::new();
        let handle = ctx.handle();
        assert!(!handle.is_cancelled());
        drop(ctx);
        assert!(handle.is_cancelled());
        assert!(!Completion::new(3, handle).deliver(Envelope::success(Payload::Unit)));
    }

    #[tokio::test]
    async fn next_delivery_wakes_on_cancel() {
        let mut ctx = CallerContext::new();
        let token = ctx.handle().cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            token.cancel();
        });
        assert!(ctx.next_delivery().await.is_none());
    }
}
