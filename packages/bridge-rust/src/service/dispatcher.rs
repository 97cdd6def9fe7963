//! Asynchronous call dispatch.
//!
//! `Dispatcher::execute` returns immediately after handing the invocation to
//! a driver task. The driver runs the middleware pipeline and races it against
//! the caller's cancellation token: whichever settles first decides whether an
//! envelope is delivered. Either way the single-use [`Completion`] guarantees
//! at most one delivery per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use platebridge_core::Envelope;
use tower::ServiceExt;
use tracing::debug;

use crate::service::caller::{CallerHandle, Completion};
use crate::service::middleware::build_dispatch_pipeline;
use crate::service::operation::{CallId, Invocation, InvocationContext};
use crate::service::router::RoutedCall;
use crate::service::shutdown::ShutdownController;

pub struct Dispatcher {
    next_call_id: AtomicU64,
    shutdown: Arc<ShutdownController>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(shutdown: Arc<ShutdownController>) -> Self {
        Self {
            next_call_id: AtomicU64::new(1),
            shutdown,
        }
    }

    /// Allocates the identifier for the next call.
    pub fn next_call_id(&self) -> CallId {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs `routed` in the background and delivers its envelope to `caller`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute(&self, call_id: CallId, routed: RoutedCall, caller: CallerHandle) {
        let guard = self.shutdown.in_flight_guard();
        let completion = Completion::new(call_id, caller);
        let cancelled = completion.cancellation();

        let RoutedCall {
            handle,
            call,
            method,
            timeout_ms,
        } = routed;
        let invocation = Invocation {
            ctx: InvocationContext {
                call_id,
                channel: handle.channel(),
                method,
                call_timeout_ms: timeout_ms,
            },
            handle,
            call,
        };

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = cancelled.cancelled() => {
                    debug!(call_id, method, "caller went away; abandoning call");
                }
                outcome = build_dispatch_pipeline().oneshot(invocation) => {
                    let envelope = match outcome {
                        Ok(payload) => Envelope::success(payload),
                        Err(e) => e.into_envelope(),
                    };
                    completion.deliver(envelope);
                }
            }
        });
    }
}
