//! Timeout middleware for invocations.
//!
//! Fails invocations that exceed their `call_timeout_ms` with
//! `BridgeError::Timeout`. The inner future is dropped on expiry; backend
//! work already handed to a detached task keeps running and its late result
//! is discarded.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use platebridge_core::Payload;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{BridgeError, Invocation};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing each invocation's own deadline.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Invocation> for TimeoutService<S>
where
    S: Service<Invocation, Response = Payload, Error = BridgeError> + Send,
    S::Future: Send + 'static,
{
    type Response = Payload;
    type Error = BridgeError;
    type Future = Pin<Box<dyn Future<Output = Result<Payload, BridgeError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let timeout_ms = invocation.ctx.call_timeout_ms;
        let call_id = invocation.ctx.call_id;
        let method = invocation.ctx.method;
        let fut = self.inner.call(invocation);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    warn!(call_id, method, timeout_ms, "call deadline expired");
                    Err(BridgeError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::service::middleware::test_support::{invocation, StubService};

    #[tokio::test]
    async fn fast_call_passes_through() {
        let svc = TimeoutLayer.layer(StubService::delayed(10));
        let result = svc.oneshot(invocation(1, 1_000)).await;
        assert_eq!(result.unwrap(), Payload::Bool(true));
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let svc = TimeoutLayer.layer(StubService::delayed(500));
        let result = svc.oneshot(invocation(2, 20)).await;
        assert!(matches!(result, Err(BridgeError::Timeout { timeout_ms: 20 })));
    }

    #[tokio::test]
    async fn inner_error_is_not_masked() {
        let svc = TimeoutLayer.layer(StubService::failing());
        let result = svc.oneshot(invocation(3, 1_000)).await;
        assert!(matches!(result, Err(BridgeError::Backend(_))));
    }
}
