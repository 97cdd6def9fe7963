//! Metrics middleware for invocations.
//!
//! Wraps each invocation in a `bridge_call` tracing span and records a call
//! counter (by channel, method and outcome code) and a duration histogram
//! (by channel) through the `metrics` facade.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use platebridge_core::Payload;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{BridgeError, Invocation};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Records invocation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let channel = invocation.ctx.channel.as_str();
        let method = invocation.ctx.method;
        let call_id = invocation.ctx.call_id;

        let span = info_span!(
            "bridge_call",
            channel,
            method,
            call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.code().as_str(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "platebridge_calls_total",
                    "channel" => channel,
                    "method" => method,
                    "outcome" => outcome,
                )
                .increment(1);
                metrics::histogram!("platebridge_call_duration_ms", "channel" => channel)
                .record(elapsed.as_secs_f64() * 1_000.0);

                tracing::debug!(duration_ms, outcome, "call complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
