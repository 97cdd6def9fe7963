//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::executor::BackendExecutor;
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};

/// The composed dispatch stack.
pub type DispatchPipeline = MetricsService<TimeoutService<BackendExecutor>>;

/// Build the dispatch pipeline around the backend executor.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- span, counter and duration for every outcome, timeouts included
/// 2. `TimeoutLayer` -- enforce the per-call deadline
/// 3. `BackendExecutor` -- lifecycle check and backend invocation
#[must_use]
pub fn build_dispatch_pipeline() -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer)
        .service(BackendExecutor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use platebridge_core::{Channel, ErrorCode, Payload};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::DisabledBackend;
    use crate::service::operation::{Call, Invocation, InvocationContext};
    use crate::service::registry::BackendHandle;

    #[tokio::test]
    async fn status_call_flows_through_all_layers() {
        let handle = BackendHandle::new(Arc::new(DisabledBackend::new(Channel::Legacy, "retired")));
        let invocation = Invocation {
            ctx: InvocationContext {
                call_id: 9,
                channel: Channel::Legacy,
                method: "isInitialized",
                call_timeout_ms: 1_000,
            },
            handle,
            call: Call::IsInitialized,
        };
        let result = build_dispatch_pipeline().oneshot(invocation).await;
        assert_eq!(result.unwrap(), Payload::Bool(false));
    }

    #[tokio::test]
    async fn disabled_backend_error_flows_through() {
        let handle = BackendHandle::new(Arc::new(DisabledBackend::new(Channel::Legacy, "retired")));
        let invocation = Invocation {
            ctx: InvocationContext {
                call_id: 10,
                channel: Channel::Legacy,
                method: "initialize",
                call_timeout_ms: 1_000,
            },
            handle,
            call: Call::Initialize,
        };
        let err = build_dispatch_pipeline().oneshot(invocation).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NativeLibError);
    }
}
