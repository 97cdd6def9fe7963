//! Innermost pipeline service: runs an invocation against its backend.
//!
//! Backend work runs on its own task so a panic inside a backend surfaces as
//! `BridgeError::Internal` instead of unwinding through the dispatcher, and so
//! an abandoned call (timeout, cancelled caller) leaves the work running
//! without anyone waiting on it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use platebridge_core::Payload;
use tower::Service;
use tracing::error;

use crate::service::operation::{BridgeError, Call, Invocation};

#[derive(Debug, Clone, Default)]
pub struct BackendExecutor;

impl Service<Invocation> for BackendExecutor {
    type Response = Payload;
    type Error = BridgeError;
    type Future = Pin<Box<dyn Future<Output = Result<Payload, BridgeError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let call_id = invocation.ctx.call_id;
        let method = invocation.ctx.method;
        Box::pin(async move {
            match tokio::spawn(execute(invocation)).await {
                Ok(result) => result,
                Err(join) => {
                    error!(call_id, method, error = %join, "backend invocation panicked");
                    Err(BridgeError::Internal(format!("{method} failed unexpectedly: {join}")))
                }
            }
        })
    }
}

async fn execute(invocation: Invocation) -> Result<Payload, BridgeError> {
    let Invocation { handle, call, .. } = invocation;
    match call {
        Call::Initialize => {
            handle.ensure_initialized().await?;
            Ok(Payload::Bool(true))
        }
        Call::IsInitialized => Ok(Payload::Bool(handle.is_ready())),
        call => {
            // Readiness is re-checked here since the backend may have changed
            // state between routing and execution.
            if !call.is_lifecycle_exempt() {
                handle.check_ready()?;
            }
            Ok(handle.backend().invoke(call).await?)
        }
    }
}
