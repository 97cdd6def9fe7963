//! Channel routing: resolves an `InvocationRequest` to a backend and a typed call.
//!
//! Resolution checks run in a fixed order, and the first failure decides the
//! error code:
//!
//! 1. bridge accepting calls (`NOT_INITIALIZED` while draining)
//! 2. known channel (`UNIMPLEMENTED`)
//! 3. known method on that channel (`UNIMPLEMENTED`)
//! 4. valid arguments (`INVALID_ARGS`)
//! 5. backend not disabled (`NATIVE_LIB_ERROR`)
//! 6. backend `Ready`, unless the method is lifecycle-exempt (`NOT_INITIALIZED`)
//!
//! Routing failures are delivered through the same inbox as backend results.

use std::sync::Arc;

use platebridge_core::{Channel, Envelope, ErrorCode};
use tracing::debug;

use super::caller::{CallerContext, CallerHandle, Completion};
use super::classify::{classify, lookup, methods_for};
use super::config::BridgeConfig;
use super::dispatcher::Dispatcher;
use super::operation::{BridgeError, Call, CallId, InvocationRequest};
use super::registry::{BackendHandle, BackendRegistry};
use super::shutdown::ShutdownController;

/// A request that passed routing and is ready to dispatch.
#[derive(Debug, Clone)]
pub struct RoutedCall {
    pub handle: BackendHandle,
    pub call: Call,
    /// Method name as listed in the method table.
    pub method: &'static str,
    pub timeout_ms: u64,
}

/// Maps `(channel, method)` pairs onto backend calls.
pub struct ChannelRouter {
    registry: Arc<BackendRegistry>,
    dispatcher: Dispatcher,
    shutdown: Arc<ShutdownController>,
    config: Arc<BridgeConfig>,
}

impl ChannelRouter {
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        config: Arc<BridgeConfig>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            registry,
            dispatcher: Dispatcher::new(Arc::clone(&shutdown)),
            shutdown,
            config,
        }
    }

    /// Resolves a request without dispatching it.
    ///
    /// # Errors
    ///
    /// Returns the first routing check that fails, in the order listed in the
    /// module documentation.
    pub fn resolve(&self, request: &InvocationRequest) -> Result<RoutedCall, BridgeError> {
        if !self.shutdown.health().accepts_calls() {
            return Err(BridgeError::ShuttingDown);
        }
        let channel = Channel::parse(&request.channel).ok_or_else(|| BridgeError::UnknownChannel {
            channel: request.channel.clone(),
        })?;
        let entry = lookup(channel, &request.method).ok_or_else(|| BridgeError::UnknownMethod {
            channel,
            method: request.method.clone(),
        })?;
        let mut call = classify(entry, &request.args)?;
        let handle = self
            .registry
            .resolve(channel)
            .ok_or_else(|| BridgeError::UnknownChannel {
                channel: request.channel.clone(),
            })?;

        if let Some(reason) = handle.disabled_reason() {
            return Err(BridgeError::NativeLib {
                channel,
                message: reason.to_string(),
            });
        }
        if !call.is_lifecycle_exempt() {
            handle.check_ready()?;
        }

        let fallback = if matches!(call, Call::Initialize) {
            self.config.init_timeout_ms
        } else {
            self.config.default_call_timeout_ms
        };
        let timeout_ms = call
            .timeout_override()
            .or(request.timeout_ms)
            .unwrap_or(fallback);
        call.bind_deadline(timeout_ms);

        Ok(RoutedCall {
            handle,
            call,
            method: entry.name,
            timeout_ms,
        })
    }

    /// Routes and dispatches `request`; the envelope arrives in `caller`'s inbox.
    ///
    /// Returns the call id that the delivery will carry. Must be called from
    /// within a Tokio runtime.
    pub fn route(&self, request: InvocationRequest, caller: &CallerHandle) -> CallId {
        let call_id = self.dispatcher.next_call_id();
        match self.resolve(&request) {
            Ok(routed) => {
                debug!(call_id, channel = %request.channel, method = routed.method, "dispatching");
                self.dispatcher.execute(call_id, routed, caller.clone());
            }
            Err(e) => {
                debug!(
                    call_id,
                    channel = %request.channel,
                    method = %request.method,
                    code = %e.code(),
                    error = %e,
                    "call rejected"
                );
                Completion::new(call_id, caller.clone()).deliver(e.into_envelope());
            }
        }
        call_id
    }

    /// Routes `request` and waits for its envelope.
    pub async fn call(&self, request: InvocationRequest) -> Envelope {
        let mut inbox = CallerContext::new();
        let call_id = self.route(request, &inbox.handle());
        while let Some(delivery) = inbox.next_delivery().await {
            if delivery.call_id == call_id {
                return delivery.envelope;
            }
        }
        Envelope::error(ErrorCode::InternalError, "caller inbox closed before delivery")
    }

    /// Channels with a registered backend and the methods each offers.
    #[must_use]
    pub fn routing_table(&self) -> Vec<(Channel, Vec<&'static str>)> {
        self.registry
            .registered_channels()
            .into_iter()
            .map(|channel| (channel, methods_for(channel).collect()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
