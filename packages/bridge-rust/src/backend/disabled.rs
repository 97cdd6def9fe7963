use async_trait::async_trait;
use platebridge_core::{Channel, Payload};

use super::{Backend, BackendError};
use crate::service::operation::Call;

/// Message reported for every call on the retired native channel.
pub const LEGACY_DISABLED_MESSAGE: &str = "The native recognition library is disabled on this \
    build: its binaries are incompatible with the device architecture. Use the 'embedded' or \
    'environment' channel instead.";

/// A backend that can never become ready.
///
/// Every lifecycle and recognition call fails with the configured reason.
#[derive(Debug, Clone)]
pub struct DisabledBackend {
    channel: Channel,
    reason: String,
}

impl DisabledBackend {
    pub fn new(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }

    /// The retired native engine.
    #[must_use]
    pub fn legacy() -> Self {
        Self::new(Channel::Legacy, LEGACY_DISABLED_MESSAGE)
    }
}

#[async_trait]
impl Backend for DisabledBackend {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn disabled_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }

    async fn start(&self) -> Result<(), BackendError> {
        Err(BackendError::Disabled(self.reason.clone()))
    }

    async fn invoke(&self, _call: Call) -> Result<Payload, BackendError> {
        Err(BackendError::Disabled(self.reason.clone()))
    }
}
