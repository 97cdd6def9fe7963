//! Recognition backends.
//!
//! Every channel is served by one [`Backend`] implementation:
//!
//! - [`disabled`]: retired native engine, permanently unavailable
//! - [`embedded`]: in-process recognition module behind a serialized worker
//! - [`external`]: out-of-process helper scripts with decoupled completion

pub mod disabled;
pub mod embedded;
pub mod external;

use async_trait::async_trait;
use platebridge_core::{Channel, DecodeError, ErrorCode, Payload};

use crate::service::operation::Call;

pub use disabled::DisabledBackend;
pub use embedded::{
    EmbeddedModuleBackend, FnModuleLoader, MissingModuleLoader, ModuleError, ModuleLoader,
    RecognitionModule,
};
pub use external::{ExternalProcessBackend, LocalProcessTransport, ProcessTransport, TransportError};

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Failure raised by a backend while starting or executing a call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Backend-specific failure; the message comes from the backend.
    #[error("{0}")]
    Failed(String),
    /// The out-of-process transport could not start or talk to the helper.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The backend does not offer this operation.
    #[error("operation '{method}' is not supported by this backend")]
    Unsupported { method: &'static str },
    /// The backend is permanently disabled.
    #[error("{0}")]
    Disabled(String),
    /// The backend gave up waiting on its own work.
    #[error("backend gave up after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    /// The backend faulted unexpectedly (e.g. a panic inside the module).
    #[error("backend fault: {0}")]
    Crashed(String),
    /// Backend output could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl BackendError {
    /// Caller-visible error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Transport(TransportError::TimedOut { .. })
            | BackendError::TimedOut { .. } => ErrorCode::Timeout,
            BackendError::Transport(_) => ErrorCode::TransportError,
            BackendError::Unsupported { .. } => ErrorCode::Unimplemented,
            BackendError::Disabled(_) => ErrorCode::NativeLibError,
            BackendError::Crashed(_) => ErrorCode::InternalError,
            BackendError::Failed(_) | BackendError::Decode(_) => ErrorCode::BackendError,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A unit offering recognition or diagnostic capability through one transport.
///
/// Backends are owned by the `BackendRegistry`, which drives `start()` at most
/// once per initialization attempt and only forwards calls once the backend
/// is ready. A backend that is not reentrant must serialize internally.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Channel this backend serves.
    fn channel(&self) -> Channel;

    /// `Some(reason)` for a backend that can never become ready.
    fn disabled_reason(&self) -> Option<&str> {
        None
    }

    /// Backend-specific startup (load, probe). Called by the registry only.
    async fn start(&self) -> Result<(), BackendError>;

    /// Execute one validated call.
    async fn invoke(&self, call: Call) -> Result<Payload, BackendError>;

    /// Release resources. If `terminate` is true, skip graceful cleanup.
    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Parses backend text as JSON, falling back to plain text.
pub(crate) fn json_or_text(raw: String) -> Payload {
    match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(json) if json.is_object() || json.is_array() => Payload::Json(json),
        _ => Payload::Text(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(BackendError::Failed("x".into()).code(), ErrorCode::BackendError);
        assert_eq!(
            BackendError::Transport(TransportError::Lost).code(),
            ErrorCode::TransportError
        );
        assert_eq!(
            BackendError::Transport(TransportError::TimedOut { timeout_ms: 5 }).code(),
            ErrorCode::Timeout
        );
        assert_eq!(
            BackendError::Unsupported { method: "set_debug_mode" }.code(),
            ErrorCode::Unimplemented
        );
        assert_eq!(BackendError::Disabled("off".into()).code(), ErrorCode::NativeLibError);
        assert_eq!(BackendError::Crashed("boom".into()).code(), ErrorCode::InternalError);
        assert_eq!(
            BackendError::Decode(DecodeError::Reported("no image".into())).code(),
            ErrorCode::BackendError
        );
    }

    #[test]
    fn json_or_text_prefers_structured_json() {
        assert!(matches!(json_or_text("{\"success\": true}".into()), Payload::Json(_)));
        assert!(matches!(json_or_text(" [1, 2]\n".into()), Payload::Json(_)));
        assert_eq!(json_or_text("Python 3.12.1".into()), Payload::Text("Python 3.12.1".into()));
        assert_eq!(json_or_text("42".into()), Payload::Text("42".into()));
    }
}
