//! Invocation types flowing through the bridge.
//!
//! An [`InvocationRequest`] is the untyped message a caller sends. The router
//! validates it into a typed [`Call`], pairs it with a backend handle, and the
//! dispatcher feeds the resulting [`Invocation`] through the middleware pipeline.
//! Every failure on that path is a [`BridgeError`], which maps onto exactly one
//! [`ErrorCode`] of the result envelope.

use std::collections::BTreeMap;

use platebridge_core::{Channel, Envelope, ErrorCode, Value};

use crate::backend::BackendError;
use crate::service::registry::BackendHandle;

/// Per-dispatch identifier, echoed in every delivery.
pub type CallId = u64;

// ---------------------------------------------------------------------------
// InvocationRequest
// ---------------------------------------------------------------------------

/// Untyped call as received from a caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvocationRequest {
    /// Channel identifier, e.g. `"embedded"`.
    pub channel: String,
    /// Method name within the channel, e.g. `"process_image_file"`.
    pub method: String,
    pub args: BTreeMap<String, Value>,
    /// Caller-supplied deadline; the configured default applies when absent.
    pub timeout_ms: Option<u64>,
}

impl InvocationRequest {
    pub fn new(channel: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            method: method.into(),
            args: BTreeMap::new(),
            timeout_ms: None,
        }
    }

    /// Adds one named argument.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.args.extend(args);
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// One request to run a helper script in the external environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptJob {
    /// Bare script file name, resolved against the configured scripts directory.
    pub script: String,
    pub args: Vec<String>,
    /// Per-run deadline overriding the configured script timeout.
    pub timeout_ms: Option<u64>,
}

/// A validated, typed backend call.
///
/// Produced by `classify` from the method table; a `Call` never carries a
/// missing or mistyped required argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    IsInitialized,
    IsInstalled,
    GetVersionInfo,
    RecognizeImage { image_path: String },
    ProcessImageFile { image_path: String },
    ProcessImageBytes { image: Vec<u8> },
    SetConfidenceThreshold { threshold: f64 },
    SetDebugMode { enabled: bool },
    ListEngines,
    ProcessWithEngine { image_path: String, engine: String },
    CompareEngines { image_path: String },
    ProcessWithBestEngine { image_path: String },
    RunScript(ScriptJob),
    ProcessImage { image_path: String, timeout_ms: Option<u64> },
}

impl Call {
    /// Stable operation name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Call::Initialize => "initialize",
            Call::IsInitialized => "is_initialized",
            Call::IsInstalled => "is_installed",
            Call::GetVersionInfo => "get_version_info",
            Call::RecognizeImage { .. } => "recognize_image",
            Call::ProcessImageFile { .. } => "process_image_file",
            Call::ProcessImageBytes { .. } => "process_image_bytes",
            Call::SetConfidenceThreshold { .. } => "set_confidence_threshold",
            Call::SetDebugMode { .. } => "set_debug_mode",
            Call::ListEngines => "get_available_alpr_engines",
            Call::ProcessWithEngine { .. } => "process_with_specific_engine",
            Call::CompareEngines { .. } => "compare_all_engines",
            Call::ProcessWithBestEngine { .. } => "process_with_best_engine",
            Call::RunScript(_) => "run_script",
            Call::ProcessImage { .. } => "process_image",
        }
    }

    /// Calls that may run while the backend is not `Ready`.
    #[must_use]
    pub fn is_lifecycle_exempt(&self) -> bool {
        matches!(self, Call::Initialize | Call::IsInitialized | Call::IsInstalled)
    }

    /// Deadline carried in the call's own arguments, if any.
    #[must_use]
    pub fn timeout_override(&self) -> Option<u64> {
        match self {
            Call::RunScript(job) => job.timeout_ms,
            Call::ProcessImage { timeout_ms, .. } => *timeout_ms,
            _ => None,
        }
    }

    /// Fills in the routed deadline on calls that carry their own, so the
    /// backend stops work the dispatcher has already given up on.
    pub fn bind_deadline(&mut self, timeout_ms: u64) {
        match self {
            Call::RunScript(ScriptJob { timeout_ms: t, .. })
            | Call::ProcessImage { timeout_ms: t, .. } => {
                *t = Some(t.map_or(timeout_ms, |own| own.min(timeout_ms)));
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Metadata carried with every dispatched call.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub call_id: CallId,
    pub channel: Channel,
    /// Method name as it appears in the method table.
    pub method: &'static str,
    /// Deadline enforced by the timeout middleware.
    pub call_timeout_ms: u64,
}

/// A routed call on its way through the pipeline.
#[derive(Clone)]
pub struct Invocation {
    pub ctx: InvocationContext,
    pub handle: BackendHandle,
    pub call: Call,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("ctx", &self.ctx)
            .field("call", &self.call.name())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BridgeError
// ---------------------------------------------------------------------------

/// Any failure on the path from request to envelope.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("unknown channel: '{channel}'")]
    UnknownChannel { channel: String },

    #[error("method '{method}' is not implemented on channel '{channel}'")]
    UnknownMethod { channel: Channel, method: String },

    #[error("invalid arguments for '{method}': {reason}")]
    InvalidArgs { method: &'static str, reason: String },

    #[error(
        "{channel} backend is not initialized ({})",
        .reason.as_deref().unwrap_or("call initialize first")
    )]
    NotInitialized {
        channel: Channel,
        reason: Option<String>,
    },

    #[error("{channel} backend failed to start: {reason}")]
    StartupFailed {
        channel: Channel,
        code: ErrorCode,
        reason: String,
    },

    #[error("{message}")]
    NativeLib { channel: Channel, message: String },

    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("bridge is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::UnknownChannel { .. } | BridgeError::UnknownMethod { .. } => {
                ErrorCode::Unimplemented
            }
            BridgeError::InvalidArgs { .. } => ErrorCode::InvalidArgs,
            BridgeError::NotInitialized { .. } | BridgeError::ShuttingDown => {
                ErrorCode::NotInitialized
            }
            BridgeError::StartupFailed { code, .. } => *code,
            BridgeError::NativeLib { .. } => ErrorCode::NativeLibError,
            BridgeError::Timeout { .. } => ErrorCode::Timeout,
            BridgeError::Backend(e) => e.code(),
            BridgeError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Converts the error into the error envelope delivered to the caller.
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        Envelope::error(self.code(), self.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_args() {
        let req = InvocationRequest::new("embedded", "process_image_file")
            .arg("imagePath", "/sdcard/a.jpg")
            .timeout_ms(500);
        assert_eq!(req.channel, "embedded");
        assert_eq!(req.args.get("imagePath").and_then(Value::as_str), Some("/sdcard/a.jpg"));
        assert_eq!(req.timeout_ms, Some(500));
    }

    #[test]
    fn lifecycle_exempt_calls() {
        assert!(Call::Initialize.is_lifecycle_exempt());
        assert!(Call::IsInitialized.is_lifecycle_exempt());
        assert!(Call::IsInstalled.is_lifecycle_exempt());
        assert!(!Call::GetVersionInfo.is_lifecycle_exempt());
        assert!(!Call::ProcessImageFile { image_path: "a".into() }.is_lifecycle_exempt());
    }

    #[test]
    fn timeout_override_comes_from_call_args() {
        let job = ScriptJob {
            script: "probe.py".into(),
            args: vec![],
            timeout_ms: Some(1_000),
        };
        assert_eq!(Call::RunScript(job).timeout_override(), Some(1_000));
        assert_eq!(
            Call::ProcessImage { image_path: "a".into(), timeout_ms: None }.timeout_override(),
            None
        );
        assert_eq!(Call::ListEngines.timeout_override(), None);
    }

    #[test]
    fn bind_deadline_caps_process_calls() {
        let mut call = Call::ProcessImage {
            image_path: "a".into(),
            timeout_ms: None,
        };
        call.bind_deadline(200);
        assert_eq!(call.timeout_override(), Some(200));

        let mut call = Call::RunScript(ScriptJob {
            script: "probe.py".into(),
            args: vec![],
            timeout_ms: Some(50),
        });
        call.bind_deadline(200);
        assert_eq!(call.timeout_override(), Some(50));

        let mut call = Call::ListEngines;
        call.bind_deadline(200);
        assert_eq!(call, Call::ListEngines);
    }

    #[test]
    fn error_codes() {
        let cases = [
            (BridgeError::UnknownChannel { channel: "x".into() }, ErrorCode::Unimplemented),
            (
                BridgeError::UnknownMethod { channel: Channel::Embedded, method: "x".into() },
                ErrorCode::Unimplemented,
            ),
            (
                BridgeError::InvalidArgs { method: "runScript", reason: "missing 'script'".into() },
                ErrorCode::InvalidArgs,
            ),
            (
                BridgeError::NotInitialized { channel: Channel::Embedded, reason: None },
                ErrorCode::NotInitialized,
            ),
            (BridgeError::ShuttingDown, ErrorCode::NotInitialized),
            (
                BridgeError::StartupFailed {
                    channel: Channel::Environment,
                    code: ErrorCode::TransportError,
                    reason: "no interpreter".into(),
                },
                ErrorCode::TransportError,
            ),
            (
                BridgeError::NativeLib { channel: Channel::Legacy, message: "off".into() },
                ErrorCode::NativeLibError,
            ),
            (BridgeError::Timeout { timeout_ms: 10 }, ErrorCode::Timeout),
            (BridgeError::Backend(BackendError::Failed("x".into())), ErrorCode::BackendError),
            (BridgeError::Internal("x".into()), ErrorCode::InternalError),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn not_initialized_message_names_reason() {
        let bare = BridgeError::NotInitialized { channel: Channel::Embedded, reason: None };
        assert_eq!(
            bare.to_string(),
            "embedded backend is not initialized (call initialize first)"
        );
        let failed = BridgeError::NotInitialized {
            channel: Channel::Environment,
            reason: Some("interpreter not found".into()),
        };
        assert!(failed.to_string().contains("interpreter not found"));
    }

    #[test]
    fn into_envelope_carries_code_and_message() {
        let env = BridgeError::Timeout { timeout_ms: 250 }.into_envelope();
        assert_eq!(env.error_code(), Some(ErrorCode::Timeout));
        match env {
            Envelope::Error { message, .. } => assert_eq!(message, "call timed out after 250ms"),
            Envelope::Success { .. } => panic!("expected error envelope"),
        }
    }
}
