//! Uniform success/error result returned for every bridge call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::recognition::{EngineComparison, RecognitionReport};

/// Stable, caller-visible error category.
///
/// The code (not the message) is the contract: callers branch on the code and
/// display the message as diagnostic text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unknown channel or unknown method within a channel.
    Unimplemented,
    /// Missing or malformed required argument.
    InvalidArgs,
    /// Backend is not in the `Ready` state.
    NotInitialized,
    /// Permanently disabled native backend.
    NativeLibError,
    /// Call exceeded its deadline.
    Timeout,
    /// Backend-specific failure.
    BackendError,
    /// Out-of-process transport failed to start or communicate.
    TransportError,
    /// Unexpected fault inside a backend invocation (caught, never propagated).
    InternalError,
}

impl ErrorCode {
    /// Wire form, e.g. `"NOT_INITIALIZED"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::NativeLibError => "NATIVE_LIB_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// User-displayable category for this code.
    #[must_use]
    pub fn display_category(self) -> &'static str {
        match self {
            ErrorCode::Unimplemented => "Feature not available",
            ErrorCode::InvalidArgs => "Invalid request",
            ErrorCode::NotInitialized => "Recognition engine not ready",
            ErrorCode::NativeLibError => "Recognition engine unsupported on this device",
            ErrorCode::Timeout => "Recognition timed out",
            ErrorCode::BackendError => "Recognition failed",
            ErrorCode::TransportError => "Helper environment unavailable",
            ErrorCode::InternalError => "Unexpected error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-defined success payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// No data (acknowledgement).
    Unit,
    /// Status flag, e.g. `isInitialized`.
    Bool(bool),
    /// Free-form text, e.g. raw script output.
    Text(String),
    /// Structured JSON passed through from a backend, e.g. version info.
    Json(serde_json::Value),
    /// Decoded recognition output.
    Recognition(RecognitionReport),
    /// Per-engine recognition output.
    Comparison(EngineComparison),
}

/// The single result delivered for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope {
    Success { payload: Payload },
    Error { code: ErrorCode, message: String },
}

impl Envelope {
    #[must_use]
    pub fn success(payload: Payload) -> Self {
        Envelope::Success { payload }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Envelope::Error {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    /// Error code, if this is an error envelope.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Envelope::Error { code, .. } => Some(*code),
            Envelope::Success { .. } => None,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Envelope::Success { payload } => Some(payload),
            Envelope::Error { .. } => None,
        }
    }
}
