//! Method table and argument validation.
//!
//! Each channel owns a fixed set of method names. [`lookup`] finds the table
//! entry for a `(channel, method)` pair and [`classify`] checks the untyped
//! arguments against it, producing a typed [`Call`].

use std::collections::BTreeMap;

use base64::Engine as _;
use platebridge_core::{Channel, Value};

use crate::service::operation::{BridgeError, Call, ScriptJob};

// ---------------------------------------------------------------------------
// Method table
// ---------------------------------------------------------------------------

/// Operation shape a method name maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Initialize,
    IsInitialized,
    IsInstalled,
    GetVersion,
    RecognizeImage,
    ProcessImageFile,
    ProcessImageBytes,
    SetConfidenceThreshold,
    SetDebugMode,
    ListEngines,
    ProcessWithEngine,
    CompareEngines,
    ProcessWithBestEngine,
    RunScript,
    ProcessImage,
}

/// One row of the method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodEntry {
    pub channel: Channel,
    pub name: &'static str,
    pub kind: MethodKind,
}

const fn entry(channel: Channel, name: &'static str, kind: MethodKind) -> MethodEntry {
    MethodEntry { channel, name, kind }
}

/// All methods recognized by the bridge, grouped by channel.
pub const METHOD_TABLE: &[MethodEntry] = &[
    entry(Channel::Legacy, "initialize", MethodKind::Initialize),
    entry(Channel::Legacy, "recognizeImage", MethodKind::RecognizeImage),
    entry(Channel::Legacy, "getVersion", MethodKind::GetVersion),
    entry(Channel::Embedded, "initialize", MethodKind::Initialize),
    entry(Channel::Embedded, "isInitialized", MethodKind::IsInitialized),
    entry(Channel::Embedded, "get_version_info", MethodKind::GetVersion),
    entry(Channel::Embedded, "process_image_file", MethodKind::ProcessImageFile),
    entry(Channel::Embedded, "process_image_bytes", MethodKind::ProcessImageBytes),
    entry(Channel::Embedded, "set_confidence_threshold", MethodKind::SetConfidenceThreshold),
    entry(Channel::Embedded, "set_debug_mode", MethodKind::SetDebugMode),
    entry(Channel::Embedded, "get_available_alpr_engines", MethodKind::ListEngines),
    entry(Channel::Embedded, "process_with_specific_engine", MethodKind::ProcessWithEngine),
    entry(Channel::Embedded, "compare_all_engines", MethodKind::CompareEngines),
    entry(Channel::Embedded, "process_with_best_engine", MethodKind::ProcessWithBestEngine),
    entry(Channel::Environment, "initialize", MethodKind::Initialize),
    entry(Channel::Environment, "isInitialized", MethodKind::IsInitialized),
    entry(Channel::Environment, "isInstalled", MethodKind::IsInstalled),
    entry(Channel::Environment, "runScript", MethodKind::RunScript),
    entry(Channel::Environment, "processImage", MethodKind::ProcessImage),
];

/// Finds the table entry for `method` on `channel`.
#[must_use]
pub fn lookup(channel: Channel, method: &str) -> Option<&'static MethodEntry> {
    METHOD_TABLE
        .iter()
        .find(|e| e.channel == channel && e.name == method)
}

/// Method names offered by `channel`, in table order.
pub fn methods_for(channel: Channel) -> impl Iterator<Item = &'static str> {
    METHOD_TABLE
        .iter()
        .filter(move |e| e.channel == channel)
        .map(|e| e.name)
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

/// Validates `args` against `entry` and builds the typed call.
///
/// Unknown extra arguments are ignored.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidArgs`] when a required argument is missing,
/// empty, or of the wrong type, or an optional argument is mistyped.
pub fn classify(entry: &MethodEntry, args: &BTreeMap<String, Value>) -> Result<Call, BridgeError> {
    let args = Args { method: entry.name, map: args };
    let call = match entry.kind {
        MethodKind::Initialize => Call::Initialize,
        MethodKind::IsInitialized => Call::IsInitialized,
        MethodKind::IsInstalled => Call::IsInstalled,
        MethodKind::GetVersion => Call::GetVersionInfo,
        MethodKind::ListEngines => Call::ListEngines,
        MethodKind::RecognizeImage => Call::RecognizeImage {
            image_path: args.required_str("imagePath")?,
        },
        MethodKind::ProcessImageFile => Call::ProcessImageFile {
            image_path: args.required_str("imagePath")?,
        },
        MethodKind::ProcessImageBytes => Call::ProcessImageBytes {
            image: args.required_bytes("imageBytes")?,
        },
        MethodKind::SetConfidenceThreshold => Call::SetConfidenceThreshold {
            threshold: args.required_number("threshold")?,
        },
        MethodKind::SetDebugMode => Call::SetDebugMode {
            enabled: args.required_bool("enabled")?,
        },
        MethodKind::ProcessWithEngine => Call::ProcessWithEngine {
            image_path: args.required_str("imagePath")?,
            engine: args.required_str("engine")?,
        },
        MethodKind::CompareEngines => Call::CompareEngines {
            image_path: args.required_str("imagePath")?,
        },
        MethodKind::ProcessWithBestEngine => Call::ProcessWithBestEngine {
            image_path: args.required_str("imagePath")?,
        },
        MethodKind::RunScript => {
            let script = args.required_str("script")?;
            if !is_bare_script_name(&script) {
                return Err(args.invalid(format!(
                    "'script' must be a bare file name, got '{script}'"
                )));
            }
            Call::RunScript(ScriptJob {
                script,
                args: args.optional_str_list("args")?,
                timeout_ms: args.optional_millis("timeout")?,
            })
        }
        MethodKind::ProcessImage => Call::ProcessImage {
            image_path: args.required_str("imagePath")?,
            timeout_ms: args.optional_millis("timeout")?,
        },
    };
    Ok(call)
}

/// A script name may not point outside the scripts directory.
fn is_bare_script_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

struct Args<'a> {
    method: &'static str,
    map: &'a BTreeMap<String, Value>,
}

impl Args<'_> {
    fn invalid(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::InvalidArgs {
            method: self.method,
            reason: reason.into(),
        }
    }

    /// Present and non-null.
    fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key).filter(|v| !matches!(v, Value::Null))
    }

    fn mistyped(&self, key: &str, expected: &str, got: &Value) -> BridgeError {
        self.invalid(format!("'{key}' must be {expected}, got {}", got.kind()))
    }

    fn required_str(&self, key: &str) -> Result<String, BridgeError> {
        let value = self
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))?;
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            Some(_) => Err(self.invalid(format!("'{key}' must not be empty"))),
            None => Err(self.mistyped(key, "a string", value)),
        }
    }

    fn required_bool(&self, key: &str) -> Result<bool, BridgeError> {
        let value = self
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))?;
        value.as_bool().ok_or_else(|| self.mistyped(key, "a boolean", value))
    }

    fn required_number(&self, key: &str) -> Result<f64, BridgeError> {
        let value = self
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))?;
        match value.as_f64() {
            Some(n) if n.is_finite() => Ok(n),
            Some(_) => Err(self.invalid(format!("'{key}' must be finite"))),
            None => Err(self.mistyped(key, "a number", value)),
        }
    }

    /// Raw bytes, or a base64 string.
    fn required_bytes(&self, key: &str) -> Result<Vec<u8>, BridgeError> {
        let value = self
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))?;
        let bytes = match value {
            Value::Bytes(b) => b.clone(),
            Value::String(s) => base64::engine::general_purpose::STANDARD
                .decode(s.trim())
                .map_err(|e| self.invalid(format!("'{key}' is not valid base64: {e}")))?,
            other => return Err(self.mistyped(key, "bytes or a base64 string", other)),
        };
        if bytes.is_empty() {
            return Err(self.invalid(format!("'{key}' must not be empty")));
        }
        Ok(bytes)
    }

    fn optional_str_list(&self, key: &str) -> Result<Vec<String>, BridgeError> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            return Err(self.mistyped(key, "a list of strings", value));
        };
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.mistyped(key, "a list of strings", item))
            })
            .collect()
    }

    /// Optional non-negative integer millisecond count.
    fn optional_millis(&self, key: &str) -> Result<Option<u64>, BridgeError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let n = value
            .as_i64()
            .ok_or_else(|| self.mistyped(key, "an integer", value))?;
        u64::try_from(n)
            .map(Some)
            .map_err(|_| self.invalid(format!("'{key}' must not be negative")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use platebridge_core::ErrorCode;

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn classify_named(
        channel: Channel,
        method: &str,
        pairs: &[(&str, Value)],
    ) -> Result<Call, BridgeError> {
        let entry = lookup(channel, method).expect("method in table");
        classify(entry, &args(pairs))
    }

    #[test]
    fn table_has_no_duplicate_methods() {
        for (i, a) in METHOD_TABLE.iter().enumerate() {
            for b in &METHOD_TABLE[i + 1..] {
                assert!(
                    !(a.channel == b.channel && a.name == b.name),
                    "duplicate entry {}/{}",
                    a.channel,
                    a.name
                );
            }
        }
    }

    #[test]
    fn every_channel_has_initialize() {
        for channel in Channel::ALL {
            assert!(lookup(channel, "initialize").is_some(), "{channel}");
        }
    }

    #[test]
    fn lookup_is_channel_scoped() {
        assert!(lookup(Channel::Embedded, "process_image_file").is_some());
        assert!(lookup(Channel::Environment, "process_image_file").is_none());
        assert!(lookup(Channel::Legacy, "runScript").is_none());
        assert!(lookup(Channel::Embedded, "Initialize").is_none());
    }

    #[test]
    fn methods_for_lists_legacy_surface() {
        let names: Vec<_> = methods_for(Channel::Legacy).collect();
        assert_eq!(names, ["initialize", "recognizeImage", "getVersion"]);
    }

    #[test]
    fn image_path_required() {
        let err = classify_named(Channel::Embedded, "process_image_file", &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgs);
        assert!(err.to_string().contains("imagePath"));

        let err = classify_named(
            Channel::Embedded,
            "process_image_file",
            &[("imagePath", Value::Int(3))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a string, got integer"));

        let err = classify_named(
            Channel::Embedded,
            "process_image_file",
            &[("imagePath", Value::Null)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));

        let err = classify_named(
            Channel::Embedded,
            "process_image_file",
            &[("imagePath", "  ".into())],
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn process_image_file_ok() {
        let call = classify_named(
            Channel::Embedded,
            "process_image_file",
            &[("imagePath", "/sdcard/plate.jpg".into()), ("extra", Value::Bool(true))],
        )
        .unwrap();
        assert_eq!(call, Call::ProcessImageFile { image_path: "/sdcard/plate.jpg".into() });
    }

    #[test]
    fn image_bytes_accepts_raw_and_base64() {
        let raw = classify_named(
            Channel::Embedded,
            "process_image_bytes",
            &[("imageBytes", Value::Bytes(vec![0xff, 0xd8]))],
        )
        .unwrap();
        assert_eq!(raw, Call::ProcessImageBytes { image: vec![0xff, 0xd8] });

        let encoded = classify_named(
            Channel::Embedded,
            "process_image_bytes",
            &[("imageBytes", "/9g=".into())],
        )
        .unwrap();
        assert_eq!(encoded, Call::ProcessImageBytes { image: vec![0xff, 0xd8] });

        let err = classify_named(
            Channel::Embedded,
            "process_image_bytes",
            &[("imageBytes", "not base64!".into())],
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgs);
    }

    #[test]
    fn threshold_and_debug_types() {
        let call = classify_named(
            Channel::Embedded,
            "set_confidence_threshold",
            &[("threshold", Value::Int(80))],
        )
        .unwrap();
        assert_eq!(call, Call::SetConfidenceThreshold { threshold: 80.0 });

        assert!(classify_named(
            Channel::Embedded,
            "set_confidence_threshold",
            &[("threshold", Value::Float(f64::NAN))],
        )
        .is_err());

        let err = classify_named(Channel::Embedded, "set_debug_mode", &[("enabled", "yes".into())])
            .unwrap_err();
        assert!(err.to_string().contains("must be a boolean"));
    }

    #[test]
    fn run_script_validates_name_args_and_timeout() {
        let call = classify_named(
            Channel::Environment,
            "runScript",
            &[
                ("script", "scan.py".into()),
                ("args", Value::Array(vec!["--fast".into(), "a.jpg".into()])),
                ("timeout", Value::Int(1_500)),
            ],
        )
        .unwrap();
        assert_eq!(
            call,
            Call::RunScript(ScriptJob {
                script: "scan.py".into(),
                args: vec!["--fast".into(), "a.jpg".into()],
                timeout_ms: Some(1_500),
            })
        );

        for bad in ["../etc/passwd", "dir/scan.py", "..", "a\\b.py"] {
            let err = classify_named(Channel::Environment, "runScript", &[("script", bad.into())])
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgs, "{bad}");
        }

        let err = classify_named(
            Channel::Environment,
            "runScript",
            &[("script", "scan.py".into()), ("args", Value::Array(vec![Value::Int(1)]))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("list of strings"));

        let err = classify_named(
            Channel::Environment,
            "runScript",
            &[("script", "scan.py".into()), ("timeout", Value::Int(-5))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn process_image_optional_timeout() {
        let call = classify_named(
            Channel::Environment,
            "processImage",
            &[("imagePath", "a.jpg".into())],
        )
        .unwrap();
        assert_eq!(call, Call::ProcessImage { image_path: "a.jpg".into(), timeout_ms: None });

        let err = classify_named(
            Channel::Environment,
            "processImage",
            &[("imagePath", "a.jpg".into()), ("timeout", Value::Float(1.5))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn legacy_methods_classify() {
        assert_eq!(
            classify_named(Channel::Legacy, "getVersion", &[]).unwrap(),
            Call::GetVersionInfo
        );
        assert!(classify_named(Channel::Legacy, "recognizeImage", &[]).is_err());
    }
}
