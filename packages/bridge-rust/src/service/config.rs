use std::path::PathBuf;

/// Bridge-level configuration.
///
/// Controls call deadlines, drain behavior, and per-backend settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Deadline for calls that do not carry their own, in milliseconds.
    pub default_call_timeout_ms: u64,
    /// Deadline for `initialize` calls that do not carry their own.
    pub init_timeout_ms: u64,
    /// How long `Bridge::shutdown` waits for in-flight calls.
    pub drain_timeout_ms: u64,
    pub embedded: EmbeddedConfig,
    pub external: ExternalProcessConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_call_timeout_ms: 30_000,
            init_timeout_ms: 60_000,
            drain_timeout_ms: 5_000,
            embedded: EmbeddedConfig::default(),
            external: ExternalProcessConfig::default(),
        }
    }
}

/// Settings for the in-process recognition module.
#[derive(Debug, Clone)]
pub struct EmbeddedConfig {
    /// Capacity of the queue serializing calls into the module.
    pub queue_capacity: usize,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Where a helper script leaves its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultChannel {
    /// Captured standard output.
    #[default]
    Stdout,
    /// A file whose path is passed in the `PLATEBRIDGE_RESULT_FILE` environment variable.
    ResultFile,
}

/// Settings for the out-of-process helper environment.
#[derive(Debug, Clone)]
pub struct ExternalProcessConfig {
    /// Interpreter used to run helper scripts.
    pub interpreter: PathBuf,
    /// Arguments for the availability probe run by `initialize`/`isInstalled`.
    pub probe_args: Vec<String>,
    pub probe_timeout_ms: u64,
    /// Directory script names are resolved against.
    pub scripts_dir: PathBuf,
    /// Script run by `processImage` with the image path as its only argument.
    pub recognition_script: String,
    pub result_channel: ResultChannel,
    /// Directory for per-run result files.
    pub work_dir: PathBuf,
    /// Deadline for a script run when the call does not carry one.
    pub script_timeout_ms: u64,
}

impl Default for ExternalProcessConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            probe_args: vec!["--version".to_string()],
            probe_timeout_ms: 5_000,
            scripts_dir: PathBuf::from("."),
            recognition_script: "predator_mobile.py".to_string(),
            result_channel: ResultChannel::Stdout,
            work_dir: std::env::temp_dir(),
            script_timeout_ms: 120_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.default_call_timeout_ms, 30_000);
        assert!(config.init_timeout_ms >= config.default_call_timeout_ms);
        assert_eq!(config.embedded.queue_capacity, 64);
        assert_eq!(config.external.interpreter, PathBuf::from("python3"));
        assert_eq!(config.external.result_channel, ResultChannel::Stdout);
    }
}
