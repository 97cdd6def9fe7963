//! Out-of-process helper environment backend.
//!
//! Helper scripts run under a configured interpreter. Launching a script
//! returns a [`RunTicket`] immediately; a watcher task owns the child process,
//! enforces the script deadline (killing the child on expiry), collects the
//! result from stdout or a per-run result file, and completes the ticket.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use platebridge_core::{decode_scan_report, Channel, DecodeError, Payload};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{json_or_text, Backend, BackendError};
use crate::service::config::{ExternalProcessConfig, ResultChannel};
use crate::service::operation::Call;

/// Environment variable naming the file a script should write its result to.
pub const RESULT_FILE_ENV: &str = "PLATEBRIDGE_RESULT_FILE";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("script '{}' not found", .0.display())]
    ScriptNotFound(PathBuf),
    #[error("I/O error while waiting for helper: {0}")]
    Io(#[from] std::io::Error),
    #[error("helper exceeded {timeout_ms}ms and was killed")]
    TimedOut { timeout_ms: u64 },
    #[error("helper completion was lost")]
    Lost,
    #[error("interpreter probe failed: {0}")]
    ProbeFailed(String),
    #[error("result file '{}' was not written: {source}", .path.display())]
    ResultMissing {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One script run to launch.
#[derive(Debug, Clone)]
pub struct ProcessJob {
    pub script: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Result text, from stdout or the result file.
    pub output: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn failure_message(&self, script: &str) -> String {
        let status = self
            .exit_code
            .map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
        let detail = self.stderr.trim();
        if detail.is_empty() {
            format!("script '{script}' exited with {status}")
        } else {
            format!("script '{script}' exited with {status}: {detail}")
        }
    }
}

/// Pending completion of a launched run.
#[derive(Debug)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub pid: Option<u32>,
    completion: oneshot::Receiver<Result<RunOutput, TransportError>>,
}

impl RunTicket {
    #[must_use]
    pub fn new(
        run_id: Uuid,
        pid: Option<u32>,
        completion: oneshot::Receiver<Result<RunOutput, TransportError>>,
    ) -> Self {
        Self {
            run_id,
            pid,
            completion,
        }
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the watcher's error, or `Lost` if the watcher vanished.
    pub async fn wait(self) -> Result<RunOutput, TransportError> {
        self.completion.await.map_err(|_| TransportError::Lost)?
    }
}

/// Launches helper processes.
#[async_trait]
pub trait ProcessTransport: Send + Sync + 'static {
    /// Checks that the interpreter runs; returns its version banner.
    async fn probe(&self) -> Result<String, TransportError>;

    /// Starts a run and returns without waiting for it to finish.
    async fn launch(&self, job: ProcessJob) -> Result<RunTicket, TransportError>;
}

/// Runs scripts as local child processes.
#[derive(Debug, Clone)]
pub struct LocalProcessTransport {
    config: ExternalProcessConfig,
}

impl LocalProcessTransport {
    #[must_use]
    pub fn new(config: ExternalProcessConfig) -> Self {
        Self { config }
    }

    fn program(&self) -> String {
        self.config.interpreter.display().to_string()
    }
}

#[async_trait]
impl ProcessTransport for LocalProcessTransport {
    async fn probe(&self) -> Result<String, TransportError> {
        let timeout_ms = self.config.probe_timeout_ms;
        let run = Command::new(&self.config.interpreter)
            .args(&self.config.probe_args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(Duration::from_millis(timeout_ms), run)
            .await
            .map_err(|_| TransportError::ProbeFailed(format!("no answer within {timeout_ms}ms")))?
            .map_err(|source| TransportError::Spawn {
                program: self.program(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(TransportError::ProbeFailed(format!(
                "'{}' exited with {}: {stderr}",
                self.program(),
                output.status
            )));
        }
        Ok(if stdout.is_empty() { stderr } else { stdout })
    }

    async fn launch(&self, job: ProcessJob) -> Result<RunTicket, TransportError> {
        let script_path = self.config.scripts_dir.join(&job.script);
        if !tokio::fs::metadata(&script_path).await.is_ok_and(|m| m.is_file()) {
            return Err(TransportError::ScriptNotFound(script_path));
        }

        let run_id = Uuid::new_v4();
        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&script_path)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result_file = match self.config.result_channel {
            ResultChannel::Stdout => None,
            ResultChannel::ResultFile => {
                let path = self.config.work_dir.join(format!("platebridge-{run_id}.json"));
                command.env(RESULT_FILE_ENV, &path);
                Some(path)
            }
        };

        let child = command.spawn().map_err(|source| TransportError::Spawn {
            program: self.program(),
            source,
        })?;
        let pid = child.id();
        debug!(%run_id, ?pid, script = %job.script, "helper launched");

        let (tx, rx) = oneshot::channel();
        tokio::spawn(watch_run(run_id, child, result_file, job.timeout, tx));
        Ok(RunTicket::new(run_id, pid, rx))
    }
}

async fn watch_run(
    run_id: Uuid,
    child: Child,
    result_file: Option<PathBuf>,
    timeout: Duration,
    done: oneshot::Sender<Result<RunOutput, TransportError>>,
) {
    #[allow(clippy::cast_possible_truncation)]
    let timeout_ms = timeout.as_millis() as u64;
    // Dropping the `wait_with_output` future on expiry drops the child, and
    // `kill_on_drop` terminates it.
    let outcome = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_elapsed) => {
            warn!(%run_id, timeout_ms, "helper exceeded its deadline; killed");
            Err(TransportError::TimedOut { timeout_ms })
        }
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Ok(Ok(output)) => collect_output(&output, result_file.as_deref()).await,
    };

    if let Some(path) = &result_file {
        // Absent when the script never wrote it.
        let _ = tokio::fs::remove_file(path).await;
    }
    if done.send(outcome).is_err() {
        debug!(%run_id, "helper finished after its caller stopped waiting");
    }
}

async fn collect_output(
    output: &std::process::Output,
    result_file: Option<&Path>,
) -> Result<RunOutput, TransportError> {
    let exit_code = output.status.code();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let text = match result_file {
        None => String::from_utf8_lossy(&output.stdout).into_owned(),
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(source) if output.status.success() => {
                return Err(TransportError::ResultMissing {
                    path: path.to_path_buf(),
                    source,
                })
            }
            // A failed run may not have written its result; report the exit.
            Err(_) => String::new(),
        },
    };
    Ok(RunOutput {
        exit_code,
        output: text,
        stderr,
    })
}

// ---------------------------------------------------------------------------
// ExternalProcessBackend
// ---------------------------------------------------------------------------

/// Backend for the `environment` channel.
pub struct ExternalProcessBackend {
    transport: Arc<dyn ProcessTransport>,
    config: ExternalProcessConfig,
    interpreter_version: Mutex<Option<String>>,
}

impl ExternalProcessBackend {
    pub fn new(transport: Arc<dyn ProcessTransport>, config: ExternalProcessConfig) -> Self {
        Self {
            transport,
            config,
            interpreter_version: Mutex::new(None),
        }
    }

    /// Interpreter banner captured by the last successful startup.
    #[must_use]
    pub fn interpreter_version(&self) -> Option<String> {
        self.interpreter_version.lock().clone()
    }

    async fn run(
        &self,
        script: String,
        args: Vec<String>,
        timeout_ms: Option<u64>,
    ) -> Result<RunOutput, BackendError> {
        let cap = self.config.script_timeout_ms;
        let timeout = Duration::from_millis(timeout_ms.map_or(cap, |t| t.min(cap)));
        let ticket = self
            .transport
            .launch(ProcessJob {
                script,
                args,
                timeout,
            })
            .await?;
        debug!(run_id = %ticket.run_id, "waiting for helper");
        Ok(ticket.wait().await?)
    }
}

#[async_trait]
impl Backend for ExternalProcessBackend {
    fn channel(&self) -> Channel {
        Channel::Environment
    }

    async fn start(&self) -> Result<(), BackendError> {
        let version = self.transport.probe().await?;
        info!(
            interpreter = %self.config.interpreter.display(),
            version = %version,
            "helper environment available"
        );
        *self.interpreter_version.lock() = Some(version);
        Ok(())
    }

    async fn invoke(&self, call: Call) -> Result<Payload, BackendError> {
        match call {
            Call::IsInstalled => Ok(Payload::Bool(self.transport.probe().await.is_ok())),
            Call::RunScript(job) => {
                let script = job.script.clone();
                let out = self.run(job.script, job.args, job.timeout_ms).await?;
                if out.succeeded() {
                    Ok(json_or_text(out.output))
                } else {
                    Err(BackendError::Failed(out.failure_message(&script)))
                }
            }
            Call::ProcessImage {
                image_path,
                timeout_ms,
            } => {
                let script = self.config.recognition_script.clone();
                let out = self.run(script.clone(), vec![image_path], timeout_ms).await?;
                match (out.succeeded(), decode_scan_report(&out.output)) {
                    (true, Ok(report)) => Ok(Payload::Recognition(report)),
                    (_, Err(DecodeError::Reported(message))) => Err(BackendError::Failed(message)),
                    (false, _) => Err(BackendError::Failed(out.failure_message(&script))),
                    (true, Err(e)) => Err(e.into()),
                }
            }
            other => Err(BackendError::Unsupported {
                method: other.name(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use platebridge_core::ErrorCode;
    use tempfile::TempDir;

    use super::*;
    use crate::service::operation::ScriptJob;

    fn sh_config(dir: &TempDir) -> ExternalProcessConfig {
        ExternalProcessConfig {
            interpreter: PathBuf::from("sh"),
            probe_args: vec!["-c".into(), "echo sh-probe".into()],
            scripts_dir: dir.path().to_path_buf(),
            recognition_script: "scan.sh".into(),
            work_dir: dir.path().to_path_buf(),
            script_timeout_ms: 5_000,
            ..ExternalProcessConfig::default()
        }
    }

    fn write_script(dir: &TempDir, name: &str, body: &str) {
        std::fs::write(dir.path().join(name), body).unwrap();
    }

    fn backend(config: ExternalProcessConfig) -> ExternalProcessBackend {
        let transport = Arc::new(LocalProcessTransport::new(config.clone()));
        ExternalProcessBackend::new(transport, config)
    }

    #[tokio::test]
    async fn start_probes_interpreter() {
        let dir = TempDir::new().unwrap();
        let backend = backend(sh_config(&dir));
        backend.start().await.unwrap();
        assert_eq!(backend.interpreter_version().as_deref(), Some("sh-probe"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_transport_error() {
        let dir = TempDir::new().unwrap();
        let mut config = sh_config(&dir);
        config.interpreter = PathBuf::from("/nonexistent/platebridge-python");
        let backend = backend(config);

        let err = backend.start().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportError);
        let installed = backend.invoke(Call::IsInstalled).await.unwrap();
        assert_eq!(installed, Payload::Bool(false));
    }

    #[tokio::test]
    async fn run_script_returns_stdout() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "hello.sh", "echo \"{\\\"greeting\\\": \\\"$1\\\"}\"\n");
        let backend = backend(sh_config(&dir));

        let payload = backend
            .invoke(Call::RunScript(ScriptJob {
                script: "hello.sh".into(),
                args: vec!["plate".into()],
                timeout_ms: None,
            }))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Json(serde_json::json!({ "greeting": "plate" })));
    }

    #[tokio::test]
    async fn failing_script_reports_exit_and_stderr() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "fail.sh", "echo 'model missing' >&2\nexit 3\n");
        let backend = backend(sh_config(&dir));

        let err = backend
            .invoke(Call::RunScript(ScriptJob {
                script: "fail.sh".into(),
                args: vec![],
                timeout_ms: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BackendError);
        assert!(err.to_string().contains("status 3"));
        assert!(err.to_string().contains("model missing"));
    }

    #[tokio::test]
    async fn slow_script_is_killed_at_deadline() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "slow.sh", "sleep 5\n");
        let backend = backend(sh_config(&dir));

        let started = Instant::now();
        let err = backend
            .invoke(Call::RunScript(ScriptJob {
                script: "slow.sh".into(),
                args: vec![],
                timeout_ms: Some(100),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unknown_script_is_transport_error() {
        let dir = TempDir::new().unwrap();
        let backend = backend(sh_config(&dir));
        let err = backend
            .invoke(Call::RunScript(ScriptJob {
                script: "absent.sh".into(),
                args: vec![],
                timeout_ms: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportError);
    }

    #[tokio::test]
    async fn result_file_channel_reads_file() {
        let dir = TempDir::new().unwrap();
        write_script(
            &dir,
            "file.sh",
            "echo 'noise on stdout'\nprintf '[1, 2, 3]' > \"$PLATEBRIDGE_RESULT_FILE\"\n",
        );
        let mut config = sh_config(&dir);
        config.result_channel = ResultChannel::ResultFile;
        let backend = backend(config);

        let payload = backend
            .invoke(Call::RunScript(ScriptJob {
                script: "file.sh".into(),
                args: vec![],
                timeout_ms: None,
            }))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Json(serde_json::json!([1, 2, 3])));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("platebridge-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn process_image_decodes_scan_report() {
        let dir = TempDir::new().unwrap();
        write_script(
            &dir,
            "scan.sh",
            r#"cat <<EOF
{"success": true, "processing_time": 0.5,
 "plates_detected": [{"plate_number": "KLM4567", "confidence": 88.0, "region": "us",
                      "coordinates": {"x": 5, "y": 5, "width": 60, "height": 20}}],
 "image_info": {"path": "$1"}, "alpr_engine": "opencv"}
EOF
"#,
        );
        let backend = backend(sh_config(&dir));

        let payload = backend
            .invoke(Call::ProcessImage {
                image_path: "car.jpg".into(),
                timeout_ms: None,
            })
            .await
            .unwrap();
        let Payload::Recognition(report) = payload else {
            panic!("expected recognition payload");
        };
        assert_eq!(report.records[0].plate, "KLM4567");
        assert_eq!(report.engine.as_deref(), Some("opencv"));
    }

    #[tokio::test]
    async fn process_image_reported_error() {
        let dir = TempDir::new().unwrap();
        write_script(
            &dir,
            "scan.sh",
            "echo '{\"error\": \"Image file not found\", \"success\": false}'\nexit 1\n",
        );
        let backend = backend(sh_config(&dir));

        let err = backend
            .invoke(Call::ProcessImage {
                image_path: "nope.jpg".into(),
                timeout_ms: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BackendError);
        assert_eq!(err.to_string(), "Image file not found");
    }
}
