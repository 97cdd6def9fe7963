//! In-process recognition module backend.
//!
//! The module is loaded once by `initialize` through a [`ModuleLoader`] and
//! then owned by a single [`BackgroundWorker`]: every call is queued and runs
//! on a blocking thread, one at a time. Module functions answer with JSON
//! text, which this backend decodes into recognition records.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use platebridge_core::{
    decode_engine_comparison, decode_engine_results, decode_scan_report, Channel, Payload,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{json_or_text, Backend, BackendError};
use crate::service::config::EmbeddedConfig;
use crate::service::operation::Call;
use crate::service::worker::{BackgroundRunnable, BackgroundWorker, Submitter};

// ---------------------------------------------------------------------------
// Module traits
// ---------------------------------------------------------------------------

/// Failure raised by the recognition module or its loader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModuleError {
    /// The module reported an error.
    #[error("{0}")]
    Raised(String),
    /// The module does not provide this function.
    #[error("module does not provide '{0}'")]
    Unsupported(&'static str),
    /// The module is not loaded or was lost.
    #[error("module unavailable: {0}")]
    Unavailable(String),
    /// A module function panicked.
    #[error("module panicked: {0}")]
    Panicked(String),
}

impl From<ModuleError> for BackendError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::Raised(message) => BackendError::Failed(message),
            ModuleError::Unsupported(method) => BackendError::Unsupported { method },
            ModuleError::Unavailable(_) => BackendError::Failed(err.to_string()),
            ModuleError::Panicked(_) => BackendError::Crashed(err.to_string()),
        }
    }
}

/// An in-process recognition module.
///
/// Functions return the module's JSON text. The module is not reentrant;
/// the backend never calls it concurrently. Only the functions every module
/// has are required, the hybrid-engine ones default to `Unsupported`.
pub trait RecognitionModule: Send + 'static {
    fn version_info(&mut self) -> Result<String, ModuleError>;

    fn process_image_file(&mut self, image_path: &str) -> Result<String, ModuleError>;

    fn set_confidence_threshold(&mut self, threshold: f64) -> Result<String, ModuleError>;

    fn process_image_bytes(&mut self, _image: &[u8]) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("process_image_bytes"))
    }

    fn set_debug_mode(&mut self, _enabled: bool) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("set_debug_mode"))
    }

    fn available_engines(&mut self) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("get_available_alpr_engines"))
    }

    fn process_with_engine(
        &mut self,
        _image_path: &str,
        _engine: &str,
    ) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("process_with_specific_engine"))
    }

    fn compare_engines(&mut self, _image_path: &str) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("compare_all_engines"))
    }

    fn process_with_best_engine(&mut self, _image_path: &str) -> Result<String, ModuleError> {
        Err(ModuleError::Unsupported("process_with_best_engine"))
    }
}

/// Produces the module on `initialize`. Loading may block.
pub trait ModuleLoader: Send + Sync + 'static {
    /// Module name used in logs and error messages.
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the module cannot be loaded.
    fn load(&self) -> Result<Box<dyn RecognitionModule>, ModuleError>;
}

/// Loader backed by a closure.
pub struct FnModuleLoader<F> {
    name: String,
    load: F,
}

impl<F> FnModuleLoader<F>
where
    F: Fn() -> Result<Box<dyn RecognitionModule>, ModuleError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, load: F) -> Self {
        Self {
            name: name.into(),
            load,
        }
    }
}

impl<F> ModuleLoader for FnModuleLoader<F>
where
    F: Fn() -> Result<Box<dyn RecognitionModule>, ModuleError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<dyn RecognitionModule>, ModuleError> {
        (self.load)()
    }
}

/// Loader for builds that link no recognition module.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingModuleLoader;

impl ModuleLoader for MissingModuleLoader {
    fn name(&self) -> &str {
        "predator_alpr"
    }

    fn load(&self) -> Result<Box<dyn RecognitionModule>, ModuleError> {
        Err(ModuleError::Unavailable(
            "no embedded recognition module is linked into this build".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// ModuleRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Decoding {
    Passthrough,
    ScanReport,
    EngineResults,
    Comparison,
}

#[derive(Debug)]
enum ModuleCall {
    VersionInfo,
    ProcessFile(String),
    ProcessBytes(Vec<u8>),
    SetThreshold(f64),
    SetDebug(bool),
    Engines,
    WithEngine(String, String),
    Compare(String),
    BestEngine(String),
}

impl ModuleCall {
    fn from_call(call: Call) -> Result<Self, BackendError> {
        Ok(match call {
            Call::GetVersionInfo => ModuleCall::VersionInfo,
            Call::ProcessImageFile { image_path } => ModuleCall::ProcessFile(image_path),
            Call::ProcessImageBytes { image } => ModuleCall::ProcessBytes(image),
            Call::SetConfidenceThreshold { threshold } => ModuleCall::SetThreshold(threshold),
            Call::SetDebugMode { enabled } => ModuleCall::SetDebug(enabled),
            Call::ListEngines => ModuleCall::Engines,
            Call::ProcessWithEngine { image_path, engine } => {
                ModuleCall::WithEngine(image_path, engine)
            }
            Call::CompareEngines { image_path } => ModuleCall::Compare(image_path),
            Call::ProcessWithBestEngine { image_path } => ModuleCall::BestEngine(image_path),
            other => return Err(BackendError::Unsupported { method: other.name() }),
        })
    }

    fn decoding(&self) -> Decoding {
        match self {
            ModuleCall::ProcessFile(_) | ModuleCall::ProcessBytes(_) => Decoding::ScanReport,
            ModuleCall::WithEngine(..) | ModuleCall::BestEngine(_) => Decoding::EngineResults,
            ModuleCall::Compare(_) => Decoding::Comparison,
            _ => Decoding::Passthrough,
        }
    }

    fn apply(self, module: &mut dyn RecognitionModule) -> Result<String, ModuleError> {
        match self {
            ModuleCall::VersionInfo => module.version_info(),
            ModuleCall::ProcessFile(path) => module.process_image_file(&path),
            ModuleCall::ProcessBytes(image) => module.process_image_bytes(&image),
            ModuleCall::SetThreshold(threshold) => module.set_confidence_threshold(threshold),
            ModuleCall::SetDebug(enabled) => module.set_debug_mode(enabled),
            ModuleCall::Engines => module.available_engines(),
            ModuleCall::WithEngine(path, engine) => module.process_with_engine(&path, &engine),
            ModuleCall::Compare(path) => module.compare_engines(&path),
            ModuleCall::BestEngine(path) => module.process_with_best_engine(&path),
        }
    }
}

struct ModuleTask {
    call: ModuleCall,
    reply: oneshot::Sender<Result<String, ModuleError>>,
}

/// Owns the module inside the worker task.
struct ModuleRunner {
    module: Option<Box<dyn RecognitionModule>>,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[async_trait]
impl BackgroundRunnable for ModuleRunner {
    type Task = ModuleTask;

    async fn run(&mut self, task: ModuleTask) {
        let ModuleTask { call, reply } = task;
        let Some(mut module) = self.module.take() else {
            let _ = reply.send(Err(ModuleError::Unavailable(
                "module was lost by an earlier call".to_string(),
            )));
            return;
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| call.apply(module.as_mut())));
            (module, result)
        })
        .await;

        let result = match joined {
            Ok((module, result)) => {
                self.module = Some(module);
                result.unwrap_or_else(|panic| Err(ModuleError::Panicked(panic_message(&*panic))))
            }
            Err(e) => {
                error!(error = %e, "embedded module thread failed; module lost");
                Err(ModuleError::Unavailable(format!("module thread failed: {e}")))
            }
        };
        // The caller may have timed out; the result is then discarded.
        let _ = reply.send(result);
    }

    async fn shutdown(&mut self) {
        if self.module.take().is_some() {
            debug!("embedded module released");
        }
    }
}

// ---------------------------------------------------------------------------
// EmbeddedModuleBackend
// ---------------------------------------------------------------------------

struct ModuleSession {
    worker: BackgroundWorker<ModuleRunner>,
    submitter: Submitter<ModuleTask>,
    version: String,
}

/// Backend for the `embedded` channel.
pub struct EmbeddedModuleBackend {
    loader: Arc<dyn ModuleLoader>,
    config: EmbeddedConfig,
    session: Mutex<Option<ModuleSession>>,
}

impl EmbeddedModuleBackend {
    pub fn new(loader: Arc<dyn ModuleLoader>, config: EmbeddedConfig) -> Self {
        Self {
            loader,
            config,
            session: Mutex::new(None),
        }
    }

    /// Version string reported by the loaded module.
    #[must_use]
    pub fn module_version(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.version.clone())
    }

    async fn submit(
        submitter: &Submitter<ModuleTask>,
        call: ModuleCall,
    ) -> Result<String, BackendError> {
        let (reply, rx) = oneshot::channel();
        submitter
            .submit(ModuleTask { call, reply })
            .await
            .map_err(|e| BackendError::Failed(format!("embedded module queue closed: {e}")))?;
        let result = rx
            .await
            .map_err(|_| BackendError::Failed("embedded module dropped the call".to_string()))?;
        Ok(result?)
    }
}

#[async_trait]
impl Backend for EmbeddedModuleBackend {
    fn channel(&self) -> Channel {
        Channel::Embedded
    }

    async fn start(&self) -> Result<(), BackendError> {
        let name = self.loader.name().to_string();
        let loader = Arc::clone(&self.loader);
        let module = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| BackendError::Crashed(format!("loading '{name}' failed: {e}")))?
            .map_err(|e| BackendError::Failed(format!("failed to load '{name}': {e}")))?;

        let mut worker = BackgroundWorker::start(
            ModuleRunner {
                module: Some(module),
            },
            self.config.queue_capacity,
        );
        let Some(submitter) = worker.submitter() else {
            return Err(BackendError::Failed("embedded module worker did not start".to_string()));
        };

        // A module only counts as loaded once it answers a version query.
        let version = match Self::submit(&submitter, ModuleCall::VersionInfo).await {
            Ok(version) => version.trim().to_string(),
            Err(e) => {
                worker.stop().await;
                return Err(BackendError::Failed(format!(
                    "'{name}' did not answer a version query: {e}"
                )));
            }
        };
        info!(module = %name, version = %version, "embedded module loaded");

        let previous = self.session.lock().replace(ModuleSession {
            worker,
            submitter,
            version,
        });
        if let Some(mut old) = previous {
            old.worker.stop().await;
        }
        Ok(())
    }

    async fn invoke(&self, call: Call) -> Result<Payload, BackendError> {
        let call = ModuleCall::from_call(call)?;
        let decoding = call.decoding();
        let submitter = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.submitter.clone())
            .ok_or_else(|| BackendError::Failed("embedded module is not loaded".to_string()))?;

        let raw = Self::submit(&submitter, call).await?;
        let payload = match decoding {
            Decoding::Passthrough => json_or_text(raw),
            Decoding::ScanReport => Payload::Recognition(decode_scan_report(&raw)?),
            Decoding::EngineResults => Payload::Recognition(decode_engine_results(&raw)?),
            Decoding::Comparison => Payload::Comparison(decode_engine_comparison(&raw)?),
        };
        Ok(payload)
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            session.worker.stop().await;
            info!("embedded module unloaded");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
