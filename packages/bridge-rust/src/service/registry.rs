//! Backend registry and lifecycle state machine.
//!
//! The registry owns at most one backend per channel. Backends are created
//! lazily from registered factories on first resolve and keep their lifecycle
//! state for the life of the process:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!                              \-> Failed -> Initializing (explicit retry)
//! ```
//!
//! Startup is single-flight: concurrent `initialize` calls share one attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use platebridge_core::{Channel, ErrorCode};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::service::operation::BridgeError;

// ---------------------------------------------------------------------------
// BackendState
// ---------------------------------------------------------------------------

/// Lifecycle state of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initializing,
    Ready,
    /// Startup failed or the backend is disabled; holds the reason.
    Failed(String),
}

impl BackendState {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::Initializing => "initializing",
            BackendState::Ready => "ready",
            BackendState::Failed(_) => "failed",
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, BackendState::Ready)
    }
}

/// Factory producing the backend for a channel on first use.
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;

// ---------------------------------------------------------------------------
// BackendSlot / BackendHandle
// ---------------------------------------------------------------------------

struct Lifecycle {
    state: BackendState,
    /// Code reported for the most recent failed startup.
    failure_code: ErrorCode,
}

struct BackendSlot {
    channel: Channel,
    backend: Arc<dyn Backend>,
    lifecycle: RwLock<Lifecycle>,
    /// Serializes startup attempts.
    init_gate: Arc<tokio::sync::Mutex<()>>,
    /// Finished startup attempts; lets waiters detect that another caller
    /// already ran startup while they were queued on the gate.
    completed_attempts: AtomicU64,
    started_attempts: AtomicU64,
}

impl BackendSlot {
    fn settle(&self, result: Result<(), (ErrorCode, String)>) {
        {
            let mut lifecycle = self.lifecycle.write();
            match result {
                Ok(()) => {
                    info!(channel = %self.channel, "backend ready");
                    lifecycle.state = BackendState::Ready;
                }
                Err((code, reason)) => {
                    warn!(
                        channel = %self.channel,
                        code = %code,
                        reason = %reason,
                        "backend startup failed"
                    );
                    lifecycle.state = BackendState::Failed(reason);
                    lifecycle.failure_code = code;
                }
            }
        }
        self.completed_attempts.fetch_add(1, Ordering::AcqRel);
    }
}

/// Shared reference to one registered backend and its lifecycle state.
#[derive(Clone)]
pub struct BackendHandle {
    slot: Arc<BackendSlot>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("channel", &self.slot.channel)
            .field("state", &self.state())
            .finish()
    }
}

impl BackendHandle {
    pub(crate) fn new(backend: Arc<dyn Backend>) -> Self {
        let state = match backend.disabled_reason() {
            Some(reason) => BackendState::Failed(reason.to_string()),
            None => BackendState::Uninitialized,
        };
        Self {
            slot: Arc::new(BackendSlot {
                channel: backend.channel(),
                backend,
                lifecycle: RwLock::new(Lifecycle {
                    state,
                    failure_code: ErrorCode::BackendError,
                }),
                init_gate: Arc::new(tokio::sync::Mutex::new(())),
                completed_attempts: AtomicU64::new(0),
                started_attempts: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.slot.channel
    }

    #[must_use]
    pub fn state(&self) -> BackendState {
        self.slot.lifecycle.read().state.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.lifecycle.read().state.is_ready()
    }

    /// Reason this backend can never become ready, if it is disabled.
    #[must_use]
    pub fn disabled_reason(&self) -> Option<&str> {
        self.slot.backend.disabled_reason()
    }

    /// Number of times backend startup has actually been run.
    #[must_use]
    pub fn startup_attempts(&self) -> u64 {
        self.slot.started_attempts.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.slot.backend
    }

    /// Checks that a non-lifecycle call may run now.
    ///
    /// # Errors
    ///
    /// `NativeLib` for a disabled backend, `NotInitialized` otherwise unless
    /// the backend is `Ready`.
    pub fn check_ready(&self) -> Result<(), BridgeError> {
        if let Some(reason) = self.disabled_reason() {
            return Err(BridgeError::NativeLib {
                channel: self.slot.channel,
                message: reason.to_string(),
            });
        }
        let lifecycle = self.slot.lifecycle.read();
        match &lifecycle.state {
            BackendState::Ready => Ok(()),
            BackendState::Failed(reason) => Err(BridgeError::NotInitialized {
                channel: self.slot.channel,
                reason: Some(format!("last startup failed: {reason}")),
            }),
            BackendState::Initializing => Err(BridgeError::NotInitialized {
                channel: self.slot.channel,
                reason: Some("initialization in progress".to_string()),
            }),
            BackendState::Uninitialized => Err(BridgeError::NotInitialized {
                channel: self.slot.channel,
                reason: None,
            }),
        }
    }

    /// Drives the backend to `Ready`, running startup at most once per attempt.
    ///
    /// Returns immediately when already `Ready`. From `Uninitialized` or
    /// `Failed` a new attempt starts; callers arriving while an attempt is in
    /// flight wait for it and share its outcome. A panic during startup is
    /// contained and recorded as `Failed`.
    ///
    /// # Errors
    ///
    /// `NativeLib` for a disabled backend, `StartupFailed` when the attempt
    /// this caller observed failed.
    pub async fn ensure_initialized(&self) -> Result<(), BridgeError> {
        let slot = &self.slot;
        if let Some(reason) = slot.backend.disabled_reason() {
            return Err(BridgeError::NativeLib {
                channel: slot.channel,
                message: reason.to_string(),
            });
        }
        if self.is_ready() {
            return Ok(());
        }

        let observed = slot.completed_attempts.load(Ordering::Acquire);
        let gate = Arc::clone(&slot.init_gate).lock_owned().await;

        if slot.completed_attempts.load(Ordering::Acquire) != observed {
            // Another caller ran startup while we were queued.
            debug!(channel = %slot.channel, "sharing outcome of concurrent initialization");
            return self.startup_outcome();
        }
        if self.is_ready() {
            return Ok(());
        }

        slot.lifecycle.write().state = BackendState::Initializing;
        let attempt = slot.started_attempts.fetch_add(1, Ordering::AcqRel) + 1;
        info!(channel = %slot.channel, attempt, "initializing backend");

        // The attempt runs detached so it settles the state even if this
        // caller stops waiting.
        let attempt_slot = Arc::clone(slot);
        let settled = tokio::spawn(async move {
            let _gate = gate;
            let backend = Arc::clone(&attempt_slot.backend);
            let result = match tokio::spawn(async move { backend.start().await }).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err((e.code(), e.to_string())),
                Err(join) => Err((ErrorCode::InternalError, format!("startup panicked: {join}"))),
            };
            attempt_slot.settle(result);
        });
        if let Err(e) = settled.await {
            return Err(BridgeError::Internal(format!("initialization task failed: {e}")));
        }
        self.startup_outcome()
    }

    fn startup_outcome(&self) -> Result<(), BridgeError> {
        let lifecycle = self.slot.lifecycle.read();
        match &lifecycle.state {
            BackendState::Ready => Ok(()),
            BackendState::Failed(reason) => Err(BridgeError::StartupFailed {
                channel: self.slot.channel,
                code: lifecycle.failure_code,
                reason: reason.clone(),
            }),
            other => Err(BridgeError::NotInitialized {
                channel: self.slot.channel,
                reason: Some(format!("backend is {}", other.label())),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// BackendRegistry
// ---------------------------------------------------------------------------

/// Channel-keyed registry of backends.
///
/// Factories are registered up front; the backend itself is only created the
/// first time its channel is resolved. Shutdown runs in reverse creation order.
pub struct BackendRegistry {
    factories: DashMap<Channel, BackendFactory>,
    handles: DashMap<Channel, BackendHandle>,
    creation_order: RwLock<Vec<Channel>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            handles: DashMap::new(),
            creation_order: RwLock::new(Vec::new()),
        }
    }

    /// Registers (or replaces) the factory for `channel`.
    ///
    /// Replacing a factory has no effect on a backend that was already created.
    pub fn register_factory<F>(&self, channel: Channel, factory: F)
    where
        F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        self.factories.insert(channel, Arc::new(factory));
    }

    /// Channels that have a factory registered.
    #[must_use]
    pub fn registered_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.factories.contains_key(c))
            .collect()
    }

    /// Returns the handle for `channel`, creating the backend on first use.
    ///
    /// Returns `None` when no factory is registered for the channel.
    #[must_use]
    pub fn resolve(&self, channel: Channel) -> Option<BackendHandle> {
        if let Some(existing) = self.handles.get(&channel) {
            return Some(existing.value().clone());
        }
        let factory = self.factories.get(&channel).map(|f| Arc::clone(f.value()))?;
        let handle = self
            .handles
            .entry(channel)
            .or_insert_with(|| {
                let backend = factory();
                debug!(channel = %channel, "created backend");
                self.creation_order.write().push(channel);
                BackendHandle::new(backend)
            })
            .value()
            .clone();
        Some(handle)
    }

    /// Returns the handle for `channel` only if its backend already exists.
    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<BackendHandle> {
        self.handles.get(&channel).map(|h| h.value().clone())
    }

    /// Shuts down all created backends in reverse creation order.
    ///
    /// Every backend is asked to shut down even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown error encountered.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let order = self.creation_order.read().clone();
        let mut first_error = None;
        for channel in order.iter().rev() {
            let Some(handle) = self.get(*channel) else {
                continue;
            };
            if let Err(e) = handle.backend().shutdown(terminate).await {
                warn!(channel = %channel, error = %e, "backend shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
