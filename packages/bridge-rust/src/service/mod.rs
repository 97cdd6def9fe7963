//! Call routing and execution framework.
//!
//! A call travels through these stages:
//!
//! 1. **Routing** (`router`, `classify`): request -> `RoutedCall`, or an error envelope
//! 2. **Dispatch** (`dispatcher`): background driver racing the call against cancellation
//! 3. **Middleware** (`middleware`): Tower layers (metrics, timeout, backend executor)
//! 4. **Lifecycle** (`registry`): per-channel backend state and single-flight startup
//! 5. **Delivery** (`caller`): exactly one envelope into the caller's inbox

pub mod caller;
pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod shutdown;
pub mod worker;

// Re-export key types for convenient access.
pub use caller::{CallerContext, CallerHandle, Completion, Delivery};
pub use config::{BridgeConfig, EmbeddedConfig, ExternalProcessConfig, ResultChannel};
pub use operation::{
    BridgeError, Call, CallId, Invocation, InvocationContext, InvocationRequest, ScriptJob,
};
pub use registry::{BackendFactory, BackendHandle, BackendRegistry, BackendState};
pub use router::{ChannelRouter, RoutedCall};
pub use shutdown::{BridgeHealth, ShutdownController};
pub use worker::{BackgroundRunnable, BackgroundWorker};
