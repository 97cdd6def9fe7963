//! `PlateBridge` routes recognition calls from an application layer to
//! interchangeable plate-recognition backends.
//!
//! Three channels are served:
//!
//! - `legacy`: the retired native engine, permanently disabled
//! - `embedded`: an in-process recognition module, serialized through a worker
//! - `environment`: helper scripts run by an external interpreter
//!
//! Every call produces exactly one [`Envelope`](platebridge_core::Envelope),
//! delivered asynchronously to the caller's inbox.

pub mod backend;
pub mod bridge;
pub mod logging;
pub mod service;

pub use bridge::{Bridge, BridgeBuilder};
pub use logging::{init_tracing, LogFormat};
pub use service::{
    BridgeConfig, BridgeError, CallerContext, CallerHandle, Delivery, InvocationRequest,
};
