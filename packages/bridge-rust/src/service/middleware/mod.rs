//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`metrics`]: Call span, counter and duration histogram
//! - [`timeout`]: Per-call deadline enforcement
//! - [`executor`]: Lifecycle check and backend invocation
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod executor;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use executor::BackendExecutor;
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
pub use timeout::TimeoutLayer;
