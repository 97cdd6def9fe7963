//! Bridge health and in-flight call tracking for graceful shutdown.
//!
//! Health transitions go through an `ArcSwap` so the router can check them
//! on every call without locking. Each dispatched call holds an
//! [`InFlightGuard`] until its envelope is delivered or discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Bridge health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeHealth {
    /// Built but not yet accepting calls.
    Starting,
    Ready,
    /// New calls are rejected; calls already dispatched run to completion.
    Draining,
    /// All in-flight calls have finished.
    Stopped,
}

impl BridgeHealth {
    #[must_use]
    pub fn accepts_calls(self) -> bool {
        matches!(self, BridgeHealth::Starting | BridgeHealth::Ready)
    }
}

/// Coordinates draining across the router and dispatcher.
#[derive(Debug)]
pub struct ShutdownController {
    in_flight: Arc<AtomicU64>,
    health: ArcSwap<BridgeHealth>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            health: ArcSwap::from_pointee(BridgeHealth::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health.store(Arc::new(BridgeHealth::Ready));
    }

    /// Moves to `Draining`; the router rejects calls from here on.
    pub fn trigger_shutdown(&self) {
        self.health.store(Arc::new(BridgeHealth::Draining));
    }

    #[must_use]
    pub fn health(&self) -> BridgeHealth {
        **self.health.load()
    }

    /// Counts one dispatched call until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight calls to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once drained. Returns `false` if
    /// the timeout expired; the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health.store(Arc::new(BridgeHealth::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
