//! The assembled bridge: registry, router and shutdown wired together.

use std::sync::Arc;
use std::time::Duration;

use platebridge_core::{Channel, Envelope};
use tracing::{info, warn};

use crate::backend::embedded::MissingModuleLoader;
use crate::backend::{
    Backend, DisabledBackend, EmbeddedModuleBackend, ExternalProcessBackend, LocalProcessTransport,
    ModuleLoader, ProcessTransport,
};
use crate::service::{
    BackendFactory, BackendHandle, BackendRegistry, BridgeConfig, BridgeHealth, CallId,
    CallerHandle, ChannelRouter, InvocationRequest, ShutdownController,
};

/// Entry point for callers.
pub struct Bridge {
    router: ChannelRouter,
    registry: Arc<BackendRegistry>,
    shutdown: Arc<ShutdownController>,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    /// Starts building a bridge with the default backends for every channel.
    #[must_use]
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder {
            config,
            module_loader: None,
            transport: None,
            overrides: Vec::new(),
        }
    }

    #[must_use]
    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Routes `request`; its envelope is delivered to `caller`'s inbox.
    pub fn invoke(&self, request: InvocationRequest, caller: &CallerHandle) -> CallId {
        self.router.route(request, caller)
    }

    /// Routes `request` and waits for its envelope.
    pub async fn call(&self, request: InvocationRequest) -> Envelope {
        self.router.call(request).await
    }

    /// Backend handle for `channel`, creating the backend if needed.
    #[must_use]
    pub fn backend(&self, channel: Channel) -> Option<BackendHandle> {
        self.registry.resolve(channel)
    }

    #[must_use]
    pub fn routing_table(&self) -> Vec<(Channel, Vec<&'static str>)> {
        self.router.routing_table()
    }

    #[must_use]
    pub fn health(&self) -> BridgeHealth {
        self.shutdown.health()
    }

    /// Stops accepting calls, waits for in-flight calls, then shuts backends down.
    ///
    /// Returns whether all in-flight calls finished within the drain timeout.
    /// Backends are terminated without graceful cleanup if they did not.
    ///
    /// # Errors
    ///
    /// Returns the first backend shutdown error.
    pub async fn shutdown(&self) -> anyhow::Result<bool> {
        self.shutdown.trigger_shutdown();
        let drained = self
            .shutdown
            .wait_for_drain(Duration::from_millis(self.config.drain_timeout_ms))
            .await;
        if !drained {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timed out; terminating backends"
            );
        }
        self.registry.shutdown_all(!drained).await?;
        info!(drained, "bridge stopped");
        Ok(drained)
    }
}

/// Configures backends before the bridge is assembled.
pub struct BridgeBuilder {
    config: BridgeConfig,
    module_loader: Option<Arc<dyn ModuleLoader>>,
    transport: Option<Arc<dyn ProcessTransport>>,
    overrides: Vec<(Channel, BackendFactory)>,
}

impl BridgeBuilder {
    /// Loader for the embedded recognition module.
    #[must_use]
    pub fn embedded_loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.module_loader = Some(loader);
        self
    }

    /// Transport for helper scripts; defaults to local child processes.
    #[must_use]
    pub fn process_transport(mut self, transport: Arc<dyn ProcessTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the backend for `channel`.
    #[must_use]
    pub fn backend_factory<F>(mut self, channel: Channel, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        self.overrides.push((channel, Arc::new(factory)));
        self
    }

    /// Assembles the bridge. Backends are created on first use.
    #[must_use]
    pub fn build(self) -> Bridge {
        let config = Arc::new(self.config);
        let registry = Arc::new(BackendRegistry::new());

        registry.register_factory(Channel::Legacy, || {
            Arc::new(DisabledBackend::legacy()) as Arc<dyn Backend>
        });

        let loader = self
            .module_loader
            .unwrap_or_else(|| Arc::new(MissingModuleLoader) as Arc<dyn ModuleLoader>);
        let embedded_config = config.embedded.clone();
        registry.register_factory(Channel::Embedded, move || {
            Arc::new(EmbeddedModuleBackend::new(
                Arc::clone(&loader),
                embedded_config.clone(),
            )) as Arc<dyn Backend>
        });

        let external_config = config.external.clone();
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(LocalProcessTransport::new(external_config.clone()))
                as Arc<dyn ProcessTransport>
        });
        registry.register_factory(Channel::Environment, move || {
            Arc::new(ExternalProcessBackend::new(
                Arc::clone(&transport),
                external_config.clone(),
            )) as Arc<dyn Backend>
        });

        for (channel, factory) in self.overrides {
            registry.register_factory(channel, move || factory());
        }

        let shutdown = Arc::new(ShutdownController::new());
        let router = ChannelRouter::new(
            Arc::clone(&registry),
            Arc::clone(&config),
            Arc::clone(&shutdown),
        );
        shutdown.set_ready();

        Bridge {
            router,
            registry,
            shutdown,
            config,
        }
    }
}
