//! Composition root: one registry shared by the REST and RPC front-ends.
//!
//! Lifecycle follows the deferred startup of [`NetworkModule`]:
//! `new()` builds everything, `start()` binds both listeners, `serve()`
//! runs until shutdown and then tears down the RPC supervisor and the
//! registry, in that order.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::GatewayConfig;
use crate::network::NetworkModule;
use crate::registry::ApiRegistry;
use crate::rpc::RpcSupervisor;

/// Addresses bound by [`Gateway::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub rest: SocketAddr,
    pub rpc: Option<SocketAddr>,
}

pub struct Gateway {
    registry: Arc<ApiRegistry>,
    network: NetworkModule,
    rpc: Option<RpcSupervisor>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(ApiRegistry::new());
        let mut network = NetworkModule::new(config.network, Arc::clone(&registry));
        let rpc = config
            .rpc
            .map(|rpc| RpcSupervisor::new(rpc, Arc::clone(&registry)));
        if let Some(supervisor) = &rpc {
            network.set_rpc_monitor(supervisor.monitor());
        }

        Self {
            registry,
            network,
            rpc,
        }
    }

    /// The registry handlers are installed into.
    #[must_use]
    pub fn registry(&self) -> Arc<ApiRegistry> {
        Arc::clone(&self.registry)
    }

    /// Binds the REST listener and, when configured, starts the RPC supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if either listener cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<BoundAddrs> {
        let rest = self.network.start().await?;
        let rpc = match &self.rpc {
            Some(supervisor) => Some(supervisor.start().await?),
            None => None,
        };

        info!(rest = %rest, rpc = ?rpc, "gateway started");
        Ok(BoundAddrs { rest, rpc })
    }

    /// Serves until `shutdown` resolves, then destroys the RPC supervisor
    /// and the registry.
    ///
    /// # Errors
    ///
    /// Returns the REST listener's error; teardown still runs.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Self {
            registry,
            network,
            rpc,
        } = self;

        let served = network.serve(shutdown).await;

        if let Some(supervisor) = rpc {
            supervisor.destroy().await;
        }
        registry.destroy();
        info!("gateway stopped");
        served
    }
}
