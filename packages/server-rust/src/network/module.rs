//! REST listener with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener and
//! `serve()` accepts requests until shutdown. The split lets the gateway
//! bring up the RPC listener between binding and serving.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    api_get_handler, api_post_handler, health_handler, liveness_handler, readiness_handler,
    AppState,
};
use super::middleware::apply_http_layers;
use super::shutdown::ShutdownController;
use crate::registry::ApiRegistry;
use crate::rpc::RpcMonitor;

/// Assembles the router: health probes plus the API routes under the mount.
///
/// Routes:
/// - `GET /health`, `GET /health/live`, `GET /health/ready`
/// - `GET|POST {mount}`, `{mount}/`, `{mount}/{*path}`
pub fn build_router(config: &NetworkConfig, state: AppState) -> Router {
    let api: MethodRouter<AppState> = get(api_get_handler).post(api_post_handler);
    let mount = config.mount_path();

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler));

    let router = if mount.is_empty() {
        router.route("/", api.clone()).route("/{*path}", api)
    } else {
        router
            .route(&mount, api.clone())
            .route(&format!("{mount}/"), api.clone())
            .route(&format!("{mount}/{{*path}}"), api)
    };

    apply_http_layers(router, config).with_state(state)
}

/// Owns the REST listener lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: Arc<ApiRegistry>,
    shutdown: Arc<ShutdownController>,
    rpc: Option<RpcMonitor>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, registry: Arc<ApiRegistry>) -> Self {
        Self {
            config,
            listener: None,
            registry,
            shutdown: Arc::new(ShutdownController::new()),
            rpc: None,
        }
    }

    /// Exposes RPC listener status on `/health`.
    pub fn set_rpc_monitor(&mut self, monitor: RpcMonitor) {
        self.rpc = Some(monitor);
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn app_state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            mount: Arc::from(self.config.mount_path()),
            rpc: self.rpc.clone(),
            start_time: Instant::now(),
        }
    }

    /// Binds the listener and returns the bound address, which differs from
    /// the configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;

        info!(addr = %local, mount = %self.config.mount_path(), "REST listener bound");

        self.listener = Some(listener);
        Ok(local)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight calls.
    ///
    /// Health moves to `Draining` as soon as the signal fires and to
    /// `Stopped` once every API call has returned.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = build_router(&self.config, self.app_state());
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("serving REST API");

        let signal_ctrl = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal_ctrl.trigger_shutdown();
            })
            .await?;

        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("REST listener drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with calls still in flight"
            );
        }
        Ok(())
    }
}
