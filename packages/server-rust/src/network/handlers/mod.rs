//! HTTP handlers and the state they share through axum's `State` extractor.

pub mod api;
pub mod health;

pub use api::{api_get_handler, api_post_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::registry::ApiRegistry;
use crate::rpc::RpcMonitor;

/// Shared application state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Registry every API call is dispatched through.
    pub registry: Arc<ApiRegistry>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Normalized mount prefix stripped from request paths.
    pub mount: Arc<str>,
    /// RPC listener status, when the RPC front-end is enabled.
    pub rpc: Option<RpcMonitor>,
    pub start_time: Instant,
}
