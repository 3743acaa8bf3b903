//! Transport-level middleware for the REST listener.
//!
//! Layers listed first are outermost. Body-size enforcement is not a tower
//! layer here: the API handlers read the body through axum's
//! `DefaultBodyLimit` so an oversized body still yields an `ApiResult`.

use axum::extract::DefaultBodyLimit;
use axum::http::header::HeaderName;
use axum::http::Method;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::handlers::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wraps `router` in the HTTP middleware stack.
///
/// Order, outermost first: request id, tracing, gzip, CORS, request-id
/// propagation, body limit. There is no request timeout: a slow handler
/// still answers with its envelope.
pub fn apply_http_layers(router: Router<AppState>, config: &NetworkConfig) -> Router<AppState> {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    router
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(build_cors_layer(&config.cors_origins))
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
}

/// `"*"` anywhere in `origins` allows any origin; otherwise an allowlist of
/// the entries that parse as header values.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
