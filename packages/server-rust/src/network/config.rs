//! REST listener configuration.

use std::time::Duration;

/// Mount prefix used when none (or a blank one) is configured.
pub const DEFAULT_REST_MAPPING: &str = "/api";

/// Default cap on a POST body buffered by the REST front-end.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Top-level configuration for the HTTP listener.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// URL prefix the REST front-end is mounted under, e.g. `/api`.
    pub rest_mapping: String,
    /// Largest POST body accepted before the call fails with `ServerError`.
    pub max_body_bytes: usize,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// How long shutdown waits for in-flight API calls.
    pub drain_timeout: Duration,
}

impl NetworkConfig {
    /// Normalized mount prefix: leading slash, no trailing slash, and the
    /// empty string when mounted at the root.
    #[must_use]
    pub fn mount_path(&self) -> String {
        normalize_mount(&self.rest_mapping)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            rest_mapping: DEFAULT_REST_MAPPING.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors_origins: vec!["*".to_string()],
            drain_timeout: Duration::from_secs(30),
        }
    }
}

fn normalize_mount(mapping: &str) -> String {
    let mapping = mapping.trim();
    let mapping = if mapping.is_empty() {
        DEFAULT_REST_MAPPING
    } else {
        mapping
    };
    let trimmed = mapping.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
