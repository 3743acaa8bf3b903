//! Call registry: maps `(module, api)` to handlers and dispatches calls.
//!
//! The registry is the isolation boundary between front-ends and handler
//! code. Every dispatch ends in an [`ApiResult`]: unresolved calls become
//! `NotFound`, failing or panicking handlers become `ServerError`.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use frontapi_core::{ApiCall, ApiHandler, ApiResult, WILDCARD_API};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Handlers of a single module, keyed by API name (or [`WILDCARD_API`]).
type ApiTable = DashMap<String, Arc<dyn ApiHandler>>;

// ---------------------------------------------------------------------------
// ApiRegistry
// ---------------------------------------------------------------------------

/// Concurrent `module -> api -> handler` table.
///
/// Both levels are `DashMap`s, so dispatch never serializes behind a global
/// lock and registrations for unrelated modules proceed in parallel. A module
/// entry exists only while it holds at least one handler: it is created
/// together with its first handler and removed as a whole by
/// [`unregister`](Self::unregister).
pub struct ApiRegistry {
    modules: DashMap<String, ApiTable>,
}

impl ApiRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
        }
    }

    /// Installs `handler` under `module`/`api_name`, replacing any previous one.
    ///
    /// The module table is created and populated under the same shard lock,
    /// so readers never observe an empty table.
    pub fn register(
        &self,
        module: impl Into<String>,
        api_name: impl Into<String>,
        handler: Arc<dyn ApiHandler>,
    ) {
        let module = module.into();
        let api_name = api_name.into();
        let replaced = self
            .modules
            .entry(module.clone())
            .or_default()
            .insert(api_name.clone(), handler)
            .is_some();
        debug!(module = %module, api = %api_name, replaced, "api registered");
    }

    /// Removes every handler of `module`. Returns `false` if nothing was registered.
    pub fn unregister(&self, module: &str) -> bool {
        let removed = self.modules.remove(module).is_some();
        if removed {
            info!(module = %module, "module unregistered");
        }
        removed
    }

    /// Drops all registrations. Used when the owning gateway shuts down.
    pub fn destroy(&self) {
        let count = self.modules.len();
        self.modules.clear();
        info!(modules = count, "api registry destroyed");
    }

    /// Resolves a handler: exact API name first, then the module's wildcard.
    #[must_use]
    pub fn resolve(
        &self,
        module: Option<&str>,
        api_name: Option<&str>,
    ) -> Option<Arc<dyn ApiHandler>> {
        let table = self.modules.get(module?)?;
        let handler = api_name
            .and_then(|name| table.get(name))
            .or_else(|| table.get(WILDCARD_API))
            .map(|entry| Arc::clone(entry.value()));
        handler
    }

    /// Whether a call to `module`/`api_name` would resolve to a handler.
    #[must_use]
    pub fn contains(&self, module: &str, api_name: &str) -> bool {
        self.resolve(Some(module), Some(api_name)).is_some()
    }

    /// Names of all modules with at least one handler, sorted.
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// API names registered under `module`, sorted. Empty if the module is unknown.
    #[must_use]
    pub fn apis(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .get(module)
            .map(|table| table.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Dispatches a call and converts its outcome into an envelope.
    ///
    /// The auth key is forwarded to the handler untouched; it is never
    /// evaluated here. Each dispatch is recorded in an `api_call` span.
    pub async fn call_api(
        &self,
        module: Option<&str>,
        api_name: Option<&str>,
        auth_key: Option<&str>,
        params: Value,
    ) -> ApiResult {
        let span = info_span!(
            "api_call",
            module = module.unwrap_or_default(),
            api = api_name.unwrap_or_default(),
            status = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();

            let result = match self.resolve(module, api_name) {
                Some(handler) => {
                    let call = ApiCall::new(auth_key, module, api_name, params);
                    invoke_isolated(handler, call).await
                }
                None => ApiResult::not_found(format!(
                    "api [{}/{}] not found",
                    module.unwrap_or_default(),
                    api_name.unwrap_or_default()
                )),
            };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let span = tracing::Span::current();
            span.record("status", result.status.code());
            span.record("duration_ms", duration_ms);
            debug!(status = result.status.code(), duration_ms, "api call complete");

            result
        }
        .instrument(span)
        .await
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Handler isolation
// ---------------------------------------------------------------------------

/// Runs the handler on its own task so that a panic surfaces as a
/// `JoinError` instead of unwinding through the dispatching connection.
async fn invoke_isolated(handler: Arc<dyn ApiHandler>, call: ApiCall) -> ApiResult {
    let task = tokio::spawn(async move { handler.invoke(call).await }.in_current_span());

    match task.await {
        Ok(Ok(output)) => ApiResult::ok(output),
        Ok(Err(err)) => {
            warn!(error = %err, "api handler failed");
            ApiResult::server_error(err.to_string())
        }
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic().as_ref());
            error!(panic = %message, "api handler panicked");
            ApiResult::server_error(message)
        }
        Err(join_err) => ApiResult::server_error(join_err.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "api handler panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
