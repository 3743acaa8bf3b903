use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ApiCall;

/// A unit of work registered under a `(module, api)` pair.
///
/// Implementations are supplied by whoever registers them; the registry only
/// holds an `Arc` while the registration lasts. Errors are turned into a
/// `ServerError` envelope carrying the error's message.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Runs the API with the parsed call.
    async fn invoke(&self, call: ApiCall) -> anyhow::Result<Value>;
}

/// Adapter that lets a plain async closure act as an [`ApiHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ApiHandler for FnHandler<F>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn invoke(&self, call: ApiCall) -> anyhow::Result<Value> {
        (self.0)(call).await
    }
}

/// Wraps an async closure into a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ApiHandler>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn closure_handler_receives_params() {
        let handler = handler_fn(|call: ApiCall| async move { anyhow::Ok(call.params) });
        let call = ApiCall::new(None, Some("demo"), Some("echo"), json!({"a": 1}));
        let out = handler.invoke(call).await.unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[tokio::test]
    async fn closure_handler_propagates_error() {
        let handler = handler_fn(|_call: ApiCall| async { Err::<Value, _>(anyhow::anyhow!("boom")) });
        let call = ApiCall::new(None, None, None, Value::Null);
        let err = handler.invoke(call).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
