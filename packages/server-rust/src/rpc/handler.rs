//! RPC front-end adapter: decodes `jsonInput`, dispatches through the
//! registry and encodes the envelope back into a response frame.

use std::sync::Arc;

use frontapi_core::{json, ApiResult, ApiStatus, RpcRequest, RpcResponse};
use serde_json::Value;
use tracing::warn;

use crate::registry::ApiRegistry;

/// Bridges decoded RPC requests onto an [`ApiRegistry`].
#[derive(Clone)]
pub struct JsonApiHandler {
    registry: Arc<ApiRegistry>,
}

impl JsonApiHandler {
    #[must_use]
    pub fn new(registry: Arc<ApiRegistry>) -> Self {
        Self { registry }
    }

    /// Serves one `callApi` request. Never fails: bad input becomes a
    /// `ServerError` response.
    pub async fn call_api(&self, request: RpcRequest) -> RpcResponse {
        let params = match json::decode(&request.json_input) {
            Ok(params) => params,
            Err(err) => {
                return to_response(&ApiResult::server_error(format!(
                    "jsonInput is not valid JSON: {err}"
                )))
            }
        };

        let result = self
            .registry
            .call_api(
                non_empty(&request.module),
                non_empty(&request.api_name),
                non_empty(&request.auth_key),
                params,
            )
            .await;
        to_response(&result)
    }
}

/// Encodes an envelope as a response frame.
///
/// An output that cannot be encoded yields status 500 with the encoding
/// error as a JSON string.
#[must_use]
pub fn to_response(result: &ApiResult) -> RpcResponse {
    match json::encode(&result.output) {
        Ok(text) => RpcResponse::new(result.status.code(), text),
        Err(err) => {
            warn!(error = %err, "failed to encode api output");
            error_response(format!("failed to encode output: {err}"))
        }
    }
}

/// `ServerError` frame whose output is `message` as a JSON string.
#[must_use]
pub fn error_response(message: impl Into<String>) -> RpcResponse {
    RpcResponse::new(
        ApiStatus::ServerError.code(),
        Value::String(message.into()).to_string(),
    )
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use frontapi_core::{handler_fn, ApiCall};
    use serde_json::json;

    use super::*;

    fn handler() -> JsonApiHandler {
        let registry = Arc::new(ApiRegistry::new());
        registry.register(
            "demo",
            "ping",
            handler_fn(|call: ApiCall| async move { anyhow::Ok(call.params) }),
        );
        registry.register(
            "demo",
            "whoami",
            handler_fn(|call: ApiCall| async move { anyhow::Ok(json!(call.auth_key)) }),
        );
        JsonApiHandler::new(registry)
    }

    #[tokio::test]
    async fn ping_round_trips_json_input() {
        let response = handler()
            .call_api(RpcRequest::new(None, "demo", "ping", r#""demo""#))
            .await;
        assert_eq!(response, RpcResponse::new(200, r#""demo""#));
    }

    #[tokio::test]
    async fn structured_input_is_preserved() {
        let input = json!({"list": [1, 2, 3], "nested": {"k": null}});
        let response = handler()
            .call_api(RpcRequest::new(None, "demo", "ping", input.to_string()))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(json::decode(&response.json_output).unwrap(), input);
    }

    #[tokio::test]
    async fn auth_key_is_forwarded() {
        let response = handler()
            .call_api(RpcRequest::new(Some("secret"), "demo", "whoami", ""))
            .await;
        assert_eq!(response.json_output, r#""secret""#);

        let response = handler()
            .call_api(RpcRequest::new(None, "demo", "whoami", ""))
            .await;
        assert_eq!(response.json_output, r#""-""#);
    }

    #[tokio::test]
    async fn invalid_json_input_is_server_error() {
        let response = handler()
            .call_api(RpcRequest::new(None, "demo", "ping", "{oops"))
            .await;
        assert_eq!(response.status, 500);
        let message: Value = serde_json::from_str(&response.json_output).unwrap();
        assert!(message.as_str().unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn unknown_api_is_not_found() {
        let response = handler()
            .call_api(RpcRequest::new(None, "demo", "missing", "null"))
            .await;
        assert_eq!(response.status, 404);

        let response = handler()
            .call_api(RpcRequest::new(None, "", "", "null"))
            .await;
        assert_eq!(response.status, 404);
    }

    #[test]
    fn error_response_is_a_json_string() {
        let response = error_response("bad \"frame\"");
        assert_eq!(response.status, 500);
        assert_eq!(
            serde_json::from_str::<Value>(&response.json_output).unwrap(),
            json!("bad \"frame\"")
        );
    }
}
