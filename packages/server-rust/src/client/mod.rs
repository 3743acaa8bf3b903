//! Clients for the two front-ends.
//!
//! Both return an [`ApiResult`] for every call. Transport failures, non-200
//! HTTP responses and undecodable payloads surface as `ServerError` whose
//! output is the raw text, so callers handle a single shape.

pub mod rest;
pub mod rpc;

pub use rest::RestApiClient;
pub use rpc::RpcApiClient;

use async_trait::async_trait;
use frontapi_core::ApiResult;
use serde_json::Value;

/// A remote `callApi`.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Calls `module`/`api_name` with `input` as params. A missing auth key
    /// is sent as `"-"`.
    async fn call(
        &self,
        auth_key: Option<&str>,
        module: &str,
        api_name: &str,
        input: &Value,
    ) -> ApiResult;
}
