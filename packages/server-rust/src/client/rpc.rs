//! RPC client: one connection per call, one request frame, one response frame.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use frontapi_core::{json, ApiResult, ApiStatus, RpcRequest, RpcResponse};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use super::ApiClient;
use crate::rpc::config::{DEFAULT_CLIENT_TIMEOUT, DEFAULT_MAX_FRAME_SIZE};
use crate::rpc::{frame_codec, RpcError};

#[derive(Debug, Clone)]
pub struct RpcApiClient {
    host: String,
    port: u16,
    timeout: Duration,
    max_frame_size: usize,
}

impl RpcApiClient {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_CLIENT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Bounds connecting and waiting for the response, separately.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sends one raw request and returns the raw response frame.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] on connect, I/O, codec or timeout failure.
    pub async fn send(&self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        let stream = timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| RpcError::Timeout(self.timeout))??;
        let mut framed = Framed::new(stream, frame_codec(self.max_frame_size));

        framed.send(Bytes::from(request.to_bytes()?)).await?;
        let frame = timeout(self.timeout, framed.next())
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))?
            .ok_or(RpcError::ConnectionClosed)??;

        Ok(RpcResponse::from_bytes(&frame)?)
    }
}

/// Converts a response frame into an envelope. An unknown status or an
/// output that is not JSON yields `ServerError` with the raw output.
#[must_use]
pub fn into_result(response: RpcResponse) -> ApiResult {
    let Ok(status) = ApiStatus::try_from(response.status) else {
        return ApiResult::server_error(response.json_output);
    };
    match json::decode(&response.json_output) {
        Ok(output) => ApiResult::new(status, output),
        Err(_) => ApiResult::server_error(response.json_output),
    }
}

#[async_trait]
impl ApiClient for RpcApiClient {
    async fn call(
        &self,
        auth_key: Option<&str>,
        module: &str,
        api_name: &str,
        input: &Value,
    ) -> ApiResult {
        let json_input = match json::encode(input) {
            Ok(text) => text,
            Err(err) => return ApiResult::server_error(err.to_string()),
        };
        let request = RpcRequest::new(auth_key, module, api_name, json_input);

        match self.send(&request).await {
            Ok(response) => into_result(response),
            Err(err) => {
                debug!(host = %self.host, port = self.port, error = %err, "rpc call failed");
                ApiResult::server_error(err.to_string())
            }
        }
    }
}
