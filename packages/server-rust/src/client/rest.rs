//! REST client: POSTs JSON to `{endpoint}/{authKey}/{module}/{apiName}`.

use std::time::Duration;

use async_trait::async_trait;
use frontapi_core::{json, normalize_auth_key, ApiResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::ApiClient;

pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestApiClient {
    endpoint: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl RestApiClient {
    /// `endpoint` is the mount URL, e.g. `http://host:8080/api`; surrounding
    /// slashes are ignored.
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    #[must_use]
    pub fn with_client(endpoint: &str, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.trim().trim_matches('/').to_string(),
            http,
            timeout: DEFAULT_REST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Builds the call URL. Blank segments are left out, and the API name
    /// is only appended when a module is present.
    #[must_use]
    pub fn call_url(&self, auth_key: Option<&str>, module: &str, api_name: &str) -> String {
        let mut url = format!("{}/{}", self.endpoint, normalize_auth_key(auth_key));
        let module = module.trim();
        let api_name = api_name.trim();
        if !module.is_empty() {
            url.push('/');
            url.push_str(module);
            if !api_name.is_empty() {
                url.push('/');
                url.push_str(api_name);
            }
        }
        url
    }
}

#[async_trait]
impl ApiClient for RestApiClient {
    async fn call(
        &self,
        auth_key: Option<&str>,
        module: &str,
        api_name: &str,
        input: &Value,
    ) -> ApiResult {
        let body = match json::encode(input) {
            Ok(body) => body,
            Err(err) => return ApiResult::server_error(err.to_string()),
        };
        let url = self.call_url(auth_key, module, api_name);
        debug!(url = %url, "rest call");

        let response = match self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return ApiResult::server_error(err.to_string()),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return ApiResult::server_error(err.to_string()),
        };
        if status != StatusCode::OK {
            return ApiResult::server_error(text);
        }

        serde_json::from_str(&text).unwrap_or_else(|_| ApiResult::server_error(text))
    }
}
