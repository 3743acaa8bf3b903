//! REST front-end: `{mount}/{authKey}/{module}/{apiName}`.
//!
//! GET builds params from the query string, POST parses the body as JSON.
//! Every outcome, including malformed input, is an [`ApiResult`] sent with
//! HTTP 200; the logical status lives in the body.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{OriginalUri, Query, State};
use axum::Json;
use frontapi_core::{json, ApiResult};
use serde_json::{Map, Value};

use super::AppState;

/// Path tokens after the mount prefix. Missing tokens stay `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathTokens {
    pub auth_key: Option<String>,
    pub module: Option<String>,
    pub api_name: Option<String>,
}

/// Splits a request path into auth key, module and API name.
///
/// The mount prefix is stripped case-insensitively; empty segments are
/// skipped and anything past the third token is ignored. Segments are used
/// as they appear on the wire, without percent-decoding.
#[must_use]
pub fn parse_path(mount: &str, path: &str) -> PathTokens {
    let rest = strip_prefix_ignore_case(path, mount);
    let mut tokens = rest
        .split('/')
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    PathTokens {
        auth_key: tokens.next(),
        module: tokens.next(),
        api_name: tokens.next(),
    }
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &path[prefix.len()..],
        _ => path,
    }
}

/// Groups query pairs by name: one value becomes a string, several become
/// an array of strings in arrival order.
#[must_use]
pub fn params_from_query(pairs: Vec<(String, String)>) -> Value {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in pairs {
        grouped.entry(name).or_default().push(value);
    }

    let params: Map<String, Value> = grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                Value::String(values.remove(0))
            } else {
                Value::Array(values.into_iter().map(Value::String).collect())
            };
            (name, value)
        })
        .collect();

    Value::Object(params)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn api_get_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Json<ApiResult> {
    let _in_flight = state.shutdown.in_flight_guard();

    let params = match Query::<Vec<(String, String)>>::try_from_uri(&uri) {
        Ok(Query(pairs)) => params_from_query(pairs),
        Err(rejection) => {
            return Json(ApiResult::server_error(format!(
                "invalid query string: {}",
                rejection.body_text()
            )))
        }
    };

    let tokens = parse_path(&state.mount, uri.path());
    Json(dispatch(&state, tokens, params).await)
}

/// The body is the whole params document; the query string is ignored.
pub async fn api_post_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    body: Result<Bytes, BytesRejection>,
) -> Json<ApiResult> {
    let _in_flight = state.shutdown.in_flight_guard();

    let params = match decode_body(body) {
        Ok(params) => params,
        Err(message) => return Json(ApiResult::server_error(message)),
    };

    let tokens = parse_path(&state.mount, uri.path());
    Json(dispatch(&state, tokens, params).await)
}

fn decode_body(body: Result<Bytes, BytesRejection>) -> Result<Value, String> {
    let bytes =
        body.map_err(|rejection| format!("failed to read request body: {}", rejection.body_text()))?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|err| format!("request body is not valid UTF-8: {err}"))?;
    json::decode(text).map_err(|err| format!("request body is not valid JSON: {err}"))
}

async fn dispatch(state: &AppState, tokens: PathTokens, params: Value) -> ApiResult {
    state
        .registry
        .call_api(
            tokens.module.as_deref(),
            tokens.api_name.as_deref(),
            tokens.auth_key.as_deref(),
            params,
        )
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
