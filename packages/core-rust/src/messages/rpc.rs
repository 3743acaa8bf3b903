//! The single RPC operation: `callApi(authKey, module, apiName, jsonInput)`.

use serde::{Deserialize, Serialize};

use crate::context::normalize_auth_key;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// RPC request frame. Field order matches the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Auth key, `"-"` when the caller has none.
    pub auth_key: String,
    pub module: String,
    pub api_name: String,
    /// JSON-encoded params.
    pub json_input: String,
}

impl RpcRequest {
    #[must_use]
    pub fn new(
        auth_key: Option<&str>,
        module: impl Into<String>,
        api_name: impl Into<String>,
        json_input: impl Into<String>,
    ) -> Self {
        Self {
            auth_key: normalize_auth_key(auth_key),
            module: module.into(),
            api_name: api_name.into(),
            json_input: json_input.into(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if `MsgPack` encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid request frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// RPC response frame: integer status plus JSON-encoded output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub status: i32,
    pub json_output: String,
}

impl RpcResponse {
    #[must_use]
    pub fn new(status: i32, json_output: impl Into<String>) -> Self {
        Self {
            status,
            json_output: json_output.into(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if `MsgPack` encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid response frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
