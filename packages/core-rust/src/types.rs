use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome vocabulary shared by every front-end and client.
///
/// Serialized as its bare integer code so the JSON body reads
/// `{"status": 200, ...}` and the RPC frame carries a plain `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ApiStatus {
    /// The handler executed successfully.
    Ok,
    /// Reserved for authentication rejection. The registry never produces it.
    Forbidden,
    /// No handler resolved for the requested module/api.
    NotFound,
    /// The handler failed, or the request/response could not be decoded.
    ServerError,
}

impl ApiStatus {
    /// Returns the integer code carried on the wire.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 200,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::ServerError => 500,
        }
    }

    /// Returns the lowercase label used in logs and span fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
        }
    }
}

impl From<ApiStatus> for i32 {
    fn from(status: ApiStatus) -> Self {
        status.code()
    }
}

/// Error returned when an integer does not name a known [`ApiStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStatus(pub i32);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown api status code {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl TryFrom<i32> for ApiStatus {
    type Error = UnknownStatus;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Self::Ok),
            403 => Ok(Self::Forbidden),
            404 => Ok(Self::NotFound),
            500 => Ok(Self::ServerError),
            other => Err(UnknownStatus(other)),
        }
    }
}

/// The result envelope: a status plus either the success payload or a
/// human-readable error description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    pub status: ApiStatus,
    pub output: Value,
}

impl ApiResult {
    #[must_use]
    pub fn new(status: ApiStatus, output: Value) -> Self {
        Self { status, output }
    }

    /// Successful envelope carrying the handler's return value.
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self::new(ApiStatus::Ok, output)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::Forbidden, Value::String(message.into()))
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::NotFound, Value::String(message.into()))
    }

    /// Error envelope. `message` becomes the output verbatim.
    #[must_use]
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::ServerError, Value::String(message.into()))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ApiStatus::Ok
    }
}
