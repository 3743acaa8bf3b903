//! `FrontAPI` core: result envelope, call model, handler trait and RPC wire messages.

pub mod context;
pub mod json;
pub mod messages;
pub mod traits;
pub mod types;

pub use context::{normalize_auth_key, ApiCall, OPEN_AUTH_KEY, WILDCARD_API};
pub use messages::{RpcRequest, RpcResponse};
pub use traits::{handler_fn, ApiHandler, FnHandler};
pub use types::{ApiResult, ApiStatus, UnknownStatus};
