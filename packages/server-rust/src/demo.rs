//! Sample `demo` module, registered by `--demo`.
//!
//! - `demo/ping`: returns its params unchanged
//! - `demo/info`: describes the call it received
//! - `demo/fail`: always fails with `ServerError`
//! - `demo/*`: catches every other API name

use frontapi_core::{handler_fn, ApiCall};
use serde_json::json;

use crate::registry::ApiRegistry;

pub const DEMO_MODULE: &str = "demo";

pub fn register_demo_handlers(registry: &ApiRegistry) {
    registry.register(
        DEMO_MODULE,
        "ping",
        handler_fn(|call: ApiCall| async move { anyhow::Ok(call.params) }),
    );
    registry.register(
        DEMO_MODULE,
        "info",
        handler_fn(|call: ApiCall| async move {
            anyhow::Ok(json!({
                "authKey": call.auth_key,
                "open": call.is_open(),
                "module": call.module,
                "apiName": call.api_name,
                "params": call.params,
            }))
        }),
    );
    registry.register(
        DEMO_MODULE,
        "fail",
        handler_fn(|_call: ApiCall| async move {
            Err::<serde_json::Value, _>(anyhow::anyhow!("demo failure requested"))
        }),
    );
    registry.register(
        DEMO_MODULE,
        frontapi_core::WILDCARD_API,
        handler_fn(|call: ApiCall| async move {
            anyhow::Ok(json!({
                "caught": call.api_name,
                "params": call.params,
            }))
        }),
    );
}
