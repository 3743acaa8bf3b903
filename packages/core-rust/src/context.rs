use serde_json::Value;

/// Auth key meaning "no authentication". Substituted for absent or blank keys.
pub const OPEN_AUTH_KEY: &str = "-";

/// Reserved API name that catches every call into a module with no exact match.
pub const WILDCARD_API: &str = "*";

/// Maps an absent or blank auth key to [`OPEN_AUTH_KEY`].
#[must_use]
pub fn normalize_auth_key(auth_key: Option<&str>) -> String {
    match auth_key {
        Some(key) if !key.trim().is_empty() => key.to_string(),
        _ => OPEN_AUTH_KEY.to_string(),
    }
}

/// Transport-neutral call produced by a front-end and handed to a handler.
///
/// `module` and `api_name` stay `None` when the request did not carry them;
/// they are never collapsed into empty strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Auth key as received, already normalized. Never validated by the core.
    pub auth_key: String,
    pub module: Option<String>,
    pub api_name: Option<String>,
    pub params: Value,
}

impl ApiCall {
    #[must_use]
    pub fn new(
        auth_key: Option<&str>,
        module: Option<&str>,
        api_name: Option<&str>,
        params: Value,
    ) -> Self {
        Self {
            auth_key: normalize_auth_key(auth_key),
            module: module.map(str::to_string),
            api_name: api_name.map(str::to_string),
            params,
        }
    }

    /// Whether the caller presented no auth key.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.auth_key == OPEN_AUTH_KEY
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn blank_auth_key_becomes_open() {
        assert_eq!(normalize_auth_key(None), "-");
        assert_eq!(normalize_auth_key(Some("")), "-");
        assert_eq!(normalize_auth_key(Some("   ")), "-");
        assert_eq!(normalize_auth_key(Some("secret")), "secret");
    }

    #[test]
    fn call_keeps_absent_segments_absent() {
        let call = ApiCall::new(None, Some("demo"), None, json!(null));
        assert!(call.is_open());
        assert_eq!(call.module.as_deref(), Some("demo"));
        assert!(call.api_name.is_none());
    }

    proptest! {
        #[test]
        fn normalized_key_is_never_blank(key in proptest::option::of("[ a-z0-9-]{0,8}")) {
            let normalized = normalize_auth_key(key.as_deref());
            prop_assert!(!normalized.trim().is_empty());
            match key {
                Some(k) if !k.trim().is_empty() => prop_assert_eq!(normalized, k),
                _ => prop_assert_eq!(normalized, OPEN_AUTH_KEY),
            }
        }
    }
}
