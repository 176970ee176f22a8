//! The structured description of one logical request.

use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Describes one logical request. Only used to derive a cache key and to
/// configure how the shared entry is driven; never stored in the cache.
#[derive(Clone, custom_debug_derive::Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub endpoint: String,
    #[debug(skip_if = BTreeMap::is_empty)]
    pub params: BTreeMap<String, Value>,
    #[debug(skip_if = Option::is_none)]
    pub body: Option<Value>,
    #[debug(skip_if = Option::is_none)]
    pub timeout: Option<Duration>,
    #[debug(skip)]
    pub cancel: Option<CancellationToken>,
    /// Per-entry TTL, replacing the configured `cache_ttl` for entries this
    /// descriptor creates.
    #[debug(skip_if = Option::is_none)]
    pub ttl_override: Option<Duration>,
    /// Used verbatim as the cache key, bypassing key generation.
    #[debug(skip_if = Option::is_none)]
    pub key_override: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            body: None,
            timeout: None,
            cancel: None,
            ttl_override: None,
            key_override: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Add a query parameter. A later value for the same name replaces the earlier one.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the shared entry when `token` fires, but only if this call ends
    /// up creating the entry. A caller that joins an existing entry just stops
    /// waiting.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn ttl_override(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    pub fn key_override(mut self, key: impl Into<String>) -> Self {
        self.key_override = Some(key.into());
        self
    }
}
