//! API client that routes HTTP-style calls through the deduplicator.

pub mod errors;
pub mod json;
pub mod metrics;
pub mod transport;

pub use errors::{ApiError, TransportError};
pub use metrics::{EndpointMetrics, EndpointStats, Sample};
pub use transport::{ReqwestTransport, Transport, TransportRequest};

use crate::dedup::config::deserialize_duration;
use crate::dedup::{
    CancelReason, ConfigError, DedupConfig, DedupError, Deduplicator, Execution,
    RequestDescriptor, StatsSnapshot, deadline,
};
use crate::utils::log_if_slow;
use http::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

/// Client-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    /// Samples kept per endpoint for metrics.
    pub metrics_window: usize,
    /// Freshly executed requests slower than this are logged.
    #[serde(deserialize_with = "deserialize_duration")]
    pub slow_request_threshold: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            metrics_window: 100,
            slow_request_threshold: Duration::from_secs(1),
        }
    }
}

/// Per-call deduplication switches.
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    /// When false, this call skips deduplication.
    pub enabled: bool,
    /// TTL for an entry this call creates.
    pub cache_ttl_override: Option<Duration>,
    /// Cache key to use instead of the generated one.
    pub custom_key: Option<String>,
    /// Always execute fresh, bypassing the cache entirely.
    pub force: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_override: None,
            custom_key: None,
            force: false,
        }
    }
}

impl CallConfig {
    fn bypasses_cache(&self) -> bool {
        self.force || !self.enabled
    }
}

/// Everything about a call besides its method and endpoint.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub call: CallConfig,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
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

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn force(mut self) -> Self {
        self.call.force = true;
        self
    }

    pub fn without_dedup(mut self) -> Self {
        self.call.enabled = false;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.call.cache_ttl_override = Some(ttl);
        self
    }

    pub fn custom_key(mut self, key: impl Into<String>) -> Self {
        self.call.custom_key = Some(key.into());
        self
    }
}

/// Sends requests through a [`Transport`], sharing identical in-flight calls.
pub struct ApiClient<Tr> {
    transport: Arc<Tr>,
    dedup: Deduplicator<Arc<str>>,
    metrics: EndpointMetrics,
    slow_request_threshold: Duration,
}

impl ApiClient<ReqwestTransport> {
    /// A client over `reqwest` for `config.base_url`.
    pub fn from_config(config: &ClientConfig, dedup: DedupConfig) -> anyhow::Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("base_url is not configured"))?;
        let base_url = Url::parse(base)?;
        let dedup = Deduplicator::new(dedup)?;
        Ok(Self::new(ReqwestTransport::new(base_url), dedup, config))
    }
}

impl<Tr: Transport> ApiClient<Tr> {
    pub fn new(transport: Tr, dedup: Deduplicator<Arc<str>>, config: &ClientConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            dedup,
            metrics: EndpointMetrics::new(config.metrics_window),
            slow_request_threshold: config.slow_request_threshold,
        }
    }

    /// A client with default dedup and client settings.
    pub fn with_defaults(transport: Tr) -> Result<Self, ConfigError> {
        let dedup = Deduplicator::new(DedupConfig::default())?;
        Ok(Self::new(transport, dedup, &ClientConfig::default()))
    }

    pub fn deduplicator(&self) -> &Deduplicator<Arc<str>> {
        &self.dedup
    }

    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Arc<str>, ApiError> {
        let start = Instant::now();
        let RequestOptions {
            params,
            body,
            timeout,
            cancel,
            call,
        } = options;
        let request = TransportRequest {
            method,
            endpoint: endpoint.to_owned(),
            params,
            body,
        };

        let (outcome, shared) = if call.bypasses_cache() {
            (self.send_direct(request, timeout, cancel).await, false)
        } else {
            let descriptor = descriptor_for(&request, timeout, cancel, call);
            let transport = Arc::clone(&self.transport);
            let Execution { result, was_shared } = self
                .dedup
                .execute_observed(descriptor, move |signal| async move {
                    transport.send(request, signal).await
                })
                .await;
            (result, was_shared)
        };

        self.metrics.record(
            endpoint,
            Sample {
                latency: start.elapsed(),
                shared,
                failed: outcome.is_err(),
            },
        );
        if !shared {
            log_if_slow(start, self.slow_request_threshold, endpoint);
        }
        if let Err(err) = &outcome {
            warn!(endpoint, error = %err, "Request failed");
        }

        outcome.map_err(ApiError::from)
    }

    /// Send a request and decode its JSON body into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let body = self.request(method, endpoint, options).await?;
        json::decode_body(&body).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_owned(),
            source,
        })
    }

    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<Arc<str>, ApiError> {
        self.request(Method::GET, endpoint, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request_json(Method::GET, endpoint, options).await
    }

    pub async fn post(&self, endpoint: &str, options: RequestOptions) -> Result<Arc<str>, ApiError> {
        self.request(Method::POST, endpoint, options).await
    }

    pub async fn put(&self, endpoint: &str, options: RequestOptions) -> Result<Arc<str>, ApiError> {
        self.request(Method::PUT, endpoint, options).await
    }

    pub async fn delete(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Arc<str>, ApiError> {
        self.request(Method::DELETE, endpoint, options).await
    }

    pub fn metrics_for(&self, endpoint: &str) -> Option<EndpointStats> {
        self.metrics.stats_for(endpoint)
    }

    pub fn all_metrics(&self) -> Vec<EndpointStats> {
        self.metrics.all()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn dedup_stats(&self) -> StatsSnapshot {
        self.dedup.get_stats()
    }

    /// Call the transport directly, still honoring the timeout and cancel token.
    async fn send_direct(
        &self,
        request: TransportRequest,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<Arc<str>, DedupError> {
        let external = cancel.unwrap_or_default();
        let signal = external.child_token();
        let send = self.transport.send(request, signal.clone());

        tokio::select! {
            biased;
            _ = external.cancelled() => Err(DedupError::Cancelled(CancelReason::External)),
            after = deadline(timeout) => {
                signal.cancel();
                Err(DedupError::Cancelled(CancelReason::Timeout(after)))
            }
            result = send => result.map_err(|err| match err {
                TransportError::Cancelled => DedupError::Cancelled(CancelReason::External),
                err => DedupError::Executor(Arc::new(err.into())),
            }),
        }
    }
}

fn descriptor_for(
    request: &TransportRequest,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    call: CallConfig,
) -> RequestDescriptor {
    let mut descriptor = RequestDescriptor::new(request.method.clone(), request.endpoint.clone());
    descriptor.params = request.params.clone();
    descriptor.body = request.body.clone();
    descriptor.timeout = timeout;
    descriptor.cancel = cancel;
    descriptor.ttl_override = call.cache_ttl_override;
    descriptor.key_override = call.custom_key;
    descriptor
}
