//! The HTTP side of the client: whatever actually performs a request.

use crate::client::errors::TransportError;
use async_trait::async_trait;
use http::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

/// A request as handed to a transport: the descriptor minus cache concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub endpoint: String,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
}

/// Performs one request and returns the raw response body.
///
/// Implementations should stop work when `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<str>, TransportError>;
}

/// [`Transport`] over a `reqwest` client with middleware support.
pub struct ReqwestTransport {
    base_url: Url,
    http: ClientWithMiddleware,
}

impl ReqwestTransport {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(base_url, ClientBuilder::new(reqwest::Client::new()).build())
    }

    pub fn with_client(base_url: Url, http: ClientWithMiddleware) -> Self {
        Self { base_url, http }
    }

    /// Resolve `endpoint` against the base URL and append the query params.
    pub fn url_for(&self, request: &TransportRequest) -> Result<Url, TransportError> {
        let mut url = self.base_url.join(request.endpoint.trim_start_matches('/'))?;
        let params: Vec<(&String, String)> = request
            .params
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((name, s.clone())),
                other => Some((name, other.to_string())),
            })
            .collect();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<str>, TransportError> {
        let url = self.url_for(&request)?;
        trace!(method = %request.method, url = %url, "Sending request");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.exchange(request, url) => result,
        }
    }
}

impl ReqwestTransport {
    async fn exchange(
        &self,
        request: TransportRequest,
        url: Url,
    ) -> Result<Arc<str>, TransportError> {
        let mut builder = self.http.request(request.method, url.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(reqwest_middleware::Error::from)?;
        Ok(Arc::from(text))
    }
}
