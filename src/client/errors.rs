//! Error types for the API client.

use crate::dedup::DedupError;

/// Failures raised by a [`Transport`](crate::client::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed with status {status}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error(transparent)]
    Http(#[from] reqwest_middleware::Error),
    #[error("invalid request URL")]
    Url(#[from] url::ParseError),
    #[error("request cancelled before the response arrived")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] DedupError),
    #[error("Failed to decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    /// The HTTP status, if the request failed on a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Request(DedupError::Executor(err)) => err
                .downcast_ref::<TransportError>()
                .and_then(|transport| match transport {
                    TransportError::Status { status, .. } => Some(*status),
                    _ => None,
                }),
            _ => None,
        }
    }
}
