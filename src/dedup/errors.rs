//! Error types for the deduplication core.

use std::sync::Arc;
use std::time::Duration;

/// Why a shared entry was aborted before its executor settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The descriptor's timeout elapsed.
    Timeout(Duration),
    /// `cancel_by_key` removed the entry.
    CancelledByKey,
    /// `clear_all` emptied the cache.
    Cleared,
    /// The deduplicator was torn down.
    Destroyed,
    /// The caller's own cancellation token fired.
    External,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Timeout(after) => write!(f, "timed out after {after:?}"),
            CancelReason::CancelledByKey => f.write_str("cancelled by key"),
            CancelReason::Cleared => f.write_str("cache cleared"),
            CancelReason::Destroyed => f.write_str("deduplicator destroyed"),
            CancelReason::External => f.write_str("cancelled by caller"),
        }
    }
}

/// Outcome error delivered to every observer of a shared entry.
///
/// Cloning is cheap: executor errors are wrapped once in an `Arc`, so all
/// observers of one entry hold the very same error value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DedupError {
    #[error("{0:#}")]
    Executor(Arc<anyhow::Error>),
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("request driver stopped before producing a result")]
    Abandoned,
    #[error("deduplicator has been destroyed")]
    Destroyed,
}

impl DedupError {
    /// The cancel reason, if this error is a cancellation.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            DedupError::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DedupError::Cancelled(CancelReason::Timeout(_)))
    }
}

/// Rejected configuration. Raised when configuring, never per request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
