use crate::dedup::errors::{CancelReason, DedupError};
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) type Outcome<T> = Result<T, DedupError>;
pub(crate) type SharedOutcome<T> = Shared<BoxFuture<'static, Outcome<T>>>;

/// Cancellation handle for one entry: a token plus the reason it was fired.
///
/// The first recorded reason wins, so a timeout racing a manual cancel
/// reports whichever aborted the entry first.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortController {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl AbortController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The signal handed to the executor.
    pub(crate) fn signal(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn abort(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn reason(&self) -> CancelReason {
        self.reason
            .get()
            .copied()
            .unwrap_or(CancelReason::External)
    }

    pub(crate) async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// One shared, in-flight (or recently settled) request.
pub(crate) struct CacheEntry<T> {
    /// Distinguishes this entry from later entries under the same key.
    pub(crate) id: u64,
    pub(crate) shared: SharedOutcome<T>,
    pub(crate) created_at: Instant,
    pub(crate) ttl: Duration,
    pub(crate) controller: AbortController,
    /// Cancelling this skips the scheduled post-settlement removal.
    pub(crate) removal: CancellationToken,
    pub(crate) observers: usize,
}

impl<T> CacheEntry<T> {
    /// An entry may be shared while it is younger than its TTL and not aborted.
    pub(crate) fn is_valid(&self, now: Instant) -> bool {
        !self.controller.is_aborted() && now.saturating_duration_since(self.created_at) < self.ttl
    }

    /// Detach the entry from the cache: its scheduled removal no longer applies.
    pub(crate) fn retire(&self) {
        self.removal.cancel();
    }

    /// Abort the executor for every observer and detach the entry.
    pub(crate) fn abort(&self, reason: CancelReason) {
        self.controller.abort(reason);
        self.retire();
    }
}
