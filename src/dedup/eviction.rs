//! Reactive and periodic cleanup of the entry map.
//!
//! Both paths only remove entries, and every removal is keyed on the entry
//! generation, so a sweep racing a settlement or a manual clear is a no-op.

use crate::dedup::Inner;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Remove every expired or aborted entry. Returns how many were removed.
    pub(super) fn purge_invalid(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.is_valid(now);
            if !keep {
                entry.retire();
                purged += 1;
            }
            keep
        });
        self.counters.record_expirations(purged);
        purged
    }

    /// Bring occupancy down to `max_size`: invalid entries go first, then the
    /// oldest entries by creation time.
    pub(super) fn enforce_capacity(&self, max_size: usize) {
        if self.entries.len() <= max_size {
            return;
        }

        let purged = self.purge_invalid();
        let excess = self.entries.len().saturating_sub(max_size);
        if excess == 0 {
            debug!(purged, "Capacity restored by purging invalid entries");
            return;
        }

        let mut by_age: Vec<(Instant, u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.created_at, entry.id, entry.key().clone()))
            .collect();
        // Ties on creation time fall back to insertion order.
        by_age.sort_unstable();

        let mut evicted = 0;
        for (_, id, key) in by_age.into_iter().take(excess) {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, entry| entry.id == id) {
                entry.retire();
                evicted += 1;
            }
        }
        self.counters.record_evictions(evicted);
        debug!(
            purged,
            evicted,
            remaining = self.entries.len(),
            max_size,
            "Evicted oldest entries over capacity"
        );
    }

    /// Replace the running sweep task with one ticking every `interval`.
    pub(super) fn restart_sweeper(self: &Arc<Self>, interval: Duration) {
        let token = CancellationToken::new();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await; // skip the immediate first tick
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            let purged = inner.purge_invalid();
                            if purged > 0 {
                                debug!(purged, remaining = inner.entries.len(), "Sweep removed invalid entries");
                            } else {
                                trace!(resident = inner.entries.len(), "Sweep found nothing to remove");
                            }
                        }
                    }
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((handle, token));
        if let Some((_, previous_token)) = previous {
            previous_token.cancel();
        }
    }

    pub(super) fn stop_sweeper(&self) {
        let current = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((handle, token)) = current {
            token.cancel();
            handle.abort();
        }
    }
}
