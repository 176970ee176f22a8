//! Request deduplication: concurrent identical requests share one execution.
//!
//! The first caller for a key creates a cache entry and drives the executor
//! in a spawned task; everyone else arriving while the entry is valid joins
//! it and receives a clone of the same outcome. Entries leave the cache a
//! short grace window after settling, when their TTL lapses, when they are
//! cancelled, or when the cache is over capacity.

pub mod config;
pub mod descriptor;
pub(crate) mod entry;
pub mod errors;
mod eviction;
pub mod key;
pub mod stats;

pub use config::{DedupConfig, DedupConfigPatch};
pub use descriptor::RequestDescriptor;
pub use errors::{CancelReason, ConfigError, DedupError};
pub use key::{KeyGenerator, SharedKeyGenerator, canonical_key};
pub use stats::StatsSnapshot;

use crate::dedup::entry::{AbortController, CacheEntry, Outcome, SharedOutcome};
use crate::dedup::stats::Counters;
use crate::utils::fmt_duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The result of an execution along with whether it came from a shared entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution<T> {
    pub result: T,
    pub was_shared: bool,
}

/// Deduplicating front for asynchronous request executors.
///
/// Cheap to clone; all clones share one cache. Must be created inside a tokio
/// runtime, since construction starts the periodic sweep.
pub struct Deduplicator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<T> {
    /// key → the single live entry for that key
    entries: DashMap<String, CacheEntry<T>>,
    config: RwLock<DedupConfig>,
    key_generator: Option<SharedKeyGenerator>,
    counters: Counters,
    next_id: AtomicU64,
    /// Running sweep task and its stop token.
    sweeper: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    destroyed: AtomicBool,
}

enum Lookup<T> {
    Hit(SharedOutcome<T>),
    Miss(Reservation<T>),
}

/// Everything the miss path needs to drive a freshly inserted entry.
struct Reservation<T> {
    id: u64,
    controller: AbortController,
    removal: CancellationToken,
    tx: oneshot::Sender<Outcome<T>>,
    shared: SharedOutcome<T>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: DedupConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Create a deduplicator that derives keys with `generator` instead of
    /// [`canonical_key`].
    pub fn with_key_generator(
        config: DedupConfig,
        generator: impl KeyGenerator + 'static,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(Arc::new(generator)))
    }

    fn build(
        config: DedupConfig,
        key_generator: Option<SharedKeyGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let sweep_interval = config.sweep_interval;
        let inner = Arc::new(Inner {
            entries: DashMap::new(),
            config: RwLock::new(config),
            key_generator,
            counters: Counters::default(),
            next_id: AtomicU64::new(0),
            sweeper: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });
        inner.restart_sweeper(sweep_interval);
        Ok(Self { inner })
    }

    /// The current configuration.
    pub fn config(&self) -> DedupConfig {
        self.inner.config()
    }

    /// The cache key `descriptor` maps to under the current configuration.
    pub fn key_for(&self, descriptor: &RequestDescriptor) -> String {
        self.key_with(descriptor, self.inner.config().combine_bodies)
    }

    fn key_with(&self, descriptor: &RequestDescriptor, combine_bodies: bool) -> String {
        if let Some(key) = &descriptor.key_override {
            return key.clone();
        }
        match &self.inner.key_generator {
            Some(generator) => generator.generate(descriptor),
            None => canonical_key(descriptor, combine_bodies),
        }
    }

    /// Run `executor` for `descriptor`, or join the identical request already in flight.
    pub async fn execute<F, Fut, E>(
        &self,
        descriptor: RequestDescriptor,
        executor: F,
    ) -> Result<T, DedupError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.execute_observed(descriptor, executor).await.result
    }

    /// Like [`execute`](Self::execute), also reporting whether the result was shared.
    pub async fn execute_with_metadata<F, Fut, E>(
        &self,
        descriptor: RequestDescriptor,
        executor: F,
    ) -> Result<Execution<T>, DedupError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let Execution { result, was_shared } = self.execute_observed(descriptor, executor).await;
        result.map(|result| Execution { result, was_shared })
    }

    /// Run or join like [`execute`](Self::execute), reporting whether the call
    /// joined a shared entry whatever the outcome.
    pub async fn execute_observed<F, Fut, E>(
        &self,
        descriptor: RequestDescriptor,
        executor: F,
    ) -> Execution<Result<T, DedupError>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Execution {
                result: Err(DedupError::Destroyed),
                was_shared: false,
            };
        }

        let config = self.config();
        let key = self.key_with(&descriptor, config.combine_bodies);
        let ttl = descriptor.ttl_override.unwrap_or(config.cache_ttl);

        match self.inner.lookup_or_reserve(&key, ttl) {
            Lookup::Hit(shared) => {
                if config.debug_logging {
                    debug!(key = %key, "Dedup hit, joining shared request");
                }
                // A joiner's own token and timeout only end its own wait.
                let result = tokio::select! {
                    biased;
                    outcome = shared => outcome,
                    _ = cancelled(descriptor.cancel.as_ref()) => {
                        Err(DedupError::Cancelled(CancelReason::External))
                    }
                    after = deadline(descriptor.timeout) => {
                        Err(DedupError::Cancelled(CancelReason::Timeout(after)))
                    }
                };
                Execution {
                    result,
                    was_shared: true,
                }
            }
            Lookup::Miss(reservation) => {
                if config.debug_logging {
                    debug!(key = %key, ttl = fmt_duration(ttl), "Dedup miss, executing request");
                }
                let Reservation {
                    id,
                    controller,
                    removal,
                    tx,
                    shared,
                } = reservation;

                // Invoked outside the map lock so executors may touch the cache themselves.
                let work = executor(controller.signal());
                tokio::spawn(drive(
                    Arc::downgrade(&self.inner),
                    key,
                    id,
                    Driver {
                        controller,
                        removal,
                        external: descriptor.cancel,
                        timeout: descriptor.timeout,
                        grace_window: config.grace_window,
                    },
                    work,
                    tx,
                ));
                self.inner.enforce_capacity(config.max_cache_size);

                Execution {
                    result: shared.await,
                    was_shared: false,
                }
            }
        }
    }

    /// Abort the entry under `key` for all of its observers and remove it.
    ///
    /// Returns `false` when no entry exists; repeated calls are harmless.
    pub fn cancel_by_key(&self, key: &str) -> bool {
        match self.inner.entries.remove(key) {
            Some((_, entry)) => {
                entry.abort(CancelReason::CancelledByKey);
                self.inner.counters.record_cancellations(1);
                info!(key, observers = entry.observers, "Cancelled shared request");
                true
            }
            None => false,
        }
    }

    /// Abort every entry and empty the cache.
    pub fn clear_all(&self) {
        let cleared = self.inner.abort_all(CancelReason::Cleared);
        info!(cleared, "Cleared deduplication cache");
    }

    /// Keys of all resident entries, sorted.
    pub fn list_active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// How many callers have observed the entry under `key`, if resident.
    pub fn observer_count(&self, key: &str) -> Option<usize> {
        self.inner.entries.get(key).map(|entry| entry.observers)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.inner.counters.snapshot(self.inner.entries.len())
    }

    /// Merge `patch` into the configuration. Invalid results are rejected and
    /// leave the current configuration untouched.
    pub fn update_config(&self, patch: DedupConfigPatch) -> Result<(), ConfigError> {
        let (previous, updated) = {
            let mut config = self
                .inner
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let updated = config.merged(&patch);
            updated.validate()?;
            let previous = std::mem::replace(&mut *config, updated.clone());
            (previous, updated)
        };

        if updated.sweep_interval != previous.sweep_interval
            && !self.inner.destroyed.load(Ordering::Acquire)
        {
            self.inner.restart_sweeper(updated.sweep_interval);
        }
        if updated.max_cache_size < previous.max_cache_size {
            self.inner.enforce_capacity(updated.max_cache_size);
        }

        info!(
            cache_ttl = fmt_duration(updated.cache_ttl),
            max_cache_size = updated.max_cache_size,
            sweep_interval = fmt_duration(updated.sweep_interval),
            "Deduplicator configuration updated"
        );
        Ok(())
    }

    /// Stop the periodic sweep and abort everything. Later calls to
    /// `execute` fail with [`DedupError::Destroyed`].
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.stop_sweeper();
        let aborted = self.inner.abort_all(CancelReason::Destroyed);
        info!(aborted, "Deduplicator destroyed");
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn config(&self) -> DedupConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Join the valid entry under `key`, or insert a new one and hand back
    /// what is needed to drive it. Decided under the key's shard lock, so at
    /// most one caller per key ever takes the miss path for a live entry.
    fn lookup_or_reserve(&self, key: &str, ttl: Duration) -> Lookup<T> {
        let now = Instant::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) if occupied.get().is_valid(now) => {
                let entry = occupied.get_mut();
                entry.observers += 1;
                self.counters.record_hit();
                Lookup::Hit(entry.shared.clone())
            }
            Entry::Occupied(mut occupied) => {
                let (reservation, entry) = self.reserve(now, ttl);
                let stale = occupied.insert(entry);
                stale.retire();
                self.counters.record_expirations(1);
                self.counters.record_miss();
                Lookup::Miss(reservation)
            }
            Entry::Vacant(vacant) => {
                let (reservation, entry) = self.reserve(now, ttl);
                vacant.insert(entry);
                self.counters.record_miss();
                Lookup::Miss(reservation)
            }
        }
    }

    fn reserve(&self, now: Instant, ttl: Duration) -> (Reservation<T>, CacheEntry<T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<Outcome<T>>();
        let shared = rx
            .map(|received| received.unwrap_or(Err(DedupError::Abandoned)))
            .boxed()
            .shared();
        let controller = AbortController::new();
        let removal = CancellationToken::new();

        let entry = CacheEntry {
            id,
            shared: shared.clone(),
            created_at: now,
            ttl,
            controller: controller.clone(),
            removal: removal.clone(),
            observers: 1,
        };
        let reservation = Reservation {
            id,
            controller,
            removal,
            tx,
            shared,
        };
        (reservation, entry)
    }

    /// Remove the entry under `key` only if it is still the entry `id`.
    fn remove_settled(&self, key: &str, id: u64) {
        self.entries.remove_if(key, |_, entry| entry.id == id);
    }

    fn abort_all(&self, reason: CancelReason) -> usize {
        let mut aborted = 0;
        self.entries.retain(|_, entry| {
            entry.abort(reason);
            aborted += 1;
            false
        });
        self.counters.record_cancellations(aborted);
        aborted
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(Some((_, token))) = self.sweeper.get_mut().map(Option::take) {
            token.cancel();
        }
    }
}

/// Per-entry settings for the driver task.
struct Driver {
    controller: AbortController,
    removal: CancellationToken,
    external: Option<CancellationToken>,
    timeout: Option<Duration>,
    grace_window: Duration,
}

/// Drive one entry's executor to completion, publish the outcome, then remove
/// the entry after the grace window unless it was detached in the meantime.
async fn drive<T, Fut, E>(
    inner: Weak<Inner<T>>,
    key: String,
    id: u64,
    driver: Driver,
    work: Fut,
    tx: oneshot::Sender<Outcome<T>>,
) where
    T: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    let Driver {
        controller,
        removal,
        external,
        timeout,
        grace_window,
    } = driver;

    let outcome = tokio::select! {
        biased;
        _ = controller.aborted() => Err(DedupError::Cancelled(controller.reason())),
        _ = cancelled(external.as_ref()) => {
            controller.abort(CancelReason::External);
            Err(DedupError::Cancelled(controller.reason()))
        }
        after = deadline(timeout) => {
            controller.abort(CancelReason::Timeout(after));
            Err(DedupError::Cancelled(controller.reason()))
        }
        result = AssertUnwindSafe(work).catch_unwind() => match result {
            Ok(result) => result.map_err(|err| DedupError::Executor(Arc::new(err.into()))),
            Err(panic) => Err(DedupError::Executor(Arc::new(anyhow::anyhow!(
                "executor panicked: {}",
                panic_message(&*panic)
            )))),
        },
    };

    if let Err(err) = &outcome {
        debug!(key = %key, error = %err, "Shared request failed");
    }
    // Every observer may have given up; nobody left to tell.
    let _ = tx.send(outcome);

    tokio::select! {
        _ = removal.cancelled() => {}
        _ = tokio::time::sleep(grace_window) => {
            if let Some(inner) = inner.upgrade() {
                inner.remove_settled(&key, id);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Resolves with the timeout once it elapses; never resolves without one.
pub(crate) async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}
