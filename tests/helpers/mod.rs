#![allow(dead_code)]

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use inflight::DedupConfig;
use inflight::client::{Transport, TransportError, TransportRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Defaults with a grace window long enough that settled entries stay put
/// for the length of a test.
pub fn config() -> DedupConfig {
    DedupConfig {
        grace_window: Duration::from_secs(10),
        ..DedupConfig::default()
    }
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}

/// An executor that counts its invocations and resolves to `value` after `delay`.
pub fn respond_after<T>(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
    value: T,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<T>> + Send + use<T>
where
    T: Send + 'static,
{
    let calls = Arc::clone(calls);
    move |_signal| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        }
        .boxed()
    }
}

/// An executor that counts its invocations and fails with `message` after `delay`.
pub fn fail_after<T>(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
    message: &'static str,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<T>> + Send + use<T>
where
    T: Send + 'static,
{
    let calls = Arc::clone(calls);
    move |_signal| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            Err(anyhow::anyhow!(message))
        }
        .boxed()
    }
}

/// An executor that counts its invocations and panics after `delay`.
pub fn panic_after<T>(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<T>> + Send + use<T>
where
    T: Send + 'static,
{
    let calls = Arc::clone(calls);
    move |_signal| {
        calls.fetch_add(1, Ordering::SeqCst);
        explode(delay).boxed()
    }
}

async fn explode<T>(delay: Duration) -> anyhow::Result<T> {
    tokio::time::sleep(delay).await;
    panic!("executor blew up")
}

enum Reply {
    Body(String),
    Status(u16),
}

/// In-memory transport with canned replies per endpoint.
pub struct MockTransport {
    delay: Duration,
    routes: HashMap<String, Reply>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            routes: HashMap::new(),
            calls: counter(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn route(mut self, endpoint: &str, body: &str) -> Self {
        self.routes
            .insert(endpoint.to_owned(), Reply::Body(body.to_owned()));
        self
    }

    pub fn fail(mut self, endpoint: &str, status: u16) -> Self {
        self.routes.insert(endpoint.to_owned(), Reply::Status(status));
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<TransportRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> Result<Arc<str>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        match self.routes.get(&request.endpoint) {
            Some(Reply::Body(body)) => Ok(Arc::from(body.as_str())),
            Some(Reply::Status(status)) => Err(TransportError::Status {
                status: *status,
                url: request.endpoint.clone(),
                body: String::new(),
            }),
            None => Ok(Arc::from("{}")),
        }
    }
}
