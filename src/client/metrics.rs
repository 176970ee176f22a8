//! Rolling per-endpoint request metrics.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// One completed call as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub latency: Duration,
    /// Served by joining an existing shared entry.
    pub shared: bool,
    pub failed: bool,
}

/// Aggregates over an endpoint's recent samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub endpoint: String,
    pub samples: usize,
    pub avg_latency_ms: f64,
    /// `None` when no sample in the window was shared.
    pub avg_shared_latency_ms: Option<f64>,
    /// `None` when every sample in the window was shared.
    pub avg_fresh_latency_ms: Option<f64>,
    /// Percentage of samples served from a shared entry.
    pub dedup_rate: f64,
    /// Percentage of samples that failed.
    pub error_rate: f64,
}

/// Keeps the most recent `window` samples for each endpoint.
#[derive(Debug)]
pub struct EndpointMetrics {
    window: usize,
    samples: DashMap<String, VecDeque<Sample>>,
}

impl EndpointMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: DashMap::new(),
        }
    }

    pub fn record(&self, endpoint: &str, sample: Sample) {
        let mut samples = self.samples.entry(endpoint.to_owned()).or_default();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn stats_for(&self, endpoint: &str) -> Option<EndpointStats> {
        let samples = self.samples.get(endpoint)?;
        Some(summarize(endpoint, &samples))
    }

    /// Stats for every endpoint seen, sorted by endpoint.
    pub fn all(&self) -> Vec<EndpointStats> {
        let mut all: Vec<EndpointStats> = self
            .samples
            .iter()
            .map(|entry| summarize(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        all
    }

    pub fn reset(&self) {
        self.samples.clear();
    }
}

fn summarize(endpoint: &str, samples: &VecDeque<Sample>) -> EndpointStats {
    let count = samples.len();
    let shared: Vec<Duration> = samples
        .iter()
        .filter(|s| s.shared)
        .map(|s| s.latency)
        .collect();
    let fresh: Vec<Duration> = samples
        .iter()
        .filter(|s| !s.shared)
        .map(|s| s.latency)
        .collect();
    let failed = samples.iter().filter(|s| s.failed).count();

    EndpointStats {
        endpoint: endpoint.to_owned(),
        samples: count,
        avg_latency_ms: average_ms(samples.iter().map(|s| s.latency)).unwrap_or(0.0),
        avg_shared_latency_ms: average_ms(shared.iter().copied()),
        avg_fresh_latency_ms: average_ms(fresh.iter().copied()),
        dedup_rate: percent(shared.len(), count),
        error_rate: percent(failed, count),
    }
}

fn average_ms(latencies: impl Iterator<Item = Duration>) -> Option<f64> {
    let (total, count) = latencies.fold((Duration::ZERO, 0u32), |(total, count), latency| {
        (total + latency, count + 1)
    });
    (count > 0).then(|| total.as_nanos() as f64 / f64::from(count) / 1_000_000.0)
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
