//! Client-side request deduplication.
//!
//! [`Deduplicator`] makes concurrent identical requests share one execution
//! and one outcome. [`ApiClient`] puts it in front of an HTTP transport and
//! keeps per-endpoint latency and error metrics.

pub mod client;
pub mod config;
pub mod dedup;
pub mod logging;
pub mod utils;

pub use client::{ApiClient, CallConfig, RequestOptions};
pub use dedup::{
    CancelReason, ConfigError, DedupConfig, DedupConfigPatch, DedupError, Deduplicator, Execution,
    RequestDescriptor, StatsSnapshot,
};
