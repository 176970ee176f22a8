use std::time::Duration;
use tokio::time::Instant;

/// Render a duration with two decimals in whatever unit suits it (`850.00µs`, `1.25s`).
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn about a freshly executed request that took longer than `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            endpoint = label,
            elapsed = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "Request exceeded slow threshold"
        );
    }
}
