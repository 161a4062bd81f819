//! Slow-call reporting shared by the perf-log decorator and prepared queries.

use std::time::Duration;

/// `warn!` when `elapsed` reaches `min_ms`. Returns whether it did.
pub fn log_slow(kind: &str, label: &str, elapsed: Duration, min_ms: u64) -> bool {
    let ms = elapsed.as_millis() as u64;
    if ms < min_ms {
        return false;
    }
    tracing::warn!(kind, target_label = label, elapsed_ms = ms, threshold_ms = min_ms, "slow {kind}");
    true
}
