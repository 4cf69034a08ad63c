//! Sync cycle tuning.

use std::time::Duration;

/// Configuration for the per-page sync cycle.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Operation failure ratio above which a partial surgical edit is
    /// discarded in favor of full replacement. A half-failed surgical edit
    /// is worse than a clean full rewrite.
    pub fallback_ratio: f64,
    /// Time budget for one external converter call.
    pub converter_timeout: Duration,
    /// Bounded wait for the per-page baseline lock.
    pub lock_wait: Duration,
    /// Total write attempts when the remote signals rate limiting.
    pub retry_attempts: u32,
    /// Base delay for the doubling retry backoff.
    pub backoff_base: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_ratio: 0.5,
            converter_timeout: Duration::from_secs(30),
            lock_wait: Duration::from_secs(10),
            retry_attempts: 4,
            backoff_base: Duration::from_millis(500),
        }
    }
}
