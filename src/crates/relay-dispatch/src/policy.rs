//! Retry and worker timing policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_CLAIM_BLOCK: Duration = Duration::from_secs(2);

/// Shared policy for retries, backoff and worker timing
///
/// Construction normalizes the values: zero fields fall back to defaults
/// and `max_backoff` is raised to at least `base_backoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub heartbeat_interval: Duration,
    pub claim_block: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            claim_block: DEFAULT_CLAIM_BLOCK,
        }
    }
}

impl RetryPolicy {
    /// Build a normalized policy; zero values are replaced by defaults
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
            max_backoff,
            ..Default::default()
        }
        .normalized()
    }

    /// Apply the normalization rules
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.base_backoff.is_zero() {
            self.base_backoff = DEFAULT_BASE_BACKOFF;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = DEFAULT_MAX_BACKOFF;
        }
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if self.claim_block.is_zero() {
            self.claim_block = DEFAULT_CLAIM_BLOCK;
        }
        self
    }

    /// Exponential backoff for the given 1-based attempt, capped at
    /// `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exponent = (attempt - 1).min(32);
        let base_ms = self.base_backoff.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_backoff)
    }
}
