//! Connect retry schedule.
//!
//! The schedule is the portable, sync-only piece of the connect-retry logic;
//! the async loop that actually dials the worker lives in
//! `langbridge-runtime` (which has access to tokio).
//!
//! Backoff is linear, not exponential, and deliberately keeps a quirk of the
//! wire-compatible schedule: attempts 0 and 1 both wait the base delay
//! (`base * attempt` falling back to `base` when the product is zero). Worker
//! startup timing was tuned against the resulting sequence
//! 250, 250, 500, 750, … ms, so the formula is reproduced rather than
//! cleaned up.

use serde::{Deserialize, Serialize};

/// Default number of connect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default base delay between attempts in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;

/// Bounded linear-backoff schedule for connecting to a freshly launched
/// worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySchedule {
    /// Maximum number of connect attempts (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in ms (default: 250).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetrySchedule {
    /// Delay to wait after the failed attempt with the given zero-based
    /// index: `base * attempt`, with attempt 0 clamped to the base delay.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms * u64::from(attempt.max(1))
    }

    /// Whether the attempt budget is spent.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
