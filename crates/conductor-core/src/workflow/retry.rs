//! Retry policy resolution and exponential backoff.
//!
//! Stateless: every function takes the `RetryConfig` it applies. Attempts are
//! 1-based (the first execution is attempt 1).

use std::time::Duration;

use conductor_types::workflow::{RetryConfig, WorkflowDefinition, WorkflowStep};

/// Longest delay a single backoff may reach, whatever the multiplier.
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Stateless retry handler for workflow step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Effective retry policy for a step: the step's own, else the workflow
    /// default, else a single attempt.
    pub fn resolve(step: &WorkflowStep, def: &WorkflowDefinition) -> RetryConfig {
        step.retry.or(def.retry).unwrap_or(RetryConfig::NONE)
    }

    /// Whether another attempt follows a failed `attempt`.
    pub fn should_retry(config: &RetryConfig, attempt: u32) -> bool {
        attempt < config.max_attempts.max(1)
    }

    /// Delay before the attempt after `attempt`:
    /// `delay_ms * backoff_multiplier^(attempt - 1)`.
    pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = config.delay_ms as f64 * config.backoff_multiplier.max(0.0).powi(exponent);
        if !millis.is_finite() {
            return MAX_BACKOFF;
        }
        Duration::from_millis(millis.round() as u64).min(MAX_BACKOFF)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
