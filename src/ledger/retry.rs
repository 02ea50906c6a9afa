//! Bounded retry policy for ledger calls.
//!
//! Every attempt is capped by a timeout; transient failures back off
//! exponentially. After the last attempt the error is surfaced, never
//! silently dropped. Errors the ledger answered with (`Rejected`,
//! `PositionNotFound`, `PriceUnavailable`) are final and short-circuit.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::LedgerError;

/// Retry behavior for ledger reads and writes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 250ms)
    pub initial_delay: Duration,
    /// Cap on the backoff delay (default: 5s)
    pub max_delay: Duration,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0-1.0, default: 0.2)
    pub jitter_factor: f64,
    /// Per-attempt timeout (default: 10s)
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Fast policy for tests: no meaningful delays, tight timeouts.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            attempt_timeout: Duration::from_secs(1),
        }
    }
}

/// Exponential backoff delay with deterministic jitter.
///
/// `attempt` is 0-based. Even attempts land slightly above the base
/// delay, odd attempts slightly below, which spreads concurrent keepers
/// without pulling in a randomness dependency.
pub fn calculate_backoff_delay(
    attempt: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
) -> Duration {
    let base_secs = initial.as_secs_f64() * multiplier.powi(attempt as i32);
    let capped_secs = base_secs.min(max.as_secs_f64());

    let jitter_factor = if attempt % 2 == 0 {
        1.0 + jitter * 0.5
    } else {
        1.0 - jitter * 0.5
    };
    Duration::from_secs_f64((capped_secs * jitter_factor).max(0.0))
}

/// Run `op` under the retry policy.
///
/// `label` names the call in logs. Returns the value of the first
/// successful attempt, the final error on a non-retryable failure, or
/// `RetriesExhausted` once attempts run out.
pub async fn call_with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &'static str,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut last: Option<LedgerError> = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = calculate_backoff_delay(
                attempt - 1,
                config.initial_delay,
                config.max_delay,
                config.backoff_multiplier,
                config.jitter_factor,
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(config.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_retryable() => return Err(err),
            Ok(Err(err)) => {
                warn!(call = label, attempt = attempt + 1, error = %err, "ledger call failed");
                last = Some(err);
            }
            Err(_) => {
                warn!(call = label, attempt = attempt + 1, "ledger call timed out");
                last = Some(LedgerError::Timeout {
                    attempt: attempt + 1,
                });
            }
        }
    }

    Err(LedgerError::RetriesExhausted {
        attempts: config.max_attempts,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}
