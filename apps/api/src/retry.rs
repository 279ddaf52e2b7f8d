//! In-call retry with exponential backoff.
//!
//! Only for idempotent calls (search, token refresh, generation, chat send).
//! Application submission must never go through here: a retried submit can
//! apply twice.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::warn;

use crate::errors::ExternalError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Longest wait we are willing to sit through inside one call, including
    /// platform-supplied `Retry-After` values.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). `None` means give up:
    /// the server asked us to wait longer than `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        if let Some(wait) = retry_after {
            return (wait <= self.max_delay).then_some(wait);
        }
        // 1s, 2s, 4s, ...
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        Some((self.base_delay * factor).min(self.max_delay))
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ExternalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut attempt = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(err);
        }

        let Some(delay) = policy.delay_for(attempt, err.retry_after()) else {
            return Err(err);
        };

        warn!(
            "{label} attempt {attempt} failed ({err}), retrying after {}ms...",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Parses a delta-seconds `Retry-After` header. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
