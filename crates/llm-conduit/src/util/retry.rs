// Retry with exponential backoff, used by the HTTP transport around each POST.

use std::future::Future;
use std::time::Duration;

use llm_conduit_types::{Error, RetryPolicy};
use rand::Rng;

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retry budget is spent.
///
/// A `retry_after` longer than `max_delay` is returned to the caller at once
/// so it can decide how long to back off.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let too_long = err
            .retry_after
            .is_some_and(|d| d.as_secs_f64() > policy.max_delay);
        if !err.retryable || too_long || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = calculate_delay(policy, attempt, err.retry_after);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "retrying after {}",
            err
        );
        if let Some(ref callback) = policy.on_retry {
            callback(&err, attempt, delay);
        }
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// `base_delay * multiplier^attempt`, capped at `max_delay`, optionally
/// scaled by a jitter factor in `[0.5, 1.5]` and re-capped. A server-provided
/// `retry_after` replaces the computed value.
pub(crate) fn calculate_delay(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after;
    }

    let delay_secs =
        (policy.base_delay * policy.backoff_multiplier.powi(attempt as i32)).min(policy.max_delay);
    let delay_secs = if policy.jitter {
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.5);
        (delay_secs * factor).min(policy.max_delay)
    } else {
        delay_secs
    };

    Duration::from_secs_f64(delay_secs.max(0.0))
}
