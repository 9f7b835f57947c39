//! Async retry utilities with exponential backoff

use std::time::Duration;

/// Default maximum retry attempts for storage operations
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay in milliseconds for exponential backoff
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Upper bound for a single backoff sleep
const MAX_DELAY_MS: u64 = 5_000;

fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_delay_ms.saturating_mul(factor).min(MAX_DELAY_MS))
}

/// Retry an async operation with exponential backoff.
///
/// Only errors for which `is_retryable` returns true are retried; any other
/// error is returned immediately.
///
/// Returns `Ok((value, attempts))` on success, or `Err((error, attempts))` on failure.
pub async fn retry_with_backoff_async<T, F, Fut, E, P>(
    max_attempts: u32,
    base_delay_ms: u64,
    is_retryable: P,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if attempts >= max_attempts || !is_retryable(&e) {
                    return Err((e, attempts));
                }
                let delay = backoff_delay(base_delay_ms, attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result =
            retry_with_backoff_async(3, 1, |_: &&str| true, || async { Ok::<_, &str>(7) }).await;
        assert_eq!(result, Ok((7, 1)));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff_async(
            3,
            1,
            |_: &&str| true,
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err("transient error")
                } else {
                    Ok(())
                }
            },
        )
        .await;
        assert_eq!(result, Ok(((), 2)));
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result =
            retry_with_backoff_async(3, 1, |_: &&str| true, || async {
                Err::<(), _>("persistent error")
            })
            .await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persistent error");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff_async(
            5,
            1,
            |e: &&str| *e == "transient",
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("fatal")
            },
        )
        .await;
        assert_eq!(result, Err(("fatal", 1)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(100, 40), Duration::from_millis(MAX_DELAY_MS));
    }
}
