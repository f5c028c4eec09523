//! Bounded polling for eventually consistent reads.
//!
//! Some writes (entity tags in particular) are not visible to the next read
//! right away. [`poll_until`] re-issues the same read at a fixed interval
//! until it reports success, a non-retryable failure, the timeout elapses, or
//! the provider is stopped.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::data::Attributes;
use crate::error::ProviderError;

/// Pause between two attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of a failed attempt.
#[derive(Debug)]
pub enum RetryError {
    /// The condition does not hold yet; the message names what is missing.
    Retryable(String),
    /// Give up immediately.
    NonRetryable(ProviderError),
}

impl From<ProviderError> for RetryError {
    fn from(err: ProviderError) -> Self {
        RetryError::NonRetryable(err)
    }
}

/// Run `attempt` until it succeeds or fails for good.
///
/// Cancellation is checked while an attempt is in flight and while waiting
/// between attempts. On timeout the error names the last unmet condition.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError>>,
{
    let deadline = Instant::now() + timeout;
    let mut last = String::from("condition never checked");
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(&last));
        }
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&last)),
            outcome = attempt() => outcome,
        };

        match outcome {
            Ok(value) => {
                debug!(attempts, "polled condition satisfied");
                return Ok(value);
            }
            Err(RetryError::NonRetryable(err)) => return Err(err),
            Err(RetryError::Retryable(message)) => {
                debug!(attempts, %message, "polled condition not met yet");
                last = message;
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ProviderError::DeadlineExceeded(format!(
                "timed out after {}: {}",
                humantime::format_duration(timeout),
                last
            )));
        }

        let pause = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&last)),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

fn cancelled(last: &str) -> ProviderError {
    ProviderError::Cancelled(format!("polling stopped while waiting for {}", last))
}

/// Read an operation timeout from the `timeouts` block (`create = "30s"`).
pub fn operation_timeout(
    data: &impl Attributes,
    operation: &str,
    default: Duration,
) -> Result<Duration, ProviderError> {
    match data.single_block("timeouts").and_then(|t| t.get_str(operation)) {
        Some(raw) => humantime::parse_duration(raw).map_err(|e| {
            ProviderError::Validation(format!(
                "invalid {} timeout {:?}: {}",
                operation, raw, e
            ))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ResourceData;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = poll_until(Duration::from_secs(5), SHORT, &token, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(RetryError::Retryable(format!("attempt {}", n)))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_names_last_condition() {
        let token = CancellationToken::new();
        let result: Result<(), _> =
            poll_until(Duration::from_millis(30), SHORT, &token, || async {
                Err(RetryError::Retryable("tag env not found".to_string()))
            })
            .await;

        match result {
            Err(ProviderError::DeadlineExceeded(msg)) => assert!(msg.contains("tag env")),
            other => panic!("expected deadline error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<(), _> = poll_until(Duration::from_secs(5), SHORT, &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RetryError::NonRetryable(ProviderError::Remote(
                    "bad request".to_string(),
                )))
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), _> = poll_until(Duration::from_secs(5), SHORT, &token, || async {
            Err(RetryError::Retryable("never".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = poll_until(
            Duration::from_secs(30),
            Duration::from_secs(10),
            &token,
            || async { Err(RetryError::Retryable("tag env".to_string())) },
        )
        .await;

        match result {
            Err(ProviderError::Cancelled(msg)) => assert!(msg.contains("tag env")),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_operation_timeout() {
        let default = Duration::from_secs(10);
        let data = ResourceData::from_value(json!({"timeouts": [{"create": "30s"}]})).unwrap();
        assert_eq!(
            operation_timeout(&data, "create", default).unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(operation_timeout(&data, "update", default).unwrap(), default);

        let bad = ResourceData::from_value(json!({"timeouts": [{"create": "soon"}]})).unwrap();
        assert!(operation_timeout(&bad, "create", default).is_err());
    }
}
