use crate::TimeoutError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Invoke `probe` until it succeeds or `timeout` elapses.
///
/// Failed attempts wait `retry_interval` before the next one. On timeout
/// the error carries the message of the last failed attempt.
pub async fn retry_until_timeout<T, E, F, Fut>(
    mut probe: F,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<T, TimeoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut last_error = String::new();
    let mut attempts = 0u32;

    let polling = async {
        loop {
            attempts += 1;
            match probe().await {
                Ok(value) => return value,
                Err(e) => {
                    last_error = e.to_string();
                    tracing::trace!("Attempt {} failed: {}", attempts, last_error);
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    };

    let outcome = tokio::time::timeout(timeout, polling).await;
    match outcome {
        Ok(value) => Ok(value),
        Err(_) => {
            tracing::debug!("Gave up after {} attempts in {:?}", attempts, timeout);
            Err(TimeoutError {
                timeout_ms: timeout.as_millis() as u64,
                last_error,
            })
        }
    }
}
