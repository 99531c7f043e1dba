//! Retry with exponential backoff for Resource Manager calls.
//!
//! Handles transient failures: throttling (429), 5xx responses and
//! connection problems. Anything else is returned to the caller untouched.

use std::{future::Future, time::Duration};

use reqwest::{StatusCode, header::RETRY_AFTER};
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Determines if a reqwest error is retryable.
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect()
        || error.is_timeout()
        || error.is_request()
        || error
            .status()
            .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            .unwrap_or(false)
}

/// Server-requested wait from a `Retry-After` header, in delta-seconds.
///
/// Resource Manager never sends the HTTP-date form, so that form is ignored.
pub fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Execute a request with retry logic.
///
/// `make_request` is called once per attempt. A throttled or 5xx response is
/// retried until attempts run out, after which it is returned as-is so the
/// caller can report the status.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    operation: &str,
    make_request: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    if !config.enabled {
        return make_request().await;
    }

    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        let last_attempt = attempt + 1 >= max_attempts;

        match make_request().await {
            Ok(response) => {
                let status = response.status();

                if config.should_retry_status(status.as_u16()) && !last_attempt {
                    let delay = config.delay_for(attempt, retry_after(&response));
                    warn!(
                        operation,
                        status = %status,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable status code, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    debug!(
                        operation,
                        status = %status,
                        attempt = attempt + 1,
                        "Request completed after retry"
                    );
                }

                return Ok(response);
            }
            Err(error) => {
                if is_retryable_error(&error) && !last_attempt {
                    let delay = config.delay_for(attempt, None);
                    warn!(
                        operation,
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable error, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    warn!(
                        operation,
                        error = %error,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts"
                    );
                }

                return Err(error);
            }
        }
    }
}
