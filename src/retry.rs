//! Retry logic with exponential backoff
//!
//! Boundary fetches are retried on transient failures only. Delays grow by
//! `backoff_multiplier` up to `max_delay`, with optional jitter so concurrent
//! retries spread out.
//!
//! # Example
//!
//! ```no_run
//! use bundle_dl::retry::fetch_with_retry;
//! use bundle_dl::config::RetryConfig;
//! use bundle_dl::error::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let body = fetch_with_retry(&config, || async {
//!     Ok::<_, Error>(b"payload".to_vec())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Server busy, rate limited or timed out upstream
            Error::Fetch { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Error::EmptyResponse
            | Error::DisguisedErrorPage
            | Error::SizeExceeded { .. }
            | Error::Encoding(_)
            | Error::InvalidState { .. }
            | Error::Persistence(_)
            | Error::NothingSelected
            | Error::Aborted
            | Error::Config { .. }
            | Error::Boundary(_)
            | Error::Archive(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
///
/// `max_attempts` counts retries after the first call, so the operation runs
/// at most `max_attempts + 1` times. Returns the last error on failure.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::debug!(error = %error, "not retrying permanent failure");
            return Err(error);
        }
        if attempt >= config.max_attempts {
            tracing::warn!(
                error = %error,
                attempts = attempt + 1,
                "Fetch failed after all retry attempts"
            );
            return Err(error);
        }

        attempt += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %error,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = wait.as_millis() as u64,
            "Fetch failed, retrying"
        );
        tokio::time::sleep(wait).await;

        delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Stretch `delay` by a uniform random factor in `[1.0, 2.0]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
