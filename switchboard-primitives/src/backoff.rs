//! Bounded exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy with exponential backoff and a fixed attempt cap.
///
/// Only errors the caller classifies as transient are retried; everything
/// else propagates on the first failure. The final attempt's error is
/// returned unchanged when the cap is exhausted.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the supplied attempt cap and delay bounds.
    ///
    /// An attempt cap of zero is treated as one attempt.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Default policy for language-model calls: 3 attempts, 2s–30s backoff.
    #[must_use]
    pub fn model() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }

    /// Default policy for vector-store calls: 2 attempts, 0.5s–5s backoff.
    #[must_use]
    pub fn store() -> Self {
        Self::new(2, Duration::from_millis(500), Duration::from_secs(5))
    }

    /// Returns the configured attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay applied after the given zero-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Runs `op`, retrying while `is_transient` holds and attempts remain.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error immediately, or the last error
    /// once the attempt cap is exhausted.
    pub async fn run<T, E, F, Fut, P>(&self, subject: &str, is_transient: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_transient(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
