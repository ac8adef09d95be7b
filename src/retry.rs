//! Exponential backoff with jitter for provider calls. Embedder and
//! reflector invocations go through [`RetryPolicy::execute`] rather than
//! being retried ad hoc at each call site.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::Error;

/// Whether an error is worth retrying at all.
pub trait Retryable {
    /// `true` if a subsequent attempt might succeed.
    fn is_recoverable(&self) -> bool;
}

impl Retryable for Error {
    fn is_recoverable(&self) -> bool {
        self.is_retryable()
    }
}

/// Backoff shape for a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay never exceeds this, regardless of attempt count.
    pub max_delay: Duration,
    /// Fraction of the computed delay randomized in either direction.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Construct with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The config used for reflector calls: fewer, slower retries than an
    /// embedder's, since a reflection call is already the expensive path.
    #[must_use]
    pub fn for_reflector() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.25,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one operation through retries until it succeeds, exhausts its
/// budget, or fails with a non-recoverable error.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Construct a policy with the default config.
    #[must_use]
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Construct a policy with a specific config.
    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = std::cmp::min(exp_delay, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted_ms as u64)
        } else {
            delay
        }
    }

    /// Run `operation`, retrying on recoverable errors with exponential
    /// backoff and jitter. A non-recoverable error is returned as-is,
    /// unwrapped. Exhausting `max_retries` on a recoverable error instead
    /// surfaces [`Error::RetryExhausted`], carrying the attempt count and
    /// the last observed error.
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_recoverable() {
                        return Err(error);
                    }
                    if attempt >= self.config.max_retries {
                        return Err(Error::RetryExhausted {
                            attempts: attempt + 1,
                            source: error.into(),
                        });
                    }

                    attempt += 1;
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        ?delay,
                        error = %error,
                        "retrying after recoverable provider error"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
