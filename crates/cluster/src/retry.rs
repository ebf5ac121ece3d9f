//! Exponential backoff with jitter and a total time budget.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::info;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Fraction of each delay randomized in both directions, `0.0..=1.0`.
    pub jitter: f64,
    /// No attempt starts once this much time has passed since the first.
    pub total_budget: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: 0.2,
            total_budget: Duration::from_secs(30 * 60),
        }
    }
}

impl RetryConfig {
    /// Delay after the `attempt`-th failure (1-based), before jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1).min(30)).unwrap_or(30);
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + factor)).max(0.0))
    }
}

/// Run `f` until it succeeds, fails permanently or the budget runs out.
///
/// # Errors
/// Returns the last error.
pub async fn with_retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_transient() {
                    return Err(e);
                }

                let delay = config.jittered(config.delay_for_attempt(attempt));
                if started.elapsed() + delay > config.total_budget {
                    return Err(e);
                }

                info!("{operation_name} failed (attempt {attempt}): {e}. Retrying in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
