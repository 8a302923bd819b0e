use log::{debug, warn};
use rand::random;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{AgentError, Result};

/// Retry behaviour for outbound deliveries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after every failed attempt
    pub backoff_factor: f64,

    /// Upper bound on the delay, before jitter
    pub max_delay: Duration,

    /// Add up to 100ms of random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryBuilder {
        RetryBuilder::default()
    }

    /// Delay following `current`, capped at `max_delay`
    fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.backoff_factor.max(1.0));
        grown.min(self.max_delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay + Duration::from_millis(random::<u64>() % 100)
        } else {
            delay
        }
    }
}

/// Run `operation` until it succeeds or the policy gives up
pub async fn execute_with_retry<F, Fut, T, E>(
    operation: F,
    policy: &RetryPolicy,
    context: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    execute_with_retry_if(operation, policy, context, |_| true).await
}

/// Like [`execute_with_retry`], but stops at the first error for which
/// `is_transient` returns false
pub async fn execute_with_retry_if<F, Fut, T, E, P>(
    operation: F,
    policy: &RetryPolicy,
    context: &str,
    is_transient: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    let mut delay = policy.initial_delay.min(policy.max_delay);

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempts += 1;

                if attempts >= max_attempts || !is_transient(&err) {
                    return Err(AgentError::retry(context, attempts, err));
                }

                warn!("{} (attempt {}/{}): {}", context, attempts, max_attempts, err);

                let wait = policy.with_jitter(delay);
                debug!("Retrying after {:?} delay", wait);
                sleep(wait).await;

                delay = policy.next_delay(delay);
            }
        }
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Default)]
pub struct RetryBuilder {
    policy: RetryPolicy,
}

impl RetryBuilder {
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}
