//! Retry utilities with exponential backoff and jitter.
//!
//! Two flavors of retry live here:
//!
//! - [`retry_with_backoff`] / [`retry_on_conflict`] loop inside a single call,
//!   used for optimistic-concurrency conflicts and start-up calls that must
//!   eventually succeed.
//! - [`BackoffTracker`] remembers consecutive reconcile failures per object so
//!   that controller error policies can requeue with growing delays.
//!
//! # Example
//!
//! ```ignore
//! use openfga_operator::retry::{retry_on_conflict, RetryConfig};
//!
//! retry_on_conflict(&RetryConfig::with_max_attempts(5), "inject_env", || async {
//!     let workload = kube.get_workload(kind, ns, name).await?;
//!     kube.replace_workload(&patched(workload)).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Delay before attempt `n + 1`, without jitter
    fn delay_after(&self, failures: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(failures.saturating_sub(1).min(32) as i32);
        Duration::from_secs_f64(
            (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries every error until success, or until `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, operation_name, |_| true, operation).await
}

/// Execute an async operation, retrying only Kubernetes write conflicts.
///
/// The operation must re-read whatever it writes so that each attempt
/// recomputes its change against the latest resourceVersion. Any other error
/// is returned immediately.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    retry_when(config, operation_name, Error::is_conflict, operation).await
}

async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let delay = Duration::from_secs_f64(
                    config.delay_after(attempt).as_secs_f64() * jitter,
                );

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Per-object reconcile failure counter driving controller requeue delays.
///
/// Keys are free-form; controllers use `kind/namespace/name`.
#[derive(Debug)]
pub struct BackoffTracker {
    failures: DashMap<String, u32>,
    config: RetryConfig,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        })
    }
}

impl BackoffTracker {
    /// Create a tracker with the given delay curve
    pub fn new(config: RetryConfig) -> Self {
        Self {
            failures: DashMap::new(),
            config,
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn record_failure(&self, key: &str) -> Duration {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        let delay = self.config.delay_after(*entry);
        debug!(key, failures = *entry, delay_secs = delay.as_secs(), "Backing off");
        delay
    }

    /// Forget failures for `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}
