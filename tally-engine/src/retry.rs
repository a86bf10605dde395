//! Exponential backoff with jitter for recoverable stage failures.

use std::time::Duration;

use rand::Rng;
use tally_core::errors::RunError;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,
    /// Maximum backoff per attempt.
    pub max_backoff: Duration,
    /// Multiplier for each backoff round.
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            base: 3.0,
        }
    }
}

/// Consecutive calls to [`Backoff::next`] return growing, jittered
/// intervals capped at the configured maximum.
#[derive(Debug)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
        }
    }

    /// The next interval to wait.
    pub fn next(&mut self) -> Duration {
        let range = self.init_backoff..(self.next_backoff_secs * self.base);
        let rand_backoff = rand::thread_rng().gen_range(range);
        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }
}

/// Run `operation`, retrying recoverable failures up to `attempts`
/// times with backoff. Unrecoverable failures return immediately.
pub fn retry_with_backoff<T>(
    task_name: &str,
    attempts: u32,
    config: &BackoffConfig,
    mut operation: impl FnMut() -> Result<T, RunError>,
) -> Result<T, RunError> {
    let mut backoff = Backoff::new(config);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_recoverable() && attempt < attempts => {
                attempt += 1;
                let wait = backoff.next();
                tracing::warn!(
                    task = task_name,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "recoverable failure, retrying with backoff"
                );
                std::thread::sleep(wait);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::errors::{AnalysisError, StorageError};

    #[test]
    fn recoverable_errors_are_retried_until_success() {
        let mut calls = 0;
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            base: 1.5,
        };
        let result = retry_with_backoff("t", 3, &config, || {
            calls += 1;
            if calls < 3 {
                Err(RunError::Storage(StorageError::DbBusy))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn unrecoverable_errors_return_immediately() {
        let mut calls = 0;
        let result: Result<(), RunError> =
            retry_with_backoff("t", 3, &BackoffConfig::default(), || {
                calls += 1;
                Err(RunError::Analysis(AnalysisError::parameter("bad k")))
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_exhaust_with_the_last_error() {
        let mut calls = 0;
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            base: 1.1,
        };
        let result: Result<(), RunError> = retry_with_backoff("t", 2, &config, || {
            calls += 1;
            Err(RunError::Storage(StorageError::DbBusy))
        });
        assert!(matches!(
            result,
            Err(RunError::Storage(StorageError::DbBusy))
        ));
        assert_eq!(calls, 3);
    }
}
