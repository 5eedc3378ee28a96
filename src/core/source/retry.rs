//! Bounded exponential backoff for remote transport calls.

use super::remote::TransportError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Retry settings for transient network failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each backoff
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and fakes
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Backoff before retry number `attempt` (zero-based)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.max_backoff_ms);
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let mut backoff = Duration::from_secs_f64((base / 1000.0).min(max.as_secs_f64()));

        if self.add_jitter {
            let jitter_factor = 1.0 + (rand_f64() * 0.25);
            backoff = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
        }

        backoff.min(max)
    }

    /// Run `op`, retrying transient failures.
    ///
    /// Non-transient errors return immediately. When retries run out the last
    /// transient error is returned as `TransportError::Exhausted`.
    pub fn run<T, F>(&self, what: &str, op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Result<T, TransportError>,
    {
        self.run_observed(what, op, |_, _| {})
    }

    /// Like [`RetryPolicy::run`], handing every transient failure to `on_transient`
    /// along with its zero-based attempt number
    pub fn run_observed<T, F, O>(
        &self,
        what: &str,
        mut op: F,
        mut on_transient: O,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Result<T, TransportError>,
        O: FnMut(u32, &str),
    {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_for_attempt(attempt - 1);
                debug!(
                    what,
                    attempt,
                    max_retries = self.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying remote call"
                );
                std::thread::sleep(backoff);
            }

            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        trace!(what, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(TransportError::Transient(message)) => {
                    warn!(what, attempt, error = %message, "Transient remote failure");
                    on_transient(attempt, &message);
                    last_error = message;
                }
                Err(other) => return Err(other),
            }
        }

        Err(TransportError::Exhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

/// Cheap jitter source without pulling in a RNG crate
fn rand_f64() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    (nanos as f64 / u32::MAX as f64).fract()
}
