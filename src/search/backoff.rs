//! Bounded exponential backoff polling.
//!
//! [`BackoffPoller`] drives an async probe until it succeeds, fails fatally,
//! or spends its attempt budget. Delays grow geometrically but are clamped
//! to `[initial_delay_ms, max_delay_ms]`, so they never compound unboundedly.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Outcome of a single probe.
#[derive(Debug)]
pub enum Probe<T> {
    /// The probe produced a final value.
    Success(T),
    /// Not ready yet; poll again after a delay.
    Retryable(String),
    /// Unrecoverable failure; stop polling immediately.
    Fatal(Error),
}

/// Progress notification emitted before each probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTick {
    /// 1-based attempt about to run.
    pub attempt: u32,
    /// Total attempt budget.
    pub max_attempts: u32,
    /// Human-readable status.
    pub message: String,
}

/// Backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Total number of probes before giving up (at least 1).
    pub max_attempts: u32,
    /// Delay after the first probe, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(10, 1_000, 10_000)
    }
}

impl BackoffConfig {
    /// Creates a doubling schedule.
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            initial_delay_ms,
            max_delay_ms,
            multiplier: 2,
        }
    }

    /// Sets the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = if multiplier == 0 { 1 } else { multiplier };
        self
    }

    /// Calculates the delay that follows a given attempt.
    ///
    /// Formula: `clamp(initial_delay_ms * multiplier^(attempt - 1), min, max_delay_ms)`
    /// where `min` is `initial_delay_ms` (or `max_delay_ms` if that is smaller).
    /// Attempt `0` has no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let floor = self.initial_delay_ms.min(self.max_delay_ms);
        let factor = u64::from(self.multiplier).saturating_pow(attempt - 1);
        self.initial_delay_ms
            .saturating_mul(factor)
            .clamp(floor, self.max_delay_ms)
    }

    /// Returns the delays slept between attempts, in order.
    ///
    /// There are `max_attempts - 1` entries: nothing is slept after the last probe.
    #[must_use]
    pub fn schedule(&self) -> Vec<u64> {
        (1..self.max_attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

/// Drives a probe with bounded exponential backoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffPoller {
    config: BackoffConfig,
}

impl BackoffPoller {
    /// Creates a poller with the given schedule.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Returns the schedule.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Polls `probe` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `on_tick` is invoked before every probe with the attempt about to run.
    /// `probe` receives the same 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the probe's error on [`Probe::Fatal`], or
    /// [`Error::ExhaustedRetries`] once `max_attempts` probes were all retryable.
    pub async fn poll<T, P, Fut, C>(&self, mut probe: P, mut on_tick: C) -> Result<T>
    where
        P: FnMut(u32) -> Fut,
        Fut: Future<Output = Probe<T>>,
        C: FnMut(&PollTick),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_reason = String::from("no attempts made");

        for attempt in 1..=max_attempts {
            let message = if attempt == 1 {
                format!("Starting (attempt {attempt}/{max_attempts})")
            } else {
                format!("{last_reason} (attempt {attempt}/{max_attempts})")
            };
            on_tick(&PollTick {
                attempt,
                max_attempts,
                message,
            });

            match probe(attempt).await {
                Probe::Success(value) => return Ok(value),
                Probe::Fatal(err) => {
                    tracing::warn!(attempt, error = %err, "Poll failed fatally");
                    return Err(err);
                },
                Probe::Retryable(reason) => {
                    last_reason = reason;
                },
            }

            if attempt < max_attempts {
                let delay = self.config.delay_for_attempt(attempt);
                metrics::counter!("backoff_retries_total").increment(1);
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay,
                    reason = %last_reason,
                    "Retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        metrics::counter!("backoff_exhausted_total").increment(1);
        tracing::warn!(attempts = max_attempts, reason = %last_reason, "Backoff exhausted");
        Err(Error::ExhaustedRetries {
            attempts: max_attempts,
            last_reason,
        })
    }
}
