//! Retry policy for LLM calls, modelled as a small state machine.
//!
//! `RetryState` tracks the attempt count, the last error and the next delay for
//! one `submit` call. The client feeds each failure into `on_failure` and either
//! sleeps for the returned delay or surfaces the final error.

use std::time::Duration;

use crate::llm_client::LlmError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `3` means up to four calls in total.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each retry after that.
    pub base_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Random `0..jitter_fraction * delay` added to each delay. `0.0` disables jitter.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempt: 0,
            last_error: None,
            next_delay: None,
        }
    }

    /// Deterministic part of the delay before retry `retry` (1-based): 1s, 2s, 4s...
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_with_jitter(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let jitter_max_ms = (base.as_millis() as f64 * self.jitter_fraction) as u64;
        if jitter_max_ms == 0 {
            return base;
        }
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        base + Duration::from_millis(seed % (jitter_max_ms + 1))
    }
}

/// What the caller should do after a failed attempt.
#[derive(Debug)]
pub enum RetryStep {
    RetryAfter(Duration),
    GiveUp(LlmError),
}

#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    last_error: Option<String>,
    next_delay: Option<Duration>,
}

impl RetryState<'_> {
    /// Number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Records a failed attempt and decides whether to try again.
    ///
    /// Fatal errors end the call immediately. Transient errors are retried until
    /// the budget is spent, after which the last error is wrapped in
    /// `LlmError::RetriesExhausted`.
    pub fn on_failure(&mut self, error: LlmError) -> RetryStep {
        self.attempt += 1;
        self.last_error = Some(error.to_string());

        if !error.is_transient() {
            self.next_delay = None;
            return RetryStep::GiveUp(error);
        }

        if self.attempt > self.policy.max_retries {
            self.next_delay = None;
            return RetryStep::GiveUp(LlmError::RetriesExhausted {
                attempts: self.attempt,
                last: Box::new(error),
            });
        }

        let delay = self.policy.delay_with_jitter(self.attempt);
        self.next_delay = Some(delay);
        RetryStep::RetryAfter(delay)
    }
}
