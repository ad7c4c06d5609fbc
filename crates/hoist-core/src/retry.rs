//! Retry with exponential backoff and cooperative cancellation.
//!
//! Every network-facing step goes through [`retry`]; validation and build
//! failures never do.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{HoistError, HoistResult};

/// Cooperative cancellation signal.
///
/// Checked between retry attempts and honored during delay windows. It
/// never terminates an in-flight subprocess.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake any waiter.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().expect("cancellation lock poisoned");
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().expect("cancellation lock poisoned")
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the token was cancelled during the wait.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().expect("cancellation lock poisoned");
        let deadline = std::time::Instant::now() + duration;
        while !*cancelled {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, timeout) = cvar
                .wait_timeout(cancelled, remaining)
                .expect("cancellation lock poisoned");
            cancelled = guard;
            if timeout.timed_out() {
                return *cancelled;
            }
        }
        true
    }
}

/// Backoff policy for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
    /// Upper bound for the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Run `op` up to `policy.max_attempts` times.
///
/// `classify` decides from each result whether another attempt should be
/// made. The operation is invoked at most `max_attempts` times, never
/// `max_attempts + 1`. A final `Ok` is returned as-is even when `classify`
/// asked for another attempt; a final retryable `Err` is wrapped in a
/// retry-exhausted error carrying the last failure. Non-retryable results
/// short-circuit immediately.
pub fn retry<T, F, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut classify: C,
    mut op: F,
) -> HoistResult<T>
where
    F: FnMut(u32) -> HoistResult<T>,
    C: FnMut(&HoistResult<T>) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(HoistError::cancelled());
        }

        let result = op(attempt);
        let wants_retry = classify(&result);

        if !wants_retry {
            return result;
        }
        if attempt == max_attempts {
            return match result {
                Ok(value) => Ok(value),
                Err(err) => Err(HoistError::retry_exhausted(max_attempts, err)),
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        match &result {
            Err(err) => warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            ),
            Ok(_) => debug!(attempt, max_attempts, "result not accepted yet, retrying"),
        }
        if cancel.wait_timeout(delay) {
            return Err(HoistError::cancelled());
        }
    }
    unreachable!("retry loop always returns within max_attempts")
}

/// Retry predicate for network-facing steps: retry only errors explicitly
/// marked transient by the layer that produced them.
pub fn retry_transient<T>(result: &HoistResult<T>) -> bool {
    matches!(result, Err(err) if err.transient)
}
