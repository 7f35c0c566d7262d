//! Retry with exponential backoff and jitter
//!
//! Re-invokes a fallible async operation until it succeeds, the configured
//! attempt count is exhausted, or the request is cancelled. Cancellation is
//! checked before every attempt, before and during every backoff wait, and
//! again after a failed attempt — a cancellation triggered from inside the
//! operation stops retrying even though the attempt surfaced an ordinary
//! error. Exhaustion re-returns the last observed error verbatim.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::{link_signals, CancelSignal, Canceller};
use crate::config::RetryConfig;
use crate::error::{is_retryable, Result, SafetyError};

/// Retry schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total number of attempts, including the first; never less than one.
    pub fn max_attempts(&self) -> usize {
        self.config.max_attempts.max(1)
    }

    /// Deterministic delay after a failure of `attempt` (1-based):
    /// `min(max_delay, initial_delay * 2^(attempt - 1))`.
    pub fn base_delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = 2f64.powi(attempt.saturating_sub(1).min(i32::MAX as usize) as i32);
        let delay = self.config.initial_delay.as_secs_f64() * exponent;
        Duration::from_secs_f64(delay.min(self.config.max_delay.as_secs_f64()))
    }

    /// Backoff delay with jitter applied: the base delay scaled by
    /// `1 ± jitter_ratio * random`, clamped to zero or more. A ratio of 0
    /// yields the deterministic schedule.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let ratio = self.config.jitter_ratio;
        if !(ratio.is_finite() && ratio > 0.0) {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-1.0..=1.0) * ratio;
        Duration::from_secs_f64((base.as_secs_f64() * (1.0 + spread)).max(0.0))
    }
}

/// Per-attempt context handed to the retried operation.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based attempt number
    pub attempt: usize,

    /// Rendered message of the previous attempt's failure, if any
    pub last_error: Option<String>,

    /// Signal for nested I/O; mirrors the caller's signal when one was
    /// supplied
    pub signal: CancelSignal,
}

/// Retry `operation` with exponential backoff and jitter.
///
/// `parent` is the caller's cancellation signal; the orchestrator links an
/// internal coordinator to it for the duration of the call and unlinks on
/// exit, so no listener outlives the retry loop.
pub async fn retry_with_jitter<F, Fut, T>(
    policy: &RetryPolicy,
    parent: Option<&CancelSignal>,
    operation: F,
) -> Result<T>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let canceller = Canceller::new();
    let link = parent.map(|parent| link_signals(&canceller, parent));
    let result = drive(policy, canceller.signal(), operation).await;
    if let Some(link) = link {
        link.unlink();
    }
    result
}

async fn drive<F, Fut, T>(policy: &RetryPolicy, signal: CancelSignal, mut operation: F) -> Result<T>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut last_error: Option<String> = None;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        signal.check()?;

        let context = AttemptContext {
            attempt,
            last_error: last_error.clone(),
            signal: signal.clone(),
        };
        let error = match operation(context).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        // Cancellation triggered inside the attempt outranks the error the
        // attempt surfaced.
        if let Some(reason) = signal.reason() {
            warn!(attempt, %reason, "operation cancelled during attempt");
            return Err(SafetyError::Cancelled { reason });
        }

        if !is_retryable(&error) {
            debug!(attempt, error = %error, "non-retryable error");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(attempt, error = %error, "retry attempts exhausted");
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, retrying"
        );
        last_error = Some(error.to_string());

        tokio::select! {
            _ = signal.cancelled() => {
                return Err(SafetyError::Cancelled {
                    reason: signal.reason().unwrap_or_default(),
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Builder for one-off retry calls.
pub struct RetryBuilder {
    config: RetryConfig,
    signal: Option<CancelSignal>,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
            signal: None,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.config.jitter_ratio = ratio;
        self
    }

    pub fn signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub async fn run<F, Fut, T>(self, operation: F) -> Result<T>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = RetryPolicy::new(self.config);
        retry_with_jitter(&policy, self.signal.as_ref(), operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn deterministic_policy(attempts: usize, initial_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_ratio: 0.0,
        })
    }

    #[test]
    fn deterministic_backoff_doubles_and_caps() {
        let policy = deterministic_policy(5, 100, 1_000);
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(
            policy.base_delay_for_attempt(5),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = deterministic_policy(10, 250, 4_000);
        for attempt in 1..=10 {
            assert_eq!(
                policy.delay_for_attempt(attempt),
                policy.delay_for_attempt(attempt)
            );
            assert_eq!(
                policy.delay_for_attempt(attempt),
                policy.base_delay_for_attempt(attempt)
            );
        }
    }

    #[test]
    fn jitter_stays_within_the_configured_spread() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.25,
        });
        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1).as_secs_f64();
            assert!((0.74..=1.26).contains(&delay), "delay out of range: {delay}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_operation_succeeds() {
        let attempts_seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = attempts_seen.clone();

        let result = retry_with_jitter(&deterministic_policy(3, 100, 400), None, |ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push((ctx.attempt, ctx.last_error));
                if ctx.attempt < 2 {
                    Err(SafetyError::operation("nope"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        let seen = attempts_seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[0].1, None);
        assert_eq!(seen[1].0, 2);
        assert_eq!(seen[1].1.as_deref(), Some("operation failed: nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_last_error_verbatim() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_cl = counter.clone();

        let result: Result<()> =
            retry_with_jitter(&deterministic_policy(3, 1, 10), None, move |ctx| {
                let counter = counter_cl.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SafetyError::operation(format!("failure {}", ctx.attempt)))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.unwrap_err().to_string(),
            "operation failed: failure 3"
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_cl = counter.clone();

        let result: Result<()> =
            retry_with_jitter(&deterministic_policy(5, 1, 10), None, move |_ctx| {
                let counter = counter_cl.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SafetyError::cancelled("caller went away"))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn pre_cancelled_signal_never_invokes_the_operation() {
        let canceller = Canceller::new();
        canceller.cancel("already gone");
        let signal = canceller.signal();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_cl = counter.clone();

        let result: Result<()> =
            retry_with_jitter(&deterministic_policy(3, 1, 10), Some(&signal), move |_ctx| {
                let counter = counter_cl.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_from_inside_the_operation_stops_retrying() {
        let canceller = Arc::new(Canceller::new());
        let signal = canceller.signal();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_cl = counter.clone();
        let canceller_cl = canceller.clone();

        let result: Result<()> =
            retry_with_jitter(&deterministic_policy(5, 1, 10), Some(&signal), move |_ctx| {
                let counter = counter_cl.clone();
                let canceller = canceller_cl.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    canceller.cancel("stopped mid-flight");
                    // Looks like an ordinary failure, but cancellation wins.
                    Err(SafetyError::operation("transient"))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "operation cancelled: stopped mid-flight"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_interrupts_the_wait() {
        let canceller = Arc::new(Canceller::new());
        let signal = canceller.signal();
        let canceller_cl = canceller.clone();

        // Cancel while the orchestrator is waiting out a long backoff.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller_cl.cancel("backoff interrupted");
        });

        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.0,
        });
        let result: Result<()> = retry_with_jitter(&policy, Some(&signal), |_ctx| async {
            Err(SafetyError::operation("flaky"))
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "operation cancelled: backoff interrupted"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn builder_mirrors_the_free_function() {
        let result = RetryBuilder::new()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(1))
            .jitter_ratio(0.0)
            .run(|ctx| async move {
                if ctx.attempt == 1 {
                    Err(SafetyError::operation("first try"))
                } else {
                    Ok(ctx.attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
