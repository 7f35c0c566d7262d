//! Tower retry middleware over the orchestrator's policy machinery.
//!
//! What this module provides
//! - `RetryLayer`, wrapping any `Service<Req, Error = SafetyError>` with the
//!   same backoff-with-jitter schedule as
//!   [`retry_with_jitter`](crate::retry::retry_with_jitter)
//!
//! Composition
//! - `ServiceBuilder::new().layer(RetryLayer::new(policy, signal)).service(client)`
//!
//! Non-retryable errors return immediately and a cancelled signal
//! short-circuits both fresh attempts and backoff waits, so a service-shaped
//! caller gets the same guarantees as a closure-shaped one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tower::{Layer, Service, ServiceExt};

use crate::cancel::CancelSignal;
use crate::error::{is_retryable, SafetyError};
use crate::retry::RetryPolicy;

pub struct RetryLayer {
    policy: RetryPolicy,
    signal: CancelSignal,
}

impl RetryLayer {
    /// A layer retrying per `policy` until `signal` cancels.
    pub fn new(policy: RetryPolicy, signal: CancelSignal) -> Self {
        Self { policy, signal }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner: Arc::new(Mutex::new(inner)),
            policy: self.policy.clone(),
            signal: self.signal.clone(),
        }
    }
}

pub struct Retry<S> {
    inner: Arc<Mutex<S>>,
    policy: RetryPolicy,
    signal: CancelSignal,
}

impl<S> Clone for Retry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: self.policy.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = SafetyError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = SafetyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let policy = self.policy.clone();
        let signal = self.signal.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut attempt = 0usize;
            loop {
                attempt += 1;
                signal.check()?;

                let result = {
                    let mut guard = inner.lock().await;
                    ServiceExt::ready(&mut *guard).await?.call(req.clone()).await
                };

                let error = match result {
                    Ok(response) => return Ok(response),
                    Err(error) => error,
                };
                if let Some(reason) = signal.reason() {
                    return Err(SafetyError::Cancelled { reason });
                }
                if !is_retryable(&error) || attempt >= policy.max_attempts() {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tokio::select! {
                    _ = signal.cancelled() => {
                        return Err(SafetyError::Cancelled {
                            reason: signal.reason().unwrap_or_default(),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Canceller;
    use crate::config::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::service_fn;

    fn policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_ratio: 0.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retry_eventually_succeeds() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let svc = service_fn(|()| async move {
            let n = COUNT.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(SafetyError::operation("transient"))
            } else {
                Ok("done")
            }
        });

        let canceller = Canceller::new();
        let mut svc = RetryLayer::new(policy(5), canceller.signal()).layer(svc);

        let response = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(())
            .await
            .unwrap();
        assert_eq!(response, "done");
        assert_eq!(COUNT.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_last_error() {
        let svc =
            service_fn(|()| async move { Err::<(), _>(SafetyError::operation("still down")) });
        let canceller = Canceller::new();
        let mut svc = RetryLayer::new(policy(2), canceller.signal()).layer(svc);

        let err = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "operation failed: still down");
    }

    #[tokio::test]
    async fn cancelled_signal_short_circuits() {
        static CALLED: AtomicUsize = AtomicUsize::new(0);
        let svc = service_fn(|()| async move {
            CALLED.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SafetyError>(())
        });

        let canceller = Canceller::new();
        canceller.cancel("user bailed");
        let mut svc = RetryLayer::new(policy(3), canceller.signal()).layer(svc);

        let err = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(CALLED.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        use crate::schema::{SchemaIssue, ValidationError};
        static CALLED: AtomicUsize = AtomicUsize::new(0);
        let svc = service_fn(|()| async move {
            CALLED.fetch_add(1, Ordering::SeqCst);
            Err::<(), SafetyError>(
                ValidationError::new("response", vec![SchemaIssue::root("not an object")]).into(),
            )
        });

        let canceller = Canceller::new();
        let mut svc = RetryLayer::new(policy(4), canceller.signal()).layer(svc);

        let err = ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(())
            .await
            .unwrap_err();
        assert!(matches!(err, SafetyError::Validation(_)));
        assert_eq!(CALLED.load(Ordering::SeqCst), 1);
    }
}
