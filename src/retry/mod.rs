//! Bounded retry with backoff around externally-callable operations.
//!
//! Every stage that calls out of process (scorers, upstream producers) goes
//! through one [`RetryingInvoker`]. Transient failures are retried according
//! to a [`RetryPolicy`]; permanent failures propagate on the first attempt.
//!
//! ## Example
//!
//! ```
//! use pitch_panel::retry::{Backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts, 3);
//! assert_eq!(policy.backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(policy.backoff.delay(2), Duration::from_secs(2));
//! assert_eq!(policy.backoff.delay(3), Duration::from_secs(4));
//! ```

use crate::errors::{PipelineError, ScorerError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts (first call included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `initial * multiplier^(n-1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: u32,
        max: Duration,
    },
    /// Same delay after every failure.
    Fixed(Duration),
    /// Explicit per-attempt delays; the last entry repeats.
    Schedule(Vec<Duration>),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial: DEFAULT_INITIAL_DELAY,
            multiplier: 2,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                initial.checked_mul(factor).unwrap_or(*max).min(*max)
            }
            Self::Fixed(delay) => *delay,
            Self::Schedule(delays) => delays
                .get(attempt as usize - 1)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// Retry parameters attached to one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Hard deadline covering all attempts and backoff waits.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Waits out a backoff delay. Injected so tests can record sleeps.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Applies a [`RetryPolicy`] uniformly to external calls.
#[derive(Clone)]
pub struct RetryingInvoker {
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl Default for RetryingInvoker {
    fn default() -> Self {
        Self::new(Arc::new(TokioSleeper))
    }
}

impl std::fmt::Debug for RetryingInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInvoker")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RetryingInvoker {
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            sleeper,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort backoff waits when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sleep for `delay` through the injected sleeper, ending early with
    /// `Cancelled` if the run is cancelled.
    pub async fn wait(&self, stage: &str, delay: Duration) -> Result<(), PipelineError> {
        tokio::select! {
            _ = self.sleeper.sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled {
                stage: stage.to_string(),
            }),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn invoke<T, F, Fut>(
        &self,
        stage: &str,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, ScorerError>> + Send,
        T: Send,
    {
        let attempts = AtomicU32::new(0);
        let attempts_loop = self.attempt_loop(stage, policy, op, &attempts);

        match policy.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, attempts_loop).await {
                Ok(result) => result,
                Err(_) => {
                    let attempts = attempts.load(Ordering::SeqCst);
                    warn!(stage, attempts, ?deadline, "call deadline exceeded");
                    Err(PipelineError::DeadlineExceeded {
                        stage: stage.to_string(),
                        attempts,
                        deadline,
                    })
                }
            },
            None => attempts_loop.await,
        }
    }

    async fn attempt_loop<T, F, Fut>(
        &self,
        stage: &str,
        policy: &RetryPolicy,
        mut op: F,
        attempts: &AtomicU32,
    ) -> Result<T, PipelineError>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, ScorerError>> + Send,
        T: Send,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            attempts.store(attempt, Ordering::SeqCst);

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(stage, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(stage, attempt, error = %err, "permanent failure, not retrying");
                return Err(PipelineError::stage(stage, err));
            }
            if attempt >= max_attempts {
                warn!(stage, attempts = attempt, error = %err, "retries exhausted");
                return Err(PipelineError::RetriesExhausted {
                    stage: stage.to_string(),
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = policy.backoff.delay(attempt);
            warn!(stage, attempt, ?delay, error = %err, "transient failure, backing off");
            self.wait(stage, delay).await?;
            attempt += 1;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    fn invoker() -> (RetryingInvoker, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        (RetryingInvoker::new(sleeper.clone()), sleeper)
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
        assert_eq!(backoff.delay(60), Duration::from_secs(5));
    }

    #[test]
    fn test_schedule_backoff_repeats_last() {
        let backoff = Backoff::Schedule(vec![Duration::from_millis(10), Duration::from_millis(50)]);
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(50));
        assert_eq!(backoff.delay(7), Duration::from_millis(50));
        assert_eq!(Backoff::Schedule(vec![]).delay(1), Duration::ZERO);
    }

    #[test]
    fn test_policy_max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success_sleeps_k_minus_one_times() {
        let (invoker, sleeper) = invoker();
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default().with_max_attempts(4);

        let result = invoker
            .invoke("tone", &policy, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(ScorerError::transient("rate limited"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_invoked_once_without_sleep() {
        let (invoker, sleeper) = invoker();
        let calls = AtomicUsize::new(0);

        let err = invoker
            .invoke::<(), _, _>("persona.skeptic", &RetryPolicy::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScorerError::permanent("malformed output")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_retries_exhausted() {
        let (invoker, sleeper) = invoker();
        let policy = RetryPolicy::default().with_max_attempts(3);

        let err = invoker
            .invoke::<(), _, _>("transcribe", &policy, |_| async {
                Err(ScorerError::transient("503"))
            })
            .await
            .unwrap_err();

        match &err {
            PipelineError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(*attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_exhausts_without_sleeping() {
        let (invoker, sleeper) = invoker();
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };

        let err = invoker
            .invoke::<(), _, _>("tone", &policy, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScorerError::transient("busy")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
        assert!(matches!(err, PipelineError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_attempt_number_is_passed_to_operation() {
        let (invoker, _) = invoker();
        let seen = std::sync::Mutex::new(Vec::new());

        let _ = invoker
            .invoke::<(), _, _>("x", &RetryPolicy::default(), |attempt| {
                seen.lock().unwrap().push(attempt);
                async { Err(ScorerError::transient("busy")) }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_behaves_as_retries_exhausted() {
        let invoker = RetryingInvoker::default();
        let policy = RetryPolicy::no_retry().with_deadline(Duration::from_millis(20));

        let err = invoker
            .invoke::<(), _, _>("slow", &policy, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DeadlineExceeded { attempts: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let invoker = RetryingInvoker::default().with_cancellation(cancel.clone());
        let policy = RetryPolicy::default().with_backoff(Backoff::Fixed(Duration::from_secs(60)));

        let err = invoker
            .invoke::<(), _, _>("persona.visionary", &policy, |_| {
                cancel.cancel();
                async { Err(ScorerError::transient("429")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
