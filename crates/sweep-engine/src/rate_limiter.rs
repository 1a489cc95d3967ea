//! Central pacing and retry controller wrapped around every remote call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationSignal;
use crate::clock::Clock;
use crate::config::{CallClass, EngineConfig};
use crate::error::{ClassifiedError, ErrorClass};
use crate::remote::RemoteError;
use crate::retry::{pacing_delay, rate_limit_delay};

pub struct RateLimiter {
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    deadline: Option<Duration>,
    last_call_at: Option<Duration>,
    calls: u64,
}

impl RateLimiter {
    pub fn new(config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        let deadline = config
            .operation_timeout()
            .map(|timeout| clock.elapsed().saturating_add(timeout));
        Self {
            config,
            clock,
            deadline,
            last_call_at: None,
            calls: 0,
        }
    }

    /// Remote calls issued so far, retries included.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| self.clock.elapsed() >= deadline)
    }

    pub fn interrupted(&self, cancel: &CancellationSignal) -> bool {
        cancel.is_cancelled() || self.deadline_passed()
    }

    /// Runs one remote call under the policy of `class`.
    ///
    /// Returns `AlreadySatisfied`, `SkipStream` and `Fatal` immediately. Rate-limited
    /// calls back off up to the class budget and then join the transient path;
    /// transient failures retry with a fixed delay and end as `StreamFailure`.
    pub async fn execute<T, F, Fut>(
        &mut self,
        class: CallClass,
        operation: &str,
        cancel: &CancellationSignal,
        mut call: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let policy = self.config.policy(class).clone();
        let mut attempts = 0_usize;
        let mut rate_limit_retries = 0_usize;
        let mut transient_retries = 0_usize;

        let pacing = pacing_delay(
            self.last_call_at,
            self.clock.elapsed(),
            policy.min_interval(),
        );
        if !self.wait(pacing, cancel).await {
            return Err(ClassifiedError::cancelled(operation, attempts));
        }

        loop {
            if self.interrupted(cancel) {
                return Err(ClassifiedError::cancelled(operation, attempts));
            }
            attempts = attempts.saturating_add(1);
            self.calls = self.calls.saturating_add(1);
            let result = call().await;
            self.last_call_at = Some(self.clock.elapsed());
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class_of = ErrorClass::of(&error);
            match class_of {
                ErrorClass::Fatal | ErrorClass::SkipStream | ErrorClass::AlreadySatisfied => {
                    tracing::debug!(
                        operation,
                        attempt = attempts,
                        class = %class_of,
                        error = %error,
                        "remote call classified"
                    );
                    return Err(ClassifiedError::new(
                        class_of,
                        operation,
                        attempts,
                        error.to_string(),
                    ));
                }
                ErrorClass::RateLimited
                    if rate_limit_retries < policy.rate_limit.max_retries() =>
                {
                    rate_limit_retries = rate_limit_retries.saturating_add(1);
                    let delay = rate_limit_delay(
                        &policy.rate_limit,
                        rate_limit_retries,
                        error.retry_after(),
                        self.config.jitter,
                    );
                    tracing::warn!(
                        operation,
                        call_class = class.as_str(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited; backing off"
                    );
                    if !self.wait(delay, cancel).await {
                        return Err(ClassifiedError::cancelled(operation, attempts));
                    }
                    continue;
                }
                ErrorClass::RateLimited => {
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        "rate limit retries exhausted; treating as transient"
                    );
                }
                _ => {}
            }

            if transient_retries < policy.transient_retries {
                transient_retries = transient_retries.saturating_add(1);
                tracing::warn!(
                    operation,
                    call_class = class.as_str(),
                    attempt = attempts,
                    error = %error,
                    delay_ms = policy.transient_delay_ms,
                    "transient failure; retrying"
                );
                if !self
                    .wait(Duration::from_millis(policy.transient_delay_ms), cancel)
                    .await
                {
                    return Err(ClassifiedError::cancelled(operation, attempts));
                }
                continue;
            }

            tracing::warn!(
                operation,
                attempt = attempts,
                error = %error,
                "retries exhausted"
            );
            return Err(ClassifiedError::new(
                ErrorClass::StreamFailure,
                operation,
                attempts,
                error.to_string(),
            ));
        }
    }

    /// Interruptible pause, used between streams. Returns false when interrupted.
    pub async fn pause(&mut self, duration: Duration, cancel: &CancellationSignal) -> bool {
        self.wait(duration, cancel).await
    }

    async fn wait(&self, duration: Duration, cancel: &CancellationSignal) -> bool {
        if self.interrupted(cancel) {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        let duration = match self.deadline {
            Some(deadline) => duration.min(deadline.saturating_sub(self.clock.elapsed())),
            None => duration,
        };
        tokio::select! {
            _ = self.clock.sleep(duration) => {}
            _ = cancel.cancelled() => return false,
        }
        !self.interrupted(cancel)
    }
}
