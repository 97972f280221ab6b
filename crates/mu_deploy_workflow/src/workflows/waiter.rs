use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::stack::{StackDescriber, StackWaiter};
use crate::error::{DeployError, QueryError};
use crate::runtime::contract::Stack;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 180;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub max_backoff: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl WaitPolicy {
    fn backoff_after(&self, delay: Duration) -> Duration {
        delay.saturating_mul(BACKOFF_FACTOR).min(self.max_backoff)
    }
}

/// Polls the stack service until a stack settles or is confirmed absent.
///
/// A stack that is still transitioning is re-polled every `poll_interval`.
/// Transient describe failures back off exponentially up to `max_backoff`.
/// Both count against `max_attempts`. Cancellation and the optional deadline
/// abort a describe call still in flight as well as the pause between polls.
pub struct PollingStackWaiter {
    describer: Arc<dyn StackDescriber>,
    policy: WaitPolicy,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl PollingStackWaiter {
    pub fn new(describer: Arc<dyn StackDescriber>, policy: WaitPolicy) -> Self {
        Self {
            describer,
            policy,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    async fn pause(&self, name: &str, attempt: u32, delay: Duration) -> Result<(), DeployError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() + delay > deadline {
                return Err(DeployError::PollTimeout {
                    stack: name.to_string(),
                    attempts: attempt,
                });
            }
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeployError::Cancelled {
                stack: name.to_string(),
            }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// One describe call, abandoned as soon as the wait is cancelled or the
    /// deadline passes. A deadline already in the past wins before the call
    /// is issued.
    async fn describe(
        &self,
        name: &str,
        attempt: u32,
    ) -> Result<Result<Option<Stack>, QueryError>, DeployError> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DeployError::PollTimeout {
                stack: name.to_string(),
                attempts: attempt.saturating_sub(1),
            });
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeployError::Cancelled {
                stack: name.to_string(),
            }),
            _ = deadline => Err(DeployError::PollTimeout {
                stack: name.to_string(),
                attempts: attempt.saturating_sub(1),
            }),
            result = self.describer.describe_stack(name) => Ok(result),
        }
    }
}

#[async_trait]
impl StackWaiter for PollingStackWaiter {
    async fn await_final_status(&self, name: &str) -> Result<Option<Stack>, DeployError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.poll_interval;

        for attempt in 1..=max_attempts {
            match self.describe(name, attempt).await? {
                Ok(None) => {
                    debug!(component = "stack_waiter", event = "stack_absent", stack = name);
                    return Ok(None);
                }
                Ok(Some(stack)) if stack.status.is_terminal() => {
                    debug!(
                        component = "stack_waiter",
                        event = "stack_settled",
                        stack = name,
                        status = stack.status.as_str(),
                        attempt,
                    );
                    return Ok(Some(stack));
                }
                Ok(Some(stack)) => {
                    debug!(
                        component = "stack_waiter",
                        event = "stack_in_progress",
                        stack = name,
                        status = stack.status.as_str(),
                        attempt,
                    );
                    delay = self.policy.poll_interval;
                }
                Err(error) if error.is_transient() => {
                    warn!(
                        component = "stack_waiter",
                        event = "describe_retry",
                        stack = name,
                        attempt,
                        error = %error,
                    );
                    delay = if attempt == 1 {
                        delay
                    } else {
                        self.policy.backoff_after(delay)
                    };
                }
                Err(source) => {
                    return Err(DeployError::UpstreamQuery {
                        operation: "describe_stack",
                        target: name.to_string(),
                        source,
                    });
                }
            }

            if attempt < max_attempts {
                self.pause(name, attempt, delay).await?;
            }
        }

        Err(DeployError::PollTimeout {
            stack: name.to_string(),
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::runtime::contract::StackStatus;

    struct ScriptedDescriber {
        responses: Mutex<VecDeque<Result<Option<Stack>, QueryError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedDescriber {
        fn new(responses: Vec<Result<Option<Stack>, QueryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("poisoned mutex")
        }
    }

    #[async_trait]
    impl StackDescriber for ScriptedDescriber {
        async fn describe_stack(&self, _name: &str) -> Result<Option<Stack>, QueryError> {
            *self.calls.lock().expect("poisoned mutex") += 1;
            self.responses
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Ok(Some(stack(StackStatus::UpdateInProgress))))
        }
    }

    /// Describer whose calls never complete, like a request to an endpoint
    /// that stopped answering.
    #[derive(Default)]
    struct HangingDescriber {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl StackDescriber for HangingDescriber {
        async fn describe_stack(&self, _name: &str) -> Result<Option<Stack>, QueryError> {
            *self.calls.lock().expect("poisoned mutex") += 1;
            std::future::pending::<Result<Option<Stack>, QueryError>>().await
        }
    }

    fn stack(status: StackStatus) -> Stack {
        Stack::new("mu-service-api-dev", status)
    }

    fn policy(max_attempts: u32) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(5),
            max_attempts,
            max_backoff: Duration::from_secs(20),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_none_when_stack_absent() {
        let describer = ScriptedDescriber::new(vec![Ok(None)]);
        let waiter = PollingStackWaiter::new(describer.clone(), policy(3));

        let result = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect("wait should pass");
        assert!(result.is_none());
        assert_eq!(describer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_terminal_status() {
        let describer = ScriptedDescriber::new(vec![
            Ok(Some(stack(StackStatus::CreateInProgress))),
            Ok(Some(stack(StackStatus::CreateInProgress))),
            Ok(Some(stack(StackStatus::CreateComplete))),
        ]);
        let waiter = PollingStackWaiter::new(describer.clone(), policy(5));
        let started = Instant::now();

        let result = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect("wait should pass");

        assert_eq!(
            result.map(|stack| stack.status),
            Some(StackStatus::CreateComplete)
        );
        assert_eq!(describer.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_is_returned_not_raised() {
        let describer = ScriptedDescriber::new(vec![Ok(Some(stack(StackStatus::Failed)))]);
        let waiter = PollingStackWaiter::new(describer, policy(5));

        let result = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect("wait should pass");
        assert_eq!(result.map(|stack| stack.status), Some(StackStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_backoff() {
        let describer = ScriptedDescriber::new(vec![
            Err(QueryError::Transient("Throttling".to_string())),
            Err(QueryError::Transient("Throttling".to_string())),
            Err(QueryError::Transient("Throttling".to_string())),
            Ok(Some(stack(StackStatus::UpdateComplete))),
        ]);
        let waiter = PollingStackWaiter::new(describer.clone(), policy(10));
        let started = Instant::now();

        let result = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect("wait should pass");

        assert!(result.is_some());
        assert_eq!(describer.calls(), 4);
        // 5s, then 10s, then 20s (capped at max_backoff)
        assert_eq!(started.elapsed(), Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_propagate_immediately() {
        let describer = ScriptedDescriber::new(vec![Err(QueryError::Fatal(
            "AccessDenied".to_string(),
        ))]);
        let waiter = PollingStackWaiter::new(describer.clone(), policy(10));

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should fail");
        assert!(matches!(
            error,
            DeployError::UpstreamQuery {
                operation: "describe_stack",
                ..
            }
        ));
        assert_eq!(describer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_budget_exhausted() {
        let describer = ScriptedDescriber::new(Vec::new());
        let waiter = PollingStackWaiter::new(describer.clone(), policy(3));

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should fail");
        assert_eq!(
            error,
            DeployError::PollTimeout {
                stack: "mu-service-api-dev".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(describer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_polling_early() {
        let describer = ScriptedDescriber::new(Vec::new());
        let waiter = PollingStackWaiter::new(describer.clone(), policy(100))
            .with_deadline(Instant::now() + Duration::from_secs(12));

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should fail");
        assert!(matches!(error, DeployError::PollTimeout { attempts: 3, .. }));
        assert_eq!(describer.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_wait() {
        let describer = ScriptedDescriber::new(Vec::new());
        let cancel = CancellationToken::new();
        let waiter =
            PollingStackWaiter::new(describer, policy(100)).with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cancel.cancel();
        });

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should be cancelled");
        canceller.await.expect("canceller should finish");
        assert_eq!(
            error,
            DeployError::Cancelled {
                stack: "mu-service-api-dev".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_budget() {
        let describer = ScriptedDescriber::new(vec![
            Err(QueryError::Transient("Throttling".to_string())),
            Err(QueryError::Transient("Throttling".to_string())),
            Err(QueryError::Transient("Throttling".to_string())),
            Ok(Some(stack(StackStatus::CreateComplete))),
        ]);
        let waiter = PollingStackWaiter::new(describer.clone(), policy(3));
        let started = Instant::now();

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should fail");

        assert_eq!(
            error,
            DeployError::PollTimeout {
                stack: "mu-service-api-dev".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(describer.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_hung_describe() {
        let describer = Arc::new(HangingDescriber::default());
        let cancel = CancellationToken::new();
        let waiter = PollingStackWaiter::new(describer.clone(), policy(100))
            .with_cancellation(cancel.clone())
            .with_deadline(Instant::now() + Duration::from_secs(30));
        let started = Instant::now();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let error = tokio::time::timeout(
            Duration::from_secs(3600),
            waiter.await_final_status("mu-service-api-dev"),
        )
        .await
        .expect("wait should not hang")
        .expect_err("wait should be cancelled");
        canceller.await.expect("canceller should finish");

        assert_eq!(
            error,
            DeployError::Cancelled {
                stack: "mu-service-api-dev".to_string(),
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(*describer.calls.lock().expect("poisoned mutex"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_hung_describe() {
        let describer = Arc::new(HangingDescriber::default());
        let waiter = PollingStackWaiter::new(describer, policy(100))
            .with_deadline(Instant::now() + Duration::from_secs(30));
        let started = Instant::now();

        let error = tokio::time::timeout(
            Duration::from_secs(3600),
            waiter.await_final_status("mu-service-api-dev"),
        )
        .await
        .expect("wait should not hang")
        .expect_err("wait should time out");

        assert_eq!(
            error,
            DeployError::PollTimeout {
                stack: "mu-service-api-dev".to_string(),
                attempts: 0,
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_skips_describe() {
        let describer = ScriptedDescriber::new(Vec::new());
        let waiter = PollingStackWaiter::new(describer.clone(), policy(10))
            .with_deadline(Instant::now());

        let error = waiter
            .await_final_status("mu-service-api-dev")
            .await
            .expect_err("wait should time out");

        assert!(matches!(error, DeployError::PollTimeout { attempts: 0, .. }));
        assert_eq!(describer.calls(), 0);
    }
}
