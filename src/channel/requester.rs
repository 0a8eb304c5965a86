//! Timeout race + bounded retry over a `Transport`

use super::error::{ChannelError, TransportError};
use super::guard::ChannelGuard;
use crate::protocol::{Action, Request};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One request/reply exchange with the coordinator.
///
/// Abstracts over how the coordinator is reached (in-process port, test
/// script) so the retry logic doesn't depend on it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Value, TransportError>;
}

/// Timeout and retry budget for one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPolicy {
    /// Per-attempt deadline
    pub timeout_ms: u64,
    /// Retries after the first attempt, shared by closed and timed-out
    /// attempts
    pub max_retries: u32,
    /// Pause before each retry
    pub retry_delay_ms: u64,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl RequestPolicy {
    pub fn new(timeout_ms: u64, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            timeout_ms,
            max_retries,
            retry_delay_ms,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total attempts including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

enum Transient {
    Closed,
    TimedOut,
}

/// Sends requests to the coordinator, surviving closed channels and stalls
/// within a retry budget.
///
/// Liveness is checked before the first attempt and again before every
/// retry; once the guard reports death no further attempt is made.
pub struct ResilientRequester {
    transport: Arc<dyn Transport>,
    guard: ChannelGuard,
    policy: RequestPolicy,
}

impl ResilientRequester {
    pub fn new(transport: Arc<dyn Transport>, guard: ChannelGuard) -> Self {
        Self {
            transport,
            guard,
            policy: RequestPolicy::default(),
        }
    }

    /// Set the policy used by `send` and `send_as`
    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub fn is_live(&self) -> bool {
        self.guard.is_live()
    }

    pub async fn send(&self, action: Action) -> Result<Value, ChannelError> {
        self.send_with(action, &self.policy).await
    }

    pub async fn send_as<T: DeserializeOwned>(&self, action: Action) -> Result<T, ChannelError> {
        self.send_as_with(action, &self.policy).await
    }

    /// `send_with`, then decode the reply. A decode failure is not retried.
    pub async fn send_as_with<T: DeserializeOwned>(
        &self,
        action: Action,
        policy: &RequestPolicy,
    ) -> Result<T, ChannelError> {
        let value = self.send_with(action, policy).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn send_with(
        &self,
        action: Action,
        policy: &RequestPolicy,
    ) -> Result<Value, ChannelError> {
        if !self.guard.is_live() {
            debug!(action = action.name(), "channel dead before first attempt");
            return Err(ChannelError::ChannelDead);
        }

        let timeout = policy.timeout();
        let mut last = None;

        for attempt in 0..=policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(policy.retry_delay()).await;
                if !self.guard.is_live() {
                    warn!(
                        action = action.name(),
                        attempt, "channel died between attempts, giving up"
                    );
                    return Err(ChannelError::ChannelDead);
                }
            }

            let request = Request::new(action.clone());
            let correlation_id = request.correlation_id;
            debug!(%correlation_id, action = action.name(), attempt, "sending request");

            let failure = match tokio::time::timeout(timeout, self.transport.send(request)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(TransportError::Dead(reason))) => {
                    warn!(%correlation_id, %reason, "channel reported permanent death");
                    return Err(ChannelError::ChannelDead);
                }
                Ok(Err(TransportError::Closed)) => Transient::Closed,
                Ok(Err(TransportError::DeadlineExceeded(_))) | Err(_) => Transient::TimedOut,
                Ok(Err(other)) => return Err(ChannelError::Transport(other)),
            };

            if attempt < policy.max_retries {
                let reason = match failure {
                    Transient::Closed => "channel closed",
                    Transient::TimedOut => "timed out",
                };
                warn!(%correlation_id, action = action.name(), attempt, reason, "retrying request");
            }
            last = Some(failure);
        }

        let attempts = policy.attempts();
        Err(match last {
            Some(Transient::Closed) => ChannelError::ChannelClosed { attempts },
            _ => ChannelError::RequestTimeout { attempts, timeout },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        outcome: fn(usize) -> Result<Value, TransportError>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _request: Request) -> Result<Value, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(n)
        }
    }

    fn requester(outcome: fn(usize) -> Result<Value, TransportError>) -> (ResilientRequester, Arc<Scripted>) {
        let transport = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            outcome,
        });
        let requester = ResilientRequester::new(transport.clone(), ChannelGuard::always_live())
            .with_policy(RequestPolicy::new(1_000, 2, 10));
        (requester, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_close() {
        let (requester, transport) = requester(|n| {
            if n == 0 {
                Err(TransportError::Closed)
            } else {
                Ok(serde_json::json!({ "pong": true }))
            }
        });
        let value = requester.send(Action::Ping).await.unwrap();
        assert_eq!(value["pong"], true);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_are_not_retried() {
        let (requester, transport) = requester(|_| Err(TransportError::Remote("bad input".into())));
        let err = requester.send(Action::Ping).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(TransportError::Remote(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_transport_stops_immediately() {
        let (requester, transport) = requester(|_| Err(TransportError::Dead("invalidated".into())));
        let err = requester.send(Action::Ping).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_deadline_counts_as_timeout() {
        let (requester, transport) =
            requester(|_| Err(TransportError::DeadlineExceeded("batch too slow".into())));
        let err = requester.send(Action::Ping).await.unwrap_err();
        assert!(matches!(err, ChannelError::RequestTimeout { attempts: 3, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_is_reported() {
        let (requester, _) = requester(|_| Ok(serde_json::json!("not a number")));
        let err = requester.send_as::<u64>(Action::Ping).await.unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }
}
