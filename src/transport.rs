//! Propagation-tolerant transport: every backend call goes through a fixed-interval retry
//! that absorbs the error classes caused by replication lag.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::AuthorizationBackend;
use crate::error::{BackendError, ErrorClass};
use crate::model::RoleAssignment;
use crate::poll::sleep_or_cancel;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 15;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded retry at a fixed delay. `max_attempts` counts every call, the first included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retry_on: Vec<ErrorClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            retry_on: ErrorClass::ALL.into_iter().filter(ErrorClass::is_propagation_transient).collect(),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, class: ErrorClass) -> bool { self.retry_on.contains(&class) }

    /// Worst-case time spent sleeping between attempts.
    pub fn budget(&self) -> Duration { self.delay * self.max_attempts.saturating_sub(1) }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Last error from the backend, unchanged.
    #[error("{source} (after {attempts} attempt(s) in {elapsed:?})")]
    Backend { source: BackendError, attempts: u32, elapsed: Duration },
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl TransportError {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            TransportError::Backend { source, .. } => Some(source.class),
            TransportError::Cancelled { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct PropagationTolerantTransport {
    backend: Arc<dyn AuthorizationBackend>,
    policy: RetryPolicy,
}

impl PropagationTolerantTransport {
    pub fn new(backend: Arc<dyn AuthorizationBackend>, policy: RetryPolicy) -> Self { Self { backend, policy } }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }

    pub async fn list_assignments(
        &self,
        scope: &str,
        principal_filter: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RoleAssignment>, TransportError> {
        self.with_retry("list", cancel, || self.backend.list_assignments(scope, principal_filter)).await
    }

    pub async fn create_assignment(
        &self,
        scope: &str,
        assignment_id: &str,
        assignment: &RoleAssignment,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.with_retry("create", cancel, || self.backend.create_assignment(scope, assignment_id, assignment)).await
    }

    pub async fn delete_assignment(&self, scope: &str, assignment_id: &str, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.with_retry("delete", cancel, || self.backend.delete_assignment(scope, assignment_id)).await
    }

    /// Single attempt, for poll loops that own their own cadence.
    pub async fn list_once(&self, scope: &str, principal_filter: Option<&str>) -> Result<Vec<RoleAssignment>, BackendError> {
        self.backend.list_assignments(scope, principal_filter).await
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, cancel: &CancellationToken, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled { attempts: attempt - 1 }),
                outcome = call() => outcome,
            };
            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(target: "role_orchestrator::transport", op, attempt, "call succeeded after propagation retries");
                    }
                    return Ok(value);
                }
                Err(err) if self.policy.should_retry(err.class) && attempt < max_attempts => {
                    warn!(
                        target: "role_orchestrator::transport",
                        op, attempt, max_attempts, class = %err.class, code = %err.code,
                        "propagation lag, retrying in {:?}", self.policy.delay
                    );
                    if !sleep_or_cancel(self.policy.delay, cancel).await {
                        return Err(TransportError::Cancelled { attempts: attempt });
                    }
                }
                Err(err) => {
                    debug!(target: "role_orchestrator::transport", op, attempt, class = %err.class, "giving up");
                    return Err(TransportError::Backend { source: err, attempts: attempt, elapsed: start.elapsed() });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod transport_tests;
