//! Blocking waits on the two propagation delays: a new principal becoming resolvable, and a
//! new assignment becoming listable (then, after a grace period, enforced).

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{BackendError, ErrorClass, OrchestratorError, OrchestratorResult, Phase};
use crate::model::same_scope;
use crate::poll::{poll_until, sleep_or_cancel, PollError, PollStep, PollWindow};
use crate::transport::PropagationTolerantTransport;

#[derive(Clone)]
pub struct PrincipalAvailabilityWaiter {
    transport: PropagationTolerantTransport,
    scope: Option<String>,
    poll_interval: Duration,
    grace: Duration,
}

impl PrincipalAvailabilityWaiter {
    pub fn new(transport: PropagationTolerantTransport, config: &OrchestratorConfig) -> Self {
        Self {
            transport,
            scope: config.availability_scope.clone(),
            poll_interval: config.principal_poll_interval,
            grace: config.principal_grace,
        }
    }

    /// Poll a principal-filtered list until it succeeds. Any successful response, empty or not,
    /// means the principal resolves. Returns the time spent polling, grace excluded.
    pub async fn wait(&self, fallback_scope: &str, principal_id: &str, max_wait: Duration, cancel: &CancellationToken) -> OrchestratorResult<Duration> {
        let scope = self.scope.as_deref().unwrap_or(fallback_scope);
        let transport = &self.transport;
        let window = PollWindow::new(self.poll_interval, max_wait);
        let polled = poll_until(window, cancel, |attempt| async move {
            match transport.list_once(scope, Some(principal_id)).await {
                Ok(_) => PollStep::Ready(()),
                Err(err) if err.class == ErrorClass::Other => PollStep::Abort(err),
                Err(err) => {
                    debug!(target: "role_orchestrator::waiter", principal = principal_id, attempt, class = %err.class, "principal not yet resolvable");
                    PollStep::Pending(Some(err))
                }
            }
        })
        .await;

        match polled {
            Ok(p) => {
                info!(
                    target: "role_orchestrator::waiter",
                    principal = principal_id, attempts = p.attempts, elapsed = ?p.elapsed,
                    "principal resolvable, settling for {:?}", self.grace
                );
                if !sleep_or_cancel(self.grace, cancel).await {
                    return Err(OrchestratorError::Cancelled { phase: Phase::WaitingForPrincipal, principal: principal_id.to_string() });
                }
                Ok(p.elapsed)
            }
            Err(PollError::TimedOut { elapsed, last, .. }) => Err(OrchestratorError::PrincipalUnavailable {
                principal: principal_id.to_string(),
                elapsed,
                budget: max_wait,
                last_error: last,
            }),
            Err(PollError::Cancelled { .. }) => {
                Err(OrchestratorError::Cancelled { phase: Phase::WaitingForPrincipal, principal: principal_id.to_string() })
            }
            Err(PollError::Aborted { error, attempts, elapsed }) => Err(OrchestratorError::Backend {
                phase: Phase::WaitingForPrincipal,
                scope: scope.to_string(),
                principal: principal_id.to_string(),
                role: None,
                attempts,
                elapsed,
                source: error,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// Assignment listed after `elapsed` (grace excluded).
    Observed { elapsed: Duration, attempts: u32 },
    /// Budget ran out; not an error.
    TimedOut { elapsed: Duration, budget: Duration, last_error: Option<BackendError> },
}

impl PropagationOutcome {
    pub fn observed(&self) -> bool { matches!(self, PropagationOutcome::Observed { .. }) }
}

#[derive(Clone)]
pub struct AssignmentPropagationWaiter {
    transport: PropagationTolerantTransport,
    poll_interval: Duration,
    grace: Duration,
}

impl AssignmentPropagationWaiter {
    pub fn new(transport: PropagationTolerantTransport, config: &OrchestratorConfig) -> Self {
        Self { transport, poll_interval: config.propagation_poll_interval, grace: config.propagation_grace }
    }

    /// Best effort: a timeout is logged and reported as an outcome. Only cancellation fails.
    /// Only a grant made directly at `scope` to `principal_id` counts; inherited grants do not.
    pub async fn wait(&self, scope: &str, principal_id: &str, max_wait: Duration, cancel: &CancellationToken) -> OrchestratorResult<PropagationOutcome> {
        let transport = &self.transport;
        let window = PollWindow::new(self.poll_interval, max_wait);
        let polled = poll_until(window, cancel, |attempt| async move {
            match transport.list_once(scope, Some(principal_id)).await {
                Ok(rows) => {
                    let direct = rows
                        .iter()
                        .filter(|r| r.principal_id.eq_ignore_ascii_case(principal_id) && same_scope(&r.scope, scope))
                        .count();
                    if direct > 0 { PollStep::Ready(direct) } else { PollStep::Pending(None) }
                }
                Err(err) => {
                    debug!(target: "role_orchestrator::waiter", scope, principal = principal_id, attempt, class = %err.class, "assignment list failed");
                    PollStep::<usize, BackendError>::Pending(Some(err))
                }
            }
        })
        .await;

        match polled {
            Ok(p) => {
                info!(
                    target: "role_orchestrator::waiter",
                    scope, principal = principal_id, rows = p.value, elapsed = ?p.elapsed,
                    "assignment listed, waiting {:?} for enforcement", self.grace
                );
                if !sleep_or_cancel(self.grace, cancel).await {
                    return Err(OrchestratorError::Cancelled { phase: Phase::WaitingForPropagation, principal: principal_id.to_string() });
                }
                Ok(PropagationOutcome::Observed { elapsed: p.elapsed, attempts: p.attempts })
            }
            Err(PollError::TimedOut { elapsed, last, .. }) => {
                warn!(
                    target: "role_orchestrator::waiter",
                    scope, principal = principal_id, elapsed = ?elapsed, budget = ?max_wait,
                    "assignment not observed within budget, continuing"
                );
                Ok(PropagationOutcome::TimedOut { elapsed, budget: max_wait, last_error: last })
            }
            Err(PollError::Cancelled { .. }) => {
                Err(OrchestratorError::Cancelled { phase: Phase::WaitingForPropagation, principal: principal_id.to_string() })
            }
            // never produced by the check above
            Err(PollError::Aborted { error, attempts, elapsed }) => Err(OrchestratorError::Backend {
                phase: Phase::WaitingForPropagation,
                scope: scope.to_string(),
                principal: principal_id.to_string(),
                role: None,
                attempts,
                elapsed,
                source: error,
            }),
        }
    }
}
