//! Facade over the waiters and the ensurer, exposing the call patterns automation needs.
//!
//! `ensure_role_with_retry` waits for the principal before attempting the grant. The
//! transport's retry budget is tuned for grants that have not taken effect yet, not for
//! identities that have not replicated yet, so the two stages stay separate and ordered.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::AuthorizationBackend;
use crate::config::OrchestratorConfig;
use crate::ensurer::{AssignmentEnsurer, EnsureOutcome};
use crate::error::OrchestratorResult;
use crate::model::{validate_field, AssignmentKey, PrincipalType};
use crate::transport::PropagationTolerantTransport;
use crate::waiter::{AssignmentPropagationWaiter, PrincipalAvailabilityWaiter, PropagationOutcome};

#[derive(Clone)]
pub struct RoleAssignmentOrchestrator {
    ensurer: AssignmentEnsurer,
    availability: PrincipalAvailabilityWaiter,
    propagation: AssignmentPropagationWaiter,
    cancel: CancellationToken,
}

impl RoleAssignmentOrchestrator {
    pub fn new(backend: Arc<dyn AuthorizationBackend>, config: &OrchestratorConfig) -> Self {
        let transport = PropagationTolerantTransport::new(backend, config.retry_policy());
        Self {
            ensurer: AssignmentEnsurer::new(transport.clone(), config.id_strategy),
            availability: PrincipalAvailabilityWaiter::new(transport.clone(), config),
            propagation: AssignmentPropagationWaiter::new(transport, config),
            cancel: CancellationToken::new(),
        }
    }

    /// Copy bound to `cancel`; every wait and retry sleep of the copy stops when it fires.
    pub fn scoped(&self, cancel: CancellationToken) -> Self { Self { cancel, ..self.clone() } }

    pub fn cancellation_token(&self) -> &CancellationToken { &self.cancel }

    /// Grant to a principal that is known to exist already.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn ensure_role(&self, scope: &str, role_definition_id: &str, principal_id: &str) -> OrchestratorResult<EnsureOutcome> {
        let key = AssignmentKey::new(scope, role_definition_id, principal_id);
        self.ensurer.ensure(&key, None, &self.cancel).await
    }

    /// Grant with a principal type hint, for principals the backend cannot type by id yet.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn ensure_role_with_principal_type(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
        principal_type: PrincipalType,
    ) -> OrchestratorResult<EnsureOutcome> {
        let key = AssignmentKey::new(scope, role_definition_id, principal_id);
        self.ensurer.ensure(&key, Some(principal_type), &self.cancel).await
    }

    /// Wait up to `max_wait` for a freshly created principal to resolve, then grant.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn ensure_role_with_retry(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
        max_wait: Duration,
    ) -> OrchestratorResult<EnsureOutcome> {
        self.ensure_new_principal(AssignmentKey::new(scope, role_definition_id, principal_id), None, max_wait).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn ensure_role_with_retry_typed(
        &self,
        scope: &str,
        role_definition_id: &str,
        principal_id: &str,
        principal_type: PrincipalType,
        max_wait: Duration,
    ) -> OrchestratorResult<EnsureOutcome> {
        self.ensure_new_principal(AssignmentKey::new(scope, role_definition_id, principal_id), Some(principal_type), max_wait).await
    }

    async fn ensure_new_principal(&self, key: AssignmentKey, principal_type: Option<PrincipalType>, max_wait: Duration) -> OrchestratorResult<EnsureOutcome> {
        key.validate()?;
        let waited = self.availability.wait(&key.scope, &key.principal_id, max_wait, &self.cancel).await?;
        info!(target: "role_orchestrator::orchestrator", %key, waited = ?waited, "principal available, ensuring grant");
        self.ensurer.ensure(&key, principal_type, &self.cancel).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn has_role(&self, scope: &str, principal_id: &str, role_definition_id: &str) -> OrchestratorResult<bool> {
        let key = AssignmentKey::new(scope, role_definition_id, principal_id);
        self.ensurer.has_role(&key, &self.cancel).await
    }

    /// Revoke every role the principal holds at `scope`. Returns the number of records deleted.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn remove_role(&self, scope: &str, principal_id: &str) -> OrchestratorResult<usize> {
        self.ensurer.remove_role(scope, principal_id, &self.cancel).await
    }

    /// After a successful ensure, wait until the principal's grant lists at `scope`, plus the
    /// configured enforcement grace. Timing out is reported in the outcome, not as an error.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn wait_for_role_assignment_propagation(
        &self,
        scope: &str,
        principal_id: &str,
        max_wait: Duration,
    ) -> OrchestratorResult<PropagationOutcome> {
        validate_field("scope", scope)?;
        validate_field("principal id", principal_id)?;
        self.propagation.wait(scope, principal_id, max_wait, &self.cancel).await
    }
}
