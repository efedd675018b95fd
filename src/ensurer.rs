//! Idempotent ensure / observe / revoke for one `(scope, role, principal)` key.
//!
//! `ensure` is list-then-create, not an atomic compare-and-swap. With the default
//! `IdStrategy::Deterministic` a second create for the key collides on the record name. A
//! backend that enforces one record per grant also rejects a duplicate under
//! `IdStrategy::Random`. Either way the `RoleAssignmentExists` conflict is reported as
//! `EnsureOutcome::ConcurrentlyCreated`. A backend without that check can still end up with
//! two records under `IdStrategy::Random`.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ErrorClass, OrchestratorError, OrchestratorResult, Phase};
use crate::model::{same_scope, validate_field, AssignmentKey, IdStrategy, PrincipalType, RoleAssignment};
use crate::transport::{PropagationTolerantTransport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A matching record was listed; nothing written.
    AlreadyPresent { assignment_id: String },
    Created { assignment_id: String },
    /// Create reported the grant as already existing: another caller created it first. The id
    /// is the existing record's when it can be listed, else the one this call tried.
    ConcurrentlyCreated { assignment_id: String },
}

impl EnsureOutcome {
    pub fn assignment_id(&self) -> &str {
        match self {
            EnsureOutcome::AlreadyPresent { assignment_id }
            | EnsureOutcome::Created { assignment_id }
            | EnsureOutcome::ConcurrentlyCreated { assignment_id } => assignment_id,
        }
    }

    pub fn created(&self) -> bool { matches!(self, EnsureOutcome::Created { .. }) }
}

#[derive(Clone)]
pub struct AssignmentEnsurer {
    transport: PropagationTolerantTransport,
    id_strategy: IdStrategy,
}

impl AssignmentEnsurer {
    pub fn new(transport: PropagationTolerantTransport, id_strategy: IdStrategy) -> Self { Self { transport, id_strategy } }

    pub async fn ensure(&self, key: &AssignmentKey, principal_type: Option<PrincipalType>, cancel: &CancellationToken) -> OrchestratorResult<EnsureOutcome> {
        key.validate()?;
        let key = &key.canonical();
        if let Some(existing) = self.find(key, Phase::CheckingExisting, cancel).await? {
            debug!(target: "role_orchestrator::ensurer", %key, assignment_id = %existing.assignment_id, "already granted");
            return Ok(EnsureOutcome::AlreadyPresent { assignment_id: existing.assignment_id });
        }

        let assignment_id = self.id_strategy.assignment_id(key);
        let record = RoleAssignment::for_key(key, assignment_id.clone(), principal_type);
        info!(target: "role_orchestrator::ensurer", %key, %assignment_id, principal_type = ?principal_type, "creating role assignment");
        match self.transport.create_assignment(&key.scope, &assignment_id, &record, cancel).await {
            Ok(()) => Ok(EnsureOutcome::Created { assignment_id }),
            Err(TransportError::Backend { source, .. }) if source.is_duplicate_assignment() => {
                let assignment_id = match self.id_strategy {
                    IdStrategy::Deterministic => assignment_id,
                    // the winner's record has some other name; a lagging list may not show it yet
                    IdStrategy::Random => match self.find(key, Phase::CheckingExisting, cancel).await {
                        Ok(Some(existing)) => existing.assignment_id,
                        _ => assignment_id,
                    },
                };
                info!(target: "role_orchestrator::ensurer", %key, %assignment_id, "created concurrently by another caller");
                Ok(EnsureOutcome::ConcurrentlyCreated { assignment_id })
            }
            Err(err) => Err(OrchestratorError::from_transport(
                err,
                Phase::Creating,
                &key.scope,
                &key.principal_id,
                Some(&key.role_definition_id),
            )),
        }
    }

    pub async fn has_role(&self, key: &AssignmentKey, cancel: &CancellationToken) -> OrchestratorResult<bool> {
        key.validate()?;
        Ok(self.find(key, Phase::Listing, cancel).await?.is_some())
    }

    /// Revoke every role `principal_id` holds directly at `scope`. Records inherited from a
    /// parent scope are listed but left alone. Returns how many records were deleted.
    pub async fn remove_role(&self, scope: &str, principal_id: &str, cancel: &CancellationToken) -> OrchestratorResult<usize> {
        validate_field("scope", scope)?;
        validate_field("principal id", principal_id)?;
        let rows = self
            .transport
            .list_assignments(scope, Some(principal_id), cancel)
            .await
            .map_err(|e| OrchestratorError::from_transport(e, Phase::Listing, scope, principal_id, None))?;

        let mut removed = 0usize;
        for row in rows.iter().filter(|r| r.principal_id.eq_ignore_ascii_case(principal_id)) {
            if !same_scope(&row.scope, scope) {
                debug!(target: "role_orchestrator::ensurer", scope, inherited_from = %row.scope, assignment_id = %row.assignment_id, "skipping inherited assignment");
                continue;
            }
            match self.transport.delete_assignment(scope, &row.assignment_id, cancel).await {
                Ok(()) => removed += 1,
                Err(TransportError::Backend { source, .. }) if source.class == ErrorClass::NotFound => {
                    debug!(target: "role_orchestrator::ensurer", scope, assignment_id = %row.assignment_id, "already deleted");
                }
                Err(err) => {
                    return Err(OrchestratorError::from_transport(err, Phase::Deleting, scope, principal_id, Some(&row.role_definition_id)));
                }
            }
        }
        info!(target: "role_orchestrator::ensurer", scope, principal = principal_id, removed, "revoked role assignments");
        Ok(removed)
    }

    async fn find(&self, key: &AssignmentKey, phase: Phase, cancel: &CancellationToken) -> OrchestratorResult<Option<RoleAssignment>> {
        let rows = self
            .transport
            .list_assignments(&key.scope, Some(&key.principal_id), cancel)
            .await
            .map_err(|e| OrchestratorError::from_transport(e, phase, &key.scope, &key.principal_id, Some(&key.role_definition_id)))?;
        // The server-side filter may be coarser than the key; re-check every field here.
        Ok(rows.into_iter().find(|r| key.matches(r)))
    }
}
