//! Error model shared by the backends, the transport and the orchestrator.
//! Backends classify every failure once into an `ErrorClass`; nothing above the backend
//! boundary inspects error text.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller rejected; right after a grant this is usually the grant not yet in effect.
    Forbidden,
    NotFound,
    /// Principal not yet replicated to the directory the authorization API reads.
    BadRequestPrincipalNotFound,
    /// Record name already taken.
    Conflict,
    /// Network failure, throttling or server-side outage.
    Transient,
    Other,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 6] = [
        ErrorClass::Forbidden,
        ErrorClass::NotFound,
        ErrorClass::BadRequestPrincipalNotFound,
        ErrorClass::Conflict,
        ErrorClass::Transient,
        ErrorClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::NotFound => "not_found",
            ErrorClass::BadRequestPrincipalNotFound => "principal_not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Transient => "transient",
            ErrorClass::Other => "other",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::BadRequestPrincipalNotFound => 400,
            ErrorClass::Conflict => 409,
            ErrorClass::Transient => 503,
            ErrorClass::Other => 500,
        }
    }

    /// Classes caused by replication lag rather than a real refusal.
    pub fn is_propagation_transient(&self) -> bool {
        matches!(self, ErrorClass::Forbidden | ErrorClass::BadRequestPrincipalNotFound)
    }
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Backend code for a create whose grant already exists.
pub const ROLE_ASSIGNMENT_EXISTS: &str = "RoleAssignmentExists";

/// Failure reported by an `AuthorizationBackend`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{class}: {code}: {message}")]
pub struct BackendError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl BackendError {
    pub fn new<S: Into<String>>(class: ErrorClass, code: S, message: S) -> Self {
        Self { class, code: code.into(), message: message.into() }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self { Self { class: ErrorClass::Forbidden, code: "AuthorizationFailed".into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { Self { class: ErrorClass::NotFound, code: "RoleAssignmentNotFound".into(), message: msg.into() } }
    pub fn principal_not_found<S: Into<String>>(msg: S) -> Self { Self { class: ErrorClass::BadRequestPrincipalNotFound, code: "PrincipalNotFound".into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(msg: S) -> Self { Self { class: ErrorClass::Conflict, code: ROLE_ASSIGNMENT_EXISTS.into(), message: msg.into() } }
    pub fn transient<S: Into<String>>(msg: S) -> Self { Self { class: ErrorClass::Transient, code: "Transient".into(), message: msg.into() } }
    pub fn other<S: Into<String>>(code: S, msg: S) -> Self { Self { class: ErrorClass::Other, code: code.into(), message: msg.into() } }

    pub fn is(&self, class: ErrorClass) -> bool { self.class == class }

    /// The same grant already exists, possibly under another record name. Other conflicts,
    /// such as a record name reused for a different grant, stay fatal.
    pub fn is_duplicate_assignment(&self) -> bool {
        self.class == ErrorClass::Conflict && self.code.eq_ignore_ascii_case(ROLE_ASSIGNMENT_EXISTS)
    }
}

/// Step of an orchestrator operation, carried by errors so callers can tell where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    WaitingForPrincipal,
    CheckingExisting,
    Creating,
    Listing,
    Deleting,
    WaitingForPropagation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::WaitingForPrincipal => "waiting_for_principal",
            Phase::CheckingExisting => "checking_existing",
            Phase::Creating => "creating",
            Phase::Listing => "listing",
            Phase::Deleting => "deleting",
            Phase::WaitingForPropagation => "waiting_for_propagation",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(
        "{phase} failed for principal {principal} role {} at scope {scope} after {attempts} attempt(s) in {elapsed:?}: {source}",
        .role.as_deref().unwrap_or("*")
    )]
    Backend {
        phase: Phase,
        scope: String,
        principal: String,
        role: Option<String>,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: BackendError,
    },

    #[error("principal {principal} not visible to the authorization API after {elapsed:?} (budget {budget:?})")]
    PrincipalUnavailable {
        principal: String,
        elapsed: Duration,
        budget: Duration,
        last_error: Option<BackendError>,
    },

    #[error("{phase} cancelled for principal {principal}")]
    Cancelled { phase: Phase, principal: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OrchestratorError {
    pub(crate) fn from_transport(err: TransportError, phase: Phase, scope: &str, principal: &str, role: Option<&str>) -> Self {
        match err {
            TransportError::Backend { source, attempts, elapsed } => OrchestratorError::Backend {
                phase,
                scope: scope.to_string(),
                principal: principal.to_string(),
                role: role.map(str::to_string),
                attempts,
                elapsed,
                source,
            },
            TransportError::Cancelled { .. } => OrchestratorError::Cancelled { phase, principal: principal.to_string() },
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            OrchestratorError::Backend { phase, .. } | OrchestratorError::Cancelled { phase, .. } => Some(*phase),
            OrchestratorError::PrincipalUnavailable { .. } => Some(Phase::WaitingForPrincipal),
            OrchestratorError::InvalidInput(_) => None,
        }
    }

    /// Class of the underlying backend failure, when there is one.
    pub fn backend_class(&self) -> Option<ErrorClass> {
        match self {
            OrchestratorError::Backend { source, .. } => Some(source.class),
            OrchestratorError::PrincipalUnavailable { last_error, .. } => last_error.as_ref().map(|e| e.class),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, OrchestratorError::Cancelled { .. }) }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
