//! Role assignment records and the logical key that decides whether a grant already exists.
//! The backend-assigned record name (`assignment_id`) is never part of the key.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestratorError;

// Fixed namespace for name-based assignment ids; changing it changes every derived id.
const ASSIGNMENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f0c_2a5e_93b4_4d1e_8a7f_52c1_e0d9_b3a6);

/// Directory object type of a principal, spelled the way the authorization API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
    User,
    Group,
    ServicePrincipal,
    ForeignGroup,
    Device,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "User",
            PrincipalType::Group => "Group",
            PrincipalType::ServicePrincipal => "ServicePrincipal",
            PrincipalType::ForeignGroup => "ForeignGroup",
            PrincipalType::Device => "Device",
        }
    }

    /// Lenient parse used on backend payloads; unknown spellings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        [Self::User, Self::Group, Self::ServicePrincipal, Self::ForeignGroup, Self::Device]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }
}

impl Display for PrincipalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// How a new assignment record is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Name-based UUID of the key: a second create for the same key collides at the backend.
    #[default]
    Deterministic,
    /// Fresh v4 UUID per create. Concurrent ensures of one key can produce duplicate records.
    Random,
}

impl IdStrategy {
    pub fn assignment_id(&self, key: &AssignmentKey) -> String {
        match self {
            IdStrategy::Deterministic => key.deterministic_id(),
            IdStrategy::Random => Uuid::new_v4().to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic" => Some(IdStrategy::Deterministic),
            "random" => Some(IdStrategy::Random),
            _ => None,
        }
    }
}

/// The idempotency key `(scope, role definition, principal)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub scope: String,
    pub role_definition_id: String,
    pub principal_id: String,
}

impl AssignmentKey {
    pub fn new(scope: impl Into<String>, role_definition_id: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self { scope: scope.into(), role_definition_id: role_definition_id.into(), principal_id: principal_id.into() }
    }

    /// Same key with its scope in canonical form. See `normalize_scope`.
    pub fn canonical(&self) -> Self {
        Self {
            scope: normalize_scope(&self.scope),
            role_definition_id: self.role_definition_id.clone(),
            principal_id: self.principal_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        validate_field("scope", &self.scope)?;
        validate_field("role definition id", &self.role_definition_id)?;
        validate_field("principal id", &self.principal_id)
    }

    /// Client-side match of a listed record. Scope is implicit: a record inherited from a
    /// parent scope and returned by a list at `self.scope` still satisfies the key.
    pub fn matches(&self, record: &RoleAssignment) -> bool {
        record.role_definition_id.eq_ignore_ascii_case(&self.role_definition_id)
            && record.principal_id.eq_ignore_ascii_case(&self.principal_id)
    }

    pub fn deterministic_id(&self) -> String {
        let name = format!(
            "{}\n{}\n{}",
            normalize_scope(&self.scope).to_ascii_lowercase(),
            self.role_definition_id.to_ascii_lowercase(),
            self.principal_id.to_ascii_lowercase()
        );
        Uuid::new_v5(&ASSIGNMENT_ID_NAMESPACE, name.as_bytes()).to_string()
    }
}

impl Display for AssignmentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope={} role={} principal={}", self.scope, self.role_definition_id, self.principal_id)
    }
}

/// Canonical scope spelling: exactly one leading `/`, no trailing `/`. Case is preserved.
pub fn normalize_scope(scope: &str) -> String {
    format!("/{}", scope.trim_matches('/'))
}

/// Case-insensitive equality of two scopes after normalization.
pub fn same_scope(a: &str, b: &str) -> bool { normalize_scope(a).eq_ignore_ascii_case(&normalize_scope(b)) }

/// `child` equals `ancestor` or lies under it, compared case-insensitively by path segment.
pub fn scope_within(child: &str, ancestor: &str) -> bool {
    let child = normalize_scope(child).to_ascii_lowercase();
    let ancestor = normalize_scope(ancestor).to_ascii_lowercase();
    ancestor == "/" || child == ancestor || child.starts_with(&format!("{ancestor}/"))
}

pub(crate) fn validate_field(what: &str, value: &str) -> Result<(), OrchestratorError> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput(format!("{what} must not be empty")));
    }
    if value.trim().len() != value.len() {
        return Err(OrchestratorError::InvalidInput(format!("{what} '{value}' has surrounding whitespace")));
    }
    Ok(())
}

/// One grant as stored by the authorization backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub assignment_id: String,
    pub scope: String,
    pub role_definition_id: String,
    pub principal_id: String,
    #[serde(default)]
    pub principal_type: Option<PrincipalType>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn for_key(key: &AssignmentKey, assignment_id: impl Into<String>, principal_type: Option<PrincipalType>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            scope: key.scope.clone(),
            role_definition_id: key.role_definition_id.clone(),
            principal_id: key.principal_id.clone(),
            principal_type,
            created_on: None,
        }
    }

    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.scope.clone(), self.role_definition_id.clone(), self.principal_id.clone())
    }
}
