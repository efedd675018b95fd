//! Contract of the remote authorization API and the implementations shipped with the crate.
//! Implementations classify every failure into an `ErrorClass` before returning it.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::model::RoleAssignment;

mod arm;
mod memory;
mod token;

pub use arm::{classify_status, ArmBackend, DEFAULT_API_VERSION};
pub use memory::{CallCounts, InMemoryBackend, Operation};
pub use token::{ClientSecretCredential, StaticToken, TokenSource};

#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    /// Every assignment visible at `scope`, including those inherited from parent scopes,
    /// optionally narrowed to one principal. Paging is handled by the implementation.
    async fn list_assignments(&self, scope: &str, principal_filter: Option<&str>) -> Result<Vec<RoleAssignment>, BackendError>;

    async fn create_assignment(&self, scope: &str, assignment_id: &str, assignment: &RoleAssignment) -> Result<(), BackendError>;

    async fn delete_assignment(&self, scope: &str, assignment_id: &str) -> Result<(), BackendError>;
}
