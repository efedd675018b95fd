pub mod backend;
pub mod config;
pub mod ensurer;
pub mod error;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod poll;
pub mod transport;
pub mod waiter;

pub use backend::{AuthorizationBackend, InMemoryBackend};
pub use config::{ArmConfig, OrchestratorConfig};
pub use ensurer::EnsureOutcome;
pub use error::{BackendError, ErrorClass, OrchestratorError, OrchestratorResult, Phase};
pub use model::{AssignmentKey, IdStrategy, PrincipalType, RoleAssignment};
pub use orchestrator::RoleAssignmentOrchestrator;
pub use waiter::PropagationOutcome;

// Test-only printing helper: expands to eprintln! during tests and debug builds, absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
