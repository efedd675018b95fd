use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG`, or by `default_directive` when unset.
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    fmt().with_env_filter(filter(default_directive)).try_init().is_ok()
}

/// Same as `init_tracing` but writes through the test harness capture.
pub fn init_test_tracing() -> bool {
    fmt().with_env_filter(filter("role_orchestrator=debug")).with_test_writer().try_init().is_ok()
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
