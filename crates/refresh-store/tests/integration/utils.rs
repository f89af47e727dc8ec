use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Captures logs of the store in the test output.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("refresh_store=debug"))
        .with_target(false)
        .with_test_writer()
        .try_init()
        .ok();
}
