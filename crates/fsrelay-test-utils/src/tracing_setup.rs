//! Tracing initialisation for tests that are not annotated with
//! `#[test_log::test]`.
//!
//! The subscriber is installed at most once per process, so it is safe to
//! call from every test function.

use tracing_subscriber::EnvFilter;

/// Install a subscriber that writes to the test-harness writer. `RUST_LOG`
/// overrides the default of debug events from the server crates.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     fsrelay_test_utils::tracing_setup::init_test_tracing();
///     let server = fsrelay_test_utils::TestServer::start().await;
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,fsrelay_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
