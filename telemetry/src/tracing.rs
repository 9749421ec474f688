use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static INIT_TEST_TRACING: Once = Once::new();

/// Installs the global tracing subscriber for a binary.
///
/// The filter is read from `RUST_LOG` and falls back to `default_directive` when the variable
/// is unset or invalid.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Installs a subscriber writing through the test harness capture.
///
/// Safe to call from every test, only the first call installs the subscriber. Logs are only
/// emitted when `ENABLE_TRACING` is set so regular test runs stay quiet.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_err() {
            return;
        }

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
