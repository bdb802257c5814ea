//! # test
//! Helpers for tests.
//!

use std::sync::Once;

use tracing::{Level, subscriber::set_global_default};
use tracing_subscriber::{layer::SubscriberExt, registry};

static INIT: Once = Once::new();

/// Set a global stdout logger for tests.
///
/// Safe to call from every test, only the first call installs the logger.
pub fn init_test_logger() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::filter::Targets::new().with_default(Level::TRACE);

        let layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_ansi(true)
            .with_target(false);

        let registry = registry().with(layer).with(filter);

        // Another test harness may have set a subscriber already.
        let _ = set_global_default(registry);
    });
}
