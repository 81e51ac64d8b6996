//! Shared helpers for pool integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use xapool::PoolConfig;
use xapool_testing::Fixture;

static TRACING: Once = Once::new();

/// Route pool logs to the test harness output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// A fixture with tracing enabled.
pub fn fixture(config: PoolConfig) -> Fixture {
    init_tracing();
    Fixture::new(config)
}

/// Long enough for a spawned thread to reach its blocking wait.
pub const SETTLE: Duration = Duration::from_millis(100);
