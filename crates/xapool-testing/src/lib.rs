//! # xapool-testing
//!
//! In-memory collaborators for exercising the `xapool` connection pool
//! without a database or a transaction manager.
//!
//! - [`MockDataSource`] opens scripted in-memory connections and keeps a
//!   [`ConnectionProbe`] for each one
//! - [`MockTransactionManager`] associates transactions with threads and
//!   completes them through the two-phase-commit protocol
//! - [`ManualTimer`] runs eviction timers only when the test advances it
//!
//! ## Example
//!
//! ```rust,ignore
//! use xapool::PoolConfig;
//! use xapool_testing::Fixture;
//!
//! let fixture = Fixture::new(PoolConfig::new().max_pool_size(2));
//! let tx = fixture.tm.begin()?;
//! let conn = fixture.pool.check_out()?;
//! fixture.tm.commit()?;
//! assert_eq!(fixture.pool.free_pool_size(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod timer;
pub mod transaction;

pub use connection::{ConnectionProbe, MockConnection, MockDataSource};
pub use timer::ManualTimer;
pub use transaction::{MockTransaction, MockTransactionManager};

use xapool::{LocalXaDataSource, Pool, PoolConfig, PoolError};

/// A pool wired to in-memory collaborators, with handles to each of them.
#[derive(Debug)]
pub struct Fixture {
    /// The pool under test.
    pub pool: Pool,
    /// Data source behind the pool.
    pub data_source: MockDataSource,
    /// Transaction manager the pool consults.
    pub tm: MockTransactionManager,
    /// Timer driving eviction and housekeeping.
    pub timer: ManualTimer,
}

impl Fixture {
    /// Build a pool from `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid; use [`try_new`](Self::try_new) to
    /// inspect the error instead.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(config: PoolConfig) -> Self {
        Self::try_new(config).expect("invalid pool configuration")
    }

    /// Build a pool from `config`, reporting configuration errors.
    pub fn try_new(config: PoolConfig) -> Result<Self, PoolError> {
        let data_source = MockDataSource::new();
        let tm = MockTransactionManager::new();
        let timer = ManualTimer::new();
        let pool = Pool::new(
            config,
            LocalXaDataSource::new(data_source.clone()),
            tm.clone(),
            timer.clone(),
        )?;

        Ok(Self {
            pool,
            data_source,
            tm,
            timer,
        })
    }
}
