//! # xapool
//!
//! Transaction-aware connection pool for XA-capable data sources.
//!
//! Connections checked out inside a global transaction are enlisted with it
//! and stay bound to it: every checkout in the same transaction receives the
//! same logical connection, and the connection only returns to the pool once
//! the transaction has committed or rolled back. Outside a transaction the
//! pool behaves like an ordinary bounded pool.
//!
//! ## Features
//!
//! - LIFO free list with per-connection idle eviction
//! - Optional validation query before reuse, with a freshness window
//! - Bounded or unbounded checkout wait
//! - Connections whose operations fail are released, never pooled again
//! - Local transaction control rejected while bound to a global transaction
//! - XA adapter for plain (non-XA) data sources
//! - Status gauges and metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use xapool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::from_properties(
//!     "maxPoolSize=20;timeout=300;validationQuery=SELECT 1",
//! )?;
//!
//! let pool = Pool::builder()
//!     .pool_config(config)
//!     .local_data_source(driver)
//!     .transaction_manager(tm)
//!     .build()?;
//!
//! let conn = pool.check_out()?;
//! conn.execute("INSERT INTO audit (event) VALUES ('login')")?;
//! // Returned to the pool on drop, or when the transaction completes.
//! drop(conn);
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
mod free_list;
pub mod local_xa;
pub mod physical;
pub mod pool;
pub mod timer;
pub mod transaction;
pub mod xa;
pub mod xa_wrapper;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{ConnectionError, PoolError};

// Pool types
pub use connection::{ConnectionMetadata, PooledConnection};
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus};

// Resource-manager side
pub use local_xa::{BranchState, LocalXaDataSource, LocalXaResource};
pub use physical::{
    DataSource, IsolationLevel, PhysicalConnection, Savepoint, SharedConnection, XaConnection,
    XaDataSource, share,
};
pub use xa::{Vote, XaError, XaErrorCode, XaFlags, XaResource, Xid};
pub use xa_wrapper::XaResourceWrapper;

// Transaction-manager side
pub use transaction::{
    LocalTransactions, Synchronization, Transaction, TransactionError, TransactionId,
    TransactionManager, TransactionStatus,
};

// Timers
#[cfg(feature = "tokio")]
pub use timer::TokioTimer;
pub use timer::{ThreadTimer, TimerHandle, TimerService, TimerTask};
