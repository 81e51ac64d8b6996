//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::transaction::TransactionError;
use crate::xa::XaError;

/// Errors reported by a physical connection.
///
/// Drivers map their native failures onto this type. The pool never inspects
/// the variant: any error from a delegated call is treated as fatal for the
/// connection that produced it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The physical connection has already been closed.
    #[error("physical connection is closed")]
    Closed,

    /// Error reported by the database server.
    #[error("database error {code}: {message}")]
    Database {
        /// Vendor error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// IO error on the underlying session.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Create a database error.
    pub fn database(code: i32, message: impl Into<String>) -> Self {
        Self::Database {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur when using the connection pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No capacity became available within the configured wait budget.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A local-transaction operation was attempted while bound to a global
    /// transaction, or a checkout happened outside a global transaction while
    /// local transactions are suppressed.
    #[error("illegal local transaction use: {0}")]
    IllegalLocalTx(&'static str),

    /// The logical connection has already been closed or returned.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A delegated operation on the physical connection failed.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A statement failed on the physical connection.
    #[error("statement failed: {source} (sql: {sql})")]
    Statement {
        /// Statement text that was executed.
        sql: String,
        /// Underlying driver error.
        #[source]
        source: ConnectionError,
    },

    /// A two-phase-commit protocol call failed.
    #[error("XA protocol error: {0}")]
    Xa(#[from] XaError),

    /// The transaction manager rejected an enlistment or registration.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// The default timer service could not start its scheduler thread.
    #[error("failed to start timer service: {0}")]
    TimerStart(#[source] std::io::Error),
}

impl PoolError {
    /// Whether the error means the pool ran out of capacity.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Whether the error was raised before touching any connection because
    /// of global/local transaction misuse.
    #[must_use]
    pub fn is_illegal_local_tx(&self) -> bool {
        matches!(self, Self::IllegalLocalTx(_))
    }
}
