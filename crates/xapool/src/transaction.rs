//! Transaction manager boundary.
//!
//! The pool consumes a transaction manager; it never drives commit or
//! rollback itself. It asks for the calling thread's current transaction,
//! enlists connection resources with it, and registers a completion callback
//! that returns the connection once the transaction finishes.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::xa::{XaError, XaResource};

/// Identity of a global transaction, unique for the lifetime of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction status as reported by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Work may still be associated with the transaction.
    Active,
    /// The transaction can only roll back.
    MarkedRollback,
    /// Phase one is in progress.
    Preparing,
    /// All resources voted.
    Prepared,
    /// Phase two commit is in progress.
    Committing,
    /// The transaction committed.
    Committed,
    /// Rollback is in progress.
    RollingBack,
    /// The transaction rolled back.
    RolledBack,
    /// The outcome is not known.
    Unknown,
}

impl TransactionStatus {
    /// Whether the transaction finished with a definite outcome.
    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Errors reported by the transaction manager.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransactionError {
    /// The transaction no longer accepts enlistments.
    #[error("transaction {id} is not active (status {status:?})")]
    NotActive {
        /// The transaction.
        id: TransactionId,
        /// Its status at the time of the call.
        status: TransactionStatus,
    },

    /// A resource failed while being enlisted or completed.
    #[error("resource failure: {0}")]
    Resource(#[from] XaError),

    /// The calling thread is already associated with a transaction.
    #[error("thread already has a transaction")]
    AlreadyAssociated,

    /// The calling thread has no transaction.
    #[error("no transaction associated with the current thread")]
    NoTransaction,

    /// The transaction rolled back instead of committing.
    #[error("transaction {0} rolled back")]
    RolledBack(TransactionId),
}

/// Callback invoked around transaction completion.
pub trait Synchronization: Send + Sync {
    /// Called before the two-phase commit begins.
    fn before_completion(&self) {}

    /// Called once the transaction has completed.
    fn after_completion(&self, status: TransactionStatus);
}

/// A global transaction.
pub trait Transaction: Send + Sync {
    /// Identity used to key transaction-bound connections.
    fn id(&self) -> TransactionId;

    /// Current status.
    fn status(&self) -> TransactionStatus;

    /// Enlist a resource so it takes part in completion.
    fn enlist_resource(&self, resource: Arc<dyn XaResource>) -> Result<(), TransactionError>;

    /// Register a completion callback.
    fn register_synchronization(
        &self,
        synchronization: Box<dyn Synchronization>,
    ) -> Result<(), TransactionError>;
}

/// Source of the calling thread's current transaction.
pub trait TransactionManager: Send + Sync {
    /// The calling thread's active transaction, if any.
    ///
    /// A transaction that has already committed or rolled back is not
    /// reported, even while its completion callbacks are still running.
    fn current(&self) -> Option<Arc<dyn Transaction>>;
}

impl<T: TransactionManager + ?Sized> TransactionManager for Arc<T> {
    fn current(&self) -> Option<Arc<dyn Transaction>> {
        (**self).current()
    }
}

/// A transaction manager that never reports a transaction.
///
/// Pools built with it only ever hand out local (autocommit) connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransactions;

impl TransactionManager for LocalTransactions {
    fn current(&self) -> Option<Arc<dyn Transaction>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_statuses() {
        assert!(TransactionStatus::Committed.is_completed());
        assert!(TransactionStatus::RolledBack.is_completed());
        assert!(!TransactionStatus::Active.is_completed());
        assert!(!TransactionStatus::Committing.is_completed());
    }

    #[test]
    fn test_local_transactions_has_none() {
        assert!(LocalTransactions.current().is_none());
    }

    #[test]
    fn test_transaction_id_display() {
        assert_eq!(TransactionId::new(42).to_string(), "tx-42");
    }
}
