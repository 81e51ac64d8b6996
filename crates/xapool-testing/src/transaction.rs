//! In-memory transaction manager.
//!
//! Transactions are associated with the thread that began them, the way a
//! JTA-style manager scopes them. Completion drives enlisted resources
//! through the X/Open protocol: one resource commits in one phase, several
//! are prepared first. The thread association is dropped before completion
//! callbacks run, so callbacks observe no current transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::Mutex;
use xapool::{
    Synchronization, Transaction, TransactionError, TransactionId, TransactionManager,
    TransactionStatus, Vote, XaFlags, XaResource, Xid,
};

#[derive(Default)]
struct ManagerInner {
    associations: Mutex<HashMap<ThreadId, Arc<MockTransaction>>>,
    next_id: AtomicU64,
}

/// Thread-scoped transaction manager.
///
/// Clones share the same associations.
#[derive(Clone, Default)]
pub struct MockTransactionManager {
    inner: Arc<ManagerInner>,
}

impl MockTransactionManager {
    /// Create a manager with no transactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a transaction on the calling thread.
    pub fn begin(&self) -> Result<Arc<MockTransaction>, TransactionError> {
        let mut associations = self.inner.associations.lock();
        let thread = thread::current().id();
        if associations.contains_key(&thread) {
            return Err(TransactionError::AlreadyAssociated);
        }

        let id = TransactionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let tx = Arc::new(MockTransaction::new(id));
        associations.insert(thread, Arc::clone(&tx));
        tracing::debug!(tx = %id, "transaction begun");
        Ok(tx)
    }

    /// Commit the calling thread's transaction.
    pub fn commit(&self) -> Result<(), TransactionError> {
        self.suspend()
            .ok_or(TransactionError::NoTransaction)?
            .commit()
    }

    /// Roll back the calling thread's transaction.
    pub fn rollback(&self) -> Result<(), TransactionError> {
        self.suspend()
            .ok_or(TransactionError::NoTransaction)?
            .rollback();
        Ok(())
    }

    /// Disassociate the calling thread's transaction without completing it.
    pub fn suspend(&self) -> Option<Arc<MockTransaction>> {
        self.inner
            .associations
            .lock()
            .remove(&thread::current().id())
    }

    /// Associate a suspended transaction with the calling thread.
    pub fn resume(&self, tx: Arc<MockTransaction>) -> Result<(), TransactionError> {
        let mut associations = self.inner.associations.lock();
        let thread = thread::current().id();
        if associations.contains_key(&thread) {
            return Err(TransactionError::AlreadyAssociated);
        }
        associations.insert(thread, tx);
        Ok(())
    }
}

impl TransactionManager for MockTransactionManager {
    fn current(&self) -> Option<Arc<dyn Transaction>> {
        let associations = self.inner.associations.lock();
        let tx = associations.get(&thread::current().id())?;
        if tx.status() != TransactionStatus::Active {
            return None;
        }
        Some(Arc::clone(tx) as Arc<dyn Transaction>)
    }
}

impl std::fmt::Debug for MockTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransactionManager")
            .field("associations", &self.inner.associations.lock().len())
            .finish()
    }
}

struct Branch {
    xid: Xid,
    resource: Arc<dyn XaResource>,
}

/// A transaction driven by [`MockTransactionManager`].
pub struct MockTransaction {
    id: TransactionId,
    xid: Xid,
    status: Mutex<TransactionStatus>,
    branches: Mutex<Vec<Branch>>,
    synchronizations: Mutex<Vec<Box<dyn Synchronization>>>,
}

impl MockTransaction {
    fn new(id: TransactionId) -> Self {
        Self {
            id,
            xid: Xid::generate(),
            status: Mutex::new(TransactionStatus::Active),
            branches: Mutex::new(Vec::new()),
            synchronizations: Mutex::new(Vec::new()),
        }
    }

    /// Number of enlisted resources.
    #[must_use]
    pub fn enlisted(&self) -> usize {
        self.branches.lock().len()
    }

    fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }

    fn assert_active(&self) -> Result<(), TransactionError> {
        let status = self.status();
        if status != TransactionStatus::Active {
            return Err(TransactionError::NotActive {
                id: self.id,
                status,
            });
        }
        Ok(())
    }

    /// Complete with two-phase commit, falling back to rollback when a
    /// resource fails.
    fn commit(&self) -> Result<(), TransactionError> {
        self.assert_active()?;

        let synchronizations = std::mem::take(&mut *self.synchronizations.lock());
        for sync in &synchronizations {
            sync.before_completion();
        }

        let branches = std::mem::take(&mut *self.branches.lock());
        let outcome = self.commit_branches(&branches);
        let status = match &outcome {
            Ok(()) => TransactionStatus::Committed,
            Err(e) => {
                tracing::debug!(tx = %self.id, error = %e, "commit failed, rolling back");
                for branch in &branches {
                    let _ = branch.resource.rollback(&branch.xid);
                }
                TransactionStatus::RolledBack
            }
        };
        self.set_status(status);

        for sync in &synchronizations {
            sync.after_completion(status);
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(TransactionError::RolledBack(self.id)),
        }
    }

    fn commit_branches(&self, branches: &[Branch]) -> Result<(), TransactionError> {
        self.set_status(TransactionStatus::Preparing);
        for branch in branches {
            branch.resource.end(&branch.xid, XaFlags::SUCCESS)?;
        }

        if let [only] = branches {
            self.set_status(TransactionStatus::Committing);
            only.resource.commit(&only.xid, true)?;
            return Ok(());
        }

        let mut voted_ok = Vec::with_capacity(branches.len());
        for branch in branches {
            if branch.resource.prepare(&branch.xid)? == Vote::Ok {
                voted_ok.push(branch);
            }
        }

        self.set_status(TransactionStatus::Committing);
        for branch in voted_ok {
            branch.resource.commit(&branch.xid, false)?;
        }
        Ok(())
    }

    fn rollback(&self) {
        self.set_status(TransactionStatus::RollingBack);
        let synchronizations = std::mem::take(&mut *self.synchronizations.lock());
        let branches = std::mem::take(&mut *self.branches.lock());

        for branch in &branches {
            let _ = branch.resource.end(&branch.xid, XaFlags::FAIL);
            let _ = branch.resource.rollback(&branch.xid);
        }

        self.set_status(TransactionStatus::RolledBack);
        for sync in &synchronizations {
            sync.after_completion(TransactionStatus::RolledBack);
        }
    }
}

impl Transaction for MockTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    fn enlist_resource(&self, resource: Arc<dyn XaResource>) -> Result<(), TransactionError> {
        self.assert_active()?;

        let qualifier = (self.branches.lock().len() as u32 + 1).to_be_bytes();
        let xid = self.xid.branch(&qualifier)?;
        resource.start(&xid, XaFlags::NONE)?;
        self.branches.lock().push(Branch { xid, resource });
        Ok(())
    }

    fn register_synchronization(
        &self,
        synchronization: Box<dyn Synchronization>,
    ) -> Result<(), TransactionError> {
        self.assert_active()?;
        self.synchronizations.lock().push(synchronization);
        Ok(())
    }
}

impl std::fmt::Debug for MockTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("enlisted", &self.enlisted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_associates_current_thread() {
        let tm = MockTransactionManager::new();
        assert!(tm.current().is_none());

        let tx = tm.begin().unwrap();
        assert_eq!(tm.current().unwrap().id(), tx.id());
        assert!(matches!(tm.begin(), Err(TransactionError::AlreadyAssociated)));

        tm.commit().unwrap();
        assert!(tm.current().is_none());
        assert_eq!(tx.status(), TransactionStatus::Committed);
    }

    #[test]
    fn test_other_threads_see_no_transaction() {
        let tm = MockTransactionManager::new();
        let _tx = tm.begin().unwrap();

        let other = tm.clone();
        let seen = thread::spawn(move || other.current().is_some())
            .join()
            .unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_completed_transaction_rejects_enlistment() {
        let tm = MockTransactionManager::new();
        let tx = tm.begin().unwrap();
        tm.rollback().unwrap();

        struct Noop;
        impl Synchronization for Noop {
            fn after_completion(&self, _status: TransactionStatus) {}
        }
        assert!(matches!(
            tx.register_synchronization(Box::new(Noop)),
            Err(TransactionError::NotActive { .. })
        ));
    }

    #[test]
    fn test_commit_without_transaction() {
        let tm = MockTransactionManager::new();
        assert!(matches!(tm.commit(), Err(TransactionError::NoTransaction)));
    }
}
