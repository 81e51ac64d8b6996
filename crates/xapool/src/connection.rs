//! Logical connections handed out by the pool.
//!
//! A [`PooledConnection`] is the caller's view of a physical connection. It
//! forwards every operation to the physical connection and, when one fails,
//! releases the connection from the pool before returning the error, so a
//! faulted session never returns to the free list.
//!
//! While a connection is bound to a global transaction, local transaction
//! control (`commit`, `rollback`, savepoints, re-enabling autocommit) is
//! rejected: completion belongs to the transaction manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ConnectionError, PoolError};
use crate::physical::{IsolationLevel, PhysicalConnection, Savepoint, SharedConnection};
use crate::pool::PoolInner;
use crate::transaction::TransactionId;
use crate::xa::XaResource;
use crate::xa_wrapper::XaResourceWrapper;

/// Diagnostic history of a physical connection.
///
/// Carried over from one logical wrapper to the next for as long as the
/// physical connection stays open.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-assigned connection id.
    pub id: u64,
    /// When the physical connection was opened.
    pub created_at: Instant,
    /// Number of times the connection was checked out.
    pub checkouts: u64,
    /// Most recent checkout.
    pub last_checkout: Option<Instant>,
    /// Most recent return to the pool.
    pub last_checkin: Option<Instant>,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            checkouts: 0,
            last_checkout: None,
            last_checkin: None,
        }
    }

    /// Time since the physical connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last returned, if it ever was.
    #[must_use]
    pub fn idle_time(&self) -> Option<Duration> {
        self.last_checkin.map(|at| at.elapsed())
    }
}

/// Pool-side state of one logical connection.
pub(crate) struct ConnectionWrapper {
    id: u64,
    me: Weak<ConnectionWrapper>,
    physical: SharedConnection,
    resource: Arc<dyn XaResource>,
    xa: Arc<XaResourceWrapper>,
    pool: Weak<PoolInner>,
    tx: Mutex<Option<TransactionId>>,
    closed: AtomicBool,
    metadata: Mutex<ConnectionMetadata>,
}

impl ConnectionWrapper {
    pub(crate) fn new(
        physical: SharedConnection,
        resource: Arc<dyn XaResource>,
        pool: Weak<PoolInner>,
        metadata: ConnectionMetadata,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| Self {
            id: metadata.id,
            me: me.clone(),
            xa: Arc::new(XaResourceWrapper::new(Arc::clone(&resource), me.clone())),
            physical,
            resource,
            pool,
            tx: Mutex::new(None),
            closed: AtomicBool::new(false),
            metadata: Mutex::new(metadata),
        })
    }

    /// A fresh, unbound wrapper over the same physical connection.
    pub(crate) fn successor(&self) -> Arc<Self> {
        Self::new(
            Arc::clone(&self.physical),
            Arc::clone(&self.resource),
            self.pool.clone(),
            self.metadata(),
        )
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn init(&self, tx: Option<TransactionId>) {
        *self.tx.lock() = tx;
        self.closed.store(false, Ordering::Release);
    }

    pub(crate) fn transaction_id(&self) -> Option<TransactionId> {
        *self.tx.lock()
    }

    pub(crate) fn xa_resource(&self) -> Arc<dyn XaResource> {
        Arc::clone(&self.xa) as Arc<dyn XaResource>
    }

    pub(crate) fn metadata(&self) -> ConnectionMetadata {
        self.metadata.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn record_checkout(&self) {
        let mut metadata = self.metadata.lock();
        metadata.checkouts += 1;
        metadata.last_checkout = Some(Instant::now());
    }

    pub(crate) fn record_checkin(&self) {
        self.metadata.lock().last_checkin = Some(Instant::now());
    }

    /// Retire this wrapper without touching the physical connection.
    pub(crate) fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn reset_auto_commit(&self) -> Result<(), ConnectionError> {
        self.physical.lock().set_auto_commit(true)
    }

    pub(crate) fn validate(&self, query: &str) -> Result<(), ConnectionError> {
        self.physical.lock().execute(query).map(|_| ())
    }

    /// Physically close the connection. Failures are logged, not returned.
    ///
    /// Returns `false` if this wrapper was already retired or the physical
    /// connection was already closed.
    pub(crate) fn close_really(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut conn = self.physical.lock();
        if conn.is_closed() {
            return false;
        }

        match conn.auto_commit() {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = conn.rollback().and_then(|()| conn.set_auto_commit(true)) {
                    tracing::warn!(connection_id = self.id, error = %e, "rollback before close failed");
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = self.id, error = %e, "could not read autocommit before close");
            }
        }

        match conn.close() {
            Ok(()) => tracing::debug!(connection_id = self.id, "physical connection closed"),
            Err(e) => tracing::warn!(connection_id = self.id, error = %e, "physical close failed"),
        }
        true
    }

    /// Remove this connection from the pool and close it.
    pub(crate) fn release(&self) {
        match (self.me.upgrade(), self.pool.upgrade()) {
            (Some(me), Some(pool)) => pool.release(&me),
            _ => {
                self.close_really();
            }
        }
    }

    /// Return this connection to the pool.
    pub(crate) fn close(&self) {
        if self.is_closed() {
            return;
        }
        let (Some(me), Some(pool)) = (self.me.upgrade(), self.pool.upgrade()) else {
            self.close_really();
            return;
        };
        match self.transaction_id() {
            None => pool.check_in(&me),
            Some(tx) => pool.check_in_tx(tx),
        }
    }

    fn assert_open(&self) -> Result<(), PoolError> {
        if self.is_closed() {
            return Err(PoolError::ConnectionClosed);
        }
        Ok(())
    }

    fn assert_local_tx(&self, operation: &'static str) -> Result<(), PoolError> {
        if self.transaction_id().is_some() {
            return Err(PoolError::IllegalLocalTx(operation));
        }
        Ok(())
    }

    fn call<T>(
        &self,
        op: impl FnOnce(&mut dyn PhysicalConnection) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        let mut conn = self.physical.lock();
        op(&mut **conn)
    }

    fn delegate<T>(
        &self,
        op: impl FnOnce(&mut dyn PhysicalConnection) -> Result<T, ConnectionError>,
    ) -> Result<T, PoolError> {
        self.assert_open()?;
        self.call(op).map_err(|e| {
            tracing::debug!(connection_id = self.id, error = %e, "delegated call failed");
            self.release();
            PoolError::Connection(e)
        })
    }
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("id", &self.id)
            .field("tx", &self.transaction_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection checked out of the pool.
///
/// Dropping it has the same effect as [`close`](Self::close). Checking out
/// twice inside one global transaction yields two handles over the same
/// logical connection.
pub struct PooledConnection {
    inner: Arc<ConnectionWrapper>,
}

impl PooledConnection {
    pub(crate) fn new(inner: Arc<ConnectionWrapper>) -> Self {
        Self { inner }
    }

    pub(crate) fn wrapper(&self) -> &Arc<ConnectionWrapper> {
        &self.inner
    }

    /// Pool-assigned id of the underlying physical connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Diagnostic history of the underlying physical connection.
    #[must_use]
    pub fn metadata(&self) -> ConnectionMetadata {
        self.inner.metadata()
    }

    /// The global transaction this connection is bound to.
    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.inner.transaction_id()
    }

    /// Whether this handle was returned, released, or the pool shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether both handles refer to the same logical connection.
    #[must_use]
    pub fn same_connection(&self, other: &PooledConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The XA resource enlisted on behalf of this connection.
    #[must_use]
    pub fn xa_resource(&self) -> Arc<dyn XaResource> {
        self.inner.xa_resource()
    }

    /// Execute a statement, returning the affected row count.
    pub fn execute(&self, sql: &str) -> Result<u64, PoolError> {
        self.inner.assert_open()?;
        self.inner
            .call(|conn| conn.execute(sql))
            .map_err(|source| {
                self.inner.release();
                PoolError::Statement {
                    sql: sql.to_string(),
                    source,
                }
            })
    }

    /// Commit the local transaction.
    pub fn commit(&self) -> Result<(), PoolError> {
        self.inner.assert_open()?;
        self.inner.assert_local_tx("commit inside a global transaction")?;
        self.inner.delegate(|conn| conn.commit())
    }

    /// Roll back the local transaction.
    pub fn rollback(&self) -> Result<(), PoolError> {
        self.inner.assert_open()?;
        self.inner
            .assert_local_tx("rollback inside a global transaction")?;
        self.inner.delegate(|conn| conn.rollback())
    }

    /// Current autocommit mode.
    pub fn auto_commit(&self) -> Result<bool, PoolError> {
        self.inner.delegate(|conn| conn.auto_commit())
    }

    /// Switch autocommit mode. Enabling it is a local transaction operation.
    pub fn set_auto_commit(&self, enabled: bool) -> Result<(), PoolError> {
        self.inner.assert_open()?;
        if enabled {
            self.inner
                .assert_local_tx("enabling autocommit inside a global transaction")?;
        }
        self.inner.delegate(|conn| conn.set_auto_commit(enabled))
    }

    /// Whether the session is read-only.
    pub fn is_read_only(&self) -> Result<bool, PoolError> {
        self.inner.delegate(|conn| conn.is_read_only())
    }

    /// Toggle read-only mode.
    pub fn set_read_only(&self, read_only: bool) -> Result<(), PoolError> {
        self.inner.delegate(|conn| conn.set_read_only(read_only))
    }

    /// Current isolation level.
    pub fn transaction_isolation(&self) -> Result<Option<IsolationLevel>, PoolError> {
        self.inner.delegate(|conn| conn.transaction_isolation())
    }

    /// Set the isolation level.
    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<(), PoolError> {
        self.inner
            .delegate(|conn| conn.set_transaction_isolation(level))
    }

    /// Create a savepoint in the local transaction.
    pub fn set_savepoint(&self, name: Option<&str>) -> Result<Savepoint, PoolError> {
        self.inner.assert_open()?;
        self.inner
            .assert_local_tx("savepoint inside a global transaction")?;
        self.inner.delegate(|conn| conn.set_savepoint(name))
    }

    /// Roll back to a savepoint.
    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), PoolError> {
        self.inner.assert_open()?;
        self.inner
            .assert_local_tx("savepoint rollback inside a global transaction")?;
        self.inner
            .delegate(|conn| conn.rollback_to_savepoint(savepoint))
    }

    /// Release a savepoint.
    pub fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), PoolError> {
        self.inner.assert_open()?;
        self.inner
            .assert_local_tx("savepoint release inside a global transaction")?;
        self.inner.delegate(|conn| conn.release_savepoint(savepoint))
    }

    /// Return the connection.
    ///
    /// An unbound connection goes back to the pool immediately. A connection
    /// bound to a global transaction stays bound until that transaction
    /// completes. Calling `close` again is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.inner).finish()
    }
}
