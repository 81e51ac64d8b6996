//! Connection pool implementation.
//!
//! The pool tracks three collections under one lock: local connections in
//! use, connections bound to a live global transaction (one per
//! transaction), and idle connections on the free list. Checkout blocks
//! while the in-use collections are at `max_pool_size`; check-in, release
//! and eviction free capacity and wake one waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::connection::{ConnectionMetadata, ConnectionWrapper, PooledConnection};
use crate::error::PoolError;
use crate::free_list::FreeList;
use crate::local_xa::LocalXaDataSource;
use crate::physical::{DataSource, IsolationLevel, XaConnection, XaDataSource};
use crate::timer::{ThreadTimer, TimerHandle, TimerService};
use crate::transaction::{
    LocalTransactions, Synchronization, Transaction, TransactionId, TransactionManager,
    TransactionStatus,
};

/// Interval of the periodic status log.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// A transaction-aware connection pool.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use xapool::{LocalXaDataSource, Pool};
///
/// let pool = Pool::builder()
///     .data_source(LocalXaDataSource::new(driver))
///     .transaction_manager(tm)
///     .max_pool_size(20)
///     .validation_query("SELECT 1")
///     .build()?;
///
/// let conn = pool.check_out()?;
/// conn.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1")?;
/// conn.close();
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    data_source: Arc<dyn XaDataSource>,
    transaction_manager: Arc<dyn TransactionManager>,
    timer: Arc<dyn TimerService>,

    /// All three collections, guarded together.
    state: Mutex<PoolState>,

    /// Signalled whenever capacity may have been freed.
    available: Condvar,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState {
    active: HashMap<u64, Arc<ConnectionWrapper>>,
    tx_active: HashMap<TransactionId, Arc<ConnectionWrapper>>,
    free: FreeList<Arc<ConnectionWrapper>>,
    closed: bool,
    housekeeping: Option<TimerHandle>,
}

impl PoolState {
    fn in_use(&self) -> usize {
        self.active.len() + self.tx_active.len()
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    validations_performed: u64,
    validations_failed: u64,
    evictions: u64,
    forced_releases: u64,
}

enum Acquired {
    /// Already bound to the caller's transaction.
    Bound(Arc<ConnectionWrapper>),
    /// Newly placed in an active collection.
    Fresh(Arc<ConnectionWrapper>),
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool from its collaborators.
    pub fn new<D, M, T>(
        config: PoolConfig,
        data_source: D,
        transaction_manager: M,
        timer: T,
    ) -> Result<Self, PoolError>
    where
        D: XaDataSource + 'static,
        M: TransactionManager + 'static,
        T: TimerService + 'static,
    {
        Self::from_parts(
            config,
            Arc::new(data_source),
            Arc::new(transaction_manager),
            Arc::new(timer),
        )
    }

    fn from_parts(
        config: PoolConfig,
        data_source: Arc<dyn XaDataSource>,
        transaction_manager: Arc<dyn TransactionManager>,
        timer: Arc<dyn TimerService>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config,
            data_source,
            transaction_manager,
            timer,
            state: Mutex::new(PoolState {
                active: HashMap::new(),
                tx_active: HashMap::new(),
                free: FreeList::new(),
                closed: false,
                housekeeping: None,
            }),
            available: Condvar::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        inner.schedule_housekeeping(&mut inner.state.lock());

        tracing::info!(
            min = inner.config.min_pool_size,
            max = inner.config.max_pool_size,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Check a connection out of the pool.
    ///
    /// Inside a global transaction the connection already bound to that
    /// transaction is returned if there is one; otherwise a connection is
    /// reused from the free list or opened, and enlisted with the
    /// transaction. Blocks while the pool is at capacity, bounded by
    /// `max_wait`.
    pub fn check_out(&self) -> Result<PooledConnection, PoolError> {
        let result = self.inner.check_out();
        let mut metrics = self.inner.metrics.lock();
        match &result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(_) => metrics.checkouts_failed += 1,
        }
        result
    }

    /// Return a connection. Same as [`PooledConnection::close`].
    pub fn check_in(&self, connection: &PooledConnection) {
        connection.close();
    }

    /// Return the connection bound to `tx` once that transaction has
    /// completed. A no-op while the calling thread still has an active
    /// transaction, or when nothing is bound to `tx`.
    pub fn check_in_tx(&self, tx: Option<TransactionId>) {
        if let Some(tx) = tx {
            self.inner.check_in_tx(tx);
        }
    }

    /// Remove a connection from the pool and physically close it.
    pub fn release(&self, connection: &PooledConnection) {
        self.inner.release(connection.wrapper());
    }

    /// Close every pooled and checked-out connection. Idempotent.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Checked-out connections not bound to a transaction.
    #[must_use]
    pub fn active_pool_size(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Checked-out connections bound to a transaction.
    #[must_use]
    pub fn tx_active_pool_size(&self) -> usize {
        self.inner.state.lock().tx_active.len()
    }

    /// Idle connections on the free list.
    #[must_use]
    pub fn free_pool_size(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Configured maximum pool size.
    #[must_use]
    pub fn max_pool_size(&self) -> u32 {
        self.inner.config.max_pool_size
    }

    /// Configured eviction floor.
    #[must_use]
    pub fn min_pool_size(&self) -> u32 {
        self.inner.config.min_pool_size
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            evictions: inner.evictions,
            forced_releases: inner.forced_releases,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    fn check_out(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        let tx = self.transaction_manager.current();

        let wrapper = match self.acquire(tx.as_deref())? {
            Acquired::Bound(wrapper) => {
                tracing::trace!(
                    connection_id = wrapper.id(),
                    "reusing transaction-bound connection"
                );
                return Ok(PooledConnection::new(wrapper));
            }
            Acquired::Fresh(wrapper) => wrapper,
        };

        if let Some(tx) = tx.as_deref() {
            self.enlist(&wrapper, tx)?;
        }

        let connection = PooledConnection::new(Arc::clone(&wrapper));
        connection.set_read_only(self.config.read_only)?;
        if let Some(level) = self.config.transaction_isolation {
            connection.set_transaction_isolation(level)?;
        }

        wrapper.record_checkout();
        tracing::debug!(
            connection_id = wrapper.id(),
            tx = ?wrapper.transaction_id(),
            "connection checked out"
        );
        Ok(connection)
    }

    fn acquire(self: &Arc<Self>, tx: Option<&dyn Transaction>) -> Result<Acquired, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        match tx {
            Some(tx) => {
                if let Some(wrapper) = state.tx_active.get(&tx.id()) {
                    return Ok(Acquired::Bound(Arc::clone(wrapper)));
                }
            }
            None if self.config.suppress_local_tx => {
                return Err(PoolError::IllegalLocalTx(
                    "checkout outside a global transaction",
                ));
            }
            None => {}
        }

        self.wait_for_capacity(&mut state)?;

        let wrapper = match self.checkout_free(&mut state) {
            Some(wrapper) => wrapper,
            None => self.create()?,
        };

        let tx_id = tx.map(|tx| tx.id());
        wrapper.init(tx_id);
        match tx_id {
            Some(tx_id) => {
                state.tx_active.insert(tx_id, Arc::clone(&wrapper));
            }
            None => {
                state.active.insert(wrapper.id(), Arc::clone(&wrapper));
            }
        }

        Ok(Acquired::Fresh(wrapper))
    }

    fn wait_for_capacity(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<(), PoolError> {
        let max = self.config.max_pool_size as usize;
        let started = Instant::now();
        let mut remaining = self.config.max_wait;

        while max > 0 && state.in_use() >= max {
            match remaining {
                None => self.available.wait(state),
                Some(budget) if budget.is_zero() => {
                    tracing::debug!(
                        in_use = state.in_use(),
                        max = max,
                        "connection pool exhausted"
                    );
                    return Err(PoolError::PoolExhausted {
                        waited: started.elapsed(),
                    });
                }
                Some(budget) => {
                    let wait_started = Instant::now();
                    let _ = self.available.wait_for(state, budget);
                    remaining = Some(budget.saturating_sub(wait_started.elapsed()));
                }
            }

            if state.closed {
                return Err(PoolError::PoolClosed);
            }
        }

        Ok(())
    }

    /// Take the most recently freed connection, validating it when due.
    fn checkout_free(&self, state: &mut PoolState) -> Option<Arc<ConnectionWrapper>> {
        let entry = state.free.pop()?;
        let entry_id = entry.id();
        let idle = entry.idle();
        let wrapper = entry.take();

        let Some(query) = self.config.validation_query.as_deref() else {
            return Some(wrapper);
        };
        if idle < self.config.validation_interval {
            return Some(wrapper);
        }

        self.metrics.lock().validations_performed += 1;
        match wrapper.validate(query) {
            Ok(()) => Some(wrapper),
            Err(e) => {
                // The remaining idle connections most likely share the same
                // broken backend.
                tracing::warn!(
                    connection_id = wrapper.id(),
                    entry = entry_id,
                    discarded = state.free.len(),
                    error = %e,
                    "validation failed, discarding free connections"
                );
                let mut closed = u64::from(wrapper.close_really());
                for stale in state.free.drain() {
                    closed += u64::from(stale.close_really());
                }

                let mut metrics = self.metrics.lock();
                metrics.validations_failed += 1;
                metrics.connections_closed += closed;
                None
            }
        }
    }

    fn create(self: &Arc<Self>) -> Result<Arc<ConnectionWrapper>, PoolError> {
        let XaConnection {
            connection,
            resource,
        } = self.data_source.open_connection()?;

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.lock().connections_created += 1;
        tracing::debug!(connection_id = id, "opened physical connection");

        Ok(ConnectionWrapper::new(
            connection,
            resource,
            Arc::downgrade(self),
            ConnectionMetadata::new(id),
        ))
    }

    fn enlist(
        self: &Arc<Self>,
        wrapper: &Arc<ConnectionWrapper>,
        tx: &dyn Transaction,
    ) -> Result<(), PoolError> {
        let completion = CheckInOnCompletion {
            pool: Arc::downgrade(self),
            tx: tx.id(),
        };
        let result = tx
            .enlist_resource(wrapper.xa_resource())
            .and_then(|()| tx.register_synchronization(Box::new(completion)));

        if let Err(e) = result {
            tracing::warn!(
                connection_id = wrapper.id(),
                tx = %tx.id(),
                error = %e,
                "enlistment failed"
            );
            self.release(wrapper);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) fn check_in(self: &Arc<Self>, wrapper: &Arc<ConnectionWrapper>) {
        let mut state = self.state.lock();
        let id = wrapper.id();
        if state
            .active
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, wrapper))
        {
            state.active.remove(&id);
        }
        self.return_to_free(&mut state, wrapper);
    }

    pub(crate) fn check_in_tx(self: &Arc<Self>, tx: TransactionId) {
        if self.transaction_manager.current().is_some() {
            tracing::trace!(tx = %tx, "transaction still active, check-in deferred");
            return;
        }

        let mut state = self.state.lock();
        let Some(wrapper) = state.tx_active.remove(&tx) else {
            return;
        };
        self.return_to_free(&mut state, &wrapper);
    }

    fn return_to_free(self: &Arc<Self>, state: &mut PoolState, wrapper: &Arc<ConnectionWrapper>) {
        wrapper.record_checkin();

        if !self.config.pooling_enabled() || state.closed {
            let closed = wrapper.close_really();
            self.metrics.lock().connections_closed += u64::from(closed);
            self.available.notify_one();
            return;
        }

        if let Err(e) = wrapper.reset_auto_commit() {
            tracing::warn!(
                connection_id = wrapper.id(),
                error = %e,
                "autocommit reset failed, closing instead of pooling"
            );
            let closed = wrapper.close_really();
            self.metrics.lock().connections_closed += u64::from(closed);
            self.available.notify_one();
            return;
        }

        let pooled = wrapper.successor();
        wrapper.cleanup();

        let connection_id = pooled.id();
        let timeout = self.config.timeout;
        let pool = Arc::downgrade(self);
        state.free.push(pooled, |entry_id| {
            self.timer.schedule(
                timeout,
                Box::new(move || {
                    if let Some(pool) = pool.upgrade() {
                        pool.evict(entry_id);
                    }
                }),
            )
        });

        tracing::debug!(
            connection_id = connection_id,
            free = state.free.len(),
            "connection returned to free list"
        );
        self.available.notify_one();
    }

    pub(crate) fn release(&self, wrapper: &Arc<ConnectionWrapper>) {
        let mut state = self.state.lock();
        let id = wrapper.id();
        if state
            .active
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, wrapper))
        {
            state.active.remove(&id);
        }
        if let Some(tx) = wrapper.transaction_id() {
            if state
                .tx_active
                .get(&tx)
                .is_some_and(|current| Arc::ptr_eq(current, wrapper))
            {
                state.tx_active.remove(&tx);
            }
        }

        if wrapper.close_really() {
            tracing::debug!(connection_id = id, "connection released");
            let mut metrics = self.metrics.lock();
            metrics.forced_releases += 1;
            metrics.connections_closed += 1;
        }
        self.available.notify_one();
    }

    /// Close an idle free-list entry whose timeout elapsed.
    ///
    /// Skipped while the free list holds `min_pool_size` entries or fewer,
    /// so eviction shrinks the list down to exactly `min_pool_size` and
    /// never below it.
    fn evict(&self, entry_id: u64) {
        let wrapper = {
            let mut state = self.state.lock();
            if state.free.len() <= self.config.min_pool_size as usize {
                tracing::trace!(
                    entry = entry_id,
                    free = state.free.len(),
                    "free list at minimum, eviction skipped"
                );
                return;
            }
            match state.free.remove(entry_id) {
                Some(entry) => entry.expire(),
                None => return,
            }
        };

        tracing::debug!(connection_id = wrapper.id(), "evicting idle connection");
        let closed = wrapper.close_really();
        let mut metrics = self.metrics.lock();
        metrics.evictions += 1;
        metrics.connections_closed += u64::from(closed);
    }

    fn schedule_housekeeping(self: &Arc<Self>, state: &mut PoolState) {
        let pool = Arc::downgrade(self);
        let task = self.timer.schedule(
            HOUSEKEEPING_INTERVAL,
            Box::new(move || {
                if let Some(pool) = pool.upgrade() {
                    pool.housekeep();
                }
            }),
        );
        state.housekeeping = Some(task);
    }

    fn housekeep(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        tracing::debug!(
            active = state.active.len(),
            tx_active = state.tx_active.len(),
            free = state.free.len(),
            "connection pool status"
        );
        self.schedule_housekeeping(&mut state);
    }

    fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            active: state.active.len() as u32,
            tx_active: state.tx_active.len() as u32,
            free: state.free.len() as u32,
            max: self.config.max_pool_size,
            min: self.config.min_pool_size,
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let mut closed = 0u64;
        for wrapper in state.free.drain() {
            closed += u64::from(wrapper.close_really());
        }
        for (_, wrapper) in state.tx_active.drain() {
            closed += u64::from(wrapper.close_really());
        }
        for (_, wrapper) in state.active.drain() {
            closed += u64::from(wrapper.close_really());
        }
        if let Some(task) = state.housekeeping.take() {
            task.cancel();
        }

        self.metrics.lock().connections_closed += closed;
        self.available.notify_all();
        tracing::info!(closed = closed, "connection pool closed");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Returns a transaction's connection to the pool once it completes.
struct CheckInOnCompletion {
    pool: Weak<PoolInner>,
    tx: TransactionId,
}

impl Synchronization for CheckInOnCompletion {
    fn after_completion(&self, status: TransactionStatus) {
        if !status.is_completed() {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.check_in_tx(self.tx);
        }
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .local_data_source(driver)
///     .pool_config(pool_config)
///     .build()?;
/// ```
pub struct PoolBuilder {
    pool_config: PoolConfig,
    data_source: Option<Arc<dyn XaDataSource>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    timer: Option<Arc<dyn TimerService>>,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            data_source: None,
            transaction_manager: None,
            timer: None,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Open connections through an XA-capable data source.
    #[must_use]
    pub fn data_source(mut self, data_source: impl XaDataSource + 'static) -> Self {
        self.data_source = Some(Arc::new(data_source));
        self
    }

    /// Open connections through a plain data source, adapted for XA.
    #[must_use]
    pub fn local_data_source(self, data_source: impl DataSource + 'static) -> Self {
        self.data_source(LocalXaDataSource::new(data_source))
    }

    /// Set the transaction manager. Defaults to [`LocalTransactions`].
    #[must_use]
    pub fn transaction_manager(mut self, manager: impl TransactionManager + 'static) -> Self {
        self.transaction_manager = Some(Arc::new(manager));
        self
    }

    /// Set the timer service. Defaults to a new [`ThreadTimer`].
    #[must_use]
    pub fn timer(mut self, timer: impl TimerService + 'static) -> Self {
        self.timer = Some(Arc::new(timer));
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.pool_config.max_pool_size = size;
        self
    }

    /// Set the eviction floor.
    #[must_use]
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.pool_config.min_pool_size = size;
        self
    }

    /// Set the checkout wait budget (`None` = unlimited).
    #[must_use]
    pub fn max_wait(mut self, wait: Option<Duration>) -> Self {
        self.pool_config.max_wait = wait;
        self
    }

    /// Set the idle eviction timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.timeout = timeout;
        self
    }

    /// Reject checkouts outside a global transaction.
    #[must_use]
    pub fn suppress_local_tx(mut self, suppress: bool) -> Self {
        self.pool_config.suppress_local_tx = suppress;
        self
    }

    /// Apply a read-only flag on checkout.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.pool_config.read_only = read_only;
        self
    }

    /// Apply an isolation level on checkout.
    #[must_use]
    pub fn transaction_isolation(mut self, level: IsolationLevel) -> Self {
        self.pool_config.transaction_isolation = Some(level);
        self
    }

    /// Validate pooled connections with this statement before reuse.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<String>) -> Self {
        self.pool_config = self.pool_config.validation_query(query);
        self
    }

    /// Set the freshness window that skips validation.
    #[must_use]
    pub fn validation_interval(mut self, interval: Duration) -> Self {
        self.pool_config.validation_interval = interval;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool, PoolError> {
        let data_source = self
            .data_source
            .ok_or_else(|| PoolError::Config("a data source is required".into()))?;
        let transaction_manager = self
            .transaction_manager
            .unwrap_or_else(|| Arc::new(LocalTransactions));
        let timer = match self.timer {
            Some(timer) => timer,
            None => Arc::new(ThreadTimer::new().map_err(PoolError::TimerStart)?),
        };

        Pool::from_parts(self.pool_config, data_source, transaction_manager, timer)
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Checked-out connections not bound to a transaction.
    pub active: u32,
    /// Checked-out connections bound to a transaction.
    pub tx_active: u32,
    /// Idle connections on the free list.
    pub free: u32,
    /// Maximum checked-out connections (`0` = pooling disabled).
    pub max: u32,
    /// Eviction floor.
    pub min: u32,
}

impl PoolStatus {
    /// Connections currently checked out.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.active + self.tx_active
    }

    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use() as f64 / self.max as f64) * 100.0
    }

    /// Check if a checkout would have to wait.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max > 0 && self.in_use() >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Physical connections opened since pool start.
    pub connections_created: u64,
    /// Physical connections closed since pool start.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (exhaustion, pool closed, open or enlist failures).
    pub checkouts_failed: u64,
    /// Validation queries executed.
    pub validations_performed: u64,
    /// Validation queries that failed.
    pub validations_failed: u64,
    /// Idle connections closed by their eviction timer.
    pub evictions: u64,
    /// Connections closed because an operation on them failed.
    pub forced_releases: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            active: 3,
            tx_active: 2,
            free: 5,
            max: 20,
            min: 0,
        };
        assert_eq!(status.in_use(), 5);
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            active: 6,
            tx_active: 4,
            free: 0,
            max: 10,
            min: 0,
        };
        assert!(status.is_at_capacity());

        let disabled = PoolStatus {
            active: 6,
            tx_active: 0,
            free: 0,
            max: 0,
            min: 0,
        };
        assert!(!disabled.is_at_capacity());
        assert!(disabled.utilization().abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            validations_performed: 100,
            validations_failed: 5,
            evictions: 1,
            forced_releases: 1,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_default() {
        let builder = PoolBuilder::new();
        assert_eq!(builder.pool_config.min_pool_size, 0);
        assert_eq!(builder.pool_config.max_pool_size, 10);
        assert!(builder.data_source.is_none());
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder()
            .min_pool_size(5)
            .max_pool_size(50)
            .max_wait(Some(Duration::from_millis(250)))
            .transaction_isolation(IsolationLevel::Serializable)
            .validation_query("SELECT 1");

        assert_eq!(builder.pool_config.min_pool_size, 5);
        assert_eq!(builder.pool_config.max_pool_size, 50);
        assert_eq!(
            builder.pool_config.max_wait,
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            builder.pool_config.transaction_isolation,
            Some(IsolationLevel::Serializable)
        );
        assert_eq!(builder.pool_config.validation_query.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_builder_requires_data_source() {
        let err = Pool::builder().build().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }
}
