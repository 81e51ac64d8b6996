//! XA resource wrapper that ties protocol failures to the pool.
//!
//! Every call is forwarded to the real resource. If the resource reports an
//! error, the logical connection that owns it is released (its physical
//! connection is closed and never pooled again) before the error reaches the
//! transaction manager.

use std::sync::{Arc, Weak};

use crate::connection::ConnectionWrapper;
use crate::xa::{Vote, XaError, XaFlags, XaResource, Xid};

/// Delegating XA resource owned by one logical connection.
pub struct XaResourceWrapper {
    delegate: Arc<dyn XaResource>,
    owner: Weak<ConnectionWrapper>,
}

impl XaResourceWrapper {
    pub(crate) fn new(delegate: Arc<dyn XaResource>, owner: Weak<ConnectionWrapper>) -> Self {
        Self { delegate, owner }
    }

    /// The wrapped resource.
    #[must_use]
    pub fn delegate(&self) -> &Arc<dyn XaResource> {
        &self.delegate
    }

    fn guard<T>(&self, call: &'static str, result: Result<T, XaError>) -> Result<T, XaError> {
        if let Err(e) = &result {
            tracing::warn!(call = call, error = %e, "XA call failed, releasing connection");
            if let Some(owner) = self.owner.upgrade() {
                owner.release();
            }
        }
        result
    }
}

impl XaResource for XaResourceWrapper {
    fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError> {
        self.guard("start", self.delegate.start(xid, flags))
    }

    fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError> {
        self.guard("end", self.delegate.end(xid, flags))
    }

    fn prepare(&self, xid: &Xid) -> Result<Vote, XaError> {
        self.guard("prepare", self.delegate.prepare(xid))
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError> {
        self.guard("commit", self.delegate.commit(xid, one_phase))
    }

    fn rollback(&self, xid: &Xid) -> Result<(), XaError> {
        self.guard("rollback", self.delegate.rollback(xid))
    }

    fn forget(&self, xid: &Xid) -> Result<(), XaError> {
        self.guard("forget", self.delegate.forget(xid))
    }

    fn recover(&self, flags: XaFlags) -> Result<Vec<Xid>, XaError> {
        self.guard("recover", self.delegate.recover(flags))
    }

    fn is_same_rm(&self, other: &dyn XaResource) -> Result<bool, XaError> {
        self.guard("is_same_rm", self.delegate.is_same_rm(other))
    }

    fn transaction_timeout(&self) -> Result<u32, XaError> {
        self.guard("transaction_timeout", self.delegate.transaction_timeout())
    }

    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, XaError> {
        self.guard(
            "set_transaction_timeout",
            self.delegate.set_transaction_timeout(seconds),
        )
    }
}

impl std::fmt::Debug for XaResourceWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XaResourceWrapper")
            .field("owner_alive", &(self.owner.strong_count() > 0))
            .finish_non_exhaustive()
    }
}
