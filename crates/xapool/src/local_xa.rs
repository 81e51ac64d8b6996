//! Two-phase-commit adapter for connections without native XA support.
//!
//! [`LocalXaResource`] turns a plain physical connection into a global
//! transaction participant: starting a branch switches autocommit off,
//! completing it calls the connection's local commit or rollback and
//! switches autocommit back on. Prepare only votes; it gives no durability
//! guarantee of its own.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConnectionError;
use crate::physical::{DataSource, SharedConnection, XaConnection, XaDataSource, share};
use crate::xa::{Vote, XaError, XaFlags, XaResource, Xid};

/// Branch state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// No branch associated.
    Idle,
    /// Work is being associated with the branch.
    Active,
    /// The association was suspended and may be resumed.
    Suspended,
    /// Work ended successfully.
    Succeeded,
    /// Work ended with a failure; only rollback is allowed.
    Failed,
    /// Phase one voted yes.
    Prepared,
}

#[derive(Debug)]
struct Branch {
    xid: Option<Xid>,
    state: BranchState,
    timeout_secs: u32,
}

impl Branch {
    fn reset(&mut self) {
        self.xid = None;
        self.state = BranchState::Idle;
    }

    fn assert_current(&self, xid: &Xid) -> Result<(), XaError> {
        match &self.xid {
            Some(current) if current == xid => Ok(()),
            Some(_) | None => Err(XaError::unknown_xid(xid)),
        }
    }

    fn assert_state(&self, allowed: &[BranchState], call: &str) -> Result<(), XaError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(XaError::protocol(format!(
                "{call} not allowed in branch state {:?}",
                self.state
            )))
        }
    }
}

/// XA adapter over a plain physical connection.
pub struct LocalXaResource {
    connection: SharedConnection,
    branch: Mutex<Branch>,
}

impl LocalXaResource {
    /// Adapt `connection`.
    #[must_use]
    pub fn new(connection: SharedConnection) -> Self {
        Self {
            connection,
            branch: Mutex::new(Branch {
                xid: None,
                state: BranchState::Idle,
                timeout_secs: 0,
            }),
        }
    }

    /// Current branch state.
    #[must_use]
    pub fn state(&self) -> BranchState {
        self.branch.lock().state
    }

    /// The branch currently associated, if any.
    #[must_use]
    pub fn current_xid(&self) -> Option<Xid> {
        self.branch.lock().xid.clone()
    }

    fn begin(&self) -> Result<(), ConnectionError> {
        let mut conn = self.connection.lock();
        if conn.auto_commit()? {
            conn.set_auto_commit(false)?;
        }
        Ok(())
    }

    fn complete(&self, commit: bool) -> Result<(), ConnectionError> {
        let mut conn = self.connection.lock();
        if commit {
            conn.commit()?;
        } else {
            conn.rollback()?;
        }
        conn.set_auto_commit(true)
    }
}

impl XaResource for LocalXaResource {
    fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError> {
        let mut branch = self.branch.lock();
        if flags == XaFlags::NONE {
            if let Some(current) = &branch.xid {
                return Err(XaError::protocol(format!(
                    "branch {current} is still associated"
                )));
            }
            self.begin()?;
            branch.xid = Some(xid.clone());
            branch.state = BranchState::Active;
        } else if flags == XaFlags::RESUME {
            branch.assert_current(xid)?;
            branch.assert_state(&[BranchState::Suspended], "resume")?;
            branch.state = BranchState::Active;
        } else {
            return Err(XaError::invalid(format!("unsupported start flags {flags:?}")));
        }
        tracing::trace!(xid = %xid, "branch started");
        Ok(())
    }

    fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError> {
        let mut branch = self.branch.lock();
        branch.assert_current(xid)?;
        branch.assert_state(&[BranchState::Active], "end")?;
        branch.state = if flags == XaFlags::SUSPEND {
            BranchState::Suspended
        } else if flags == XaFlags::FAIL {
            BranchState::Failed
        } else if flags == XaFlags::SUCCESS {
            BranchState::Succeeded
        } else {
            return Err(XaError::invalid(format!("unsupported end flags {flags:?}")));
        };
        Ok(())
    }

    fn prepare(&self, xid: &Xid) -> Result<Vote, XaError> {
        let mut branch = self.branch.lock();
        branch.assert_current(xid)?;
        branch.assert_state(&[BranchState::Succeeded], "prepare")?;

        if self.connection.lock().is_closed() {
            branch.reset();
            return Ok(Vote::ReadOnly);
        }
        branch.state = BranchState::Prepared;
        Ok(Vote::Ok)
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError> {
        let mut branch = self.branch.lock();
        branch.assert_current(xid)?;
        if one_phase {
            branch.assert_state(&[BranchState::Succeeded], "one-phase commit")?;
        } else {
            branch.assert_state(&[BranchState::Prepared], "two-phase commit")?;
        }

        let result = self.complete(true);
        branch.reset();
        result.map_err(XaError::from)
    }

    fn rollback(&self, xid: &Xid) -> Result<(), XaError> {
        let mut branch = self.branch.lock();
        branch.assert_current(xid)?;
        branch.assert_state(
            &[
                BranchState::Succeeded,
                BranchState::Failed,
                BranchState::Prepared,
            ],
            "rollback",
        )?;

        let result = self.complete(false);
        branch.reset();
        result.map_err(XaError::from)
    }

    fn forget(&self, xid: &Xid) -> Result<(), XaError> {
        let mut branch = self.branch.lock();
        branch.assert_current(xid)?;
        branch.reset();
        Ok(())
    }

    fn recover(&self, _flags: XaFlags) -> Result<Vec<Xid>, XaError> {
        Ok(Vec::new())
    }

    fn is_same_rm(&self, _other: &dyn XaResource) -> Result<bool, XaError> {
        Ok(false)
    }

    fn transaction_timeout(&self) -> Result<u32, XaError> {
        Ok(self.branch.lock().timeout_secs)
    }

    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, XaError> {
        self.branch.lock().timeout_secs = seconds;
        Ok(true)
    }
}

impl std::fmt::Debug for LocalXaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let branch = self.branch.lock();
        f.debug_struct("LocalXaResource")
            .field("xid", &branch.xid)
            .field("state", &branch.state)
            .finish()
    }
}

/// Presents a plain [`DataSource`] as an [`XaDataSource`] by pairing each
/// connection with a [`LocalXaResource`].
#[derive(Debug, Clone)]
pub struct LocalXaDataSource<D> {
    inner: D,
}

impl<D: DataSource> LocalXaDataSource<D> {
    /// Wrap `inner`.
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// The wrapped data source.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: DataSource> XaDataSource for LocalXaDataSource<D> {
    fn open_connection(&self) -> Result<XaConnection, ConnectionError> {
        let connection = share(self.inner.connect()?);
        let resource = Arc::new(LocalXaResource::new(Arc::clone(&connection)));
        Ok(XaConnection {
            connection,
            resource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::{IsolationLevel, PhysicalConnection, Savepoint};

    #[derive(Default)]
    struct StubConnection {
        closed: bool,
        auto_commit: bool,
        commits: u32,
        rollbacks: u32,
        fail_commit: bool,
    }

    impl PhysicalConnection for StubConnection {
        fn is_closed(&self) -> bool {
            self.closed
        }
        fn close(&mut self) -> Result<(), ConnectionError> {
            self.closed = true;
            Ok(())
        }
        fn auto_commit(&self) -> Result<bool, ConnectionError> {
            Ok(self.auto_commit)
        }
        fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
            self.auto_commit = enabled;
            Ok(())
        }
        fn commit(&mut self) -> Result<(), ConnectionError> {
            if self.fail_commit {
                return Err(ConnectionError::database(40001, "serialization failure"));
            }
            self.commits += 1;
            Ok(())
        }
        fn rollback(&mut self) -> Result<(), ConnectionError> {
            self.rollbacks += 1;
            Ok(())
        }
        fn is_read_only(&self) -> Result<bool, ConnectionError> {
            Ok(false)
        }
        fn set_read_only(&mut self, _read_only: bool) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn transaction_isolation(&self) -> Result<Option<IsolationLevel>, ConnectionError> {
            Ok(None)
        }
        fn set_transaction_isolation(&mut self, _: IsolationLevel) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn set_savepoint(&mut self, name: Option<&str>) -> Result<Savepoint, ConnectionError> {
            Ok(Savepoint::new(1, name.map(str::to_string)))
        }
        fn rollback_to_savepoint(&mut self, _: &Savepoint) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn release_savepoint(&mut self, _: &Savepoint) -> Result<(), ConnectionError> {
            Ok(())
        }
        fn execute(&mut self, _sql: &str) -> Result<u64, ConnectionError> {
            Ok(0)
        }
    }

    fn adapter(stub: StubConnection) -> (SharedConnection, LocalXaResource) {
        let conn = share(Box::new(StubConnection {
            auto_commit: true,
            ..stub
        }));
        let resource = LocalXaResource::new(Arc::clone(&conn));
        (conn, resource)
    }

    fn auto_commit(conn: &SharedConnection) -> bool {
        conn.lock().auto_commit().unwrap()
    }

    #[test]
    fn test_one_phase_commit_toggles_autocommit() {
        let (conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        assert!(!auto_commit(&conn));
        assert_eq!(xa.state(), BranchState::Active);

        xa.end(&xid, XaFlags::SUCCESS).unwrap();
        xa.commit(&xid, true).unwrap();
        assert!(auto_commit(&conn));
        assert_eq!(xa.state(), BranchState::Idle);
        assert_eq!(xa.current_xid(), None);
    }

    #[test]
    fn test_two_phase_commit_requires_prepare() {
        let (_conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        xa.end(&xid, XaFlags::SUCCESS).unwrap();
        let err = xa.commit(&xid, false).unwrap_err();
        assert_eq!(err.code(), crate::xa::XaErrorCode::Protocol);

        assert_eq!(xa.prepare(&xid).unwrap(), Vote::Ok);
        assert_eq!(xa.state(), BranchState::Prepared);
        xa.commit(&xid, false).unwrap();
    }

    #[test]
    fn test_prepare_votes_read_only_when_closed() {
        let (conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        xa.end(&xid, XaFlags::SUCCESS).unwrap();
        conn.lock().close().unwrap();
        assert_eq!(xa.prepare(&xid).unwrap(), Vote::ReadOnly);
        assert_eq!(xa.state(), BranchState::Idle);
    }

    #[test]
    fn test_rollback_after_failure() {
        let (conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        xa.end(&xid, XaFlags::FAIL).unwrap();
        assert!(xa.prepare(&xid).is_err());
        xa.rollback(&xid).unwrap();
        assert!(auto_commit(&conn));
    }

    #[test]
    fn test_suspend_resume() {
        let (_conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        xa.end(&xid, XaFlags::SUSPEND).unwrap();
        assert_eq!(xa.state(), BranchState::Suspended);
        xa.start(&xid, XaFlags::RESUME).unwrap();
        assert_eq!(xa.state(), BranchState::Active);
    }

    #[test]
    fn test_protocol_violations() {
        let (_conn, xa) = adapter(StubConnection::default());
        let xid = Xid::generate();
        let other = Xid::generate();

        assert!(xa.end(&xid, XaFlags::SUCCESS).is_err());
        xa.start(&xid, XaFlags::NONE).unwrap();
        assert!(xa.start(&other, XaFlags::NONE).is_err());
        assert!(xa.end(&other, XaFlags::SUCCESS).is_err());
        assert!(xa.start(&xid, XaFlags::JOIN).is_err());
        assert!(xa.end(&xid, XaFlags::ONE_PHASE).is_err());
    }

    #[test]
    fn test_commit_failure_resets_branch() {
        let (_conn, xa) = adapter(StubConnection {
            fail_commit: true,
            ..StubConnection::default()
        });
        let xid = Xid::generate();

        xa.start(&xid, XaFlags::NONE).unwrap();
        xa.end(&xid, XaFlags::SUCCESS).unwrap();
        let err = xa.commit(&xid, true).unwrap_err();
        assert_eq!(err.code(), crate::xa::XaErrorCode::ResourceManagerError);
        assert_eq!(xa.state(), BranchState::Idle);
    }

    #[test]
    fn test_timeout_and_identity() {
        let (_conn, xa) = adapter(StubConnection::default());
        assert_eq!(xa.transaction_timeout().unwrap(), 0);
        assert!(xa.set_transaction_timeout(30).unwrap());
        assert_eq!(xa.transaction_timeout().unwrap(), 30);
        assert!(!xa.is_same_rm(&xa).unwrap());
        assert!(xa.recover(XaFlags::START_RECOVERY_SCAN).unwrap().is_empty());
    }
}
