//! Scripted in-memory physical connections.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;
use xapool::{ConnectionError, DataSource, IsolationLevel, PhysicalConnection, Savepoint};

/// Failure script shared by a data source and every connection it opened.
#[derive(Debug, Default)]
struct Script {
    failing_sql: HashSet<String>,
    fail_connect: bool,
    fail_commit: bool,
    fail_auto_commit: bool,
    opened: Vec<ConnectionProbe>,
}

/// A data source producing [`MockConnection`]s.
///
/// Clones share the same script and the same record of opened connections.
#[derive(Debug, Clone, Default)]
pub struct MockDataSource {
    script: Arc<Mutex<Script>>,
}

impl MockDataSource {
    /// Create a data source whose connections always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `sql` fail on every connection until [`heal_sql`](Self::heal_sql).
    pub fn fail_sql(&self, sql: impl Into<String>) {
        self.script.lock().failing_sql.insert(sql.into());
    }

    /// Stop failing `sql`.
    pub fn heal_sql(&self, sql: &str) {
        self.script.lock().failing_sql.remove(sql);
    }

    /// Make new connection attempts fail.
    pub fn fail_connect(&self, fail: bool) {
        self.script.lock().fail_connect = fail;
    }

    /// Make `commit` fail on every connection.
    pub fn fail_commit(&self, fail: bool) {
        self.script.lock().fail_commit = fail;
    }

    /// Make autocommit changes fail on every connection.
    pub fn fail_auto_commit(&self, fail: bool) {
        self.script.lock().fail_auto_commit = fail;
    }

    /// Number of physical connections opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.script.lock().opened.len()
    }

    /// Probe for the `index`-th opened connection.
    #[must_use]
    pub fn probe(&self, index: usize) -> Option<ConnectionProbe> {
        self.script.lock().opened.get(index).cloned()
    }

    /// Number of opened connections that are still open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.script
            .lock()
            .opened
            .iter()
            .filter(|probe| !probe.is_closed())
            .count()
    }
}

impl DataSource for MockDataSource {
    fn connect(&self) -> Result<Box<dyn PhysicalConnection>, ConnectionError> {
        let mut script = self.script.lock();
        if script.fail_connect {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let probe = ConnectionProbe::default();
        script.opened.push(probe.clone());
        tracing::trace!(index = script.opened.len() - 1, "mock connection opened");

        Ok(Box::new(MockConnection {
            state: probe,
            script: Arc::clone(&self.script),
            next_savepoint: 0,
        }))
    }
}

#[derive(Debug)]
struct ConnectionState {
    closed: bool,
    fail_close: bool,
    close_attempts: u32,
    auto_commit: bool,
    read_only: bool,
    isolation: Option<IsolationLevel>,
    executed: Vec<String>,
    commits: u32,
    rollbacks: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            closed: false,
            fail_close: false,
            close_attempts: 0,
            auto_commit: true,
            read_only: false,
            isolation: None,
            executed: Vec::new(),
            commits: 0,
            rollbacks: 0,
        }
    }
}

/// Observer for one mock connection's session state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionProbe {
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionProbe {
    /// Whether the connection was physically closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make closing this connection fail and leave it open.
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Number of times `close` was called on the connection.
    #[must_use]
    pub fn close_attempts(&self) -> u32 {
        self.state.lock().close_attempts
    }

    /// Current autocommit mode.
    #[must_use]
    pub fn auto_commit(&self) -> bool {
        self.state.lock().auto_commit
    }

    /// Current read-only flag.
    #[must_use]
    pub fn read_only(&self) -> bool {
        self.state.lock().read_only
    }

    /// Current isolation level.
    #[must_use]
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.state.lock().isolation
    }

    /// Every statement executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Number of commits.
    #[must_use]
    pub fn commits(&self) -> u32 {
        self.state.lock().commits
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> u32 {
        self.state.lock().rollbacks
    }
}

/// An in-memory physical connection.
#[derive(Debug)]
pub struct MockConnection {
    state: ConnectionProbe,
    script: Arc<Mutex<Script>>,
    next_savepoint: u32,
}

impl MockConnection {
    fn open_state(&self) -> Result<parking_lot::MutexGuard<'_, ConnectionState>, ConnectionError> {
        let state = self.state.state.lock();
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        Ok(state)
    }
}

impl PhysicalConnection for MockConnection {
    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.state.state.lock();
        state.close_attempts += 1;
        if state.fail_close {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "close failed",
            )));
        }
        state.closed = true;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        Ok(self.open_state()?.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        if self.script.lock().fail_auto_commit {
            return Err(ConnectionError::database(3902, "autocommit change rejected"));
        }
        self.open_state()?.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        if self.script.lock().fail_commit {
            return Err(ConnectionError::database(3902, "commit failed"));
        }
        self.open_state()?.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.open_state()?.rollbacks += 1;
        Ok(())
    }

    fn is_read_only(&self) -> Result<bool, ConnectionError> {
        Ok(self.open_state()?.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectionError> {
        self.open_state()?.read_only = read_only;
        Ok(())
    }

    fn transaction_isolation(&self) -> Result<Option<IsolationLevel>, ConnectionError> {
        Ok(self.open_state()?.isolation)
    }

    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.open_state()?.isolation = Some(level);
        Ok(())
    }

    fn set_savepoint(&mut self, name: Option<&str>) -> Result<Savepoint, ConnectionError> {
        drop(self.open_state()?);
        self.next_savepoint += 1;
        Ok(Savepoint::new(self.next_savepoint, name.map(str::to_string)))
    }

    fn rollback_to_savepoint(&mut self, _savepoint: &Savepoint) -> Result<(), ConnectionError> {
        self.open_state()?.rollbacks += 1;
        Ok(())
    }

    fn release_savepoint(&mut self, _savepoint: &Savepoint) -> Result<(), ConnectionError> {
        drop(self.open_state()?);
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, ConnectionError> {
        let failing = self.script.lock().failing_sql.contains(sql);
        let mut state = self.open_state()?;
        state.executed.push(sql.to_string());
        if failing {
            return Err(ConnectionError::database(
                50000,
                format!("statement failed: {sql}"),
            ));
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_session() {
        let ds = MockDataSource::new();
        let mut conn = ds.connect().unwrap();
        let probe = ds.probe(0).unwrap();

        conn.set_auto_commit(false).unwrap();
        conn.execute("SELECT 1").unwrap();
        conn.commit().unwrap();
        assert!(!probe.auto_commit());
        assert_eq!(probe.executed(), vec!["SELECT 1".to_string()]);
        assert_eq!(probe.commits(), 1);

        conn.close().unwrap();
        assert!(probe.is_closed());
        assert!(matches!(conn.execute("SELECT 1"), Err(ConnectionError::Closed)));
    }

    #[test]
    fn test_scripted_failures() {
        let ds = MockDataSource::new();
        ds.fail_sql("SELECT 1");
        let mut conn = ds.connect().unwrap();
        assert!(conn.execute("SELECT 1").is_err());

        ds.heal_sql("SELECT 1");
        assert!(conn.execute("SELECT 1").is_ok());

        ds.fail_connect(true);
        assert!(ds.connect().is_err());
        assert_eq!(ds.opened(), 1);
    }

    #[test]
    fn test_failed_close_leaves_connection_open() {
        let ds = MockDataSource::new();
        let mut conn = ds.connect().unwrap();
        let probe = ds.probe(0).unwrap();

        probe.fail_close(true);
        assert!(conn.close().is_err());
        assert!(!probe.is_closed());
        assert_eq!(ds.open_connections(), 1);

        probe.fail_close(false);
        conn.close().unwrap();
        assert!(probe.is_closed());
        assert_eq!(probe.close_attempts(), 2);
    }
}
