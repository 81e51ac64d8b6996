//! Physical connection capability and connection factories.
//!
//! The pool only needs a narrow slice of a driver's connection surface: open
//! and close, local transaction control, a handful of session settings, and a
//! way to run an arbitrary statement. Drivers expose that slice through
//! [`PhysicalConnection`] and may forward anything else untouched.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConnectionError;
use crate::xa::XaResource;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
}

impl IsolationLevel {
    /// Map a numeric isolation code (1, 2, 4, 8) to a level.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::ReadUncommitted),
            2 => Some(Self::ReadCommitted),
            4 => Some(Self::RepeatableRead),
            8 => Some(Self::Serializable),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.trim().parse::<i32>() {
            return Self::from_code(code).ok_or_else(|| format!("unknown isolation code: {code}"));
        }

        let normalized = s.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        let normalized = normalized.trim_start_matches("TRANSACTION ");
        match normalized {
            "READ UNCOMMITTED" => Ok(Self::ReadUncommitted),
            "READ COMMITTED" => Ok(Self::ReadCommitted),
            "REPEATABLE READ" => Ok(Self::RepeatableRead),
            "SERIALIZABLE" => Ok(Self::Serializable),
            _ => Err(format!("unknown isolation level: {s}")),
        }
    }
}

/// A savepoint inside a local transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    id: u32,
    name: Option<String>,
}

impl Savepoint {
    /// Create a savepoint handle.
    #[must_use]
    pub fn new(id: u32, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// Driver-assigned savepoint id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Savepoint name, if it was created with one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// One live database session.
///
/// Implementations are driven by exactly one thread at a time; the pool
/// serializes access through [`SharedConnection`].
pub trait PhysicalConnection: Send {
    /// Whether the session has been closed.
    fn is_closed(&self) -> bool;

    /// Close the session.
    fn close(&mut self) -> Result<(), ConnectionError>;

    /// Current autocommit mode.
    fn auto_commit(&self) -> Result<bool, ConnectionError>;

    /// Switch autocommit mode.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError>;

    /// Commit the local transaction.
    fn commit(&mut self) -> Result<(), ConnectionError>;

    /// Roll back the local transaction.
    fn rollback(&mut self) -> Result<(), ConnectionError>;

    /// Whether the session is in read-only mode.
    fn is_read_only(&self) -> Result<bool, ConnectionError>;

    /// Toggle read-only mode.
    fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectionError>;

    /// Current isolation level, `None` when the driver default is in effect.
    fn transaction_isolation(&self) -> Result<Option<IsolationLevel>, ConnectionError>;

    /// Set the isolation level for subsequent transactions.
    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), ConnectionError>;

    /// Create a savepoint in the current local transaction.
    fn set_savepoint(&mut self, name: Option<&str>) -> Result<Savepoint, ConnectionError>;

    /// Roll back to a savepoint.
    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), ConnectionError>;

    /// Release a savepoint.
    fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), ConnectionError>;

    /// Execute an arbitrary statement, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, ConnectionError>;
}

/// A physical connection shared between its logical wrapper and its
/// two-phase-commit resource.
pub type SharedConnection = Arc<Mutex<Box<dyn PhysicalConnection>>>;

/// Wrap a freshly opened physical connection for sharing.
#[must_use]
pub fn share(connection: Box<dyn PhysicalConnection>) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// Factory for plain (non-2PC) physical connections.
pub trait DataSource: Send + Sync {
    /// Open a new physical connection.
    fn connect(&self) -> Result<Box<dyn PhysicalConnection>, ConnectionError>;
}

impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    fn connect(&self) -> Result<Box<dyn PhysicalConnection>, ConnectionError> {
        (**self).connect()
    }
}

/// A physical connection paired with the resource that lets it take part in
/// a global transaction.
pub struct XaConnection {
    /// The physical session.
    pub connection: SharedConnection,
    /// The two-phase-commit resource driving that session.
    pub resource: Arc<dyn XaResource>,
}

impl fmt::Debug for XaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XaConnection").finish_non_exhaustive()
    }
}

/// Factory for 2PC-capable physical connections.
pub trait XaDataSource: Send + Sync {
    /// Open a new physical connection together with its 2PC resource.
    fn open_connection(&self) -> Result<XaConnection, ConnectionError>;
}

impl<T: XaDataSource + ?Sized> XaDataSource for Arc<T> {
    fn open_connection(&self) -> Result<XaConnection, ConnectionError> {
        (**self).open_connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_parse_names() {
        assert_eq!(
            "READ_COMMITTED".parse::<IsolationLevel>(),
            Ok(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            "transaction_serializable".parse::<IsolationLevel>(),
            Ok(IsolationLevel::Serializable)
        );
        assert_eq!(
            "repeatable read".parse::<IsolationLevel>(),
            Ok(IsolationLevel::RepeatableRead)
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_isolation_parse_codes() {
        assert_eq!("1".parse::<IsolationLevel>(), Ok(IsolationLevel::ReadUncommitted));
        assert_eq!("8".parse::<IsolationLevel>(), Ok(IsolationLevel::Serializable));
        assert!("3".parse::<IsolationLevel>().is_err());
    }
}
