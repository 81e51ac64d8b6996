//! Two-phase-commit (X/Open XA) protocol types.
//!
//! A transaction manager drives each enlisted [`XaResource`] through
//! `start`/`end`/`prepare`/`commit` (or `rollback`) for a transaction branch
//! identified by an [`Xid`].

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::error::ConnectionError;

bitflags! {
    /// Flags accepted by [`XaResource::start`], [`XaResource::end`] and
    /// [`XaResource::recover`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct XaFlags: u32 {
        /// Caller is joining an existing transaction branch.
        const JOIN = 0x0020_0000;
        /// Caller is resuming association with a suspended branch.
        const RESUME = 0x0800_0000;
        /// Dissociate caller from the branch, work completed successfully.
        const SUCCESS = 0x0400_0000;
        /// Dissociate caller from the branch, work failed.
        const FAIL = 0x2000_0000;
        /// Suspend (not end) the association with the branch.
        const SUSPEND = 0x0200_0000;
        /// Start a recovery scan.
        const START_RECOVERY_SCAN = 0x0100_0000;
        /// End a recovery scan.
        const END_RECOVERY_SCAN = 0x0080_0000;
        /// Use the one-phase commit optimization.
        const ONE_PHASE = 0x4000_0000;
    }
}

impl XaFlags {
    /// No flags set.
    pub const NONE: Self = Self::empty();
}

/// Outcome of [`XaResource::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The branch is prepared and must be committed or rolled back.
    Ok,
    /// The branch did no work that needs committing.
    ReadOnly,
}

impl Vote {
    /// The X/Open return code for this vote.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ReadOnly => 3,
        }
    }
}

/// X/Open error codes raised by resource managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaErrorCode {
    /// A resource manager error occurred in the branch (`XAER_RMERR`).
    ResourceManagerError,
    /// The xid is not valid for this resource (`XAER_NOTA`).
    UnknownXid,
    /// Invalid arguments were given (`XAER_INVAL`).
    InvalidArguments,
    /// The routine was invoked in an improper context (`XAER_PROTO`).
    Protocol,
    /// The resource manager is unavailable (`XAER_RMFAIL`).
    ResourceManagerFailure,
}

impl XaErrorCode {
    /// Numeric X/Open error code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::ResourceManagerError => -3,
            Self::UnknownXid => -4,
            Self::InvalidArguments => -5,
            Self::Protocol => -6,
            Self::ResourceManagerFailure => -7,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::ResourceManagerError => "XAER_RMERR",
            Self::UnknownXid => "XAER_NOTA",
            Self::InvalidArguments => "XAER_INVAL",
            Self::Protocol => "XAER_PROTO",
            Self::ResourceManagerFailure => "XAER_RMFAIL",
        }
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A two-phase-commit protocol failure.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct XaError {
    code: XaErrorCode,
    message: String,
}

impl XaError {
    /// Create an error with the given code.
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `XAER_PROTO`: call made in the wrong branch state.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(XaErrorCode::Protocol, message)
    }

    /// `XAER_NOTA`: unknown xid.
    pub fn unknown_xid(xid: &Xid) -> Self {
        Self::new(XaErrorCode::UnknownXid, format!("unknown xid {xid}"))
    }

    /// `XAER_INVAL`: invalid arguments.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(XaErrorCode::InvalidArguments, message)
    }

    /// The X/Open error code.
    #[must_use]
    pub fn code(&self) -> XaErrorCode {
        self.code
    }

    /// Human-readable detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ConnectionError> for XaError {
    fn from(err: ConnectionError) -> Self {
        let code = match &err {
            ConnectionError::Closed | ConnectionError::Io(_) => XaErrorCode::ResourceManagerFailure,
            _ => XaErrorCode::ResourceManagerError,
        };
        Self::new(code, err.to_string())
    }
}

/// Transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Maximum length for the global transaction id.
    pub const MAX_GTRID_SIZE: usize = 64;
    /// Maximum length for the branch qualifier.
    pub const MAX_BQUAL_SIZE: usize = 64;

    /// Create a transaction branch identifier.
    pub fn new(
        format_id: i32,
        global_transaction_id: &[u8],
        branch_qualifier: &[u8],
    ) -> Result<Self, XaError> {
        if global_transaction_id.len() > Self::MAX_GTRID_SIZE {
            return Err(XaError::invalid(format!(
                "global transaction id is {} bytes (max {})",
                global_transaction_id.len(),
                Self::MAX_GTRID_SIZE
            )));
        }
        if branch_qualifier.len() > Self::MAX_BQUAL_SIZE {
            return Err(XaError::invalid(format!(
                "branch qualifier is {} bytes (max {})",
                branch_qualifier.len(),
                Self::MAX_BQUAL_SIZE
            )));
        }

        Ok(Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        })
    }

    /// Generate a random global transaction id with an empty branch.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self {
            format_id: 0,
            global_transaction_id: uuid.as_bytes().to_vec(),
            branch_qualifier: Vec::new(),
        }
    }

    /// A sibling branch of the same global transaction.
    pub fn branch(&self, branch_qualifier: &[u8]) -> Result<Self, XaError> {
        Self::new(self.format_id, &self.global_transaction_id, branch_qualifier)
    }

    /// Format identifier.
    #[must_use]
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Global transaction id.
    #[must_use]
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Branch qualifier.
    #[must_use]
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for byte in &self.global_transaction_id {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(":")?;
        for byte in &self.branch_qualifier {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A participant in a global transaction's two-phase-commit protocol.
///
/// Methods take `&self`: the transaction manager holds enlisted resources
/// behind an `Arc` and may drive them from its own completion thread.
pub trait XaResource: Send + Sync {
    /// Associate work with the branch `xid`.
    fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError>;

    /// End (or suspend) the association with `xid`.
    fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), XaError>;

    /// Phase one: vote on the outcome of `xid`.
    fn prepare(&self, xid: &Xid) -> Result<Vote, XaError>;

    /// Phase two: commit `xid`, optionally skipping prepare.
    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError>;

    /// Roll back `xid`.
    fn rollback(&self, xid: &Xid) -> Result<(), XaError>;

    /// Forget a heuristically completed branch.
    fn forget(&self, xid: &Xid) -> Result<(), XaError>;

    /// List prepared branches awaiting an outcome.
    fn recover(&self, flags: XaFlags) -> Result<Vec<Xid>, XaError>;

    /// Whether `other` talks to the same resource manager.
    fn is_same_rm(&self, other: &dyn XaResource) -> Result<bool, XaError>;

    /// Current transaction timeout in seconds.
    fn transaction_timeout(&self) -> Result<u32, XaError>;

    /// Set the transaction timeout in seconds; returns whether it was applied.
    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool, XaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_limits() {
        assert!(Xid::new(0, &[0u8; 64], &[0u8; 64]).is_ok());

        let err = Xid::new(0, &[0u8; 65], b"b").unwrap_err();
        assert_eq!(err.code(), XaErrorCode::InvalidArguments);

        let err = Xid::new(0, b"g", &[0u8; 65]).unwrap_err();
        assert_eq!(err.code(), XaErrorCode::InvalidArguments);
    }

    #[test]
    fn test_xid_branch_keeps_global_id() {
        let xid = Xid::generate();
        let branch = xid.branch(b"\x01").unwrap();
        assert_eq!(branch.global_transaction_id(), xid.global_transaction_id());
        assert_eq!(branch.branch_qualifier(), b"\x01");
        assert_ne!(branch, xid);
    }

    #[test]
    fn test_xid_display() {
        let xid = Xid::new(7, b"\xab\x01", b"\x02").unwrap();
        assert_eq!(xid.to_string(), "7:ab01:02");
    }

    #[test]
    fn test_error_codes() {
        let err = XaError::protocol("prepare before end");
        assert_eq!(err.code().code(), -6);
        assert_eq!(err.to_string(), "XAER_PROTO: prepare before end");

        let err = XaError::from(ConnectionError::Closed);
        assert_eq!(err.code(), XaErrorCode::ResourceManagerFailure);

        let err = XaError::from(ConnectionError::database(1, "boom"));
        assert_eq!(err.code(), XaErrorCode::ResourceManagerError);
    }

    #[test]
    fn test_vote_codes() {
        assert_eq!(Vote::Ok.code(), 0);
        assert_eq!(Vote::ReadOnly.code(), 3);
    }
}
