//! Error types reported by the engine side of the boundary.

use std::fmt;

use crate::sqlite;
use crate::wire::WireError;

/// Result code attached to an engine failure.
///
/// Codes are `SQLite` primary/extended result codes; failures that do not come
/// from `SQLite` itself (stale handles, unsupported transports) reuse the
/// closest matching code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbErrorCode(pub i32);

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned by every engine operation.
///
/// The engine never interprets its own failures beyond this code/message
/// pair; callers propagate it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// Result code.
    pub code: DbErrorCode,
    /// Human-readable error message (from `SQLite` when available).
    pub message: String,
}

impl DbError {
    /// Creates a new engine error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: DbErrorCode(code),
            message: message.into(),
        }
    }

    /// A database path or URL that cannot be opened.
    pub fn cannot_open(message: impl Into<String>) -> Self {
        Self::new(sqlite::SQLITE_CANTOPEN, message)
    }

    /// A token that does not name a live resource of the expected kind.
    pub(crate) fn stale_handle(kind: &str, token: u64) -> Self {
        Self::new(
            sqlite::SQLITE_MISUSE,
            format!("stale or unknown {kind} handle {token:#x}"),
        )
    }

    /// The engine registry mutex was poisoned by a panicking thread.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::new(sqlite::SQLITE_MISUSE, format!("{what} lock poisoned"))
    }

    /// Returns `true` when the failure is a transient lock conflict.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        // Extended codes carry the primary code in the low byte.
        let primary = self.code.0 & 0xff;
        primary == sqlite::SQLITE_BUSY || primary == sqlite::SQLITE_LOCKED
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for DbError {}

impl From<WireError> for DbError {
    fn from(err: WireError) -> Self {
        Self::new(sqlite::SQLITE_MISMATCH, format!("malformed wire buffer: {err}"))
    }
}

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;
