use sqlbridge_db::{DbError, WireError};
use thiserror::Error;

use crate::handle::Resource;

/// Error outputs from `sqlbridge`
///
/// Every operation either succeeds or fails with exactly one of these kinds.
/// Nothing is retried or swallowed on the way up.
#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum Error {
    /// A resource was constructed from the zero token
    #[error("invalid_handle: {resource} handle cannot be 0")]
    InvalidHandle {
        /// The kind of resource that was being constructed.
        resource: Resource,
    },
    /// An operation was invoked on a resource that is already closed
    #[error("use_after_close: {resource} is closed")]
    UseAfterClose {
        /// The kind of resource that was used.
        resource: Resource,
    },
    /// `close()` was invoked on a resource that is already closed
    #[error("double_close: {resource} is already closed")]
    DoubleClose {
        /// The kind of resource that was closed twice.
        resource: Resource,
    },
    /// An application value has no counterpart in the closed value set
    #[error("unsupported_value_type: {0}")]
    UnsupportedValueType(String),
    /// A buffer from the boundary does not parse as a well-formed message
    #[error("malformed_encoding: {0}")]
    MalformedEncoding(#[from] WireError),
    /// The engine reported a failure
    #[error("engine_error {code}: {message}")]
    Engine {
        /// Engine result code.
        code: i32,
        /// Engine message, verbatim.
        message: String,
    },
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Self::Engine {
            code: err.code.0,
            message: err.message,
        }
    }
}

/// Result type for `sqlbridge` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
