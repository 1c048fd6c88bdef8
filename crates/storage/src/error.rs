//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// An object that does not exist is deliberately absent from this list: a
/// missing object is an ordinary answer (`Ok(None)`) from
/// [`head_object()`](crate::MirrorStore::head_object) and a no-op for
/// [`delete_object()`](crate::MirrorStore::delete_object).
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Object key is empty or otherwise unusable
    #[display("invalid object key: {_0:?}")]
    InvalidKey(#[error(not(source))] String),
    /// The store could not be reached (connection, DNS, timeout)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The store received the request and rejected it
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// The content stream being uploaded failed part-way through
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}
