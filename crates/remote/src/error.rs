//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a response (connection, DNS, TLS, timeout).
    #[display("request failed: {_0}")]
    Request(#[error(not(source))] String),
    /// The remote host answered with a non-success status.
    #[display("unexpected status {status} from {url}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },
    /// A base URL or link could not be parsed.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// A response header was present but unusable.
    #[display("invalid {name} header: {value}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
    /// The HTTP client could not be constructed.
    #[display("could not build HTTP client")]
    Client,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidUrl(_) | Self::InvalidHeader { .. } | Self::Client => false,
        }
    }
}
