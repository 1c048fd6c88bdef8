//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies which step of a run failed, and on which file or key.
///
/// ### Remote (transport) Errors
/// - [`ErrorKind::ListRemote`]
/// - [`ErrorKind::Probe`]
/// - [`ErrorKind::Download`]
///
/// ### Store Errors
/// - [`ErrorKind::ListMirror`]
/// - [`ErrorKind::Lookup`]
/// - [`ErrorKind::Upload`]
/// - [`ErrorKind::Delete`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote directory listing could not be fetched.
    #[display("could not list remote files")]
    ListRemote,
    /// The mirror's existing objects could not be listed.
    #[display("could not list mirrored objects")]
    ListMirror,
    /// The metadata probe for a remote file failed.
    #[display("could not probe remote file {_0}")]
    Probe(#[error(not(source))] String),
    /// The stored record for a key could not be retrieved.
    #[display("could not look up mirrored object {_0}")]
    Lookup(#[error(not(source))] String),
    /// A remote file could not be downloaded.
    #[display("could not download remote file {_0}")]
    Download(#[error(not(source))] String),
    /// A key could not be written (including a download failing mid-stream).
    #[display("could not upload {_0}")]
    Upload(#[error(not(source))] String),
    /// A stale key could not be deleted.
    #[display("could not delete stale object {_0}")]
    Delete(#[error(not(source))] String),
    /// The event stream ended without completing.
    #[display("sync ended without completing")]
    Interrupted,
}

impl ErrorKind {
    /// Returns `true` if the failure happened talking to the remote source
    /// rather than the mirror store.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ListRemote | Self::Probe(_) | Self::Download(_))
    }

    /// Returns `true` if retrying might succeed.
    ///
    /// Every failure of a run is worth another run: nothing it did needs
    /// undoing, and the next run skips whatever already made it across.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}
