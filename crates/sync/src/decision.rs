use derive_more::Display;
use trawl_remote::RemoteMetadata;
use trawl_storage::MirrorRecord;

/// Why a remote file needs transferring.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum TransferReason {
    /// Nothing is mirrored under the file's key yet.
    #[display("new")]
    New,
    #[display("size changed")]
    SizeChanged,
    #[display("last-modified changed")]
    LastModifiedChanged,
    #[display("etag changed")]
    EtagChanged,
}

/// The outcome of comparing a freshly probed remote file against the mirror.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum Decision {
    #[display("skip")]
    Skip,
    #[display("transfer ({_0})")]
    Transfer(TransferReason),
}
impl Decision {
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

/// What happens to a mirrored object that is no longer listed remotely.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum StaleAction {
    #[display("keep")]
    Keep,
    #[display("delete")]
    Delete,
}

/// Decide whether a remote file must be transferred.
///
/// An existing record is current when its stored size equals the probed size
/// and each probed stamp is either absent, empty, or equal to the stored one.
/// A stamp the remote did not report is never treated as a change, so a
/// server that stops sending `ETag` does not trigger a full re-mirror. The
/// flip side is that a changed file with an unchanged size goes unnoticed if
/// the server omits both stamps.
pub fn decide(remote: &RemoteMetadata, existing: Option<&MirrorRecord>) -> Decision {
    let Some(existing) = existing else {
        return Decision::Transfer(TransferReason::New);
    };
    if existing.size != remote.size {
        return Decision::Transfer(TransferReason::SizeChanged);
    }
    if !stamp_matches(remote.last_modified.as_deref(), &existing.last_modified) {
        return Decision::Transfer(TransferReason::LastModifiedChanged);
    }
    if !stamp_matches(remote.etag.as_deref(), &existing.etag) {
        return Decision::Transfer(TransferReason::EtagChanged);
    }
    Decision::Skip
}

fn stamp_matches(probed: Option<&str>, stored: &str) -> bool {
    probed.is_none_or(|probed| probed.is_empty() || probed == stored)
}
