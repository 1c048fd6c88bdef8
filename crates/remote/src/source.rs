use crate::error::Result;
use crate::models::{RemoteFile, RemoteMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Downloaded content, delivered chunk by chunk as it arrives.
///
/// The item type matches what `trawl-storage` accepts for uploads, so a
/// download can be handed straight to a store without buffering.
pub type ContentStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Where mirrored files come from.
///
/// A source offers exactly three things: the directory listing, a cheap
/// metadata probe per file, and the file content itself. Implementations
/// are responsible for pacing their own requests.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Location of the directory being mirrored (used for logging).
    fn base_url(&self) -> &str;

    /// Fetch and parse the directory listing.
    ///
    /// Files are returned sorted by name, with sub-directories and parent
    /// links removed.
    async fn list(&self) -> Result<Vec<RemoteFile>>;

    /// Retrieve size and change markers for `file` without its content.
    async fn probe(&self, file: &RemoteFile) -> Result<RemoteMetadata>;

    /// Start downloading `file`.
    ///
    /// Fails before returning if the server refuses the request; failures
    /// part-way through the body surface as errors on the stream.
    async fn download(&self, file: &RemoteFile) -> Result<ContentStream>;
}
