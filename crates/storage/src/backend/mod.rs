//! Mirror store trait and implementations.
//!
//! This module defines the `MirrorStore` trait, the four operations the sync
//! engine needs from an object store: list, look up, write and delete. It's a
//! glorified CRUD interface, but in ✨Rust✨

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "mock")]
pub use self::mock::MockStore;
#[cfg(feature = "s3")]
pub use self::s3::S3Store;
use crate::error::Result;
use crate::models::{MirrorRecord, ObjectInfo, ObjectStamps};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, TryStreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;

pub(crate) type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;

/// Object content, delivered chunk by chunk.
///
/// Errors are plain [`std::io::Error`]s so that any producer (an HTTP body,
/// a file, an in-memory buffer) can feed a store without depending on this
/// crate's error type.
pub type ContentStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Unified interface for mirror object stores.
///
/// Keys are full object keys, already qualified by whatever prefix the caller
/// mirrors into (see [`derive_key`](crate::derive_key)). Implementations do not
/// cache anything between calls: every call reflects the store as it is now.
///
/// # Examples
///
/// ```
/// use trawl_storage::{MirrorStore, derive_key, error::Result};
///
/// async fn stored_size(store: &dyn MirrorStore, name: &str) -> Result<u64> {
///     let key = derive_key("bls/pr", name);
///     Ok(store.head_object(&key).await?.map(|record| record.size).unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Name of the configured store (used for logging only).
    fn name(&self) -> &str;

    /// Collect every object under `prefix` into a map keyed by object key.
    ///
    /// Default implementation drains [`list_stream()`](Self::list_stream).
    /// A key reported twice (which a correct paginator never does) keeps the
    /// last entry seen.
    async fn list_objects(&self, prefix: &str) -> Result<BTreeMap<String, ObjectInfo>> {
        self.list_stream(prefix).map_ok(|info| (info.key.clone(), info)).try_collect().await
    }

    /// Stream every object whose key starts with `prefix`.
    ///
    /// Entries are yielded page by page as the store returns them; the stream
    /// ends after the last page.
    fn list_stream<'a>(&'a self, prefix: &'a str) -> ObjectInfoStream<'a>;

    /// Get the stored record for `key` without reading its content.
    ///
    /// Returns `Ok(None)` when the object does not exist; every other failure
    /// is an error.
    async fn head_object(&self, key: &str) -> Result<Option<MirrorRecord>>;

    /// Write `content` to `key`, attaching `stamps` as user metadata.
    ///
    /// Overwrites any existing object. Returns the number of bytes written.
    ///
    /// # Notes
    /// - Implementations must not require the whole content in memory at once.
    async fn put_object(&self, key: &str, content: ContentStream, stamps: &ObjectStamps) -> Result<u64>;

    /// Delete the object at `key`.
    ///
    /// Deleting a key that does not exist is not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;
}
