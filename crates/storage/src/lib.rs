pub mod backend;
pub mod error;
mod key;
mod models;

#[cfg(feature = "mock")]
pub use crate::backend::MockStore;
#[cfg(feature = "s3")]
pub use crate::backend::S3Store;
pub use crate::backend::{ContentStream, MirrorStore};
pub use crate::key::{derive_key, listing_prefix, normalize_prefix};
pub use crate::models::{ETAG_METADATA_KEY, LAST_MODIFIED_METADATA_KEY, MirrorRecord, ObjectInfo, ObjectStamps};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn MirrorStore + Send + Sync>;
