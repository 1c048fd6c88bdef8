pub mod error;
mod http;
mod links;
#[cfg(feature = "mock")]
mod mock;
mod models;
mod source;

pub use crate::http::{HttpSource, HttpSourceBuilder};
pub use crate::links::{extract_links, resolve_links};
#[cfg(feature = "mock")]
pub use crate::mock::MockSource;
pub use crate::models::{RemoteFile, RemoteMetadata};
pub use crate::source::{ContentStream, RemoteSource};
pub use reqwest::Url;
use std::sync::Arc;

pub type SourceHandle = Arc<dyn RemoteSource + Send + Sync>;
