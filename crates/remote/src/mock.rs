//! In-memory remote source for testing.

use crate::error::{ErrorKind, Result};
use crate::models::{RemoteFile, RemoteMetadata};
use crate::source::{ContentStream, RemoteSource};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

const MOCK_BASE_URL: &str = "https://mock.invalid/pub/";

#[derive(Debug, Clone)]
struct MockFile {
    data: Vec<u8>,
    last_modified: Option<String>,
    etag: Option<String>,
}

/// In-memory remote source for testing.
///
/// Files live in a `BTreeMap` behind a [`RwLock`] so a test can change the
/// "remote" between sync runs. Probe and download calls are counted.
///
/// # Examples
///
/// ```
/// use trawl_remote::{MockSource, RemoteSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockSource::default();
/// source.set_file("a.txt", b"0123456789", None, Some("T1")).await;
/// let files = source.list().await?;
/// assert_eq!(files[0].name, "a.txt");
/// assert_eq!(source.probe(&files[0]).await?.size, 10);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockSource {
    files: RwLock<BTreeMap<String, MockFile>>,
    extra_links: RwLock<Vec<String>>,
    failing: RwLock<HashSet<String>>,
    interrupted: RwLock<HashSet<String>>,
    probes: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockSource {
    /// Add or replace a file.
    pub async fn set_file(&self, name: &str, data: &[u8], last_modified: Option<&str>, etag: Option<&str>) {
        let file = MockFile {
            data: data.to_vec(),
            last_modified: last_modified.map(str::to_string),
            etag: etag.map(str::to_string),
        };
        self.files.write().await.insert(name.to_string(), file);
    }

    /// Remove a file from the listing.
    pub async fn remove_file(&self, name: &str) {
        self.files.write().await.remove(name);
    }

    /// Add a raw link to the listing, resolved like any link on a real
    /// index page (so `sub/` or `../` are dropped).
    pub async fn add_link(&self, link: impl Into<String>) {
        self.extra_links.write().await.push(link.into());
    }

    /// Make probes and downloads of `name` fail with a server error.
    pub async fn fail_on(&self, name: impl Into<String>) {
        self.failing.write().await.insert(name.into());
    }

    /// Make downloads of `name` time out after the first half of the body.
    pub async fn interrupt_on(&self, name: impl Into<String>) {
        self.interrupted.write().await.insert(name.into());
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    async fn file(&self, file: &RemoteFile) -> Result<MockFile> {
        if self.failing.read().await.contains(&file.name) {
            exn::bail!(ErrorKind::Status {
                url: file.url.to_string(),
                status: 500,
            });
        }
        match self.files.read().await.get(&file.name) {
            Some(found) => Ok(found.clone()),
            None => exn::bail!(ErrorKind::Status {
                url: file.url.to_string(),
                status: 404,
            }),
        }
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    fn base_url(&self) -> &str {
        MOCK_BASE_URL
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        // Infallible: the base URL is a valid constant.
        let base = Url::parse(MOCK_BASE_URL).map_err(|_| exn::Exn::from(ErrorKind::InvalidUrl(MOCK_BASE_URL.into())))?;
        let mut links: Vec<String> = self.files.read().await.keys().cloned().collect();
        links.extend(self.extra_links.read().await.iter().cloned());
        Ok(crate::links::resolve_links(&base, links))
    }

    async fn probe(&self, file: &RemoteFile) -> Result<RemoteMetadata> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let found = self.file(file).await?;
        Ok(RemoteMetadata {
            size: found.data.len() as u64,
            last_modified: found.last_modified,
            etag: found.etag,
        })
    }

    async fn download(&self, file: &RemoteFile) -> Result<ContentStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let found = self.file(file).await?;
        if self.interrupted.read().await.contains(&file.name) {
            let half = found.data.len() / 2;
            let half = Bytes::from(found.data).slice(..half);
            let chunks: [std::io::Result<Bytes>; 2] =
                [Ok(half), Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "body read timed out"))];
            return Ok(Box::pin(futures::stream::iter(chunks)));
        }
        let chunk: std::io::Result<Bytes> = Ok(Bytes::from(found.data));
        Ok(Box::pin(futures::stream::iter([chunk])))
    }
}
