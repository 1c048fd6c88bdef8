//! In-memory object store for testing.

use super::{ContentStream, ObjectInfoStream};
use crate::MirrorStore;
use crate::error::{ErrorKind, Result};
use crate::models::{MirrorRecord, ObjectInfo, ObjectStamps};
use async_stream::stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Default number of keys returned per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
}

/// In-memory object store for testing.
///
/// Objects are stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Listing
/// is paginated exactly like a real store (`page_size` keys at a time,
/// continuing after the last key of the previous page), and every write and
/// delete is counted so tests can assert how much work a sync performed.
///
/// # Examples
///
/// ```
/// use trawl_storage::backend::MockStore;
/// use trawl_storage::{MirrorStore, ObjectStamps};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::with_objects([
///     ("pr/a.txt", b"0123456789".to_vec(), ObjectStamps::new(None::<String>, Some("T1"))),
/// ]);
/// let record = store.head_object("pr/a.txt").await?.unwrap();
/// assert_eq!(record.size, 10);
/// assert_eq!(record.etag, "T1");
/// assert!(store.head_object("pr/missing.txt").await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct MockStore {
    name: String,
    page_size: usize,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing: RwLock<HashSet<String>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    pages: AtomicUsize,
}

impl MockStore {
    /// Create a mock store pre-populated with objects.
    ///
    /// Panics if any key is empty. If test setup is wrong, then test should
    /// not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl Into<String>, Vec<u8>, ObjectStamps)>) -> Self {
        let mut map = BTreeMap::new();
        for (key, data, stamps) in objects {
            let key = key.into();
            if key.is_empty() {
                // The panic here is DELIBERATE. MockStore is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockStore::with_objects: empty key");
            }
            map.insert(key, StoredObject { data, metadata: stamps.to_metadata() });
        }
        Self {
            name: "mock".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            objects: RwLock::new(map),
            failing: RwLock::new(HashSet::new()),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change how many keys each listing page holds (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every subsequent write or delete of `key` fail with a
    /// [`BackendError`](ErrorKind::BackendError).
    pub async fn fail_on(&self, key: impl Into<String>) {
        self.failing.write().await.insert(key.into());
    }

    /// Number of successful [`put_object()`](MirrorStore::put_object) calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful [`delete_object()`](MirrorStore::delete_object) calls.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of listing pages served.
    pub fn page_count(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Every key currently stored, in order.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Content of the object at `key`, if any.
    pub async fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).map(|object| object.data.clone())
    }

    async fn check_failing(&self, key: &str) -> Result<()> {
        if self.failing.read().await.contains(key) {
            exn::bail!(ErrorKind::BackendError(format!("injected failure for {key}")));
        }
        Ok(())
    }

    /// One page of keys under `prefix`, starting strictly after `after`.
    async fn page(&self, prefix: &str, after: Option<&str>) -> (Vec<ObjectInfo>, Option<String>) {
        let guard = self.objects.read().await;
        let start = match after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut entries: Vec<ObjectInfo> = guard
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|(key, object)| ObjectInfo::new(key.clone(), object.data.len() as u64))
            .collect();
        let next = match entries.len() > self.page_size {
            true => {
                entries.truncate(self.page_size);
                entries.last().map(|info| info.key.clone())
            },
            false => None,
        };
        self.pages.fetch_add(1, Ordering::SeqCst);
        (entries, next)
    }
}
impl Default for MockStore {
    fn default() -> Self {
        let objects: [(&str, Vec<u8>, ObjectStamps); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl MirrorStore for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: &'a str) -> ObjectInfoStream<'a> {
        Box::pin(stream! {
            let mut after: Option<String> = None;
            loop {
                // Take each page under the read lock, then drop it before
                // yielding to avoid holding the lock across yield points.
                let (entries, next) = self.page(prefix, after.as_deref()).await;
                for info in entries {
                    yield Ok(info);
                }
                match next {
                    Some(key) => after = Some(key),
                    None => break,
                }
            }
        })
    }

    async fn head_object(&self, key: &str) -> Result<Option<MirrorRecord>> {
        let guard = self.objects.read().await;
        Ok(guard
            .get(key)
            .map(|object| MirrorRecord::from_metadata(key, object.data.len() as u64, Some(&object.metadata))))
    }

    async fn put_object(&self, key: &str, content: ContentStream, stamps: &ObjectStamps) -> Result<u64> {
        if key.is_empty() {
            exn::bail!(ErrorKind::InvalidKey(key.to_string()));
        }
        self.check_failing(key).await?;
        let chunks: Vec<_> = content.try_collect().await.map_err(|err| exn::Exn::from(ErrorKind::from(err)))?;
        let data = chunks.concat();
        let size = data.len() as u64;
        self.objects.write().await.insert(key.to_string(), StoredObject { data, metadata: stamps.to_metadata() });
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(size)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.check_failing(key).await?;
        self.objects.write().await.remove(key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
