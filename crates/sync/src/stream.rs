use crate::decision::{Decision, StaleAction, decide};
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use trawl_remote::{RemoteFile, RemoteMetadata, SourceHandle};
use trawl_storage::error::ErrorKind as StoreErrorKind;
use trawl_storage::{ObjectStamps, StoreHandle, derive_key, listing_prefix};

/// What a run should do, beyond comparing and transferring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Key prefix in the mirror. Leading and trailing slashes are ignored.
    pub prefix: String,
    /// Delete mirrored objects that are no longer listed remotely.
    pub delete_missing: bool,
    /// Decide everything but write and delete nothing.
    pub dry_run: bool,
}

/// Totals for one run.
///
/// In a dry run `transferred` and `deleted` count what *would* have been
/// done and `bytes` stays zero.
#[derive(Debug, Clone, Copy, Default, Display, PartialEq, Eq)]
#[display(
    "{checked} checked, {skipped} unchanged, {transferred} transferred ({bytes} bytes), {deleted} deleted, {kept} kept"
)]
pub struct Summary {
    pub checked: u64,
    pub skipped: u64,
    pub transferred: u64,
    pub bytes: u64,
    pub deleted: u64,
    pub kept: u64,
}

/// Progress events emitted by [`sync`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`Discovered`](Self::Discovered), exactly once, after both listings.
/// 3. Per remote file in name order: [`Checked`](Self::Checked), followed by
///    [`Transferred`](Self::Transferred) when the file was written.
/// 4. Per stale key in key order: [`Stale`](Self::Stale), followed by
///    [`Deleted`](Self::Deleted) when the key was removed.
/// 5. [`Complete`](Self::Complete), exactly once.
///
/// An error terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    /// Both snapshots have been taken.
    Discovered { remote: u64, mirrored: u64 },
    Checked { name: String, key: String, decision: Decision },
    Transferred { name: String, key: String, bytes: u64 },
    /// A mirrored key has no remote counterpart.
    Stale { key: String, action: StaleAction },
    Deleted { key: String },
    Complete(Summary),
}

/// Streams [`SyncEvent`]s while reconciling `store` with `remote`.
///
/// Work is strictly sequential: each file is probed, compared and (if
/// needed) transferred before the next one is looked at. The first error is
/// yielded and ends the stream; anything already written stays written.
pub fn sync<'a>(
    remote: &'a SourceHandle,
    store: &'a StoreHandle,
    options: &'a SyncOptions,
) -> impl Stream<Item = Result<SyncEvent>> + Send + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(SyncEvent::Started);

        let files = match remote.list().await.or_raise(|| ErrorKind::ListRemote) {
            Ok(files) => files,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let mirrored = match store.list_objects(&listing_prefix(&options.prefix)).await.or_raise(|| ErrorKind::ListMirror) {
            Ok(mirrored) => mirrored,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield Ok(SyncEvent::Discovered {
            remote: u64::try_from(files.len()).unwrap_or(0),
            mirrored: u64::try_from(mirrored.len()).unwrap_or(0),
        });

        let mut summary = Summary::default();
        let mut seen = HashSet::with_capacity(files.len());
        for file in &files {
            let key = derive_key(&options.prefix, &file.name);
            let (metadata, decision) = match check(remote, store, file, &key, mirrored.contains_key(&key)).await {
                Ok(checked) => checked,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            summary.checked += 1;
            yield Ok(SyncEvent::Checked {
                name: file.name.clone(),
                key: key.clone(),
                decision,
            });

            match decision {
                Decision::Skip => summary.skipped += 1,
                Decision::Transfer(_) if options.dry_run => summary.transferred += 1,
                Decision::Transfer(_) => {
                    let bytes = match transfer(remote, store, file, &key, &metadata).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    };
                    summary.transferred += 1;
                    summary.bytes += bytes;
                    yield Ok(SyncEvent::Transferred {
                        name: file.name.clone(),
                        key: key.clone(),
                        bytes,
                    });
                },
            }
            seen.insert(key);
        }

        // Listings are keyed by a BTreeMap, so stale keys come out sorted.
        for key in mirrored.into_keys().filter(|key| !seen.contains(key)) {
            if !options.delete_missing {
                summary.kept += 1;
                yield Ok(SyncEvent::Stale { key, action: StaleAction::Keep });
                continue;
            }
            yield Ok(SyncEvent::Stale {
                key: key.clone(),
                action: StaleAction::Delete,
            });
            summary.deleted += 1;
            if options.dry_run {
                continue;
            }
            if let Err(e) = store.delete_object(&key).await.or_raise(|| ErrorKind::Delete(key.clone())) {
                yield Err(e);
                return;
            }
            yield Ok(SyncEvent::Deleted { key });
        }

        yield Ok(SyncEvent::Complete(summary));
    })
}

/// Probe one remote file and compare it with what the mirror holds.
///
/// The stored record is only looked up when the listing snapshot says the
/// key exists; listings carry sizes but not the stamps needed to compare.
async fn check(
    remote: &SourceHandle,
    store: &StoreHandle,
    file: &RemoteFile,
    key: &str,
    listed: bool,
) -> Result<(RemoteMetadata, Decision)> {
    tracing::debug!(name = %file.name, url = %file.url, "Checking remote file");
    let metadata = remote.probe(file).await.or_raise(|| ErrorKind::Probe(file.name.clone()))?;
    let existing = match listed {
        true => store.head_object(key).await.or_raise(|| ErrorKind::Lookup(key.to_string()))?,
        false => None,
    };
    let decision = decide(&metadata, existing.as_ref());
    Ok((metadata, decision))
}

/// Stream one remote file into the mirror, stamped with its probed metadata.
async fn transfer(
    remote: &SourceHandle,
    store: &StoreHandle,
    file: &RemoteFile,
    key: &str,
    metadata: &RemoteMetadata,
) -> Result<u64> {
    tracing::info!(name = %file.name, size = metadata.size, "Downloading");
    let content = remote.download(file).await.or_raise(|| ErrorKind::Download(file.name.clone()))?;
    let stamps = ObjectStamps {
        last_modified: metadata.last_modified.clone(),
        etag: metadata.etag.clone(),
    };
    tracing::info!(store = store.name(), key, "Uploading");
    match store.put_object(key, content, &stamps).await {
        Ok(bytes) => Ok(bytes),
        // The store reports a failing content stream as I/O: that is the
        // download breaking off, not the store refusing the write.
        Err(err) if matches!(&*err, StoreErrorKind::Io(_)) => {
            Err(err).or_raise(|| ErrorKind::Download(file.name.clone()))
        },
        Err(err) => Err(err).or_raise(|| ErrorKind::Upload(key.to_string())),
    }
}

/// Run [`sync`] to completion, logging every event, and return the totals.
pub async fn run(remote: &SourceHandle, store: &StoreHandle, options: &SyncOptions) -> Result<Summary> {
    let mut events = std::pin::pin!(sync(remote, store, options));
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event? {
            SyncEvent::Started => tracing::info!(
                source = remote.base_url(),
                store = store.name(),
                prefix = %options.prefix,
                dry_run = options.dry_run,
                "Starting sync"
            ),
            SyncEvent::Discovered { remote, mirrored } => {
                tracing::info!(remote, mirrored, "Discovered remote files and mirrored objects")
            },
            SyncEvent::Checked { name, decision: Decision::Skip, .. } => tracing::info!(%name, "No change"),
            SyncEvent::Checked { name, key, decision } => tracing::info!(%name, %key, %decision, "Change detected"),
            SyncEvent::Transferred { name, key, bytes } => tracing::info!(%name, %key, bytes, "Transferred"),
            SyncEvent::Stale { key, action } => tracing::info!(%key, %action, "Stale object"),
            SyncEvent::Deleted { key } => tracing::info!(%key, "Deleted"),
            SyncEvent::Complete(totals) => {
                tracing::info!(%totals, "Sync complete");
                summary = Some(totals);
            },
        }
    }
    summary.ok_or_raise(|| ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::TransferReason;
    use futures::TryStreamExt;
    use std::sync::Arc;
    use trawl_remote::MockSource;
    use trawl_storage::MockStore;

    struct Fixture {
        source: Arc<MockSource>,
        store: Arc<MockStore>,
        remote: SourceHandle,
        mirror: StoreHandle,
    }
    impl Fixture {
        fn new(store: MockStore) -> Self {
            let source = Arc::new(MockSource::default());
            let store = Arc::new(store);
            Self {
                remote: source.clone(),
                mirror: store.clone(),
                source,
                store,
            }
        }

        async fn events(&self, options: &SyncOptions) -> Result<Vec<SyncEvent>> {
            sync(&self.remote, &self.mirror, options).try_collect().await
        }

        async fn run(&self, options: &SyncOptions) -> Summary {
            run(&self.remote, &self.mirror, options).await.unwrap()
        }
    }

    fn options(delete_missing: bool) -> SyncOptions {
        SyncOptions {
            prefix: "pr".to_string(),
            delete_missing,
            dry_run: false,
        }
    }

    fn stamped(last_modified: Option<&str>, etag: Option<&str>) -> ObjectStamps {
        ObjectStamps::new(last_modified, etag)
    }

    #[tokio::test]
    async fn test_mirror_scenario() {
        let fixture = Fixture::new(MockStore::default());
        fixture.source.set_file("a.txt", b"0123456789", None, Some("T1")).await;
        fixture.source.set_file("b.txt", b"01234567890123456789", None, Some("T2")).await;

        // First run mirrors both files.
        let summary = fixture.run(&options(true)).await;
        assert_eq!(summary.transferred, 2);
        assert_eq!(summary.bytes, 30);
        assert_eq!(fixture.store.keys().await, ["pr/a.txt", "pr/b.txt"]);
        let record = fixture.mirror.head_object("pr/b.txt").await.unwrap().unwrap();
        assert_eq!(record.size, 20);
        assert_eq!(record.etag, "T2");
        assert_eq!(record.last_modified, "");

        // Nothing changed: nothing is written.
        let summary = fixture.run(&options(true)).await;
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.transferred, 0);
        assert_eq!(fixture.store.put_count(), 2);
        assert_eq!(fixture.source.download_count(), 2);

        // b.txt disappears remotely and is deleted from the mirror.
        fixture.source.remove_file("b.txt").await;
        let summary = fixture.run(&options(true)).await;
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fixture.store.keys().await, ["pr/a.txt"]);
        assert_eq!(fixture.store.put_count(), 2);
        assert_eq!(fixture.store.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_event_order() {
        let fixture = Fixture::new(MockStore::with_objects([
            ("pr/a.txt", b"0123456789".to_vec(), stamped(Some("M1"), Some("T1"))),
            ("pr/old.txt", b"old".to_vec(), ObjectStamps::default()),
        ]));
        fixture.source.set_file("c.txt", b"new", None, None).await;
        fixture.source.set_file("a.txt", b"0123456789", Some("M1"), Some("T1")).await;

        let events = fixture.events(&options(true)).await.unwrap();
        assert_eq!(
            events,
            [
                SyncEvent::Started,
                SyncEvent::Discovered { remote: 2, mirrored: 2 },
                SyncEvent::Checked {
                    name: "a.txt".to_string(),
                    key: "pr/a.txt".to_string(),
                    decision: Decision::Skip,
                },
                SyncEvent::Checked {
                    name: "c.txt".to_string(),
                    key: "pr/c.txt".to_string(),
                    decision: Decision::Transfer(TransferReason::New),
                },
                SyncEvent::Transferred {
                    name: "c.txt".to_string(),
                    key: "pr/c.txt".to_string(),
                    bytes: 3,
                },
                SyncEvent::Stale {
                    key: "pr/old.txt".to_string(),
                    action: StaleAction::Delete,
                },
                SyncEvent::Deleted {
                    key: "pr/old.txt".to_string(),
                },
                SyncEvent::Complete(Summary {
                    checked: 2,
                    skipped: 1,
                    transferred: 1,
                    bytes: 3,
                    deleted: 1,
                    kept: 0,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_changed_file_is_rewritten() {
        let fixture = Fixture::new(MockStore::with_objects([
            ("pr/size.txt", b"0123456789".to_vec(), stamped(Some("M1"), Some("T1"))),
            ("pr/etag.txt", b"0123456789".to_vec(), stamped(Some("M1"), Some("T1"))),
            ("pr/same.txt", b"0123456789".to_vec(), stamped(Some("M1"), Some("T1"))),
        ]));
        fixture.source.set_file("size.txt", b"01234567890", Some("M1"), Some("T1")).await;
        fixture.source.set_file("etag.txt", b"abcdefghij", Some("M1"), Some("T9")).await;
        fixture.source.set_file("same.txt", b"abcdefghij", Some("M1"), Some("T1")).await;

        let events = fixture.events(&options(false)).await.unwrap();
        let decisions: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Checked { name, decision, .. } => Some((name.as_str(), *decision)),
                _ => None,
            })
            .collect();
        assert_eq!(
            decisions,
            [
                ("etag.txt", Decision::Transfer(TransferReason::EtagChanged)),
                ("same.txt", Decision::Skip),
                ("size.txt", Decision::Transfer(TransferReason::SizeChanged)),
            ]
        );
        assert_eq!(fixture.store.content("pr/etag.txt").await.unwrap(), b"abcdefghij");
        // Same size and stamps: the mirror keeps its (different) bytes.
        assert_eq!(fixture.store.content("pr/same.txt").await.unwrap(), b"0123456789");
        let record = fixture.mirror.head_object("pr/etag.txt").await.unwrap().unwrap();
        assert_eq!(record.etag, "T9");
    }

    #[tokio::test]
    async fn test_unreported_stamp_does_not_transfer() {
        let fixture = Fixture::new(MockStore::with_objects([(
            "pr/a.txt",
            b"0123456789".to_vec(),
            stamped(Some("M1"), Some("T1")),
        )]));
        fixture.source.set_file("a.txt", b"0123456789", None, Some("T1")).await;

        let summary = fixture.run(&options(false)).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(fixture.store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_objects_kept_without_delete() {
        let fixture = Fixture::new(MockStore::with_objects([
            ("pr/gone.txt", b"x".to_vec(), ObjectStamps::default()),
            ("pr-other/keep.txt", b"x".to_vec(), ObjectStamps::default()),
        ]));

        let events = fixture.events(&options(false)).await.unwrap();
        assert!(events.contains(&SyncEvent::Stale {
            key: "pr/gone.txt".to_string(),
            action: StaleAction::Keep,
        }));
        assert_eq!(events.last(), Some(&SyncEvent::Complete(Summary { kept: 1, ..Summary::default() })));
        assert_eq!(fixture.store.delete_count(), 0);
        assert_eq!(fixture.store.keys().await, ["pr-other/keep.txt", "pr/gone.txt"]);
    }

    #[tokio::test]
    async fn test_sibling_prefix_is_not_stale() {
        let fixture = Fixture::new(
            MockStore::with_objects([
                ("pr/gone.txt", b"x".to_vec(), ObjectStamps::default()),
                ("pr-other/keep.txt", b"x".to_vec(), ObjectStamps::default()),
                ("prx", b"x".to_vec(), ObjectStamps::default()),
            ])
            .with_page_size(1),
        );

        let summary = fixture.run(&options(true)).await;
        assert_eq!(summary.deleted, 1);
        assert_eq!(fixture.store.keys().await, ["pr-other/keep.txt", "prx"]);
    }

    #[tokio::test]
    async fn test_directory_links_are_ignored() {
        let fixture = Fixture::new(MockStore::default());
        fixture.source.set_file("a.txt", b"a", None, None).await;
        fixture.source.add_link("sub/").await;
        fixture.source.add_link("../").await;

        let summary = fixture.run(&options(false)).await;
        assert_eq!(summary.checked, 1);
        assert_eq!(fixture.store.keys().await, ["pr/a.txt"]);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fixture = Fixture::new(MockStore::with_objects([(
            "pr/gone.txt",
            b"x".to_vec(),
            ObjectStamps::default(),
        )]));
        fixture.source.set_file("a.txt", b"0123456789", None, Some("T1")).await;
        let options = SyncOptions {
            dry_run: true,
            ..options(true)
        };

        let events = fixture.events(&options).await.unwrap();
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Transferred { .. } | SyncEvent::Deleted { .. })));
        assert_eq!(
            events.last(),
            Some(&SyncEvent::Complete(Summary {
                checked: 1,
                transferred: 1,
                deleted: 1,
                ..Summary::default()
            }))
        );
        assert_eq!(fixture.source.download_count(), 0);
        assert_eq!(fixture.store.put_count(), 0);
        assert_eq!(fixture.store.delete_count(), 0);
        assert_eq!(fixture.store.keys().await, ["pr/gone.txt"]);
    }

    #[tokio::test]
    async fn test_probe_failure_stops_the_run() {
        let fixture = Fixture::new(MockStore::with_objects([(
            "pr/gone.txt",
            b"x".to_vec(),
            ObjectStamps::default(),
        )]));
        fixture.source.set_file("a.txt", b"a", None, None).await;
        fixture.source.set_file("b.txt", b"b", None, None).await;
        fixture.source.set_file("c.txt", b"c", None, None).await;
        fixture.source.fail_on("b.txt").await;

        let err = run(&fixture.remote, &fixture.mirror, &options(true)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Probe(name) if name == "b.txt"));
        assert!(err.is_transport());
        // Work done before the failure stays; nothing after it happens.
        assert_eq!(fixture.store.keys().await, ["pr/a.txt", "pr/gone.txt"]);
        assert_eq!(fixture.store.delete_count(), 0);

        // The next run picks up where the last one stopped.
        fixture.source.remove_file("b.txt").await;
        let summary = fixture.run(&options(true)).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.transferred, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(fixture.store.keys().await, ["pr/a.txt", "pr/c.txt"]);
    }

    #[tokio::test]
    async fn test_upload_failure_is_a_store_error() {
        let fixture = Fixture::new(MockStore::default());
        fixture.source.set_file("a.txt", b"a", None, None).await;
        fixture.store.fail_on("pr/a.txt").await;

        let events: Vec<_> = sync(&fixture.remote, &fixture.mirror, &options(false)).collect().await;
        let err = events.last().unwrap().as_ref().unwrap_err();
        assert!(matches!(&**err, ErrorKind::Upload(key) if key == "pr/a.txt"));
        assert!(!err.is_transport());
        assert!(!events.iter().any(|e| matches!(e, Ok(SyncEvent::Complete(_)))));
    }

    #[tokio::test]
    async fn test_interrupted_download_is_a_transport_error() {
        let fixture = Fixture::new(MockStore::default());
        fixture.source.set_file("a.txt", b"abcd", None, None).await;
        fixture.source.interrupt_on("a.txt").await;

        let err = run(&fixture.remote, &fixture.mirror, &options(false)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(name) if name == "a.txt"));
        assert!(err.is_transport());
        assert!(fixture.store.keys().await.is_empty());
        assert_eq!(fixture.store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_stops_the_run() {
        let fixture = Fixture::new(MockStore::with_objects([
            ("pr/a.txt", b"x".to_vec(), ObjectStamps::default()),
            ("pr/b.txt", b"x".to_vec(), ObjectStamps::default()),
        ]));
        fixture.store.fail_on("pr/a.txt").await;

        let err = run(&fixture.remote, &fixture.mirror, &options(true)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Delete(key) if key == "pr/a.txt"));
        assert_eq!(fixture.store.keys().await, ["pr/a.txt", "pr/b.txt"]);
    }

    #[tokio::test]
    async fn test_unlisted_key_is_not_looked_up() {
        // A key that appears after the listing snapshot is treated as new.
        let fixture = Fixture::new(MockStore::default());
        fixture.source.set_file("a.txt", b"a", None, None).await;
        let events = fixture.events(&options(false)).await.unwrap();
        assert!(events.contains(&SyncEvent::Checked {
            name: "a.txt".to_string(),
            key: "pr/a.txt".to_string(),
            decision: Decision::Transfer(TransferReason::New),
        }));
    }
}
