//! S3-compatible object store.
//!
//! This module provides a mirror store implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Tigris (Fly.io), and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly by the caller (usually from the
//! configuration file or environment).
//!
//! # Uploads
//!
//! Content is read from the [`ContentStream`] one part at a time. Content that
//! fits in a single part is sent with a plain `PutObject`; anything larger is
//! sent as a multipart upload so that at most one part is ever held in memory.

use crate::MirrorStore;
use crate::backend::{ContentStream, ObjectInfoStream};
use crate::error::{ErrorKind, Result};
use crate::models::{MirrorRecord, ObjectInfo, ObjectStamps};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::SdkError,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::{Bytes, BytesMut};
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use std::collections::HashMap;

/// Default size of each multipart upload part.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;
/// S3 rejects non-final parts smaller than this.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Convert an SDK failure into a storage error, classifying transport
/// failures separately from service rejections.
fn sdk<T, E, R>(result: std::result::Result<T, SdkError<E, R>>, context: impl FnOnce() -> String) -> Result<T>
where
    SdkError<E, R>: std::error::Error + Send + Sync + 'static,
{
    result.or_else(|err| {
        let kind = match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => ErrorKind::Network(context()),
            _ => ErrorKind::BackendError(context()),
        };
        Err(err).or_raise(|| kind)
    })
}

/// Splits a [`ContentStream`] into parts of exactly `part_size` bytes (the
/// final part may be shorter).
struct PartReader {
    content: ContentStream,
    buffer: BytesMut,
    part_size: usize,
    exhausted: bool,
}
impl PartReader {
    fn new(content: ContentStream, part_size: usize) -> Self {
        Self {
            content,
            buffer: BytesMut::new(),
            part_size,
            exhausted: false,
        }
    }

    async fn next_part(&mut self) -> Result<Option<Bytes>> {
        while !self.exhausted && self.buffer.len() < self.part_size {
            match self.content.try_next().await.map_err(|err| exn::Exn::from(ErrorKind::from(err)))? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.part_size.min(self.buffer.len());
        Ok(Some(self.buffer.split_to(take).freeze()))
    }

    /// `true` once the content stream has ended and nothing is buffered.
    fn is_drained(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}

/// S3-compatible object store.
///
/// Keys are used verbatim; the caller decides on any prefix.
///
/// # Supported Services
///
/// - AWS S3
/// - Backblaze B2 (via S3-compatible API)
/// - Tigris (Fly.io storage)
/// - MinIO
/// - Other S3-compatible services
///
/// # Examples
///
/// ```no_run
/// use trawl_storage::backend::S3Store;
///
/// let store = S3Store::new(
///     "mirror",
///     "my-bucket",
///     "us-east-1",
///     None::<String>,
///     "access_key_id",
///     "secret_access_key",
///     None,
/// );
/// ```
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
    part_size: usize,
}

impl S3Store {
    /// Create a new S3 mirror store.
    ///
    /// # Arguments
    /// * `name` - A name for this store (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    /// * `session_token` - Session token for temporary credentials
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        let credentials = Credentials::new(key_id, key_secret, session_token, None, "trawl-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Transport-level retries only (1 initial + 3 retries); the sync
            // engine itself never retries.
            .retry_config(RetryConfig::standard().with_max_attempts(4));
        // Set custom endpoint for non-AWS services, which generally want
        // path-style addressing (Backblaze, MinIO, etc.)
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url).force_path_style(true);
        }
        Self::from_client(name, Client::from_conf(config_builder.build()), bucket)
    }

    /// Wrap an already-configured client.
    pub fn from_client(name: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Change the multipart part size (never below [`MIN_PART_SIZE`]).
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(MIN_PART_SIZE);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn put_multipart(
        &self,
        key: &str,
        metadata: HashMap<String, String>,
        first: Bytes,
        parts: &mut PartReader,
    ) -> Result<u64> {
        let created = sdk(
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .set_metadata(Some(metadata))
                .send()
                .await,
            || format!("create multipart upload {}", self.url(key)),
        )?;
        let upload_id = created
            .upload_id()
            .ok_or_raise(|| ErrorKind::BackendError(format!("no upload id returned for {}", self.url(key))))?
            .to_string();
        match self.upload_parts(key, &upload_id, first, parts).await {
            Ok(size) => Ok(size),
            Err(err) => {
                // Leave no orphaned parts behind; the original error is what
                // the caller needs to see.
                let aborted =
                    self.client.abort_multipart_upload().bucket(&self.bucket).key(key).upload_id(&upload_id).send().await;
                if let Err(abort_err) = aborted {
                    tracing::warn!(key, upload_id, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(err)
            },
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, first: Bytes, parts: &mut PartReader) -> Result<u64> {
        let mut completed = Vec::new();
        let mut written = 0u64;
        let mut part_number = 1;
        let mut next = Some(first);
        while let Some(body) = next {
            written += body.len() as u64;
            let output = sdk(
                self.client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(body))
                    .send()
                    .await,
                || format!("upload part {part_number} of {}", self.url(key)),
            )?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            tracing::debug!(key, part_number, bytes = written, "Uploaded part");
            part_number += 1;
            next = parts.next_part().await?;
        }
        sdk(
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build())
                .send()
                .await,
            || format!("complete multipart upload {}", self.url(key)),
        )?;
        Ok(written)
    }
}

#[async_trait]
impl MirrorStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: &'a str) -> ObjectInfoStream<'a> {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        Box::pin(stream!({
            let mut pages = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix).into_paginator().send();
            while let Some(page) = pages.next().await {
                let page = match sdk(page, || format!("list {}", self.url(prefix))) {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else {
                        continue;
                    };
                    let size = u64::try_from(object.size().unwrap_or(0)).unwrap_or(0);
                    yield Ok(ObjectInfo::new(key, size));
                }
            }
        }))
    }

    async fn head_object(&self, key: &str) -> Result<Option<MirrorRecord>> {
        let response = self.client.head_object().bucket(&self.bucket).key(key).send().await;
        let output = match response {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => return Ok(None),
            Err(err) => return sdk(Err(err), || format!("head {}", self.url(key))),
        };
        let size = u64::try_from(output.content_length().unwrap_or(0)).unwrap_or(0);
        Ok(Some(MirrorRecord::from_metadata(key, size, output.metadata())))
    }

    async fn put_object(&self, key: &str, content: ContentStream, stamps: &ObjectStamps) -> Result<u64> {
        if key.is_empty() {
            exn::bail!(ErrorKind::InvalidKey(key.to_string()));
        }
        let metadata = stamps.to_metadata();
        let mut parts = PartReader::new(content, self.part_size);
        let first = parts.next_part().await?.unwrap_or_default();
        if !parts.is_drained() {
            return self.put_multipart(key, metadata, first, &mut parts).await;
        }
        let written = first.len() as u64;
        sdk(
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .set_metadata(Some(metadata))
                .body(ByteStream::from(first))
                .send()
                .await,
            || format!("put {}", self.url(key)),
        )?;
        Ok(written)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        // S3 reports success for keys that do not exist.
        sdk(
            self.client.delete_object().bucket(&self.bucket).key(key).send().await,
            || format!("delete {}", self.url(key)),
        )?;
        Ok(())
    }
}
