//! HTTP implementation of [`RemoteSource`].
//!
//! Every request carries the configured `User-Agent`. The listing fetch and
//! each metadata probe are followed by a fixed delay so that a full run stays
//! within the remote host's acceptable request rate; downloads are not.

use crate::error::{ErrorKind, Result};
use crate::links::{extract_links, resolve_links};
use crate::models::{RemoteFile, RemoteMetadata};
use crate::source::{ContentStream, RemoteSource};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, ETAG, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, Response, Url};
use std::time::Duration;
use tracing::instrument;

/// Total time allowed for the listing fetch and each metadata probe.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum silence between two chunks of a download.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = concat!("trawl/", env!("CARGO_PKG_VERSION"));

/// Builder for [`HttpSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceBuilder {
    base_url: String,
    user_agent: String,
    delay: Duration,
}
impl HttpSourceBuilder {
    /// `User-Agent` sent with every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Pause after the listing fetch and after every probe.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> Result<HttpSource> {
        let base = Url::parse(&self.base_url).or_raise(|| ErrorKind::InvalidUrl(self.base_url.clone()))?;
        if !matches!(base.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::InvalidUrl(self.base_url));
        }
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let client = Client::builder()
            .user_agent(self.user_agent)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(HttpSource { client, base, delay: self.delay })
    }
}

/// A remote directory served over HTTP(S).
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use trawl_remote::{HttpSource, RemoteSource};
///
/// # async fn example() -> trawl_remote::error::Result<()> {
/// let source = HttpSource::builder("https://download.bls.gov/pub/time.series/pr/")
///     .user_agent("my-mirror/1.0 (ops@example.com)")
///     .delay(Duration::from_millis(500))
///     .build()?;
/// for file in source.list().await? {
///     let metadata = source.probe(&file).await?;
///     println!("{}: {} bytes", file.name, metadata.size);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base: Url,
    delay: Duration,
}

impl HttpSource {
    pub fn builder(base_url: impl Into<String>) -> HttpSourceBuilder {
        HttpSourceBuilder {
            base_url: base_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            delay: Duration::ZERO,
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Send a request, treating any non-success status as an error.
    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response> {
        let response = request.send().await.or_raise(|| ErrorKind::Request(url.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Read size and change markers from probe response headers.
///
/// A missing `Content-Length` counts as zero; a present but non-numeric one
/// is an error rather than a silent zero. Stamps that are not visible ASCII
/// are errors too, since an unreadable stamp would compare as unreported.
fn metadata_from_headers(headers: &HeaderMap) -> Result<RemoteMetadata> {
    let text = |name: HeaderName, label: &'static str| -> Result<Option<String>> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        let text = value.to_str().ok().ok_or_raise(|| ErrorKind::InvalidHeader {
            name: label,
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })?;
        Ok(Some(text.to_string()))
    };
    let size = match headers.get(CONTENT_LENGTH) {
        None => 0,
        Some(value) => value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()).ok_or_raise(|| {
            ErrorKind::InvalidHeader {
                name: "Content-Length",
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            }
        })?,
    };
    Ok(RemoteMetadata {
        size,
        last_modified: text(LAST_MODIFIED, "Last-Modified")?,
        etag: text(ETAG, "ETag")?,
    })
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn base_url(&self) -> &str {
        self.base.as_str()
    }

    #[instrument(skip(self), fields(base_url = %self.base))]
    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let response = self.send(self.client.get(self.base.clone()).timeout(REQUEST_TIMEOUT), &self.base).await?;
        let body = response.text().await.or_raise(|| ErrorKind::Request(self.base.to_string()))?;
        let files = resolve_links(&self.base, extract_links(&body));
        tracing::debug!(count = files.len(), "Parsed directory listing");
        self.pause().await;
        Ok(files)
    }

    #[instrument(skip(self, file), fields(name = %file.name))]
    async fn probe(&self, file: &RemoteFile) -> Result<RemoteMetadata> {
        let response = self.send(self.client.head(file.url.clone()).timeout(REQUEST_TIMEOUT), &file.url).await?;
        let metadata = metadata_from_headers(response.headers())?;
        self.pause().await;
        Ok(metadata)
    }

    #[instrument(skip(self, file), fields(name = %file.name))]
    async fn download(&self, file: &RemoteFile) -> Result<ContentStream> {
        let response = self.send(self.client.get(file.url.clone()), &file.url).await?;
        Ok(Box::pin(response.bytes_stream().map_err(std::io::Error::other)))
    }
}
