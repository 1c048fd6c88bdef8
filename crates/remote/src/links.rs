//! Directory listing parsing.
//!
//! Only anchor targets matter: the listing page is treated as a bag of
//! `<a href>` values, nothing else in the document is interpreted.

use crate::models::RemoteFile;
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Returns every anchor `href` in document order.
///
/// # Examples
///
/// ```
/// use trawl_remote::extract_links;
/// let html = r#"<pre><a href="../">Parent</a> <A HREF="pr.series">pr.series</A></pre>"#;
/// assert_eq!(extract_links(html), ["../", "pr.series"]);
/// ```
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Turns raw link targets into the files of a flat directory.
///
/// - Targets ending in `/` are sub-directories or parent links and are
///   dropped; there is no recursive descent.
/// - Absolute targets are kept, relative ones are resolved against `base`.
/// - Anything that is not `http`/`https`, or whose last path segment is
///   empty, is dropped.
/// - The first occurrence of a name wins.
///
/// The result is sorted by name.
pub fn resolve_links(base: &Url, links: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<RemoteFile> {
    let mut files: BTreeMap<String, RemoteFile> = BTreeMap::new();
    for link in links {
        let link = link.as_ref();
        if link.ends_with('/') {
            continue;
        }
        let Ok(mut url) = base.join(link) else {
            tracing::debug!(link, "Skipping unparseable link");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);
        if let Some(file) = RemoteFile::from_url(url) {
            files.entry(file.name.clone()).or_insert(file);
        }
    }
    files.into_values().collect()
}
