//! Remote models.

use reqwest::Url;
use std::cmp::Ordering;

/// One file entry from the remote directory listing.
///
/// `name` is the last path segment of `url` and is never empty. Files order
/// by name so that runs visit them in a reproducible order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub url: Url,
}
impl RemoteFile {
    /// Build a file reference from a resolved URL.
    ///
    /// Returns `None` when the URL has no usable last path segment (a
    /// directory, the site root, or a URL that cannot be a base such as
    /// `mailto:`).
    pub fn from_url(url: Url) -> Option<Self> {
        let name = url.path_segments()?.next_back()?.to_string();
        match name.is_empty() {
            true => None,
            false => Some(Self { name, url }),
        }
    }
}
impl Ord for RemoteFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name).then_with(|| self.url.as_str().cmp(other.url.as_str()))
    }
}
impl PartialOrd for RemoteFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A point-in-time snapshot of a remote file's metadata, obtained without
/// downloading its content.
///
/// `last_modified` and `etag` are opaque strings exactly as the server sent
/// them; they are only ever compared for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://example.com/pub/pr/pr.series", Some("pr.series"))]
    #[case("https://example.com/pub/pr/pr.data.0.Current?download=1", Some("pr.data.0.Current"))]
    #[case("https://example.com/pub/pr/", None)]
    #[case("https://example.com/", None)]
    #[case("https://example.com", None)]
    #[case("mailto:someone@example.com", None)]
    fn test_from_url(#[case] url: &str, #[case] expected: Option<&str>) {
        let file = RemoteFile::from_url(Url::parse(url).unwrap());
        assert_eq!(file.as_ref().map(|f| f.name.as_str()), expected);
    }

    #[test]
    fn test_ordering_by_name() {
        let mut files: Vec<_> = ["https://a.test/z.txt", "https://b.test/a.txt", "https://a.test/m.txt"]
            .into_iter()
            .filter_map(|u| RemoteFile::from_url(Url::parse(u).unwrap()))
            .collect();
        files.sort();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "m.txt", "z.txt"]);
    }
}
