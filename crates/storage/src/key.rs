//! Object key derivation.
//!
//! Remote file names are prefix-free; object keys are always qualified by
//! the configured destination prefix. The mapping is a plain concatenation so
//! that it can be recomputed identically on every run.

/// Normalizes a destination prefix by stripping leading and trailing slashes.
///
/// # Examples
///
/// ```
/// use trawl_storage::normalize_prefix;
/// assert_eq!(normalize_prefix("/bls/pr/"), "bls/pr");
/// assert_eq!(normalize_prefix("///"), "");
/// ```
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

/// Derives the object key for a remote file name.
///
/// # Examples
///
/// ```
/// use trawl_storage::derive_key;
/// assert_eq!(derive_key("bls/pr", "pr.series"), "bls/pr/pr.series");
/// assert_eq!(derive_key("", "pr.series"), "pr.series");
/// ```
pub fn derive_key(prefix: &str, name: &str) -> String {
    match normalize_prefix(prefix) {
        "" => name.to_string(),
        prefix => format!("{prefix}/{name}"),
    }
}

/// The prefix to list when looking for objects belonging to `prefix`.
///
/// A non-empty prefix gets a trailing slash so that sibling prefixes sharing
/// the same leading characters (`bls/pr2/...` for `bls/pr`) are not included.
pub fn listing_prefix(prefix: &str) -> String {
    match normalize_prefix(prefix) {
        "" => String::new(),
        prefix => format!("{prefix}/"),
    }
}
