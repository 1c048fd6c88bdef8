//! Storage models.
//!
//! These types describe objects already present in the mirror (for listing
//! and change comparison) and the metadata attached when writing one.

use std::collections::HashMap;

/// User-metadata key holding the remote `Last-Modified` value at write time.
pub const LAST_MODIFIED_METADATA_KEY: &str = "trawl-last-modified";
/// User-metadata key holding the remote `ETag` value at write time.
pub const ETAG_METADATA_KEY: &str = "trawl-etag";

/// One entry of a store listing.
///
/// Listings never carry user metadata, only what the store itself accounts
/// for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key (including any prefix)
    pub key: String,
    /// Stored size in bytes
    pub size: u64,
}
impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self { key: key.into(), size }
    }
}

/// The durable record of a mirrored object, as returned by a metadata lookup.
///
/// `size` is the store's own byte count, independent of user metadata. The
/// two stamps are whatever was attached when the object was written; objects
/// written by something other than this tool read back as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
    pub etag: String,
}
impl MirrorRecord {
    /// Build a record from a store's content length and user metadata map.
    pub fn from_metadata(key: impl Into<String>, size: u64, metadata: Option<&HashMap<String, String>>) -> Self {
        let lookup = |name: &str| metadata.and_then(|m| m.get(name)).cloned().unwrap_or_default();
        Self {
            key: key.into(),
            size,
            last_modified: lookup(LAST_MODIFIED_METADATA_KEY),
            etag: lookup(ETAG_METADATA_KEY),
        }
    }
}

/// Remote change markers attached to an object when it is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStamps {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}
impl ObjectStamps {
    pub fn new(last_modified: Option<impl Into<String>>, etag: Option<impl Into<String>>) -> Self {
        Self {
            last_modified: last_modified.map(Into::into),
            etag: etag.map(Into::into),
        }
    }

    /// User metadata to attach to the object.
    ///
    /// Absent values are written as empty strings so that both keys are
    /// always present when the object is read back.
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (LAST_MODIFIED_METADATA_KEY.to_string(), self.last_modified.clone().unwrap_or_default()),
            (ETAG_METADATA_KEY.to_string(), self.etag.clone().unwrap_or_default()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_stamps_written_as_empty_strings() {
        let metadata = ObjectStamps::default().to_metadata();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[LAST_MODIFIED_METADATA_KEY], "");
        assert_eq!(metadata[ETAG_METADATA_KEY], "");
    }

    #[test]
    fn test_record_from_metadata() {
        let stamps = ObjectStamps::new(Some("Tue, 01 Oct 2024 10:00:00 GMT"), Some("\"abc\""));
        let record = MirrorRecord::from_metadata("pr/a.txt", 10, Some(&stamps.to_metadata()));
        assert_eq!(record.key, "pr/a.txt");
        assert_eq!(record.size, 10);
        assert_eq!(record.last_modified, "Tue, 01 Oct 2024 10:00:00 GMT");
        assert_eq!(record.etag, "\"abc\"");
    }

    #[test]
    fn test_record_without_metadata() {
        let record = MirrorRecord::from_metadata("pr/a.txt", 3, None);
        assert_eq!(record.last_modified, "");
        assert_eq!(record.etag, "");
    }
}
