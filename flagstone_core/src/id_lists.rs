//! Incrementally-streamed user-segment ID lists.
//!
//! Each list is a set of hashed user IDs resolved out-of-band from the spec
//! catalog. The control plane advertises lists through a manifest; list
//! contents are fetched as byte-ranged chunks of `+`/`-` prefixed lines and
//! folded into the in-memory set.
use std::collections::HashSet;

use serde_json::Value;

use crate::{Error, Result};

/// In-memory state of one segment ID list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdList {
    pub name: String,
    /// Hashed IDs currently in the segment (8 hex chars of SHA-256 each).
    pub ids: HashSet<String>,
    /// Total bytes already absorbed for `file_id`. Doubles as the resume
    /// offset for ranged fetches.
    pub read_bytes: u64,
    /// Source URL for content fetches.
    pub url: String,
    /// Generation identifier. Any observed change drops the list and restarts
    /// ingestion at offset 0.
    pub file_id: String,
    /// Manifest creation time in epoch milliseconds.
    pub creation_time: i64,
}

impl IdList {
    /// A fresh, empty list positioned at offset 0 for the given generation.
    pub fn new(name: String, url: String, file_id: String, creation_time: i64) -> IdList {
        IdList {
            name,
            url,
            file_id,
            creation_time,
            ids: HashSet::new(),
            read_bytes: 0,
        }
    }

    /// Fold one fetched chunk into the set.
    ///
    /// `advertised_length` is the `Content-Length` of the response; it is
    /// added to `read_bytes` before any line is parsed, so a malformed body
    /// never desynchronizes the resume offset from what the server already
    /// served. A missing header or a malformed line invalidates the whole
    /// list: the caller must drop it on error.
    pub fn apply_chunk(&mut self, chunk: &str, advertised_length: Option<u64>) -> Result<()> {
        let Some(advertised_length) = advertised_length else {
            return Err(Error::IdListPayload("response had no content length"));
        };
        self.read_bytes += advertised_length;

        for line in chunk.lines() {
            if line.len() <= 1 {
                return Err(Error::IdListPayload("line is too short"));
            }
            let id = &line[1..];
            match line.as_bytes()[0] {
                b'+' => {
                    self.ids.insert(id.to_owned());
                }
                b'-' => {
                    self.ids.remove(id);
                }
                _ => return Err(Error::IdListPayload("line has no +/- prefix")),
            }
        }
        Ok(())
    }
}

/// One validated entry of the `get_id_lists` manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub url: String,
    pub file_id: String,
    pub creation_time: i64,
    pub size: u64,
}

impl ManifestEntry {
    /// Validate a raw manifest value. Entries whose `url` or `fileID` is not
    /// a string are skipped (returns `None`), not treated as errors.
    pub fn from_value(value: &Value) -> Option<ManifestEntry> {
        let url = value.get("url")?.as_str()?;
        let file_id = value.get("fileID")?.as_str()?;
        Some(ManifestEntry {
            url: url.to_owned(),
            file_id: file_id.to_owned(),
            creation_time: value.get("creationTime").and_then(Value::as_i64).unwrap_or(0),
            size: value.get("size").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn list() -> IdList {
        IdList::new(
            "segment_a".to_owned(),
            "https://lists.example.com/segment_a".to_owned(),
            "file_1".to_owned(),
            100,
        )
    }

    #[test]
    fn applies_adds_and_removes() {
        let mut list = list();
        list.apply_chunk("+67f84428\n+81b637d8\n", Some(20)).unwrap();
        assert_eq!(list.read_bytes, 20);
        assert!(list.ids.contains("67f84428"));
        assert!(list.ids.contains("81b637d8"));

        list.apply_chunk("-67f84428\n", Some(10)).unwrap();
        assert_eq!(list.read_bytes, 30);
        assert!(!list.ids.contains("67f84428"));
        assert!(list.ids.contains("81b637d8"));
    }

    #[test]
    fn missing_content_length_invalidates() {
        let mut list = list();
        assert!(list.apply_chunk("+67f84428\n", None).is_err());
    }

    #[test]
    fn unprefixed_line_invalidates_but_offset_already_advanced() {
        let mut list = list();
        let result = list.apply_chunk("+67f84428\n81b637d8\n", Some(19));
        assert!(result.is_err());
        // The advertised length is absorbed before parsing.
        assert_eq!(list.read_bytes, 19);
    }

    #[test]
    fn bare_sign_line_invalidates() {
        let mut list = list();
        assert!(list.apply_chunk("+\n", Some(2)).is_err());
    }

    #[test]
    fn manifest_entry_requires_string_url_and_file_id() {
        let valid = json!({
            "url": "https://lists.example.com/a",
            "fileID": "f1",
            "creationTime": 7,
            "size": 15,
        });
        assert_eq!(
            ManifestEntry::from_value(&valid),
            Some(ManifestEntry {
                url: "https://lists.example.com/a".to_owned(),
                file_id: "f1".to_owned(),
                creation_time: 7,
                size: 15,
            })
        );

        let bad_url = json!({"url": 42, "fileID": "f1"});
        assert_eq!(ManifestEntry::from_value(&bad_url), None);
        let bad_file_id = json!({"url": "https://x", "fileID": {}});
        assert_eq!(ManifestEntry::from_value(&bad_file_id), None);
    }
}
