//! Catalog entries.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Free-form caller fields, used when no typed record is supplied.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Metadata record describing one stored object.
///
/// `content_hash` and `file_extension` are fixed; everything else lives in the
/// caller-defined `fields`, which must serialize to a JSON object for its
/// members to be queryable. The hash is `None` until the entry is committed.
/// Callers cannot set it directly; an entry deserialized with a hash already
/// present loses it when passed to `Transaction::put`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<M = Fields> {
    content_hash: Option<ContentHash>,
    file_extension: String,
    fields: M,
}

impl<M> Entry<M> {
    /// Create an uncommitted entry. `file_extension` is appended verbatim to the
    /// hash when forming the stored path, so include the dot (`".txt"`).
    pub fn new(file_extension: impl Into<String>, fields: M) -> Self {
        Self {
            content_hash: None,
            file_extension: file_extension.into(),
            fields,
        }
    }

    /// Rebuild a committed entry from catalog storage.
    pub(crate) fn committed(content_hash: ContentHash, file_extension: String, fields: M) -> Self {
        Self {
            content_hash: Some(content_hash),
            file_extension,
            fields,
        }
    }

    pub(crate) fn set_content_hash(&mut self, hash: ContentHash) {
        self.content_hash = Some(hash);
    }

    pub(crate) fn clear_content_hash(&mut self) {
        self.content_hash = None;
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.content_hash.is_some()
    }

    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    pub fn fields(&self) -> &M {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut M {
        &mut self.fields
    }

    pub fn into_fields(self) -> M {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct File {
        name: String,
    }

    #[test]
    fn test_new_entry_is_uncommitted() {
        let entry = Entry::new(".txt", File { name: "a".into() });
        assert!(!entry.is_committed());
        assert_eq!(entry.content_hash(), None);
        assert_eq!(entry.file_extension(), ".txt");
        assert_eq!(entry.fields().name, "a");
    }

    #[test]
    fn test_set_content_hash() {
        let mut entry = Entry::new("", Fields::new());
        let hash = ContentHash::hash_bytes(b"x");
        entry.set_content_hash(hash);
        assert_eq!(entry.content_hash(), Some(&hash));
    }

    #[test]
    fn test_serializes_hash_as_text() {
        let hash = ContentHash::hash_bytes(b"3");
        let entry = Entry::committed(hash, ".txt".to_string(), File { name: "3".into() });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "content_hash": hash.to_b32(),
                "file_extension": ".txt",
                "fields": { "name": "3" }
            })
        );
    }
}
