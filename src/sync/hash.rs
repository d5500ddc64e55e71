//! Content hashing for change detection.
//!
//! Rows and entities are hashed over their serialized JSON so two copies
//! can be compared without walking every field. `serde_json` maps are
//! key-sorted, which keeps the hash stable across backends.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::gateway::Row;

/// SHA256 of the JSON serialization of `value`.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    format!("{:x}", hasher.finalize())
}

/// Hash of a remote row.
#[must_use]
pub fn row_hash(row: &Row) -> String {
    content_hash(row)
}

/// Whether `current_hash` differs from a previously seen hash.
///
/// A missing previous hash counts as changed.
#[must_use]
pub fn has_changed(current_hash: &str, previous: Option<&str>) -> bool {
    previous.is_none_or(|h| h != current_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_hash_ignores_key_order() {
        let a = json!({"id": "s1", "xp": 10}).as_object().cloned().unwrap();
        let mut b = Row::new();
        b.insert("xp".into(), json!(10));
        b.insert("id".into(), json!("s1"));
        assert_eq!(row_hash(&a), row_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = content_hash(&json!({"xp": 10}));
        let b = content_hash(&json!({"xp": 11}));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_has_changed() {
        assert!(has_changed("abc", None));
        assert!(has_changed("abc", Some("def")));
        assert!(!has_changed("abc", Some("abc")));
    }
}
