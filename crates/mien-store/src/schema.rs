//! On-disk snapshot shape.
//!
//! `faces.json` keeps the layout the original browser demo wrote to local
//! storage (`users` + `labeledDescriptors`, camelCase keys), so existing
//! exports load unchanged. Thumbnails live in a side document keyed by
//! profile name.

use chrono::{DateTime, Utc};
use mien_core::Embedding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default, rename = "labeledDescriptors")]
    pub labeled_descriptors: Vec<LabeledDescriptors>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "dateAdded")]
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Embedding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_uses_legacy_keys() {
        let doc = StoreDocument {
            users: vec![UserRecord {
                id: 1712345678901,
                name: "Alice".into(),
                date_added: "2024-04-05T12:34:56.789Z".parse().unwrap(),
            }],
            labeled_descriptors: vec![LabeledDescriptors {
                label: "Alice".into(),
                descriptors: vec![Embedding::new(vec![0.25, 0.5])],
            }],
        };

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("labeledDescriptors").is_some());
        assert_eq!(json["users"][0]["dateAdded"], "2024-04-05T12:34:56.789Z");
        assert_eq!(json["labeledDescriptors"][0]["descriptors"][0][1], 0.5);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let doc: StoreDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.users.is_empty());
        assert!(doc.labeled_descriptors.is_empty());
    }
}
