//! mien-store — file-backed profile store.
//!
//! Loaded once at open; every mutation rewrites the full snapshot
//! (temp file + rename) before returning, so readers always observe the
//! last committed state and a failed write leaves both the file and the
//! in-memory view untouched.

use chrono::Utc;
use mien_core::{Embedding, Profile};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod schema;

use schema::{LabeledDescriptors, StoreDocument, UserRecord};

const FACES_FILE: &str = "faces.json";
const THUMBNAILS_FILE: &str = "thumbnails.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("profile '{0}' already exists")]
    DuplicateName(String),
    #[error("profile '{0}' not found")]
    NotFound(String),
    #[error("a profile requires at least one embedding")]
    NoEmbeddings,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed store file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Insertion-ordered collection of enrolled profiles plus their
/// thumbnail side document.
#[derive(Debug)]
pub struct ProfileStore {
    dir: PathBuf,
    profiles: Vec<Profile>,
    thumbnails: BTreeMap<String, String>,
    last_id: i64,
}

impl ProfileStore {
    /// Open (or initialize) a store rooted at `dir`.
    ///
    /// A corrupt snapshot fails with [`StoreError::Malformed`] and leaves
    /// the file as found — it is never silently replaced.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let doc: StoreDocument = read_json_or_default(&dir.join(FACES_FILE))?;
        let thumbnails: BTreeMap<String, String> =
            read_json_or_default(&dir.join(THUMBNAILS_FILE))?;

        let mut profiles = Vec::with_capacity(doc.users.len());
        for user in &doc.users {
            let Some(entry) = doc
                .labeled_descriptors
                .iter()
                .find(|ld| ld.label == user.name)
            else {
                tracing::warn!(name = %user.name, "user record without descriptors, skipping");
                continue;
            };
            profiles.push(Profile {
                id: user.id,
                name: user.name.clone(),
                created_at: user.date_added,
                embeddings: entry.descriptors.clone(),
            });
        }

        let last_id = profiles.iter().map(|p| p.id).max().unwrap_or(0);
        tracing::info!(dir = %dir.display(), profiles = profiles.len(), "store opened");

        Ok(Self {
            dir,
            profiles,
            thumbnails,
            last_id,
        })
    }

    /// Enrolled profiles in insertion order.
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.name == name)
    }

    /// Thumbnail data URL for a profile, if one was captured.
    pub fn thumbnail(&self, name: &str) -> Option<&str> {
        self.thumbnails.get(name).map(String::as_str)
    }

    /// Create a profile. Names are case-sensitive and unique; duplicates
    /// are rejected, never merged. Requires at least one embedding.
    pub fn create(
        &mut self,
        name: &str,
        embeddings: Vec<Embedding>,
        thumbnail: Option<String>,
    ) -> Result<&Profile, StoreError> {
        if embeddings.is_empty() {
            return Err(StoreError::NoEmbeddings);
        }
        if self.contains(name) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let now = Utc::now();
        // Millisecond ids follow the legacy schema; bump past the last
        // issued id so two creations in one millisecond stay distinct.
        let id = now.timestamp_millis().max(self.last_id + 1);

        self.profiles.push(Profile {
            id,
            name: name.to_string(),
            created_at: now,
            embeddings,
        });
        if let Some(thumb) = thumbnail {
            self.thumbnails.insert(name.to_string(), thumb);
        }

        if let Err(e) = self.persist() {
            self.profiles.pop();
            self.thumbnails.remove(name);
            return Err(e);
        }
        self.last_id = id;

        tracing::info!(name, id, "profile created");
        Ok(self
            .profiles
            .last()
            .expect("profile pushed above"))
    }

    /// Remove a profile and its thumbnail.
    pub fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        let Some(idx) = self.profiles.iter().position(|p| p.name == name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };

        let profile = self.profiles.remove(idx);
        let thumb = self.thumbnails.remove(name);

        if let Err(e) = self.persist() {
            self.profiles.insert(idx, profile);
            if let Some(t) = thumb {
                self.thumbnails.insert(name.to_string(), t);
            }
            return Err(e);
        }

        tracing::info!(name, "profile removed");
        Ok(())
    }

    /// Remove every profile and thumbnail.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let profiles = std::mem::take(&mut self.profiles);
        let thumbnails = std::mem::take(&mut self.thumbnails);

        if let Err(e) = self.persist() {
            self.profiles = profiles;
            self.thumbnails = thumbnails;
            return Err(e);
        }

        tracing::info!(removed = profiles.len(), "store cleared");
        Ok(())
    }

    /// Write the full snapshot: temp file then rename, per document.
    fn persist(&self) -> Result<(), StoreError> {
        let doc = StoreDocument {
            users: self
                .profiles
                .iter()
                .map(|p| UserRecord {
                    id: p.id,
                    name: p.name.clone(),
                    date_added: p.created_at,
                })
                .collect(),
            labeled_descriptors: self
                .profiles
                .iter()
                .map(|p| LabeledDescriptors {
                    label: p.name.clone(),
                    descriptors: p.embeddings.clone(),
                })
                .collect(),
        };

        write_json_atomic(&self.dir.join(FACES_FILE), &doc)?;
        write_json_atomic(&self.dir.join(THUMBNAILS_FILE), &self.thumbnails)?;
        Ok(())
    }
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_create_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut store = ProfileStore::open(dir.path()).unwrap();
            store
                .create("Alice", vec![emb(&[0.1, 0.2]), emb(&[0.3, 0.4])], None)
                .unwrap();
            store
                .create("Bob", vec![emb(&[0.5, 0.6])], Some("data:image/png;base64,AA==".into()))
                .unwrap();
        }

        let store = ProfileStore::open(dir.path()).unwrap();
        let profiles = store.profiles();
        assert_eq!(profiles.len(), 2);
        // insertion order survives the round trip
        assert_eq!(profiles[0].name, "Alice");
        assert_eq!(profiles[1].name, "Bob");
        assert_eq!(profiles[0].embeddings.len(), 2);
        assert_eq!(profiles[0].embeddings[1], emb(&[0.3, 0.4]));
        assert_eq!(store.thumbnail("Bob"), Some("data:image/png;base64,AA=="));
        assert_eq!(store.thumbnail("Alice"), None);
    }

    #[test]
    fn test_duplicate_name_rejected_first_profile_retained() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();

        store.create("Alice", vec![emb(&[0.1])], None).unwrap();
        let err = store.create("Alice", vec![emb(&[0.9])], None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "Alice"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.profiles()[0].embeddings[0], emb(&[0.1]));
    }

    #[test]
    fn test_duplicate_check_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();

        store.create("alice", vec![emb(&[0.1])], None).unwrap();
        store.create("Alice", vec![emb(&[0.2])], None).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_requires_an_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        let err = store.create("Alice", vec![], None).unwrap_err();
        assert!(matches!(err, StoreError::NoEmbeddings));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_unknown_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        let err = store.remove("Nobody").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_remove_drops_profile_and_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        store
            .create("Alice", vec![emb(&[0.1])], Some("data:,thumb".into()))
            .unwrap();
        store.create("Bob", vec![emb(&[0.2])], None).unwrap();

        store.remove("Alice").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.profiles()[0].name, "Bob");
        assert_eq!(store.thumbnail("Alice"), None);

        let reloaded = ProfileStore::open(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.contains("Alice"));
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        store.create("Alice", vec![emb(&[0.1])], None).unwrap();
        store.create("Bob", vec![emb(&[0.2])], None).unwrap();

        store.clear().unwrap();
        assert!(store.is_empty());

        let reloaded = ProfileStore::open(dir.path()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        store.create("a", vec![emb(&[0.1])], None).unwrap();
        store.create("b", vec![emb(&[0.2])], None).unwrap();
        store.create("c", vec![emb(&[0.3])], None).unwrap();

        let ids: Vec<i64> = store.profiles().iter().map(|p| p.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
    }

    #[test]
    fn test_opens_legacy_browser_export() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(FACES_FILE),
            r#"{
                "users": [
                    {"id": 1712345678901, "name": "Alice", "dateAdded": "2024-04-05T12:34:56.789Z"}
                ],
                "labeledDescriptors": [
                    {"label": "Alice", "descriptors": [[0.1, 0.2], [0.3, 0.4]]}
                ]
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(THUMBNAILS_FILE),
            r#"{"Alice": "data:image/png;base64,AA=="}"#,
        )
        .unwrap();

        let store = ProfileStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        let alice = &store.profiles()[0];
        assert_eq!(alice.id, 1712345678901);
        assert_eq!(alice.embeddings.len(), 2);
        assert_eq!(store.thumbnail("Alice"), Some("data:image/png;base64,AA=="));
    }

    #[test]
    fn test_corrupt_snapshot_is_surfaced_not_discarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FACES_FILE), "{not json").unwrap();

        let err = ProfileStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));

        // the broken file is left in place for inspection
        let on_disk = fs::read_to_string(dir.path().join(FACES_FILE)).unwrap();
        assert_eq!(on_disk, "{not json");
    }

    #[test]
    fn test_failed_create_rolls_back_memory_state() {
        // Removing the store directory makes the snapshot write fail.
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(dir.path()).unwrap();
        store.create("Alice", vec![emb(&[0.1])], None).unwrap();

        fs::remove_dir_all(dir.path()).unwrap();
        let err = store.create("Bob", vec![emb(&[0.2])], None);
        assert!(err.is_err());
        assert_eq!(store.len(), 1);
        assert!(!store.contains("Bob"));
    }
}
