//! Artifact Store
//!
//! Durable manifest of accepted artifacts.
//!
//! ```text
//! <root>/
//! ├── manifest.json          ordered array of ManifestRecord
//! └── artifacts/
//!     ├── <id>.mjs           extensions, tools, hooks
//!     └── <id>.md            skills
//! ```
//!
//! Every mutation is a full read-modify-write of the manifest under one
//! writer mutex, and every file lands through a temp sibling plus rename.
//! Upsert writes the source before the manifest; delete drops the manifest
//! entry before the source. Whatever a crash leaves behind is repaired by
//! [`ArtifactStore::reconcile`], which runs on open.

use super::types::{ArtifactDefinition, ArtifactKind, DefinitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";
const ARTIFACTS_DIR: &str = "artifacts";

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One manifest entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub definition: ArtifactDefinition,
    /// Source file, relative to the store root
    pub source_path: String,
    pub source_sha256: String,
    pub updated_at: DateTime<Utc>,
}

/// Repairs made by [`ArtifactStore::reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Manifest entries whose source file was missing
    pub dropped_entries: Vec<String>,
    /// Source files no manifest entry referenced
    pub removed_files: Vec<PathBuf>,
    /// Entries whose recorded hash was refreshed from disk
    pub rehashed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_entries.is_empty() && self.removed_files.is_empty() && self.rehashed.is_empty()
    }
}

struct LoadedManifest {
    records: Vec<ManifestRecord>,
    malformed: bool,
}

/// Manifest-backed artifact store
pub struct ArtifactStore {
    root: PathBuf,
    writer: Mutex<()>,
}

impl ArtifactStore {
    /// Open (or create) a store rooted at `root` and reconcile it
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(ARTIFACTS_DIR)).await?;

        let store = Self {
            root,
            writer: Mutex::new(()),
        };

        let report = store.reconcile().await?;
        info!(
            root = %store.root.display(),
            dropped = report.dropped_entries.len(),
            removed = report.removed_files.len(),
            "Artifact store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Insert or replace by id. Returns the absolute source location.
    pub async fn upsert(&self, definition: &ArtifactDefinition, source: &str) -> StoreResult<PathBuf> {
        definition.validate()?;

        let _guard = self.writer.lock().await;
        let LoadedManifest { mut records, malformed } = self.load().await?;

        let source_path = relative_source_path(&definition.id, definition.kind);
        let location = self.root.join(&source_path);
        write_atomic(&location, source.as_bytes()).await?;

        let record = ManifestRecord {
            definition: definition.clone(),
            source_path: source_path.clone(),
            source_sha256: sha256_hex(source.as_bytes()),
            updated_at: Utc::now(),
        };

        let replaced = match records.iter_mut().find(|r| r.definition.id == definition.id) {
            Some(existing) => Some(std::mem::replace(existing, record)),
            None => {
                records.push(record);
                None
            }
        };

        self.save(&records, malformed).await?;

        // A kind change moves the source to a new extension
        if let Some(old) = &replaced {
            if old.source_path != source_path {
                remove_if_exists(&self.root.join(&old.source_path)).await?;
            }
        }

        info!(
            id = %definition.id,
            kind = %definition.kind,
            replaced = replaced.is_some(),
            "Artifact stored"
        );
        Ok(location)
    }

    /// Definition by id
    pub async fn get(&self, id: &str) -> StoreResult<Option<ArtifactDefinition>> {
        Ok(self.record(id).await?.map(|r| r.definition))
    }

    /// Full manifest record by id
    pub async fn record(&self, id: &str) -> StoreResult<Option<ManifestRecord>> {
        let manifest = self.load().await?;
        Ok(manifest.records.into_iter().find(|r| r.definition.id == id))
    }

    /// Definitions in manifest order, optionally filtered by kind
    pub async fn list(&self, kind: Option<ArtifactKind>) -> StoreResult<Vec<ArtifactDefinition>> {
        let manifest = self.load().await?;
        Ok(manifest
            .records
            .into_iter()
            .map(|r| r.definition)
            .filter(|d| kind.map_or(true, |k| d.kind == k))
            .collect())
    }

    /// Remove by id. Returns whether an entry existed.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let _guard = self.writer.lock().await;
        let LoadedManifest { mut records, malformed } = self.load().await?;

        let Some(pos) = records.iter().position(|r| r.definition.id == id) else {
            return Ok(false);
        };
        let removed = records.remove(pos);

        self.save(&records, malformed).await?;
        remove_if_exists(&self.root.join(&removed.source_path)).await?;

        info!(id = %id, "Artifact deleted");
        Ok(true)
    }

    /// Stored source text by id
    pub async fn source(&self, id: &str) -> StoreResult<Option<String>> {
        let Some(record) = self.record(id).await? else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(self.root.join(&record.source_path)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Repair manifest/source disagreements left by an interrupted write
    pub async fn reconcile(&self) -> StoreResult<ReconcileReport> {
        let _guard = self.writer.lock().await;
        let LoadedManifest { records, malformed } = self.load().await?;
        let mut report = ReconcileReport::default();

        let mut kept = Vec::with_capacity(records.len());
        for mut record in records {
            let path = self.root.join(&record.source_path);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let digest = sha256_hex(&bytes);
                    if digest != record.source_sha256 {
                        warn!(id = %record.definition.id, "Source hash disagrees with manifest, refreshing");
                        record.source_sha256 = digest;
                        report.rehashed.push(record.definition.id.clone());
                    }
                    kept.push(record);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(id = %record.definition.id, path = %path.display(), "Dropping manifest entry without source");
                    report.dropped_entries.push(record.definition.id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let referenced: HashSet<PathBuf> = kept.iter().map(|r| self.root.join(&r.source_path)).collect();
        let mut entries = tokio::fs::read_dir(self.root.join(ARTIFACTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || referenced.contains(&path) {
                continue;
            }
            warn!(path = %path.display(), "Removing orphaned source file");
            remove_if_exists(&path).await?;
            report.removed_files.push(path);
        }

        if !report.dropped_entries.is_empty() || !report.rehashed.is_empty() || malformed {
            self.save(&kept, malformed).await?;
        }

        debug!(?report, "Reconcile finished");
        Ok(report)
    }

    async fn load(&self) -> StoreResult<LoadedManifest> {
        let path = self.manifest_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadedManifest {
                    records: Vec::new(),
                    malformed: false,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(LoadedManifest {
                records: Vec::new(),
                malformed: false,
            });
        }

        match serde_json::from_str(&content) {
            Ok(records) => Ok(LoadedManifest {
                records,
                malformed: false,
            }),
            Err(e) => {
                warn!(path = %path.display(), "Malformed manifest treated as empty: {}", e);
                Ok(LoadedManifest {
                    records: Vec::new(),
                    malformed: true,
                })
            }
        }
    }

    /// Caller holds the writer lock
    async fn save(&self, records: &[ManifestRecord], malformed: bool) -> StoreResult<()> {
        let path = self.manifest_path();
        if malformed {
            let backup = path.with_extension("json.bad");
            tokio::fs::copy(&path, &backup).await?;
            warn!(backup = %backup.display(), "Preserved malformed manifest");
        }

        let data = serde_json::to_vec_pretty(records)?;
        write_atomic(&path, &data).await?;
        Ok(())
    }
}

/// Write through a uniquely named temp sibling, then rename over `path`
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp_path, data).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn relative_source_path(id: &str, kind: ArtifactKind) -> String {
    format!("{}/{}.{}", ARTIFACTS_DIR, id, kind.file_extension())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extension(id: &str) -> ArtifactDefinition {
        ArtifactDefinition::new(id, ArtifactKind::Extension, "Ext", "An extension")
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        let location = store.upsert(&extension("alpha"), "export default () => {}").await.unwrap();

        assert_eq!(location, dir.path().join("artifacts/alpha.mjs"));
        assert_eq!(store.get("alpha").await.unwrap().unwrap().name, "Ext");
        assert_eq!(
            store.source("alpha").await.unwrap().as_deref(),
            Some("export default () => {}")
        );

        let record = store.record("alpha").await.unwrap().unwrap();
        assert_eq!(record.source_sha256, sha256_hex(b"export default () => {}"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        store.upsert(&extension("a"), "1").await.unwrap();
        store.upsert(&extension("b"), "2").await.unwrap();
        store.upsert(&extension("a"), "3").await.unwrap();

        let ids: Vec<String> = store.list(None).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(store.source("a").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_kind_change_moves_source() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        store.upsert(&extension("x"), "code").await.unwrap();
        let skill = ArtifactDefinition::new("x", ArtifactKind::Skill, "X", "Now a skill")
            .with_instructions("Do it.");
        store.upsert(&skill, "---\nname: x\n---\n").await.unwrap();

        assert!(!dir.path().join("artifacts/x.mjs").exists());
        assert!(dir.path().join("artifacts/x.md").exists());
        assert_eq!(store.list(Some(ArtifactKind::Skill)).await.unwrap().len(), 1);
        assert!(store.list(Some(ArtifactKind::Extension)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejects_unsafe_id() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        let err = store.upsert(&extension("../escape"), "x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDefinition(_)));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        store.upsert(&extension("gone"), "x").await.unwrap();
        assert!(store.delete("gone").await.unwrap());
        assert!(!store.delete("gone").await.unwrap());
        assert!(store.get("gone").await.unwrap().is_none());
        assert!(!dir.path().join("artifacts/gone.mjs").exists());
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_empty_and_preserved() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").await.unwrap();

        let store = ArtifactStore::open(dir.path()).await.unwrap();
        assert!(store.list(None).await.unwrap().is_empty());
        assert_eq!(
            tokio::fs::read_to_string(dir.path().join("manifest.json.bad")).await.unwrap(),
            "{ not json"
        );

        store.upsert(&extension("fresh"), "x").await.unwrap();
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_refreshes_hash() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        store.upsert(&extension("h"), "old").await.unwrap();

        // Source written, manifest never updated
        tokio::fs::write(dir.path().join("artifacts/h.mjs"), "new").await.unwrap();

        let report = store.reconcile().await.unwrap();
        assert_eq!(report.rehashed, ["h"]);
        let record = store.record("h").await.unwrap().unwrap();
        assert_eq!(record.source_sha256, sha256_hex(b"new"));
    }
}
