//! Artifact Store Integration Tests
//!
//! Manifest persistence, write serialization and crash recovery.

use capability_forge::forge::{ArtifactDefinition, ArtifactKind, ArtifactStore};
use std::sync::Arc;
use tempfile::TempDir;

async fn create_test_store() -> (ArtifactStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = ArtifactStore::open(temp_dir.path())
        .await
        .expect("Failed to open store");
    (store, temp_dir)
}

fn hook(id: &str) -> ArtifactDefinition {
    ArtifactDefinition::new(id, ArtifactKind::Extension, "Hook ext", "Listens for events")
}

#[tokio::test]
async fn test_upsert_same_id_twice_keeps_one_entry() {
    let (store, _temp) = create_test_store().await;

    let first = store.upsert(&hook("same"), "export default () => {}").await.unwrap();
    let second = store.upsert(&hook("same"), "export default () => {}").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_upserts_for_new_id() {
    let (store, temp) = create_test_store().await;
    let store = Arc::new(store);

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.upsert(&hook("race"), "// a").await })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.upsert(&hook("race"), "// b").await })
    };
    tokio_test::assert_ok!(a.await.unwrap());
    tokio_test::assert_ok!(b.await.unwrap());

    let records = store.list(None).await.unwrap();
    assert_eq!(records.len(), 1);

    // Manifest and source agree with one of the writers
    let source = store.source("race").await.unwrap().unwrap();
    assert!(source == "// a" || source == "// b");
    let report = store.reconcile().await.unwrap();
    assert!(report.is_clean(), "{:?}", report);

    let manifest = std::fs::read_to_string(temp.path().join("manifest.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_many_concurrent_ids_all_persist() {
    let (store, _temp) = create_test_store().await;
    let store = Arc::new(store);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.upsert(&hook(&format!("ext-{}", i)), "// x").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.list(None).await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_reconcile_on_open_repairs_both_directions() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = ArtifactStore::open(temp_dir.path()).await.unwrap();
        store.upsert(&hook("kept"), "// kept").await.unwrap();
        store.upsert(&hook("lost"), "// lost").await.unwrap();
    }

    // Crash after manifest update, before source removal
    std::fs::remove_file(temp_dir.path().join("artifacts/lost.mjs")).unwrap();
    // Crash after source write, before manifest update
    std::fs::write(temp_dir.path().join("artifacts/stray.mjs"), "// stray").unwrap();

    let store = ArtifactStore::open(temp_dir.path()).await.unwrap();

    let ids: Vec<String> = store.list(None).await.unwrap().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, ["kept"]);
    assert!(!temp_dir.path().join("artifacts/stray.mjs").exists());
    assert!(store.reconcile().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_reconcile_report_contents() {
    let (store, temp) = create_test_store().await;
    store.upsert(&hook("one"), "// one").await.unwrap();

    std::fs::remove_file(temp.path().join("artifacts/one.mjs")).unwrap();
    std::fs::write(temp.path().join("artifacts/orphan.md"), "# orphan").unwrap();

    let report = store.reconcile().await.unwrap();

    assert_eq!(report.dropped_entries, ["one"]);
    assert_eq!(report.removed_files, [temp.path().join("artifacts/orphan.md")]);
    assert!(store.get("one").await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_manifest_file() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("manifest.json"), "").unwrap();

    let store = ArtifactStore::open(temp_dir.path()).await.unwrap();
    assert!(store.list(None).await.unwrap().is_empty());
    assert!(!temp_dir.path().join("manifest.json.bad").exists());
}
