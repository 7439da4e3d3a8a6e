//! Sled-backed storage across restarts

use serde_json::json;
use tempfile::TempDir;

use led_duel::store::{DocumentStore, Precondition, SetOptions, WriteBatch};
use led_duel::{DuelError, SledStore};

#[tokio::test]
async fn test_documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.sled");

    {
        let store = SledStore::at_path(&path).await.unwrap();
        store
            .set_document("users", "ada", json!({"points": 42}), SetOptions::default())
            .await
            .unwrap();
        store.flush().await.unwrap();
    }

    let store = SledStore::at_path(&path).await.unwrap();
    let doc = store.get_document("users", "ada").await.unwrap().unwrap();
    assert_eq!(doc.data["points"], 42);
}

#[tokio::test]
async fn test_failed_precondition_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = SledStore::at_path(dir.path().join("documents.sled")).await.unwrap();

    store
        .set_document("users", "ada", json!({"points": 1}), SetOptions::default())
        .await
        .unwrap();
    let version = store.get_document("users", "ada").await.unwrap().unwrap().version;
    store
        .set_document("users", "ada", json!({"points": 2}), SetOptions::default())
        .await
        .unwrap();

    let batch = WriteBatch::new()
        .set("users", "bob", json!({"points": 5}), Precondition::Missing)
        .set("users", "ada", json!({"points": 3}), Precondition::Version(version));
    let result = store.commit(batch).await;
    assert!(matches!(result, Err(DuelError::Conflict(_))));

    assert!(store.get_document("users", "bob").await.unwrap().is_none());
    let ada = store.get_document("users", "ada").await.unwrap().unwrap();
    assert_eq!(ada.data["points"], 2);
}
