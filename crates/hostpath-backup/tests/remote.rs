//! Tests for the remote store
//!

use core::time::Duration;
use std::{fs, sync::Arc};

use common::FailingDeletes;
use hostpath_backup::{
    Context, RemoteCredentials,
    remote::{RemoteError, RemoteStore},
};
use object_store::{ObjectStore, PutPayload, memory::InMemory, path::Path as ObjectPath};
use tempfile::tempdir;

mod common;

const PREFIX: &str = "davai_davai-backend_redis-data_";

/// Put five archives of one claim, oldest first, and one of another claim.
async fn populate(store: &dyn ObjectStore) -> Vec<String> {
    let mut keys = Vec::new();
    for day in 1..=5 {
        let key = format!("{PREFIX}2024010{day}-120000.tar.gz");
        store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(vec![0_u8; day]))
            .await
            .unwrap();
        keys.push(key);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    store
        .put(
            &ObjectPath::from("davai_davai-backend_uploads_20240101-120000.tar.gz"),
            PutPayload::from_static(b"uploads"),
        )
        .await
        .unwrap();

    keys
}

async fn populated_store() -> (RemoteStore, Vec<String>) {
    let memory = Arc::new(InMemory::new());
    let keys = populate(memory.as_ref()).await;

    (RemoteStore::new(memory, "backups"), keys)
}

#[tokio::test]
async fn list_is_newest_first() {
    let (store, keys) = populated_store().await;
    let context = Context::default();

    let objects = store.list_by_prefix(&context, PREFIX).await.unwrap();

    let listed: Vec<&str> = objects.iter().map(|object| object.key.as_str()).collect();
    let expected: Vec<&str> = keys.iter().rev().map(String::as_str).collect();
    assert_eq!(listed, expected);
    assert_eq!(objects[0].size, 5);
}

#[tokio::test]
async fn rotate_keeps_newest() {
    let (store, keys) = populated_store().await;
    let context = Context::default();

    let mut deleted = store.rotate(&context, PREFIX, 2).await.unwrap();
    deleted.sort();
    assert_eq!(deleted, keys[..3].to_vec());

    let remaining = store.list_by_prefix(&context, PREFIX).await.unwrap();
    let remaining: Vec<&str> = remaining.iter().map(|object| object.key.as_str()).collect();
    assert_eq!(remaining, vec![keys[4].as_str(), keys[3].as_str()]);

    // Other claims are untouched.
    let uploads = store
        .list_by_prefix(&context, "davai_davai-backend_uploads_")
        .await
        .unwrap();
    assert_eq!(uploads.len(), 1);
}

#[tokio::test]
async fn rotate_zero_keeps_everything() {
    let (store, _) = populated_store().await;
    let context = Context::default();

    assert!(store.rotate(&context, PREFIX, 0).await.unwrap().is_empty());
    assert!(store.rotate(&context, PREFIX, 5).await.unwrap().is_empty());
    assert_eq!(store.list_by_prefix(&context, PREFIX).await.unwrap().len(), 5);
}

#[tokio::test]
async fn failed_delete_stops_rotation() {
    let store = Arc::new(FailingDeletes::new(2));
    let keys = populate(store.as_ref()).await;
    let store = RemoteStore::new(store, "backups");
    let context = Context::default();

    let error = store.rotate(&context, PREFIX, 2).await.unwrap_err();

    // Deletion runs newest first past the kept copies.
    assert_eq!(error.deleted, vec![keys[2].clone()]);
    assert!(matches!(error.source, RemoteError::Store(_)));

    let remaining = store.list_by_prefix(&context, PREFIX).await.unwrap();
    let remaining: Vec<&str> = remaining.iter().map(|object| object.key.as_str()).collect();
    assert_eq!(
        remaining,
        vec![
            keys[4].as_str(),
            keys[3].as_str(),
            keys[1].as_str(),
            keys[0].as_str()
        ]
    );
}

#[tokio::test]
async fn upload_then_download() {
    let store = RemoteStore::new(Arc::new(InMemory::new()), "backups");
    let context = Context::default();
    let scratch = tempdir().unwrap();

    let source = scratch.path().join("source.tar.gz");
    let contents: Vec<u8> = (0..64 * 1024).map(|i| u8::try_from(i % 251).unwrap()).collect();
    fs::write(&source, &contents).unwrap();

    let uploaded = store
        .upload(&context, &source, "davai/archive.tar.gz")
        .await
        .unwrap();
    assert_eq!(uploaded, u64::try_from(contents.len()).unwrap());

    let destination = scratch.path().join("downloads/archive.tar.gz");
    let downloaded = store
        .download(&context, "davai/archive.tar.gz", &destination)
        .await
        .unwrap();
    assert_eq!(downloaded, uploaded);
    assert_eq!(fs::read(&destination).unwrap(), contents);

    let listed = store.list_by_prefix(&context, "davai/arch").await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn failed_upload_leaves_no_object() {
    let store = RemoteStore::new(Arc::new(InMemory::new()), "backups");
    let context = Context::default();
    let scratch = tempdir().unwrap();

    // Reading a directory fails part way through the upload.
    let error = store
        .upload(&context, scratch.path(), "davai/archive.tar.gz")
        .await
        .unwrap_err();

    assert!(matches!(error, RemoteError::Io(_, "upload archive")));
    assert!(
        store
            .list_by_prefix(&context, "davai/")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn missing_object_fails_download() {
    let store = RemoteStore::new(Arc::new(InMemory::new()), "backups");
    let context = Context::default();
    let scratch = tempdir().unwrap();

    let result = store
        .download(&context, "missing.tar.gz", &scratch.path().join("missing.tar.gz"))
        .await;
    assert!(result.is_err());
}

#[test]
fn credentials_default_to_account_endpoint() {
    let credentials = RemoteCredentials {
        account_id: "abc123".to_string(),
        access_key_id: "key".to_string(),
        secret_access_key: "secret".to_string(),
        bucket: "backups".to_string(),
        endpoint: None,
    };

    assert_eq!(
        credentials.endpoint(),
        "https://abc123.r2.cloudflarestorage.com"
    );
    credentials.validate().unwrap();
}
