// ABOUTME: Integration tests for the filesystem-backed store.
// ABOUTME: Covers versioning, conditional writes, copies, listing, and key validation.

use bytes::Bytes;

use stateward::store::{
    Encryption, LocalStore, ObjectStore, PutOptions, StoreErrorKind, WriteResult,
};

const KEY: &str = "storage/123456789012/us-east-1/payments/state";

fn store() -> (tempfile::TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    (dir, store)
}

#[tokio::test]
async fn every_write_keeps_a_version() {
    let (_dir, store) = store();
    for data in ["v1", "v2", "v3"] {
        store
            .put(KEY, Bytes::from(data), PutOptions::encrypted())
            .await
            .unwrap();
    }

    let versions = store.versions(KEY).await.unwrap();
    let numbers: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
    assert!(versions[2].is_latest);
    assert!(!versions[0].is_latest);

    assert_eq!(store.get_version(KEY, "1").await.unwrap(), Bytes::from("v1"));
    assert_eq!(store.get(KEY).await.unwrap(), Bytes::from("v3"));
}

#[tokio::test]
async fn create_precondition_refuses_overwrite() {
    let (_dir, store) = store();
    let first = store
        .put(KEY, Bytes::from("first"), PutOptions::encrypted_create())
        .await
        .unwrap();
    assert!(matches!(first, WriteResult::Written(_)));

    let second = store
        .put(KEY, Bytes::from("second"), PutOptions::encrypted_create())
        .await
        .unwrap();

    assert!(matches!(second, WriteResult::PreconditionFailed));
    assert_eq!(store.get(KEY).await.unwrap(), Bytes::from("first"));
}

#[tokio::test]
async fn copy_applies_requested_encryption() {
    let (_dir, store) = store();
    store
        .put(KEY, Bytes::from("state"), PutOptions::default())
        .await
        .unwrap();

    let meta = store
        .copy(KEY, "backups/copy.state", Encryption::ServerSide)
        .await
        .unwrap();

    assert_eq!(meta.encryption, Encryption::ServerSide);
    assert_eq!(
        store.get("backups/copy.state").await.unwrap(),
        Bytes::from("state")
    );
}

#[tokio::test]
async fn copy_of_missing_source_is_not_found() {
    let (_dir, store) = store();
    let err = store
        .copy("missing/state", "dst/state", Encryption::ServerSide)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::NotFound);
}

#[tokio::test]
async fn head_of_missing_key_is_none() {
    let (_dir, store) = store();
    assert!(store.head(KEY).await.unwrap().is_none());
    assert_eq!(store.get(KEY).await.unwrap_err().kind(), StoreErrorKind::NotFound);
}

#[tokio::test]
async fn list_filters_by_prefix_and_hides_metadata() {
    let (_dir, store) = store();
    for key in [KEY, "storage/123456789012/eu-west-1/ledger/state", "kms/1/r/p/state"] {
        store
            .put(key, Bytes::from("x"), PutOptions::encrypted())
            .await
            .unwrap();
    }

    let listed = store.list("storage/").await.unwrap();
    let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "storage/123456789012/eu-west-1/ledger/state",
            "storage/123456789012/us-east-1/payments/state",
        ]
    );
}

#[tokio::test]
async fn keys_escaping_the_root_are_rejected() {
    let (_dir, store) = store();
    for key in ["../outside", "/etc/passwd", "a//b", ""] {
        let err = store
            .put(key, Bytes::from("x"), PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::InvalidKey, "key {key:?}");
    }
}
