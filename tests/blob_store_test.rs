// Integration tests for the blob store backend against a real S3-compatible
// service (MinIO/LocalStack). Skipped unless S3_ENDPOINT_URL is set.

use std::env;

use backup_restore::store::CentralBackupStore;
use backup_restore::{BackupOption, BackupRestoreError, BlobStore, BlobStoreConfig, CancelToken};
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;

fn blob_config() -> Option<BlobStoreConfig> {
    let endpoint = env::var("S3_ENDPOINT_URL").ok()?;
    Some(BlobStoreConfig {
        bucket: env::var("S3_BUCKET_NAME").unwrap_or_else(|_| "backup-restore-test".to_string()),
        region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        endpoint_url: Some(endpoint),
        force_path_style: true,
        ..BlobStoreConfig::default()
    })
}

macro_rules! store_or_skip {
    () => {
        match blob_config() {
            Some(config) => BlobStore::new(config).await.unwrap(),
            None => {
                eprintln!("skipping: S3_ENDPOINT_URL not set");
                return;
            }
        }
    };
}

#[tokio::test]
async fn upload_then_download_round_trips_the_tree() {
    let store = store_or_skip!();
    let dirs = TempDir::new().unwrap();
    let source = dirs.path().join("source");
    fs::create_dir_all(source.join("nested")).await.unwrap();
    fs::write(source.join("state.bin"), b"blob state").await.unwrap();
    fs::write(source.join("nested/wal.bin"), b"blob wal").await.unwrap();

    let partition = Uuid::new_v4();
    let cancel = CancelToken::new();
    let info = store
        .upload_backup_folder(BackupOption::Full, partition, &source, &cancel)
        .await
        .unwrap();

    let listed = store
        .get_backup_metadata(Some(info.backup_id), None)
        .await
        .unwrap();
    assert_eq!(listed, vec![info.clone()]);

    let restored = dirs.path().join("restored");
    store
        .download_backup_folder(info.backup_id, &restored, &cancel)
        .await
        .unwrap();
    assert_eq!(fs::read(restored.join("state.bin")).await.unwrap(), b"blob state");
    assert_eq!(
        fs::read(restored.join("nested/wal.bin")).await.unwrap(),
        b"blob wal"
    );
}

#[tokio::test]
async fn schedule_and_consume_marker_lifecycle() {
    let store = store_or_skip!();
    let dirs = TempDir::new().unwrap();
    let source = dirs.path().join("source");
    fs::create_dir_all(&source).await.unwrap();
    fs::write(source.join("state.bin"), b"marker test").await.unwrap();

    let partition = Uuid::new_v4();
    let cancel = CancelToken::new();
    let info = store
        .upload_backup_folder(BackupOption::Full, partition, &source, &cancel)
        .await
        .unwrap();

    store
        .schedule_restore(partition, info.backup_id)
        .await
        .unwrap();
    let consumed = store.consume_scheduled_restore(partition).await.unwrap();
    assert_eq!(consumed, Some(info));

    let again = store.consume_scheduled_restore(partition).await.unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn marker_referencing_unknown_backup_is_corruption() {
    let store = store_or_skip!();
    let partition = Uuid::new_v4();

    store
        .schedule_restore(partition, Uuid::new_v4())
        .await
        .unwrap();
    let err = store.consume_scheduled_restore(partition).await.unwrap_err();
    assert!(matches!(err, BackupRestoreError::Corruption(_)));
}

#[tokio::test]
async fn download_of_unknown_backup_is_not_found() {
    let store = store_or_skip!();
    let dirs = TempDir::new().unwrap();
    let missing = Uuid::new_v4();

    let err = store
        .download_backup_folder(missing, &dirs.path().join("out"), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupRestoreError::BackupNotFound(id) if id == missing));
}
