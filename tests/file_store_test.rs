// Integration tests for the filesystem store backend, running against real
// directories under a tempdir.

use std::path::Path;

use backup_restore::store::CentralBackupStore;
use backup_restore::{
    BackupOption, BackupRestoreError, CancelToken, FileStore, METADATA_FILE_NAME,
};
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;

async fn write_sample_tree(root: &Path) {
    fs::create_dir_all(root.join("nested/deeper")).await.unwrap();
    fs::write(root.join("state.bin"), b"top level state").await.unwrap();
    fs::write(root.join("nested/log.bin"), b"nested log").await.unwrap();
    fs::write(root.join("nested/deeper/page.bin"), b"deep page")
        .await
        .unwrap();
}

async fn assert_sample_tree(root: &Path) {
    assert_eq!(
        fs::read(root.join("state.bin")).await.unwrap(),
        b"top level state"
    );
    assert_eq!(
        fs::read(root.join("nested/log.bin")).await.unwrap(),
        b"nested log"
    );
    assert_eq!(
        fs::read(root.join("nested/deeper/page.bin")).await.unwrap(),
        b"deep page"
    );
}

#[test]
fn empty_root_is_rejected() {
    assert!(matches!(
        FileStore::new("   "),
        Err(BackupRestoreError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn upload_then_download_round_trips_the_tree() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let source = dirs.path().join("source");
    write_sample_tree(&source).await;

    let partition = Uuid::new_v4();
    let cancel = CancelToken::new();
    let info = store
        .upload_backup_folder(BackupOption::Full, partition, &source, &cancel)
        .await
        .unwrap();
    assert_eq!(info.original_service_partition_id, partition);
    assert_eq!(info.backup_option, BackupOption::Full);

    let restored = dirs.path().join("restored");
    store
        .download_backup_folder(info.backup_id, &restored, &cancel)
        .await
        .unwrap();
    assert_sample_tree(&restored).await;
    // The sidecar travels with the payload.
    assert!(restored.join(METADATA_FILE_NAME).exists());
}

#[tokio::test]
async fn download_of_unknown_backup_is_not_found() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let missing = Uuid::new_v4();

    let err = store
        .download_backup_folder(missing, &dirs.path().join("out"), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupRestoreError::BackupNotFound(id) if id == missing));
}

#[tokio::test]
async fn metadata_filters_intersect() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let source = dirs.path().join("source");
    write_sample_tree(&source).await;
    let cancel = CancelToken::new();

    let partition_a = Uuid::new_v4();
    let partition_b = Uuid::new_v4();
    let a1 = store
        .upload_backup_folder(BackupOption::Full, partition_a, &source, &cancel)
        .await
        .unwrap();
    let b1 = store
        .upload_backup_folder(BackupOption::Full, partition_b, &source, &cancel)
        .await
        .unwrap();

    let everything = store.get_backup_metadata(None, None).await.unwrap();
    assert_eq!(everything.len(), 2);

    let only_a = store
        .get_backup_metadata(None, Some(partition_a))
        .await
        .unwrap();
    assert_eq!(only_a, vec![a1.clone()]);

    let by_id = store
        .get_backup_metadata(Some(b1.backup_id), None)
        .await
        .unwrap();
    assert_eq!(by_id, vec![b1]);

    let disjoint = store
        .get_backup_metadata(Some(a1.backup_id), Some(partition_b))
        .await
        .unwrap();
    assert!(disjoint.is_empty());
}

#[tokio::test]
async fn schedule_is_last_writer_wins_and_consume_is_once() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let source = dirs.path().join("source");
    write_sample_tree(&source).await;
    let cancel = CancelToken::new();

    let partition = Uuid::new_v4();
    let b1 = store
        .upload_backup_folder(BackupOption::Full, partition, &source, &cancel)
        .await
        .unwrap();
    // Distinct folder-name second for the second upload.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let b2 = store
        .upload_backup_folder(BackupOption::Incremental, partition, &source, &cancel)
        .await
        .unwrap();

    store
        .schedule_restore(partition, b1.backup_id)
        .await
        .unwrap();
    store
        .schedule_restore(partition, b2.backup_id)
        .await
        .unwrap();

    let consumed = store.consume_scheduled_restore(partition).await.unwrap();
    assert_eq!(consumed, Some(b2));

    let again = store.consume_scheduled_restore(partition).await.unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn consume_with_nothing_scheduled_is_none() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let result = store
        .consume_scheduled_restore(Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn marker_referencing_unknown_backup_is_corruption() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let partition = Uuid::new_v4();

    store
        .schedule_restore(partition, Uuid::new_v4())
        .await
        .unwrap();
    let err = store.consume_scheduled_restore(partition).await.unwrap_err();
    assert!(matches!(err, BackupRestoreError::Corruption(_)));
}

#[tokio::test]
async fn unparsable_marker_is_corruption_and_removed() {
    let dirs = TempDir::new().unwrap();
    let root = dirs.path().join("central");
    let store = FileStore::new(&root).unwrap();
    let partition = Uuid::new_v4();

    let queue_file = root.join("Queue").join(partition.simple().to_string());
    fs::create_dir_all(queue_file.parent().unwrap()).await.unwrap();
    fs::write(&queue_file, "not a backup id").await.unwrap();

    let err = store.consume_scheduled_restore(partition).await.unwrap_err();
    assert!(matches!(err, BackupRestoreError::Corruption(_)));
    assert!(!queue_file.exists());
}

#[tokio::test]
async fn duplicate_metadata_for_one_backup_is_corruption() {
    let dirs = TempDir::new().unwrap();
    let root = dirs.path().join("central");
    let store = FileStore::new(&root).unwrap();
    let source = dirs.path().join("source");
    write_sample_tree(&source).await;
    let cancel = CancelToken::new();

    let partition = Uuid::new_v4();
    let info = store
        .upload_backup_folder(BackupOption::Full, partition, &source, &cancel)
        .await
        .unwrap();

    // A second folder carrying a sidecar with the same backup id, as a
    // botched manual copy would leave behind.
    let partition_dir = root.join(partition.simple().to_string());
    let mut entries = fs::read_dir(&partition_dir).await.unwrap();
    let original = entries.next_entry().await.unwrap().unwrap().path();
    let copied = partition_dir.join("99990101010101");
    fs::create_dir_all(&copied).await.unwrap();
    fs::copy(
        original.join(METADATA_FILE_NAME),
        copied.join(METADATA_FILE_NAME),
    )
    .await
    .unwrap();

    let err = store
        .download_backup_folder(info.backup_id, &dirs.path().join("out"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupRestoreError::Corruption(_)));

    store
        .schedule_restore(partition, info.backup_id)
        .await
        .unwrap();
    let err = store.consume_scheduled_restore(partition).await.unwrap_err();
    assert!(matches!(err, BackupRestoreError::Corruption(_)));
}

#[tokio::test]
async fn cancelled_upload_never_becomes_visible() {
    let dirs = TempDir::new().unwrap();
    let store = FileStore::new(dirs.path().join("central")).unwrap();
    let source = dirs.path().join("source");
    write_sample_tree(&source).await;

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = store
        .upload_backup_folder(BackupOption::Full, Uuid::new_v4(), &source, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupRestoreError::Cancelled));

    // No metadata was committed for the aborted payload copy.
    let listed = store.get_backup_metadata(None, None).await.unwrap();
    assert!(listed.is_empty());
}
