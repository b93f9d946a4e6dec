//! Filesystem-backed central store over a shared directory tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BackupRestoreError, Result};
use crate::metadata::{folder_timestamp, BackupMetadata, BackupOption, METADATA_FILE_NAME};
use crate::store::{CancelToken, CentralBackupStore};

const QUEUE_FOLDER: &str = "Queue";

/// [`CentralBackupStore`] that keeps backups on a shared filesystem.
///
/// Layout: `root/<partition-hex>/<yyyyMMddhhmmss>/…payload…` with the sidecar
/// metadata document inside each backup folder, and restore markers under
/// `root/Queue/<partition-hex>`. Point the root at a share that lives outside
/// the cluster nodes.
///
/// Listing walks the directory tree looking for folders that carry the
/// sidecar file. That is O(number of backups) per query, acceptable for a
/// low-frequency control-plane path.
pub struct FileStore {
    root: PathBuf,
}

/// Metadata record plus the folder it was found in, relative to the root.
struct FileBackupMetadata {
    relative_folder: PathBuf,
    info: BackupMetadata,
}

impl FileStore {
    /// Creates a store rooted at `root`, creating the directory if absent.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() || root.to_string_lossy().trim().is_empty() {
            return Err(BackupRestoreError::invalid_argument(
                "root",
                "value cannot be empty or whitespace",
            ));
        }
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn queue_file(&self, partition_id: Uuid) -> PathBuf {
        self.root
            .join(QUEUE_FOLDER)
            .join(partition_id.simple().to_string())
    }

    /// Walks the tree collecting every folder that carries a sidecar file,
    /// filtered in memory by the optional ids.
    async fn collect_metadata(
        &self,
        backup_id: Option<Uuid>,
        partition_id: Option<Uuid>,
    ) -> Result<Vec<FileBackupMetadata>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        let queue_folder = self.root.join(QUEUE_FOLDER);

        while let Some(dir) = pending.pop() {
            if dir == queue_folder {
                continue;
            }

            let sidecar = dir.join(METADATA_FILE_NAME);
            if fs::try_exists(&sidecar).await? {
                let json = fs::read_to_string(&sidecar).await?;
                let info: BackupMetadata = serde_json::from_str(&json)?;
                let matches = backup_id.is_none_or(|id| info.backup_id == id)
                    && partition_id.is_none_or(|id| info.original_service_partition_id == id);
                if matches {
                    let relative_folder = dir
                        .strip_prefix(&self.root)
                        .unwrap_or(&dir)
                        .to_path_buf();
                    found.push(FileBackupMetadata {
                        relative_folder,
                        info,
                    });
                }
                // Payload subtrees never carry their own sidecar.
                continue;
            }

            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl CentralBackupStore for FileStore {
    async fn upload_backup_folder(
        &self,
        backup_option: BackupOption,
        partition_id: Uuid,
        source_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BackupMetadata> {
        let time_stamp = Utc::now();
        let info = BackupMetadata::new(partition_id, time_stamp, backup_option);

        let mut destination = self
            .root
            .join(partition_id.simple().to_string())
            .join(folder_timestamp(&time_stamp));
        // A second upload within the same clock second gets its own folder;
        // read-time ordering breaks the timestamp tie by backup id.
        if fs::try_exists(&destination).await? {
            destination.set_file_name(format!(
                "{}-{}",
                folder_timestamp(&time_stamp),
                info.backup_id.simple()
            ));
        }

        copy_folder(source_dir, &destination, cancel).await?;

        // Metadata commit strictly after the payload copy, so a failed or
        // cancelled upload never shows up in listings.
        self.store_backup_metadata(&destination.to_string_lossy(), &info)
            .await?;

        info!(
            backup_id = %info.backup_id,
            partition_id = %partition_id,
            backup_option = ?backup_option,
            "committed backup upload"
        );
        Ok(info)
    }

    async fn store_backup_metadata(&self, destination: &str, info: &BackupMetadata) -> Result<()> {
        let file = Path::new(destination).join(METADATA_FILE_NAME);
        let json = serde_json::to_string(info)?;
        fs::write(&file, json).await?;
        Ok(())
    }

    async fn download_backup_folder(
        &self,
        backup_id: Uuid,
        destination_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut matches = self.collect_metadata(Some(backup_id), None).await?;
        let found = match matches.len() {
            0 => return Err(BackupRestoreError::BackupNotFound(backup_id)),
            1 => matches.remove(0),
            n => {
                return Err(BackupRestoreError::Corruption(format!(
                    "found {n} metadata records for backup {backup_id}"
                )))
            }
        };

        let source = self.root.join(&found.relative_folder);
        copy_folder(&source, destination_dir, cancel).await?;
        debug!(backup_id = %backup_id, destination = %destination_dir.display(), "downloaded backup folder");
        Ok(())
    }

    async fn get_backup_metadata(
        &self,
        backup_id: Option<Uuid>,
        partition_id: Option<Uuid>,
    ) -> Result<Vec<BackupMetadata>> {
        let found = self.collect_metadata(backup_id, partition_id).await?;
        Ok(found.into_iter().map(|m| m.info).collect())
    }

    async fn schedule_restore(&self, partition_id: Uuid, backup_id: Uuid) -> Result<()> {
        let queue_file = self.queue_file(partition_id);
        if let Some(parent) = queue_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&queue_file, backup_id.simple().to_string()).await?;
        info!(partition_id = %partition_id, backup_id = %backup_id, "scheduled restore");
        Ok(())
    }

    /// Read-then-delete is not crash-atomic here: a crash between the read
    /// and the delete leaves the marker intact and the next consume re-reads
    /// the same value, so consuming the same marker twice must stay safe.
    async fn consume_scheduled_restore(
        &self,
        partition_id: Uuid,
    ) -> Result<Option<BackupMetadata>> {
        let queue_file = self.queue_file(partition_id);
        let content = match fs::read_to_string(&queue_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let backup_id = match Uuid::parse_str(content.trim()) {
            Ok(id) => id,
            Err(_) => {
                fs::remove_file(&queue_file).await?;
                return Err(BackupRestoreError::Corruption(format!(
                    "restore marker for partition {} does not contain a backup id",
                    partition_id.simple()
                )));
            }
        };

        let mut matches = self.get_backup_metadata(Some(backup_id), None).await?;
        match matches.len() {
            // Marker left in place so the inconsistency can be inspected.
            0 => Err(BackupRestoreError::Corruption(format!(
                "scheduled backup {backup_id} for partition {} has no metadata record",
                partition_id.simple()
            ))),
            1 => {
                fs::remove_file(&queue_file).await?;
                info!(partition_id = %partition_id, backup_id = %backup_id, "consumed scheduled restore");
                Ok(Some(matches.remove(0)))
            }
            n => Err(BackupRestoreError::Corruption(format!(
                "found {n} metadata records for scheduled backup {backup_id}"
            ))),
        }
    }
}

/// Recursively copies `source` into `destination`, creating directories as
/// needed and honouring the cancellation token between entries.
async fn copy_folder(source: &Path, destination: &Path, cancel: &CancelToken) -> Result<()> {
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        cancel.check()?;
        fs::create_dir_all(&dst).await?;

        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                cancel.check()?;
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
