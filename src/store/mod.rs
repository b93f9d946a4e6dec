//! The central backup store contract and its reference backends.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{BackupRestoreError, Result};
use crate::metadata::{BackupMetadata, BackupOption};

pub mod blob;
pub mod file;
mod retry;

pub use blob::{BlobStore, BlobStoreConfig};
pub use file::FileStore;
pub use retry::RetryPolicy;

/// Cooperative cancellation signal for long-running folder transfers.
///
/// Cloned tokens share one flag. Backends check the token between file and
/// subtree operations; a cancelled transfer may leave a partial destination,
/// which stays invisible because metadata commits strictly after the payload
/// copy completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BackupRestoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Central store in which service partitions keep their backups.
///
/// One store serves many partitions; operations on different partitions never
/// contend. Every mutating operation fails fast with contextual errors, and
/// metadata for an upload is committed strictly after the payload copy
/// completes, so a failed or cancelled upload never becomes visible in
/// listings.
#[async_trait]
pub trait CentralBackupStore: Send + Sync {
    /// Recursively copies `source_dir` into a new, uniquely named location
    /// derived from `partition_id` and the upload timestamp, then commits and
    /// returns the metadata record.
    async fn upload_backup_folder(
        &self,
        backup_option: BackupOption,
        partition_id: Uuid,
        source_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BackupMetadata>;

    /// Persists `info` as the sidecar metadata document for the backup at
    /// `destination`, a backend-native location produced by an upload.
    async fn store_backup_metadata(&self, destination: &str, info: &BackupMetadata) -> Result<()>;

    /// Recursively copies the backup identified by `backup_id` into
    /// `destination_dir`, creating it if absent.
    ///
    /// Fails with [`BackupRestoreError::BackupNotFound`] when no metadata
    /// record matches and [`BackupRestoreError::Corruption`] when more than
    /// one does.
    async fn download_backup_folder(
        &self,
        backup_id: Uuid,
        destination_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Lists metadata records matching the optional filters. No ordering is
    /// guaranteed at this layer.
    async fn get_backup_metadata(
        &self,
        backup_id: Option<Uuid>,
        partition_id: Option<Uuid>,
    ) -> Result<Vec<BackupMetadata>>;

    /// Records that `backup_id` should be restored the next time a restore is
    /// triggered for `partition_id`. Idempotent upsert; a second schedule
    /// before consumption overwrites the first.
    async fn schedule_restore(&self, partition_id: Uuid, backup_id: Uuid) -> Result<()>;

    /// Reads and deletes the restore-schedule marker for `partition_id`.
    ///
    /// Returns `Ok(None)` when nothing is scheduled. Fails with
    /// [`BackupRestoreError::Corruption`] when the marker references a backup
    /// id no longer present in the metadata.
    async fn consume_scheduled_restore(&self, partition_id: Uuid) -> Result<Option<BackupMetadata>>;
}
