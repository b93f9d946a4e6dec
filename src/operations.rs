//! Backup creation and restore orchestration for one service partition.
//!
//! The operations here tie the central store, the chain resolver and the
//! host-owned collaborators together. There is no background worker: every
//! operation is invoked by an external caller and runs to completion or
//! failure before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::resolve_chain;
use crate::error::{BackupRestoreError, Result};
use crate::metadata::{BackupMetadata, BackupOption};
use crate::store::{CancelToken, CentralBackupStore};

/// How much of a partition's state the data-loss trigger should declare lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLossMode {
    /// The whole replica set lost its state.
    Full,
    /// A quorum of replicas lost their state.
    Partial,
}

/// How the local-restore collaborator should treat existing replica state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Replace local state even if it looks newer than the backup.
    Force,
    /// Refuse to overwrite state that looks newer than the backup.
    Safe,
}

/// Host-owned collaborator that produces a local point-in-time snapshot of
/// the replica's state.
#[async_trait]
pub trait LocalSnapshot: Send + Sync {
    /// Writes a snapshot of the requested kind to a local directory and
    /// returns it. The collaborator owns the directory and reclaims it after
    /// the upload reports success or failure.
    async fn create_snapshot(&self, option: BackupOption) -> Result<PathBuf>;
}

/// Host-owned collaborator that replaces local replica state from an
/// assembled backup directory.
#[async_trait]
pub trait LocalRestore: Send + Sync {
    /// Applies the backup chain assembled under `backup_dir`, one subfolder
    /// per chain element. Subfolder names sort in chain order, oldest first.
    async fn restore(&self, backup_dir: &Path, policy: RestorePolicy) -> Result<()>;
}

/// Host-owned collaborator that induces a data-loss event for a partition,
/// which eventually causes the host to invoke [`BackupRestoreOperations::on_data_loss`].
#[async_trait]
pub trait DataLossTrigger: Send + Sync {
    /// Fire-and-forget from this protocol's perspective; the loss-and-recovery
    /// cycle itself is owned by the host.
    async fn trigger_data_loss(&self, partition_id: Uuid, mode: DataLossMode) -> Result<()>;
}

/// The externally callable backup/restore surface for one partition.
///
/// Holds the capability set the protocol needs: store access, the partition
/// identity, a work directory for restore scratch space, and the three
/// host collaborators. All operations wrap failures with partition context
/// before surfacing and log both the attempt and the outcome.
pub struct BackupRestoreOperations {
    store: Arc<dyn CentralBackupStore>,
    partition_id: Uuid,
    work_dir: PathBuf,
    snapshot: Arc<dyn LocalSnapshot>,
    local_restore: Arc<dyn LocalRestore>,
    data_loss_trigger: Arc<dyn DataLossTrigger>,
}

impl BackupRestoreOperations {
    /// Creates the operations surface for one partition.
    ///
    /// `work_dir` is where restore scratch directories are created; it must
    /// be writable by the replica.
    pub fn new(
        store: Arc<dyn CentralBackupStore>,
        partition_id: Uuid,
        work_dir: impl AsRef<Path>,
        snapshot: Arc<dyn LocalSnapshot>,
        local_restore: Arc<dyn LocalRestore>,
        data_loss_trigger: Arc<dyn DataLossTrigger>,
    ) -> Result<Self> {
        let work_dir = work_dir.as_ref();
        if work_dir.as_os_str().is_empty() {
            return Err(BackupRestoreError::invalid_argument(
                "work_dir",
                "value cannot be empty",
            ));
        }
        Ok(Self {
            store,
            partition_id,
            work_dir: work_dir.to_path_buf(),
            snapshot,
            local_restore,
            data_loss_trigger,
        })
    }

    /// The central store this partition uses.
    pub fn store(&self) -> &Arc<dyn CentralBackupStore> {
        &self.store
    }

    /// The partition this surface operates on.
    pub fn partition_id(&self) -> Uuid {
        self.partition_id
    }

    /// Creates a backup of this replica's state and commits it to the
    /// central store: local snapshot first, then upload, then metadata.
    pub async fn begin_create_backup(
        &self,
        option: BackupOption,
        cancel: &CancelToken,
    ) -> Result<BackupMetadata> {
        info!(partition_id = %self.partition_id, backup_option = ?option, "beginning backup creation");

        let outcome = async {
            let snapshot_dir = self.snapshot.create_snapshot(option).await?;
            self.post_backup_callback(option, &snapshot_dir, cancel)
                .await
        }
        .await;

        match outcome {
            Ok(info) => {
                info!(partition_id = %self.partition_id, backup_id = %info.backup_id, "backup creation succeeded");
                Ok(info)
            }
            Err(e) => {
                error!(partition_id = %self.partition_id, error = %e, "backup creation failed");
                Err(e.for_partition(self.partition_id, "create backup"))
            }
        }
    }

    /// Completion callback for a local snapshot: uploads the snapshot
    /// directory and commits its metadata. Hosts that drive their own
    /// snapshot cycle can invoke this directly; failures propagate so the
    /// snapshot collaborator knows the backup did not durably land.
    pub async fn post_backup_callback(
        &self,
        option: BackupOption,
        snapshot_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BackupMetadata> {
        let info = self
            .store
            .upload_backup_folder(option, self.partition_id, snapshot_dir, cancel)
            .await?;
        info!(partition_id = %self.partition_id, backup_id = %info.backup_id, "uploaded local snapshot to central store");
        Ok(info)
    }

    /// Schedules `backup` to be restored onto this partition, then asks the
    /// host to induce a data-loss event. The host later invokes
    /// [`Self::on_data_loss`], which performs the actual restore.
    pub async fn begin_restore_backup(
        &self,
        backup: &BackupMetadata,
        mode: DataLossMode,
    ) -> Result<()> {
        info!(partition_id = %self.partition_id, backup_id = %backup.backup_id, "beginning restore backup");

        let outcome = async {
            self.store
                .schedule_restore(self.partition_id, backup.backup_id)
                .await?;
            // Best-effort trigger; its failure surfaces to the caller the
            // same way scheduling failures do.
            self.data_loss_trigger
                .trigger_data_loss(self.partition_id, mode)
                .await
        }
        .await;

        match outcome {
            Ok(()) => {
                info!(partition_id = %self.partition_id, backup_id = %backup.backup_id, "restore backup scheduled");
                Ok(())
            }
            Err(e) => {
                error!(partition_id = %self.partition_id, error = %e, "restore backup failed");
                Err(e.for_partition(self.partition_id, "restore backup"))
            }
        }
    }

    /// Data-loss callback: consumes the schedule marker, resolves and
    /// downloads the backup chain, and hands the assembled directory to the
    /// local-restore collaborator.
    ///
    /// Returns `Ok(false)` when nothing is scheduled for this partition,
    /// which tells the host no restore is needed. Safe to invoke again after
    /// a failure: schedule is an idempotent upsert and consume is a single
    /// read-delete.
    pub async fn on_data_loss(&self, cancel: &CancelToken) -> Result<bool> {
        info!(partition_id = %self.partition_id, "data loss callback starting");

        let metadata = self
            .store
            .consume_scheduled_restore(self.partition_id)
            .await
            .map_err(|e| {
                error!(partition_id = %self.partition_id, error = %e, "failed to consume scheduled restore");
                e.for_partition(self.partition_id, "consume scheduled restore")
            })?;
        let Some(metadata) = metadata else {
            info!(partition_id = %self.partition_id, "no restore scheduled");
            return Ok(false);
        };

        let chain = async {
            let history = self
                .store
                .get_backup_metadata(None, Some(metadata.original_service_partition_id))
                .await?;
            let chain = resolve_chain(&metadata, &history)?;

            // The resolver enforces both already; re-checked because
            // replaying a chain without its full backup corrupts state.
            match chain.first() {
                None => Err(BackupRestoreError::ChainIntegrity {
                    partition_id: self.partition_id,
                    reason: "resolved chain is empty".to_string(),
                }),
                Some(first) if first.backup_option != BackupOption::Full => {
                    Err(BackupRestoreError::ChainIntegrity {
                        partition_id: self.partition_id,
                        reason: "resolved chain does not begin with a full backup".to_string(),
                    })
                }
                Some(_) => Ok(chain),
            }
        }
        .await
        .map_err(|e| {
            error!(partition_id = %self.partition_id, error = %e, "failed to resolve backup chain");
            e.for_partition(self.partition_id, "resolve backup chain")
        })?;

        let scratch = self.work_dir.join(Uuid::new_v4().simple().to_string());
        let outcome = self.assemble_and_restore(&chain, &scratch, cancel).await;

        // Scratch space goes away on success and on failure.
        if fs::try_exists(&scratch).await.unwrap_or(false) {
            if let Err(e) = fs::remove_dir_all(&scratch).await {
                warn!(partition_id = %self.partition_id, error = %e, "failed to remove restore scratch directory");
            }
        }

        outcome.map_err(|e| {
            error!(partition_id = %self.partition_id, error = %e, "restore failed");
            e.for_partition(self.partition_id, "restore from backup chain")
        })?;

        info!(partition_id = %self.partition_id, "data loss callback complete");
        Ok(true)
    }

    /// Downloads each chain element into its own subfolder of `scratch`,
    /// oldest first, then applies the assembled directory.
    async fn assemble_and_restore(
        &self,
        chain: &[BackupMetadata],
        scratch: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        for (index, element) in chain.iter().enumerate() {
            let subfolder = scratch.join(chain_subfolder(index, element));
            self.store
                .download_backup_folder(element.backup_id, &subfolder, cancel)
                .await?;
        }
        self.local_restore.restore(scratch, RestorePolicy::Force).await
    }

    /// Lists this partition's backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        info!(partition_id = %self.partition_id, "listing backups");
        let mut backups = self
            .store
            .get_backup_metadata(None, Some(self.partition_id))
            .await
            .map_err(|e| e.for_partition(self.partition_id, "list backups"))?;
        sort_newest_first(&mut backups);
        info!(partition_id = %self.partition_id, count = backups.len(), "returning backups");
        Ok(backups)
    }

    /// Lists every backup in the central store across all partitions,
    /// newest first.
    pub async fn list_all_backups(&self) -> Result<Vec<BackupMetadata>> {
        info!("listing all backups");
        let mut backups = self
            .store
            .get_backup_metadata(None, None)
            .await
            .map_err(|e| e.for_partition(self.partition_id, "list all backups"))?;
        sort_newest_first(&mut backups);
        info!(count = backups.len(), "returning all backups");
        Ok(backups)
    }
}

/// Ordering is applied here, not in the store: newest first, timestamp ties
/// broken by backup id.
fn sort_newest_first(backups: &mut [BackupMetadata]) {
    backups.sort_by(|a, b| {
        b.time_stamp_utc
            .cmp(&a.time_stamp_utc)
            .then_with(|| b.backup_id.cmp(&a.backup_id))
    });
}

/// Scratch subfolder name for one chain element: zero-padded chain position
/// plus a 24-hour timestamp. The persisted store layout uses a 12-hour clock
/// whose folder names collide for timestamps half a day apart; the position
/// prefix keeps scratch names unique and lexically in chain order regardless.
fn chain_subfolder(index: usize, element: &BackupMetadata) -> String {
    format!("{index:03}-{}", element.time_stamp_utc.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn chain_subfolders_stay_distinct_half_a_day_apart() {
        let partition = Uuid::new_v4();
        let full = BackupMetadata::new(
            partition,
            Utc.with_ymd_and_hms(2024, 6, 1, 1, 5, 6).unwrap(),
            BackupOption::Full,
        );
        let incremental = BackupMetadata::new(
            partition,
            Utc.with_ymd_and_hms(2024, 6, 1, 13, 5, 6).unwrap(),
            BackupOption::Incremental,
        );
        // The store's own folder names collide for these two.
        assert_eq!(full.folder_timestamp(), incremental.folder_timestamp());

        let first = chain_subfolder(0, &full);
        let second = chain_subfolder(1, &incremental);
        assert_eq!(first, "000-20240601010506");
        assert_eq!(second, "001-20240601130506");
        assert!(first < second);
    }
}
