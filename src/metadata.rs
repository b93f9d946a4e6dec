//! Backup metadata records stored alongside every backup payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the sidecar file that carries the [`BackupMetadata`] document
/// inside every backup folder.
pub const METADATA_FILE_NAME: &str = "backuprestore.metadata";

/// Indicates the kind of backup a partition produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupOption {
    /// Self-contained snapshot, restorable on its own.
    Full,
    /// Captures changes since the previous backup in its epoch; requires the
    /// chain back to the nearest preceding full backup.
    Incremental,
}

/// Immutable description of one backup held in the central store.
///
/// Serialized field names match the sidecar document layout already present
/// in existing stores, so metadata written by older tooling parses cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupMetadata {
    /// Unique identifier for this backup.
    pub backup_id: Uuid,
    /// The service partition the backup was taken from.
    pub original_service_partition_id: Uuid,
    /// When the backup was created. Also names the physical storage folder.
    pub time_stamp_utc: DateTime<Utc>,
    /// The kind of backup.
    pub backup_option: BackupOption,
}

impl BackupMetadata {
    /// Creates a new record with a freshly generated backup id.
    pub fn new(
        original_service_partition_id: Uuid,
        time_stamp_utc: DateTime<Utc>,
        backup_option: BackupOption,
    ) -> Self {
        Self::with_id(
            original_service_partition_id,
            time_stamp_utc,
            backup_option,
            Uuid::new_v4(),
        )
    }

    /// Creates a record with an explicit backup id, used when rehydrating
    /// persisted metadata.
    pub fn with_id(
        original_service_partition_id: Uuid,
        time_stamp_utc: DateTime<Utc>,
        backup_option: BackupOption,
        backup_id: Uuid,
    ) -> Self {
        Self {
            backup_id,
            original_service_partition_id,
            time_stamp_utc,
            backup_option,
        }
    }

    /// Formats the timestamp the way physical storage folders are named.
    ///
    /// 12-hour clock, kept for layout compatibility with stores written by
    /// earlier tooling.
    pub fn folder_timestamp(&self) -> String {
        folder_timestamp(&self.time_stamp_utc)
    }
}

/// Formats a timestamp as a storage folder name segment.
pub(crate) fn folder_timestamp(time_stamp_utc: &DateTime<Utc>) -> String {
    time_stamp_utc.format("%Y%m%d%I%M%S").to_string()
}
