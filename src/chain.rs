//! Backup-chain resolution: turns a restore point into the ordered list of
//! backups that must be replayed to reach it.

use tracing::debug;

use crate::error::{BackupRestoreError, Result};
use crate::metadata::{BackupMetadata, BackupOption};

/// Resolves the replay chain for `target`, oldest first.
///
/// A full backup resolves to itself. An incremental backup resolves to the
/// latest full backup preceding it plus every incremental in between,
/// including the target. `history` is the complete metadata set for the
/// target's partition; records for other partitions are ignored.
///
/// Fails with [`BackupRestoreError::ChainIntegrity`] when the target does not
/// appear in `history` or when the backward walk never reaches a full backup.
/// A chain missing its full backup must never be replayed, so this is raised
/// rather than returning a truncated list.
pub fn resolve_chain(
    target: &BackupMetadata,
    history: &[BackupMetadata],
) -> Result<Vec<BackupMetadata>> {
    if target.backup_option == BackupOption::Full {
        return Ok(vec![target.clone()]);
    }

    // Newest first; timestamp ties are broken by backup id so concurrent
    // uploads in the same clock second still walk deterministically.
    let mut ordered: Vec<BackupMetadata> = history
        .iter()
        .filter(|m| m.original_service_partition_id == target.original_service_partition_id)
        .cloned()
        .collect();
    ordered.sort_by(|a, b| {
        b.time_stamp_utc
            .cmp(&a.time_stamp_utc)
            .then_with(|| b.backup_id.cmp(&a.backup_id))
    });

    let mut chain = Vec::new();
    let mut walking = false;
    for record in ordered {
        if !walking {
            if record.backup_id != target.backup_id {
                continue;
            }
            walking = true;
        }

        let is_full = record.backup_option == BackupOption::Full;
        chain.push(record);
        if is_full {
            chain.reverse();
            debug!(
                backup_id = %target.backup_id,
                chain_len = chain.len(),
                "resolved incremental backup chain"
            );
            return Ok(chain);
        }
    }

    let reason = if walking {
        format!(
            "no full backup precedes incremental backup {}",
            target.backup_id
        )
    } else {
        format!(
            "restore point {} is missing from the partition history",
            target.backup_id
        )
    };
    Err(BackupRestoreError::ChainIntegrity {
        partition_id: target.original_service_partition_id,
        reason,
    })
}
