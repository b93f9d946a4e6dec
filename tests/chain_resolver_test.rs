// Chain resolution properties: a restore point must resolve to exactly the
// backups of its own epoch, oldest first, or fail loudly.

use backup_restore::{resolve_chain, BackupMetadata, BackupOption, BackupRestoreError};
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

fn at_hour(partition: Uuid, hour: i64, option: BackupOption) -> BackupMetadata {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    BackupMetadata::new(partition, base + Duration::hours(hour), option)
}

#[test]
fn full_backup_resolves_to_itself() {
    let partition = Uuid::new_v4();
    let full = at_hour(partition, 0, BackupOption::Full);
    let unrelated = at_hour(partition, 1, BackupOption::Incremental);

    let chain = resolve_chain(&full, &[full.clone(), unrelated]).unwrap();
    assert_eq!(chain, vec![full]);
}

#[test]
fn incremental_resolves_to_full_plus_intermediates() {
    let partition = Uuid::new_v4();
    let full = at_hour(partition, 0, BackupOption::Full);
    let i1 = at_hour(partition, 1, BackupOption::Incremental);
    let i2 = at_hour(partition, 2, BackupOption::Incremental);
    let history = vec![i2.clone(), full.clone(), i1.clone()];

    let chain = resolve_chain(&i2, &history).unwrap();
    assert_eq!(chain, vec![full.clone(), i1.clone(), i2]);

    let chain = resolve_chain(&i1, &history).unwrap();
    assert_eq!(chain, vec![full, i1]);
}

#[test]
fn chain_never_crosses_epochs() {
    let partition = Uuid::new_v4();
    let f1 = at_hour(partition, 0, BackupOption::Full);
    let i1 = at_hour(partition, 1, BackupOption::Incremental);
    let f2 = at_hour(partition, 2, BackupOption::Full);
    let i2 = at_hour(partition, 3, BackupOption::Incremental);
    let history = vec![f1, i1, f2.clone(), i2.clone()];

    let chain = resolve_chain(&i2, &history).unwrap();
    assert_eq!(chain, vec![f2, i2]);
}

#[test]
fn incremental_without_preceding_full_is_a_chain_integrity_error() {
    let partition = Uuid::new_v4();
    let i1 = at_hour(partition, 1, BackupOption::Incremental);
    let i2 = at_hour(partition, 2, BackupOption::Incremental);

    let err = resolve_chain(&i2, &[i1, i2.clone()]).unwrap_err();
    assert!(matches!(
        err,
        BackupRestoreError::ChainIntegrity { partition_id, .. } if partition_id == partition
    ));
}

#[test]
fn target_missing_from_history_is_a_chain_integrity_error() {
    let partition = Uuid::new_v4();
    let full = at_hour(partition, 0, BackupOption::Full);
    let orphan = at_hour(partition, 1, BackupOption::Incremental);

    // The target itself was deleted between scheduling and consumption.
    let err = resolve_chain(&orphan, &[full]).unwrap_err();
    assert!(matches!(err, BackupRestoreError::ChainIntegrity { .. }));
}

#[test]
fn empty_history_is_a_chain_integrity_error() {
    let orphan = at_hour(Uuid::new_v4(), 0, BackupOption::Incremental);
    let err = resolve_chain(&orphan, &[]).unwrap_err();
    assert!(matches!(err, BackupRestoreError::ChainIntegrity { .. }));
}
