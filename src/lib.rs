//! Central backup store and restore scheduling for partitioned stateful
//! services.
//!
//! Independently replicated partitions create point-in-time backups of their
//! state, register them in a durable central store, and later restore from
//! that store after a data-loss event. The crate provides:
//!
//! - the [`store::CentralBackupStore`] contract for a durable,
//!   partition-addressable store of backup payloads and metadata;
//! - two interchangeable backends: [`store::FileStore`] over a shared
//!   directory tree and [`store::BlobStore`] over S3-compatible object
//!   storage;
//! - the [`chain::resolve_chain`] resolver that turns a restore point into
//!   the ordered list of one full backup plus subsequent incrementals to
//!   replay;
//! - the [`operations::BackupRestoreOperations`] schedule/trigger/consume
//!   protocol that ties chain resolution to the host's data-loss callback.
//!
//! The surrounding host (partition lifecycle, replica placement, the actual
//! byte-level snapshot and restore of local state) participates through the
//! collaborator traits in [`operations`].
//!
//! ## Example
//!
//! ```no_run
//! use backup_restore::{BackupOption, CancelToken, FileStore};
//! use backup_restore::store::CentralBackupStore;
//!
//! # async fn example() -> backup_restore::Result<()> {
//! let store = FileStore::new("/mnt/backup-share")?;
//! let partition_id = uuid::Uuid::new_v4();
//!
//! let info = store
//!     .upload_backup_folder(
//!         BackupOption::Full,
//!         partition_id,
//!         "/tmp/local-snapshot".as_ref(),
//!         &CancelToken::new(),
//!     )
//!     .await?;
//! println!("committed backup {}", info.backup_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod metadata;
pub mod operations;
pub mod store;

pub use chain::resolve_chain;
pub use error::{BackupRestoreError, Result};
pub use metadata::{BackupMetadata, BackupOption, METADATA_FILE_NAME};
pub use operations::{
    BackupRestoreOperations, DataLossMode, DataLossTrigger, LocalRestore, LocalSnapshot,
    RestorePolicy,
};
pub use store::{BlobStore, BlobStoreConfig, CancelToken, CentralBackupStore, FileStore};
