//! Error taxonomy shared by the store backends and the orchestration layer.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackupRestoreError>;

/// Errors surfaced by backup and restore operations.
///
/// Not-found conditions are kept distinct from corruption: a missing backup
/// or marker is a caller-visible state, while corruption means the store
/// contents contradict themselves and must never be downgraded to
/// "nothing to restore".
#[derive(Debug, Error)]
pub enum BackupRestoreError {
    /// An argument was rejected before any I/O took place.
    #[error("Invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        argument: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No backup with the given id exists in the central store.
    #[error("Backup {0} was not found in the central store")]
    BackupNotFound(Uuid),

    /// The recorded backup history cannot produce a restorable chain.
    #[error("Backup chain for partition {partition_id} is broken: {reason}")]
    ChainIntegrity {
        /// Partition whose history is broken.
        partition_id: Uuid,
        /// What the walk over the history found.
        reason: String,
    },

    /// The store contents contradict themselves.
    #[error("Central store corruption: {0}")]
    Corruption(String),

    /// A cooperative cancellation signal was observed mid-operation.
    #[error("Operation was cancelled")]
    Cancelled,

    /// A backend storage call failed after exhausting its retry budget.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Local filesystem I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sidecar metadata document could not be read or written.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A public operation failed; carries the partition and stage context.
    #[error("{stage} failed for partition {partition_id}: {source}")]
    Partition {
        /// Partition the operation ran against.
        partition_id: Uuid,
        /// The stage that failed.
        stage: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<BackupRestoreError>,
    },
}

impl BackupRestoreError {
    /// Wraps this error with partition and stage context before it surfaces
    /// to a caller.
    pub fn for_partition(self, partition_id: Uuid, stage: &'static str) -> Self {
        BackupRestoreError::Partition {
            partition_id,
            stage,
            source: Box::new(self),
        }
    }

    /// Builds a validation error for the named argument.
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        BackupRestoreError::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }
}
