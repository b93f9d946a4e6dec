//! Object-storage-backed central store over an S3-compatible service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BackupRestoreError, Result};
use crate::metadata::{folder_timestamp, BackupMetadata, BackupOption, METADATA_FILE_NAME};
use crate::store::retry::RetryPolicy;
use crate::store::{CancelToken, CentralBackupStore};

const ROOT_PREFIX: &str = "root";
const QUEUE_PREFIX: &str = "root/Queue";

const TAG_BACKUP_ID: &str = "BackupId";
const TAG_BACKUP_OPTION: &str = "BackupOption";
const TAG_PARTITION_ID: &str = "OriginalServicePartitionId";
const TAG_TIMESTAMP: &str = "TimeStampUtc";

/// Connection settings for a [`BlobStore`].
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Bucket holding all backups; created on first use if absent.
    pub bucket: String,
    /// AWS region for the bucket.
    pub region: String,
    /// Custom endpoint for S3-compatible services such as MinIO or LocalStack.
    pub endpoint_url: Option<String>,
    /// Use path-style addressing, required by most local S3 emulators.
    pub force_path_style: bool,
    /// Retry budget applied beneath every network call.
    pub retry: RetryPolicy,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "partition-backups".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// [`CentralBackupStore`] over S3-compatible object storage.
///
/// The logical layout mirrors [`FileStore`](crate::store::FileStore) under a
/// `root/` key prefix: nested directories map to nested key segments, the
/// sidecar metadata document sits next to the payload objects, and its values
/// are duplicated into object metadata tags so listings never touch payload
/// bytes. Bucket setup is deferred to the first operation and memoized.
pub struct BlobStore {
    client: Client,
    bucket: String,
    retry: RetryPolicy,
    init: OnceCell<()>,
}

/// Metadata record plus the key prefix it was found under.
struct BlobBackupMetadata {
    prefix: String,
    info: BackupMetadata,
}

impl BlobStore {
    /// Builds a store from connection settings, constructing the S3 client
    /// from the ambient AWS configuration.
    pub async fn new(config: BlobStoreConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(BackupRestoreError::invalid_argument(
                "bucket",
                "value cannot be empty or whitespace",
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Self::from_client(client, config.bucket, config.retry)
    }

    /// Builds a store around an existing client, for callers that manage
    /// their own AWS configuration.
    pub fn from_client(
        client: Client,
        bucket: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(BackupRestoreError::invalid_argument(
                "bucket",
                "value cannot be empty or whitespace",
            ));
        }
        Ok(Self {
            // Bucket names must be lowercase.
            bucket: bucket.to_lowercase(),
            client,
            retry,
            init: OnceCell::new(),
        })
    }

    /// First operation on a fresh instance pays the one-time bucket setup;
    /// subsequent operations short-circuit it.
    async fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.retry
                    .run("ensure bucket", || async {
                        match self.client.head_bucket().bucket(&self.bucket).send().await {
                            Ok(_) => Ok(()),
                            // A missing bucket is not a fault; create it.
                            Err(e)
                                if e.as_service_error().is_some_and(|se| se.is_not_found()) =>
                            {
                                self.client
                                    .create_bucket()
                                    .bucket(&self.bucket)
                                    .send()
                                    .await
                                    .map(|_| ())
                                    .map_err(|e| e.to_string())
                            }
                            Err(e) => Err(e.to_string()),
                        }
                    })
                    .await
            })
            .await?;
        Ok(())
    }

    fn backup_prefix(&self, partition_id: Uuid, time_stamp: &DateTime<Utc>) -> String {
        format!(
            "{ROOT_PREFIX}/{}/{}",
            partition_id.simple(),
            folder_timestamp(time_stamp)
        )
    }

    fn queue_key(&self, partition_id: Uuid) -> String {
        format!("{QUEUE_PREFIX}/{}", partition_id.simple())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        self.retry
            .run("probe object", || async {
                match self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                {
                    Ok(_) => Ok(true),
                    // Absence is an answer, not a transient fault.
                    Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Pages through every sidecar object under the root prefix, reading the
    /// duplicated metadata tags instead of downloading payload bytes.
    async fn collect_metadata(
        &self,
        backup_id: Option<Uuid>,
        partition_id: Option<Uuid>,
    ) -> Result<Vec<BlobBackupMetadata>> {
        let sidecar_suffix = format!("/{METADATA_FILE_NAME}");
        let mut found = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .retry
                .run("list backup metadata", || {
                    let mut request = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(format!("{ROOT_PREFIX}/"));
                    if let Some(ref token) = continuation {
                        request = request.continuation_token(token);
                    }
                    request.send()
                })
                .await?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if !key.ends_with(&sidecar_suffix) {
                    continue;
                }

                let head = self
                    .retry
                    .run("read backup metadata tags", || {
                        self.client
                            .head_object()
                            .bucket(&self.bucket)
                            .key(key)
                            .send()
                    })
                    .await?;
                let tags = head.metadata().cloned().unwrap_or_default();
                let info = metadata_from_tags(key, &tags)?;

                let matches = backup_id.is_none_or(|id| info.backup_id == id)
                    && partition_id.is_none_or(|id| info.original_service_partition_id == id);
                if matches {
                    found.push(BlobBackupMetadata {
                        prefix: key.trim_end_matches(&sidecar_suffix).to_string(),
                        info,
                    });
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(found)
    }

    /// Uploads the local folder structure beneath `destination`, mapping
    /// nested directories to nested key segments.
    async fn upload_folder(
        &self,
        source: &Path,
        destination: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut pending = vec![(source.to_path_buf(), destination.to_string())];
        while let Some((dir, prefix)) = pending.pop() {
            cancel.check()?;
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{prefix}/{name}")));
                    continue;
                }

                cancel.check()?;
                let key = format!("{prefix}/{name}");
                let path = entry.path();
                self.retry
                    .run("upload backup file", || async {
                        let body = ByteStream::from_path(&path)
                            .await
                            .map_err(|e| e.to_string())?;
                        self.client
                            .put_object()
                            .bucket(&self.bucket)
                            .key(&key)
                            .body(body)
                            .send()
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string())
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Downloads every object beneath `prefix` into `destination_dir`,
    /// recreating the folder structure from the key segments.
    async fn download_folder(
        &self,
        prefix: &str,
        destination_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        fs::create_dir_all(destination_dir).await?;
        let prefix_slash = format!("{prefix}/");
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .retry
                .run("list backup payload", || {
                    let mut request = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(&prefix_slash);
                    if let Some(ref token) = continuation {
                        request = request.continuation_token(token);
                    }
                    request.send()
                })
                .await?;

            for object in page.contents() {
                cancel.check()?;
                let Some(key) = object.key() else { continue };
                let Some(relative) = key.strip_prefix(&prefix_slash) else {
                    continue;
                };
                if relative.is_empty() {
                    continue;
                }

                let mut local: PathBuf = destination_dir.to_path_buf();
                for segment in relative.split('/') {
                    local.push(segment);
                }
                if let Some(parent) = local.parent() {
                    fs::create_dir_all(parent).await?;
                }

                let response = self
                    .retry
                    .run("download backup file", || {
                        self.client
                            .get_object()
                            .bucket(&self.bucket)
                            .key(key)
                            .send()
                    })
                    .await?;
                let bytes = response.body.collect().await.map_err(|e| {
                    BackupRestoreError::Storage(format!("failed to read object {key}: {e}"))
                })?;
                fs::write(&local, bytes.into_bytes()).await?;
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CentralBackupStore for BlobStore {
    async fn upload_backup_folder(
        &self,
        backup_option: BackupOption,
        partition_id: Uuid,
        source_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BackupMetadata> {
        self.ensure_initialized().await?;

        let time_stamp = Utc::now();
        let info = BackupMetadata::new(partition_id, time_stamp, backup_option);

        let mut destination = self.backup_prefix(partition_id, &time_stamp);
        // A second upload within the same clock second gets its own prefix;
        // read-time ordering breaks the timestamp tie by backup id.
        if self
            .object_exists(&format!("{destination}/{METADATA_FILE_NAME}"))
            .await?
        {
            destination = format!("{destination}-{}", info.backup_id.simple());
        }

        self.upload_folder(source_dir, &destination, cancel).await?;

        // Metadata commit strictly after the payload copy, so a failed or
        // cancelled upload never shows up in listings.
        self.store_backup_metadata(&destination, &info).await?;

        info!(
            backup_id = %info.backup_id,
            partition_id = %partition_id,
            backup_option = ?backup_option,
            "committed backup upload"
        );
        Ok(info)
    }

    async fn store_backup_metadata(&self, destination: &str, info: &BackupMetadata) -> Result<()> {
        self.ensure_initialized().await?;

        let key = format!("{destination}/{METADATA_FILE_NAME}");
        let json = serde_json::to_string(info)?;
        let timestamp = info
            .time_stamp_utc
            .to_rfc3339_opts(SecondsFormat::Nanos, true);

        self.retry
            .run("store backup metadata", || {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .metadata(TAG_BACKUP_ID, info.backup_id.simple().to_string())
                    .metadata(TAG_BACKUP_OPTION, format!("{:?}", info.backup_option))
                    .metadata(
                        TAG_PARTITION_ID,
                        info.original_service_partition_id.simple().to_string(),
                    )
                    .metadata(TAG_TIMESTAMP, timestamp.clone())
                    .body(ByteStream::from(json.clone().into_bytes()))
                    .send()
            })
            .await?;
        Ok(())
    }

    async fn download_backup_folder(
        &self,
        backup_id: Uuid,
        destination_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.ensure_initialized().await?;

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

        self.download_folder(&found.prefix, destination_dir, cancel)
            .await?;
        debug!(backup_id = %backup_id, destination = %destination_dir.display(), "downloaded backup folder");
        Ok(())
    }

    async fn get_backup_metadata(
        &self,
        backup_id: Option<Uuid>,
        partition_id: Option<Uuid>,
    ) -> Result<Vec<BackupMetadata>> {
        self.ensure_initialized().await?;
        let found = self.collect_metadata(backup_id, partition_id).await?;
        Ok(found.into_iter().map(|m| m.info).collect())
    }

    async fn schedule_restore(&self, partition_id: Uuid, backup_id: Uuid) -> Result<()> {
        self.ensure_initialized().await?;

        let key = self.queue_key(partition_id);
        self.retry
            .run("write restore marker", || {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(ByteStream::from(
                        backup_id.simple().to_string().into_bytes(),
                    ))
                    .send()
            })
            .await?;
        info!(partition_id = %partition_id, backup_id = %backup_id, "scheduled restore");
        Ok(())
    }

    async fn consume_scheduled_restore(
        &self,
        partition_id: Uuid,
    ) -> Result<Option<BackupMetadata>> {
        self.ensure_initialized().await?;

        let key = self.queue_key(partition_id);
        let marker = self
            .retry
            .run("read restore marker", || async {
                match self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                {
                    Ok(response) => Ok(Some(response)),
                    Err(e) => {
                        let service_error = e.into_service_error();
                        if service_error.is_no_such_key() {
                            // Nothing scheduled; not a fault.
                            Ok(None)
                        } else {
                            Err(service_error)
                        }
                    }
                }
            })
            .await?;
        let Some(response) = marker else {
            return Ok(None);
        };
        let bytes = response.body.collect().await.map_err(|e| {
            BackupRestoreError::Storage(format!("failed to read restore marker: {e}"))
        })?;
        let content = String::from_utf8_lossy(&bytes.into_bytes()).into_owned();

        let backup_id = match Uuid::parse_str(content.trim()) {
            Ok(id) => id,
            Err(_) => {
                self.delete_marker(&key).await?;
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
                self.delete_marker(&key).await?;
                info!(partition_id = %partition_id, backup_id = %backup_id, "consumed scheduled restore");
                Ok(Some(matches.remove(0)))
            }
            n => Err(BackupRestoreError::Corruption(format!(
                "found {n} metadata records for scheduled backup {backup_id}"
            ))),
        }
    }
}

impl BlobStore {
    async fn delete_marker(&self, key: &str) -> Result<()> {
        self.retry
            .run("delete restore marker", || {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
            })
            .await?;
        Ok(())
    }
}

fn tag<'a>(tags: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    // S3 returns user metadata keys lowercased.
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Rebuilds a [`BackupMetadata`] from the tags duplicated onto the sidecar
/// object. Missing or unparsable tags mean the sidecar was written by
/// something other than this store and are reported as corruption.
fn metadata_from_tags(key: &str, tags: &HashMap<String, String>) -> Result<BackupMetadata> {
    let corrupt = |what: &str| {
        BackupRestoreError::Corruption(format!("backup sidecar {key} has a missing or invalid {what} tag"))
    };

    let backup_id = tag(tags, TAG_BACKUP_ID)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| corrupt(TAG_BACKUP_ID))?;
    let partition_id = tag(tags, TAG_PARTITION_ID)
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| corrupt(TAG_PARTITION_ID))?;
    let time_stamp_utc = tag(tags, TAG_TIMESTAMP)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| corrupt(TAG_TIMESTAMP))?;
    let backup_option = match tag(tags, TAG_BACKUP_OPTION) {
        Some("Full") => BackupOption::Full,
        Some("Incremental") => BackupOption::Incremental,
        _ => return Err(corrupt(TAG_BACKUP_OPTION)),
    };

    Ok(BackupMetadata::with_id(
        partition_id,
        time_stamp_utc,
        backup_option,
        backup_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_case_insensitively() {
        let info = BackupMetadata::new(Uuid::new_v4(), Utc::now(), BackupOption::Incremental);
        let mut tags = HashMap::new();
        // Keys lowercased, as S3 returns them.
        tags.insert("backupid".to_string(), info.backup_id.simple().to_string());
        tags.insert(
            "originalservicepartitionid".to_string(),
            info.original_service_partition_id.simple().to_string(),
        );
        tags.insert(
            "timestamputc".to_string(),
            info.time_stamp_utc
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        tags.insert("backupoption".to_string(), "Incremental".to_string());

        let parsed = metadata_from_tags("root/p/t/backuprestore.metadata", &tags).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn missing_tag_is_corruption() {
        let tags = HashMap::new();
        let err = metadata_from_tags("root/p/t/backuprestore.metadata", &tags).unwrap_err();
        assert!(matches!(err, BackupRestoreError::Corruption(_)));
    }
}
