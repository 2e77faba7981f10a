//! Versioned metadata publication on object storage.
//!
//! Every metadata version is written to its own `v{N}.metadata.json` with a
//! create-only put, so two writers racing for version N cannot both win.
//! The loser sees a version conflict and rebuilds its commit on top of the
//! winner. `metadata.json` is then overwritten as a convenience pointer for
//! readers, skipped when a newer version is already listed. The check and the
//! overwrite are not atomic, so the pointer can still briefly lag; the latest
//! version is always found by listing.

use crate::config::CommitConfig;
use crate::error::{CommitError, WriteError};
use crate::iceberg::model::TableMetadata;
use crate::iceberg::store::{parse_version, TableLocation};
use crate::Result;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Commit counters.
#[derive(Debug, Default)]
pub struct CommitStats {
    /// Publish attempts
    pub commits_attempted: AtomicU64,
    /// Versions published
    pub commits_succeeded: AtomicU64,
    /// Commits abandoned after an error or exhausted retries
    pub commits_failed: AtomicU64,
    /// Version conflicts encountered
    pub version_conflicts: AtomicU64,
    /// Retries performed
    pub retries: AtomicU64,
}

impl CommitStats {
    pub fn success_rate(&self) -> f64 {
        let attempted = self.commits_attempted.load(Ordering::Relaxed);
        let succeeded = self.commits_succeeded.load(Ordering::Relaxed);
        if attempted == 0 {
            1.0
        } else {
            succeeded as f64 / attempted as f64
        }
    }
}

/// Exponential backoff before retry number `retry` (starting at 1).
pub fn calculate_backoff(config: &CommitConfig, retry: u32) -> Duration {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    let delay_ms = config.base_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(config.max_delay_ms))
}

/// Reads and publishes the metadata of one table.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn ObjectStore>,
    location: TableLocation,
}

fn upload_error(key: &ObjectPath, e: object_store::Error) -> crate::Error {
    WriteError::Upload(format!("failed to write {}: {}", key, e)).into()
}

impl MetadataStore {
    pub fn new(store: Arc<dyn ObjectStore>, location: TableLocation) -> Self {
        Self { store, location }
    }

    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// Highest published metadata version, `None` when the table does not exist.
    pub async fn latest_version(&self) -> Result<Option<i64>> {
        let prefix = self.location.metadata_dir();
        let listed: std::result::Result<Vec<_>, _> =
            self.store.list(Some(&prefix)).try_collect().await;
        let objects = match listed {
            Ok(objects) => objects,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(CommitError::Read(format!("failed to list {}: {}", prefix, e)).into())
            }
        };

        Ok(objects
            .iter()
            .filter_map(|meta| meta.location.filename().and_then(parse_version))
            .max())
    }

    /// Load the latest metadata version.
    pub async fn load(&self) -> Result<Option<TableMetadata>> {
        let Some(version) = self.latest_version().await? else {
            return Ok(None);
        };
        let bytes = self.read(&self.location.version_key(version)).await?;
        let json = std::str::from_utf8(&bytes)
            .map_err(|e| CommitError::Read(format!("metadata v{} is not UTF-8: {}", version, e)))?;
        let metadata = TableMetadata::from_json(json)?;
        if metadata.version() != version {
            return Err(CommitError::Read(format!(
                "metadata v{} records sequence number {}",
                version, metadata.last_sequence_number
            ))
            .into());
        }
        Ok(Some(metadata))
    }

    /// Publish `metadata` as version [`TableMetadata::version`].
    ///
    /// Fails with [`CommitError::VersionConflict`] when that version already
    /// exists.
    pub async fn publish(&self, metadata: &TableMetadata) -> Result<()> {
        let version = metadata.version();
        let key = self.location.version_key(version);
        let body = Bytes::from(metadata.to_json()?);

        match self
            .store
            .put_opts(
                &key,
                PutPayload::from_bytes(body.clone()),
                PutOptions::from(PutMode::Create),
            )
            .await
        {
            Ok(_) => {}
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(CommitError::VersionConflict {
                    expected: version - 1,
                    actual: version,
                }
                .into());
            }
            Err(e) => {
                return Err(
                    CommitError::Publish(format!("failed to write {}: {}", key, e)).into(),
                )
            }
        }
        debug!(version, key = %key, "Published metadata version");

        self.update_pointer(version, body).await;
        Ok(())
    }

    /// Point `metadata.json` at `version` unless a newer version is already
    /// published. Failures are logged, never returned.
    async fn update_pointer(&self, version: i64, body: Bytes) {
        match self.latest_version().await {
            Ok(Some(latest)) if latest > version => {
                debug!(version, latest, "Newer metadata published, leaving pointer");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(version, error = %e, "Failed to list metadata before pointer update");
                return;
            }
        }

        let pointer = self.location.pointer_key();
        if let Err(e) = self.store.put(&pointer, PutPayload::from_bytes(body)).await {
            warn!(version, error = %e, "Failed to update metadata pointer");
        }
    }

    pub async fn write_file(&self, key: &ObjectPath, data: Bytes) -> Result<()> {
        self.store
            .put(key, PutPayload::from_bytes(data))
            .await
            .map_err(|e| upload_error(key, e))?;
        Ok(())
    }

    pub async fn read(&self, key: &ObjectPath) -> Result<Bytes> {
        let result = self
            .store
            .get(key)
            .await
            .map_err(|e| CommitError::Read(format!("failed to read {}: {}", key, e)))?;
        Ok(result
            .bytes()
            .await
            .map_err(|e| CommitError::Read(format!("failed to read {}: {}", key, e)))?)
    }

    /// Delete every file under the table location. Returns the number deleted.
    pub async fn drop_table(&self) -> Result<usize> {
        let root = self.location.root_key();
        let listed: std::result::Result<Vec<_>, _> =
            self.store.list(Some(&root)).try_collect().await;
        let objects = match listed {
            Ok(objects) => objects,
            Err(object_store::Error::NotFound { .. }) => return Ok(0),
            Err(e) => return Err(upload_error(&root, e)),
        };

        for meta in &objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(upload_error(&meta.location, e)),
            }
        }
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::iceberg::model::{apply_commit, build_manifest, build_snapshot, next_snapshot_id, Operation};
    use crate::iceberg::partition::PartitionSpec;
    use crate::iceberg::store::{TableIdent, Warehouse};
    use crate::types::{LogicalType, Schema};
    use std::collections::BTreeMap;

    fn setup() -> MetadataStore {
        let warehouse = Warehouse::in_memory();
        let location = warehouse.table_location(&TableIdent::parse("db.events").unwrap());
        MetadataStore::new(warehouse.store(), location)
    }

    fn new_table(location: &TableLocation) -> TableMetadata {
        let schema = Schema::from_columns([("id", LogicalType::Long)]).unwrap();
        TableMetadata::new(
            location.uri.clone(),
            &schema,
            &PartitionSpec::unpartitioned(),
            BTreeMap::new(),
            1_000,
        )
    }

    fn next(meta: &TableMetadata, now: i64) -> TableMetadata {
        let parent = meta.current_snapshot();
        let manifest = build_manifest("m", vec![], next_snapshot_id(parent, now));
        let snapshot = build_snapshot(
            &manifest,
            parent,
            Operation::Append,
            "l",
            meta.last_sequence_number + 1,
            now,
            0,
        );
        apply_commit(meta, snapshot, &manifest).unwrap()
    }

    #[test]
    fn test_backoff() {
        let config = CommitConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        assert_eq!(calculate_backoff(&config, 1), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&config, 2), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&config, 3), Duration::from_millis(400));
        assert_eq!(calculate_backoff(&config, 5), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(&config, 80), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_missing_table_loads_none() {
        let store = setup();
        assert_eq!(store.latest_version().await.unwrap(), None);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_and_load_latest() {
        let store = setup();
        let v1 = new_table(store.location());
        store.publish(&v1).await.unwrap();
        let v2 = next(&v1, 2_000);
        store.publish(&v2).await.unwrap();

        assert_eq!(store.latest_version().await.unwrap(), Some(2));
        assert_eq!(store.load().await.unwrap(), Some(v2.clone()));

        let pointer = store.read(&store.location().pointer_key()).await.unwrap();
        let pointed = TableMetadata::from_json(std::str::from_utf8(&pointer).unwrap()).unwrap();
        assert_eq!(pointed, v2);
    }

    #[tokio::test]
    async fn test_second_publisher_of_a_version_conflicts() {
        let store = setup();
        let v1 = new_table(store.location());
        store.publish(&v1).await.unwrap();

        let ours = next(&v1, 2_000);
        let theirs = next(&v1, 3_000);
        store.publish(&theirs).await.unwrap();

        let err = store.publish(&ours).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MetadataCommit(CommitError::VersionConflict {
                expected: 1,
                actual: 2
            })
        ));
        assert_eq!(store.load().await.unwrap(), Some(theirs));
    }

    #[tokio::test]
    async fn test_pointer_never_moves_back() {
        let store = setup();
        let v1 = new_table(store.location());
        store.publish(&v1).await.unwrap();
        let v2 = next(&v1, 2_000);
        store.publish(&v2).await.unwrap();

        // A slow writer of v1 finishing after v2 landed.
        store
            .update_pointer(1, Bytes::from(v1.to_json().unwrap()))
            .await;

        let pointer = store.read(&store.location().pointer_key()).await.unwrap();
        let pointed = TableMetadata::from_json(std::str::from_utf8(&pointer).unwrap()).unwrap();
        assert_eq!(pointed, v2);
    }

    #[tokio::test]
    async fn test_drop_table_removes_everything() {
        let store = setup();
        store.publish(&new_table(store.location())).await.unwrap();
        let (_, data_key) = store.location().new_data_file();
        store.write_file(&data_key, Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(store.drop_table().await.unwrap(), 3);
        assert!(store.load().await.unwrap().is_none());
    }
}
