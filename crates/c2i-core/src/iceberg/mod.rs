//! Object-store write path for Iceberg tables.
//!
//! This module writes tables without a catalog service:
//!
//! - Rows → Arrow → Parquet data files with configurable compression
//! - Partition transforms and per-partition file splitting
//! - Avro manifests and manifest lists
//! - Versioned metadata documents published with create-only puts
//! - Object storage on S3 or the local filesystem

pub mod commit;
pub mod encoding;
pub mod manifest;
pub mod model;
pub mod parquet;
pub mod partition;
pub mod store;
mod writer;

pub use commit::{calculate_backoff, CommitStats, MetadataStore};
pub use manifest::{ManifestEntrySummary, ManifestListEntry};
pub use model::{
    apply_commit, build_data_file, build_manifest, build_snapshot, next_snapshot_id, DataFile,
    Manifest, Operation, Snapshot, SnapshotLogEntry, SnapshotSummary, TableMetadata,
};
pub use partition::{PartitionField, PartitionSpec, Transform};
pub use store::{TableIdent, TableLocation, Warehouse};
pub use writer::{check_compatibility, ObjectStoreTableWriter, ObjectStoreWriterStats};
