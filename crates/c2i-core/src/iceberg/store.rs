//! Warehouse object stores and table file locations.

use crate::config::ObjectStoreConfig;
use crate::error::WriteError;
use crate::{Error, Result};
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Namespace and table name of an object-store table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdent {
    pub namespace: Vec<String>,
    pub name: String,
}

impl TableIdent {
    pub const DEFAULT_NAMESPACE: &'static str = "default";

    /// Parse `table` or `ns.table` (nested namespaces allowed).
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::Config(format!("invalid table name '{}'", s)));
        }
        let (name, namespace) = parts
            .split_last()
            .ok_or_else(|| Error::Config(format!("invalid table name '{}'", s)))?;
        let namespace = if namespace.is_empty() {
            vec![Self::DEFAULT_NAMESPACE.to_string()]
        } else {
            namespace.iter().map(|p| p.trim().to_string()).collect()
        };
        Ok(Self {
            namespace,
            name: name.trim().to_string(),
        })
    }

    fn relative_path(&self) -> String {
        format!("{}/{}", self.namespace.join("/"), self.name)
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace.join("."), self.name)
    }
}

/// Where a table's files live: the URI recorded in metadata, and the key
/// prefix inside the warehouse store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub uri: String,
    prefix: String,
}

impl TableLocation {
    pub fn new(uri: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            uri: uri.into().trim_end_matches('/').to_string(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn key(&self, relative: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(relative)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, relative))
        }
    }

    /// Key prefix covering every file of the table.
    pub fn root_key(&self) -> ObjectPath {
        ObjectPath::from(self.prefix.as_str())
    }

    pub fn metadata_dir(&self) -> ObjectPath {
        self.key("metadata")
    }

    /// Create-only key of metadata version `version`.
    pub fn version_key(&self, version: i64) -> ObjectPath {
        self.key(&format!("metadata/v{}.metadata.json", version))
    }

    /// Key of the pointer to the latest metadata version.
    pub fn pointer_key(&self) -> ObjectPath {
        self.key("metadata/metadata.json")
    }

    /// URI and key for a new data file.
    pub fn new_data_file(&self) -> (String, ObjectPath) {
        self.file(format!("data/{}.parquet", Uuid::new_v4()))
    }

    /// URI and key for a new manifest.
    pub fn new_manifest(&self) -> (String, ObjectPath) {
        self.file(format!("metadata/manifest-{}.avro", Uuid::new_v4()))
    }

    /// URI and key for the manifest list of `snapshot_id`.
    pub fn new_manifest_list(&self, snapshot_id: i64) -> (String, ObjectPath) {
        self.file(format!("metadata/snap-{}-{}.avro", snapshot_id, Uuid::new_v4()))
    }

    fn file(&self, relative: String) -> (String, ObjectPath) {
        (format!("{}/{}", self.uri, relative), self.key(&relative))
    }

    /// Map a URI under this table back to its store key.
    pub fn key_for_uri(&self, uri: &str) -> Option<ObjectPath> {
        let relative = uri.strip_prefix(&self.uri)?.strip_prefix('/')?;
        Some(self.key(relative))
    }
}

/// Parse a version number out of a `v{N}.metadata.json` file name.
pub fn parse_version(file_name: &str) -> Option<i64> {
    file_name
        .strip_prefix('v')?
        .strip_suffix(".metadata.json")?
        .parse()
        .ok()
}

/// Object store rooted at the warehouse, plus how to name tables in it.
#[derive(Clone)]
pub struct Warehouse {
    store: Arc<dyn ObjectStore>,
    root_uri: String,
    key_prefix: String,
}

impl fmt::Debug for Warehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warehouse")
            .field("root_uri", &self.root_uri)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl Warehouse {
    /// Open the warehouse named by `config.warehouse_path`: `s3://bucket/prefix`
    /// or a local directory, created if missing.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let path = config.warehouse_path.trim();
        if path.is_empty() {
            return Err(Error::Config("object_store.warehouse_path is required".into()));
        }
        if let Some(rest) = path.strip_prefix("s3://") {
            Self::s3(rest, config)
        } else if path.contains("://") && !path.starts_with("file://") {
            Err(Error::Config(format!(
                "unsupported warehouse scheme in '{}'",
                path
            )))
        } else {
            Self::local(path.strip_prefix("file://").unwrap_or(path))
        }
    }

    fn s3(rest: &str, config: &ObjectStoreConfig) -> Result<Self> {
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::Config("invalid S3 warehouse path".into()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch);
        if let Some(ref region) = config.aws_region {
            builder = builder.with_region(region);
        }
        if let Some(ref access_key) = config.aws_access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(ref secret_key) = config.aws_secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(ref endpoint) = config.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| Error::Connection(format!("failed to create S3 store: {}", e)))?;
        let prefix = prefix.trim_matches('/');
        let root_uri = if prefix.is_empty() {
            format!("s3://{}", bucket)
        } else {
            format!("s3://{}/{}", bucket, prefix)
        };

        Ok(Self {
            store: Arc::new(store),
            root_uri,
            key_prefix: prefix.to_string(),
        })
    }

    fn local(path: &str) -> Result<Self> {
        let dir = std::path::Path::new(path);
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| {
                WriteError::Upload(format!("failed to create local warehouse directory: {}", e))
            })?;
        }
        let dir = dir.canonicalize()?;
        let store = LocalFileSystem::new_with_prefix(&dir)
            .map_err(|e| Error::Connection(format!("failed to open local warehouse: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            root_uri: format!("file://{}", dir.display()),
            key_prefix: String::new(),
        })
    }

    /// In-memory warehouse, used by tests and dry runs that need no storage.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemory::new()), "memory://warehouse")
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, root_uri: impl Into<String>) -> Self {
        Self {
            store,
            root_uri: root_uri.into().trim_end_matches('/').to_string(),
            key_prefix: String::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    pub fn table_location(&self, ident: &TableIdent) -> TableLocation {
        let relative = ident.relative_path();
        let prefix = if self.key_prefix.is_empty() {
            relative.clone()
        } else {
            format!("{}/{}", self.key_prefix, relative)
        };
        TableLocation::new(format!("{}/{}", self.root_uri, relative), prefix)
    }
}
