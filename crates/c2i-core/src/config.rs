//! Configuration structures for c2i.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Write behaviour shared by both backends
    pub writer: WriterConfig,

    /// SQL engine backend configuration
    #[serde(default)]
    pub sql: SqlConfig,

    /// Object-store backend configuration
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Metadata commit retry configuration
    #[serde(default)]
    pub commit: CommitConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Write configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterConfig {
    /// Target table name (`catalog.schema.table` for SQL, `namespace.table` for object store)
    pub table: String,

    /// Which backend performs the write
    #[serde(default)]
    pub connection: ConnectionType,

    /// Rows per batch handed to the backend
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Append to or replace the table contents
    #[serde(default)]
    pub mode: WriteMode,

    /// Record intended operations instead of executing them
    #[serde(default)]
    pub dry_run: bool,
}

/// Backend selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Write through a SQL engine with INSERT statements
    #[default]
    Sql,
    /// Write data files and metadata directly to object storage
    ObjectStore,
}

/// Write mode for a conversion.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Add rows to the existing table contents
    #[default]
    Append,
    /// Replace the table contents
    Overwrite,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL engine (Trino) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqlConfig {
    /// Engine host
    #[serde(default)]
    pub host: String,

    /// Engine HTTP port
    #[serde(default = "default_sql_port")]
    pub port: u16,

    /// User sent with every request
    #[serde(default = "default_sql_user")]
    pub user: String,

    /// HTTP scheme (http or https)
    #[serde(default = "default_http_scheme")]
    pub http_scheme: String,

    /// Default catalog for unqualified table names
    #[serde(default)]
    pub catalog: String,

    /// Default schema for unqualified table names
    #[serde(default = "default_sql_schema")]
    pub schema: String,

    /// Byte budget for one submitted statement batch
    #[serde(default = "default_max_query_size")]
    pub max_query_size: usize,

    /// Upper bound on rows packed into one INSERT statement
    #[serde(default = "default_max_rows_per_statement")]
    pub max_rows_per_statement: usize,

    /// Delimiter placed between statements packed into one batch
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Table format named in the CREATE TABLE properties (None omits the WITH clause)
    #[serde(default = "default_table_format")]
    pub table_format: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_sql_port(),
            user: default_sql_user(),
            http_scheme: default_http_scheme(),
            catalog: String::new(),
            schema: default_sql_schema(),
            max_query_size: default_max_query_size(),
            max_rows_per_statement: default_max_rows_per_statement(),
            delimiter: default_delimiter(),
            table_format: default_table_format(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl SqlConfig {
    /// Base URI of the engine's HTTP endpoint.
    pub fn base_uri(&self) -> String {
        format!("{}://{}:{}", self.http_scheme, self.host, self.port)
    }
}

/// Object-store backend configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    /// Warehouse path (S3 URI or local path)
    #[serde(default)]
    pub warehouse_path: String,

    /// AWS region
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,

    /// Parquet compression
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Partition specification
    #[serde(default)]
    pub partition_spec: Vec<PartitionFieldConfig>,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Snappy compression (default, good balance)
    #[default]
    Snappy,
    /// Zstd compression (better ratio)
    Zstd,
    /// LZ4 compression (faster)
    Lz4,
    /// Gzip compression
    Gzip,
    /// No compression
    None,
}

impl ParquetCompression {
    /// Codec name recorded in table properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParquetCompression::Snappy => "snappy",
            ParquetCompression::Zstd => "zstd",
            ParquetCompression::Lz4 => "lz4",
            ParquetCompression::Gzip => "gzip",
            ParquetCompression::None => "uncompressed",
        }
    }
}

/// Partition field specification as written in configuration.
///
/// `transform` accepts `identity`, `year`, `month`, `day`, `hour`,
/// `bucket[N]` and `truncate[N]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PartitionFieldConfig {
    /// Source column name
    pub source_field: String,

    /// Partition transform
    #[serde(default = "default_transform")]
    pub transform: String,
}

/// Metadata commit retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitConfig {
    /// Maximum number of retries after a version conflict
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions

fn default_batch_size() -> usize {
    10_000
}

fn default_sql_port() -> u16 {
    8080
}

fn default_sql_user() -> String {
    "c2i".to_string()
}

fn default_http_scheme() -> String {
    "http".to_string()
}

fn default_sql_schema() -> String {
    "default".to_string()
}

/// 70% of the 1 MB query text limit commonly enforced in front of Trino.
fn default_max_query_size() -> usize {
    700_000
}

fn default_max_rows_per_statement() -> usize {
    500
}

fn default_delimiter() -> String {
    ";\n".to_string()
}

fn default_table_format() -> Option<String> {
    Some("ICEBERG".to_string())
}

fn default_request_timeout_seconds() -> u64 {
    300
}

fn default_transform() -> String {
    "identity".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.writer.table.trim().is_empty() {
            return Err(crate::Error::Config("Table name is required".into()));
        }

        if self.writer.batch_size == 0 {
            return Err(crate::Error::Config(
                "Batch size must be greater than zero".into(),
            ));
        }

        match self.writer.connection {
            ConnectionType::Sql => {
                if self.sql.host.is_empty() {
                    return Err(crate::Error::Config(
                        "SQL connection requires a host".into(),
                    ));
                }
                if self.sql.max_query_size == 0 {
                    return Err(crate::Error::Config(
                        "max_query_size must be greater than zero".into(),
                    ));
                }
                if self.sql.max_rows_per_statement == 0 {
                    return Err(crate::Error::Config(
                        "max_rows_per_statement must be greater than zero".into(),
                    ));
                }
                // Catalog may come from the table name itself.
                let parts = self.writer.table.split('.').count();
                if parts < 3 && self.sql.catalog.is_empty() {
                    return Err(crate::Error::Config(
                        "SQL connection requires a catalog (in [sql] or as catalog.schema.table)"
                            .into(),
                    ));
                }
            }
            ConnectionType::ObjectStore => {
                if self.object_store.warehouse_path.is_empty() {
                    return Err(crate::Error::Config("Warehouse path is required".into()));
                }
                for field in &self.object_store.partition_spec {
                    crate::iceberg::Transform::parse(&field.transform)
                        .map_err(|e| crate::Error::Config(e.to_string()))?;
                }
            }
        }

        if self.sql.max_query_size > 16 * 1024 * 1024 {
            tracing::warn!(
                max_query_size = self.sql.max_query_size,
                "max_query_size exceeds the engine's 16 MiB query text limit"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_config() -> Config {
        Config {
            writer: WriterConfig {
                table: "iceberg.sales.orders".into(),
                connection: ConnectionType::Sql,
                batch_size: default_batch_size(),
                mode: WriteMode::Append,
                dry_run: false,
            },
            sql: SqlConfig {
                host: "localhost".into(),
                ..Default::default()
            },
            object_store: ObjectStoreConfig::default(),
            commit: CommitConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    #[test]
    fn test_default_sql_config() {
        let config = SqlConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_query_size, 700_000);
        assert_eq!(config.max_rows_per_statement, 500);
        assert_eq!(config.delimiter, ";\n");
        assert_eq!(config.table_format.as_deref(), Some("ICEBERG"));
    }

    #[test]
    fn test_default_commit_config() {
        let config = CommitConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.max_delay_ms, 5000);
    }

    #[test]
    fn test_config_validation() {
        assert!(sql_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_table() {
        let mut config = sql_config();
        config.writer.table = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_batch_size() {
        let mut config = sql_config();
        config.writer.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_missing_catalog() {
        let mut config = sql_config();
        config.writer.table = "orders".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("catalog"));

        config.sql.catalog = "iceberg".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_object_store() {
        let mut config = sql_config();
        config.writer.connection = ConnectionType::ObjectStore;
        config.writer.table = "sales.orders".into();
        assert!(config.validate().is_err());

        config.object_store.warehouse_path = "/tmp/warehouse".into();
        assert!(config.validate().is_ok());

        config.object_store.partition_spec = vec![PartitionFieldConfig {
            source_field: "region".into(),
            transform: "bucket[0]".into(),
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [writer]
            table = "warehouse.events"
            connection = "object_store"
            mode = "overwrite"
            dry_run = true

            [object_store]
            warehouse_path = "s3://bucket/warehouse"
            compression = "zstd"
            partition_spec = [
                { source_field = "created_at", transform = "day" },
                { source_field = "customer_id", transform = "bucket[16]" },
            ]

            [monitoring]
            log_format = "text"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.writer.connection, ConnectionType::ObjectStore);
        assert_eq!(config.writer.mode, WriteMode::Overwrite);
        assert_eq!(config.writer.batch_size, 10_000);
        assert!(config.writer.dry_run);
        assert_eq!(config.object_store.compression, ParquetCompression::Zstd);
        assert_eq!(config.object_store.partition_spec.len(), 2);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_write_mode_variants() {
        assert_eq!(WriteMode::default(), WriteMode::Append);
        assert_eq!(WriteMode::Overwrite.to_string(), "overwrite");
    }

    #[test]
    fn test_parquet_compression_variants() {
        assert_eq!(ParquetCompression::default(), ParquetCompression::Snappy);
        assert_eq!(ParquetCompression::None.as_str(), "uncompressed");
    }

    #[test]
    fn test_log_format_variants() {
        assert_eq!(LogFormat::default(), LogFormat::Json);
        assert_eq!(LogLevel::default().as_filter(), "info");
    }
}
