//! Integration tests for c2i-core.
//!
//! The object-store and mock-engine tests run everywhere. Tests against a
//! real SQL engine require Docker and are marked with #[ignore].
//!
//! Run with: cargo test --test integration_tests -- --ignored

use c2i_core::config::{ObjectStoreConfig, PartitionFieldConfig, SqlConfig};
use c2i_core::iceberg::{MetadataStore, ObjectStoreTableWriter, TableIdent, Warehouse};
use c2i_core::sql::{SqlBackend, SqlTableName, SqlTableWriter};
use c2i_core::{
    Config, ConversionOrchestrator, Field, JsonLinesSource, LogicalType, Row, Schema, TableState,
    Value, VecRowSource, WriteMode,
};
use std::sync::Arc;
use tempfile::TempDir;

fn events_schema() -> Schema {
    Schema::new(vec![
        Field::new(1, "id", LogicalType::Long).required(),
        Field::new(2, "name", LogicalType::String),
        Field::new(3, "event_day", LogicalType::Date),
    ])
    .unwrap()
}

fn events(n: i64) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1 + (i % 2) as u32).unwrap();
            Row::from([
                ("id".to_string(), Value::Integer(i)),
                ("name".to_string(), Value::String(format!("event-{}", i))),
                ("event_day".to_string(), Value::Date(day)),
            ])
        })
        .collect()
}

mod object_store_conversion {
    use super::*;

    fn config(warehouse: &TempDir, mode: &str, batch_size: usize) -> Config {
        let toml = format!(
            r#"
            [writer]
            table = "db.events"
            connection = "object_store"
            mode = "{}"
            batch_size = {}

            [object_store]
            warehouse_path = "{}"
            "#,
            mode,
            batch_size,
            warehouse.path().display()
        );
        toml::from_str(&toml).unwrap()
    }

    async fn load(config: &Config) -> c2i_core::iceberg::TableMetadata {
        let warehouse = Warehouse::from_config(&config.object_store).unwrap();
        let location = warehouse.table_location(&TableIdent::parse("db.events").unwrap());
        MetadataStore::new(warehouse.store(), location)
            .load()
            .await
            .unwrap()
            .expect("table metadata")
    }

    #[tokio::test]
    async fn test_append_runs_chain_snapshots() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "append", 2);

        let mut orchestrator = ConversionOrchestrator::from_config(&config).unwrap();
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(5)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.table_state, Some(TableState::Created));
        assert_eq!(result.metrics.total_batches, 3);

        // One version for the create, one per committed batch
        let metadata = load(&config).await;
        assert_eq!(metadata.version(), 4);
        assert_eq!(metadata.snapshots.len(), 3);
        let current = metadata.current_snapshot().unwrap();
        assert_eq!(Some(current.snapshot_id), result.snapshot_id);
        assert_eq!(current.summary.total_rows, 5);

        // A second run appends to the existing table
        let mut orchestrator = ConversionOrchestrator::from_config(&config).unwrap();
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(3)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.table_state, Some(TableState::Existing));

        let metadata = load(&config).await;
        assert_eq!(metadata.version(), 6);
        assert_eq!(metadata.current_snapshot().unwrap().summary.total_rows, 8);
        assert!(dir.path().join("db/events/data").is_dir());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let dir = TempDir::new().unwrap();

        let append = config(&dir, "append", 10);
        let mut orchestrator = ConversionOrchestrator::from_config(&append).unwrap();
        assert!(
            orchestrator
                .run(&mut VecRowSource::new(events_schema(), events(6)))
                .await
                .success
        );

        let overwrite = config(&dir, "overwrite", 1);
        let mut orchestrator = ConversionOrchestrator::from_config(&overwrite).unwrap();
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(2)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.table_state, Some(TableState::Recreated));

        // Later batches of an overwrite append to the replaced table
        let metadata = load(&overwrite).await;
        assert_eq!(metadata.snapshots.len(), 2);
        assert_eq!(metadata.current_snapshot().unwrap().summary.total_rows, 2);
    }

    #[tokio::test]
    async fn test_json_lines_into_partitioned_table() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, "append", 100);
        config.object_store.partition_spec = vec![PartitionFieldConfig {
            source_field: "event_day".into(),
            transform: "day".into(),
        }];

        let input = dir.path().join("events.jsonl");
        std::fs::write(
            &input,
            "{\"id\": 1, \"name\": \"a\", \"event_day\": \"2024-01-01\"}\n\
             {\"id\": 2, \"name\": \"b\", \"event_day\": \"2024-01-02\"}\n\
             {\"id\": 3, \"name\": \"c\", \"event_day\": \"2024-01-01\"}\n",
        )
        .unwrap();

        let mut source = JsonLinesSource::open(&input, events_schema()).await.unwrap();
        let mut orchestrator = ConversionOrchestrator::from_config(&config).unwrap();
        let result = orchestrator.run(&mut source).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.rows_processed, 3);

        let metadata = load(&config).await;
        let summary = &metadata.current_snapshot().unwrap().summary;
        assert_eq!(summary.added_rows, 3);
        assert_eq!(summary.added_files, 2);
        assert_eq!(metadata.default_spec().fields.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_warehouse_untouched() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, "append", 2);
        config.writer.dry_run = true;

        let mut orchestrator = ConversionOrchestrator::from_config(&config).unwrap();
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(4)))
            .await;
        assert!(result.success, "{:?}", result.error);

        let report = result.dry_run_report.expect("dry run report");
        assert_eq!(report.ddl_statements.len(), 1);
        assert!(report.ddl_statements[0].query.starts_with("CREATE TABLE db.events"));
        assert_eq!(report.dml_statements.len(), 2);
        assert_eq!(report.stats.total_rows, 4);
        assert!(!dir.path().join("db").exists());
    }

    #[tokio::test]
    async fn test_incompatible_schema_fails_before_writing() {
        let warehouse = Warehouse::in_memory();
        let store_config = ObjectStoreConfig::default();

        let writer = ObjectStoreTableWriter::new(
            &warehouse,
            "db.events",
            &store_config,
            Default::default(),
            false,
        )
        .unwrap();
        let mut orchestrator = ConversionOrchestrator::new(Box::new(writer), WriteMode::Append, 10);
        assert!(
            orchestrator
                .run(&mut VecRowSource::new(events_schema(), events(1)))
                .await
                .success
        );

        let narrowed = Schema::new(vec![
            Field::new(1, "id", LogicalType::Integer).required(),
            Field::new(2, "name", LogicalType::Long),
        ])
        .unwrap();
        let writer = ObjectStoreTableWriter::new(
            &warehouse,
            "db.events",
            &store_config,
            Default::default(),
            false,
        )
        .unwrap();
        let mut orchestrator = ConversionOrchestrator::new(Box::new(writer), WriteMode::Append, 10);
        let result = orchestrator
            .run(&mut VecRowSource::new(narrowed, Vec::new()))
            .await;
        assert!(!result.success);
        assert_eq!(result.rows_processed, 0);
        assert!(result.error.unwrap().contains("ensure_table"));
    }
}

mod sql_conversion {
    use super::*;
    use async_trait::async_trait;
    use c2i_core::sql::{QueryOutput, SqlEngine};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Engine double with an initially missing table.
    #[derive(Default)]
    struct RecordingEngine {
        created: Mutex<bool>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlEngine for RecordingEngine {
        async fn execute(&self, sql: &str) -> c2i_core::Result<QueryOutput> {
            if sql.contains("information_schema.tables") {
                let rows = if *self.created.lock() {
                    vec![vec![json!("events")]]
                } else {
                    vec![]
                };
                return Ok(QueryOutput {
                    columns: vec!["table_name".into()],
                    rows,
                });
            }
            if sql.contains("information_schema.columns") {
                return Ok(QueryOutput {
                    columns: vec!["column_name".into(), "data_type".into()],
                    rows: vec![
                        vec![json!("id"), json!("bigint")],
                        vec![json!("name"), json!("varchar")],
                        vec![json!("event_day"), json!("date")],
                    ],
                });
            }
            if sql.starts_with("CREATE TABLE") {
                *self.created.lock() = true;
            }
            self.executed.lock().push(sql.to_string());
            Ok(QueryOutput::default())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn backend(engine: Arc<RecordingEngine>, dry_run: bool) -> SqlBackend {
        let config = SqlConfig {
            catalog: "iceberg".into(),
            table_format: None,
            ..Default::default()
        };
        let table = SqlTableName::resolve("analytics.events", &config).unwrap();
        SqlBackend::new(SqlTableWriter::new(engine, table, &config, dry_run))
    }

    #[tokio::test]
    async fn test_creates_table_and_inserts_rows() {
        let engine = Arc::new(RecordingEngine::default());
        let mut orchestrator = ConversionOrchestrator::new(
            Box::new(backend(Arc::clone(&engine), false)),
            WriteMode::Append,
            2,
        );
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(3)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.table_state, Some(TableState::Created));

        let executed = engine.executed.lock().clone();
        assert!(executed[0].starts_with("CREATE TABLE iceberg.analytics.events"));
        let inserts: Vec<_> = executed.iter().filter(|s| s.starts_with("INSERT")).collect();
        assert_eq!(inserts.len(), 2);
        assert!(inserts[0].contains("DATE '2024-01-01'"));
    }

    #[tokio::test]
    async fn test_dry_run_records_without_executing() {
        let engine = Arc::new(RecordingEngine::default());
        let mut orchestrator = ConversionOrchestrator::new(
            Box::new(backend(Arc::clone(&engine), true)),
            WriteMode::Append,
            10,
        );
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(4)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert!(engine.executed.lock().is_empty());

        let report = result.dry_run_report.expect("dry run report");
        assert_eq!(report.ddl_statements.len(), 1);
        let rows: usize = report.dml_statements.iter().map(|d| d.row_count).sum();
        assert_eq!(rows, 4);
    }
}

mod trino_integration {
    use super::*;
    use testcontainers::core::{IntoContainerPort, WaitFor};
    use testcontainers::runners::AsyncRunner;
    use testcontainers::GenericImage;

    /// Append through a real engine using its in-memory catalog.
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_append_through_trino() {
        let trino = GenericImage::new("trinodb/trino", "latest")
            .with_exposed_port(8080.tcp())
            .with_wait_for(WaitFor::message_on_stderr("SERVER STARTED"))
            .start()
            .await
            .expect("Failed to start Trino container");
        let port = trino
            .get_host_port_ipv4(8080)
            .await
            .expect("Failed to get Trino port");

        let toml = format!(
            r#"
            [writer]
            table = "memory.default.events"
            batch_size = 2

            [sql]
            host = "127.0.0.1"
            port = {}
            "#,
            port
        );
        let mut config: Config = toml::from_str(&toml).unwrap();
        // The memory connector has no table format property
        config.sql.table_format = None;

        let mut orchestrator = ConversionOrchestrator::from_config(&config).unwrap();
        let result = orchestrator
            .run(&mut VecRowSource::new(events_schema(), events(5)))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.rows_processed, 5);
    }
}
