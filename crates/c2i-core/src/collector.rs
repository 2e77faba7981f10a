//! Dry-run query collection.
//!
//! Backends record the DDL and DML they would have executed. The
//! orchestrator turns the collected records into a [`DryRunReport`].

use serde::{Deserialize, Serialize};

/// Rows per second assumed when estimating execution time.
const ESTIMATED_ROWS_PER_SECOND: f64 = 5000.0;

/// Kind of a collected statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryKind {
    Ddl,
    Dml,
}

/// Context attached to statements handed to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMetadata {
    pub kind: QueryKind,
    pub table_name: String,
}

impl QueryMetadata {
    pub fn ddl(table_name: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Ddl,
            table_name: table_name.into(),
        }
    }

    pub fn dml(table_name: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Dml,
            table_name: table_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DdlRecord {
    pub query: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmlRecord {
    pub query: String,
    pub row_count: usize,
    pub table_name: String,
}

/// Summary counters of a dry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DryRunStats {
    pub total_rows: usize,
    pub batches: usize,
    /// Seconds
    pub estimated_execution_time: f64,
    pub tables_created: usize,
    pub tables_modified: usize,
}

/// Everything a dry run would have executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DryRunReport {
    pub ddl_statements: Vec<DdlRecord>,
    pub dml_statements: Vec<DmlRecord>,
    pub stats: DryRunStats,
}

/// Accumulates would-be statements during a dry run.
#[derive(Debug, Clone, Default)]
pub struct QueryCollector {
    report: DryRunReport,
}

impl QueryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a statement according to its metadata kind.
    pub fn collect(&mut self, query: impl Into<String>, metadata: &QueryMetadata, row_count: usize) {
        match metadata.kind {
            QueryKind::Ddl => self.add_ddl(query, &metadata.table_name),
            QueryKind::Dml => self.add_dml(query, row_count, &metadata.table_name),
        }
    }

    pub fn add_ddl(&mut self, query: impl Into<String>, table_name: &str) {
        let query = query.into();
        let upper = query.to_uppercase();

        if upper.contains("CREATE TABLE") {
            self.report.stats.tables_created += 1;
        } else if upper.contains("ALTER TABLE")
            || upper.contains("TRUNCATE")
            || upper.contains("DELETE FROM")
            || upper.contains("DROP TABLE")
        {
            self.report.stats.tables_modified += 1;
        }

        self.report.ddl_statements.push(DdlRecord {
            query,
            table_name: table_name.to_string(),
        });
    }

    pub fn add_dml(&mut self, query: impl Into<String>, row_count: usize, table_name: &str) {
        self.report.dml_statements.push(DmlRecord {
            query: query.into(),
            row_count,
            table_name: table_name.to_string(),
        });

        let stats = &mut self.report.stats;
        stats.total_rows += row_count;
        stats.batches += 1;
        stats.estimated_execution_time += row_count as f64 / ESTIMATED_ROWS_PER_SECOND;
    }

    /// Number of collected records, DDL and DML combined.
    pub fn len(&self) -> usize {
        self.report.ddl_statements.len() + self.report.dml_statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report(&self) -> &DryRunReport {
        &self.report
    }

    pub fn into_report(self) -> DryRunReport {
        self.report
    }

    pub fn clear(&mut self) {
        self.report = DryRunReport::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_classification() {
        let mut collector = QueryCollector::new();
        collector.add_ddl("CREATE TABLE c.s.t (id BIGINT)", "c.s.t");
        collector.add_ddl("DELETE FROM c.s.t", "c.s.t");
        collector.add_ddl("alter table c.s.t add column x int", "c.s.t");
        collector.add_ddl("SHOW TABLES", "c.s.t");

        let stats = &collector.report().stats;
        assert_eq!(stats.tables_created, 1);
        assert_eq!(stats.tables_modified, 2);
        assert_eq!(collector.report().ddl_statements.len(), 4);
    }

    #[test]
    fn test_dml_accumulates_stats() {
        let mut collector = QueryCollector::new();
        collector.collect("INSERT ...", &QueryMetadata::dml("c.s.t"), 10_000);
        collector.collect("INSERT ...", &QueryMetadata::dml("c.s.t"), 5_000);

        let stats = &collector.report().stats;
        assert_eq!(stats.total_rows, 15_000);
        assert_eq!(stats.batches, 2);
        assert!((stats.estimated_execution_time - 3.0).abs() < f64::EPSILON);
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn test_report_serializes() {
        let mut collector = QueryCollector::new();
        collector.collect("CREATE TABLE t (a INTEGER)", &QueryMetadata::ddl("t"), 0);
        let json = serde_json::to_value(collector.into_report()).unwrap();
        assert_eq!(json["ddl_statements"][0]["table_name"], "t");
        assert_eq!(json["stats"]["tables_created"], 1);
        assert!(json["dml_statements"].as_array().unwrap().is_empty());
    }
}
