//! SQL engine abstraction.

use crate::Result;
use async_trait::async_trait;

/// Rows returned by a statement, values kept as JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// String value of `column` in row `row`, if present.
    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row)?.get(idx)?.as_str()
    }
}

/// Something that executes SQL text against a table engine.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Execute `sql` and collect any rows it returns.
    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    /// Statements the engine accepts per request; `None` means a delimited
    /// script of any length is fine.
    fn max_statements_per_request(&self) -> Option<usize> {
        Some(1)
    }

    /// Short engine name for logs.
    fn name(&self) -> &str;
}
