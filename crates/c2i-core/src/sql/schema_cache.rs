//! Cached column types of the target table.

use crate::sql::types::SqlType;
use std::collections::HashMap;

/// Column name to engine type mapping for one table, filled lazily.
///
/// Owned by a single writer. Call [`invalidate`](Self::invalidate) whenever
/// the table's DDL may have changed.
#[derive(Debug, Default)]
pub struct TargetSchemaCache {
    columns: Option<Vec<(String, SqlType)>>,
    lookup: HashMap<String, usize>,
}

impl TargetSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.columns.is_some()
    }

    /// Replace the cached columns, in table ordinal order.
    pub fn populate(&mut self, columns: Vec<(String, SqlType)>) {
        self.lookup = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.to_lowercase(), i))
            .collect();
        self.columns = Some(columns);
    }

    pub fn invalidate(&mut self) {
        self.columns = None;
        self.lookup.clear();
    }

    /// Cached type of a column, case-insensitive.
    pub fn column_type(&self, name: &str) -> Option<&SqlType> {
        let idx = self.lookup.get(&name.to_lowercase())?;
        self.columns.as_ref()?.get(*idx).map(|(_, ty)| ty)
    }

    pub fn columns(&self) -> Option<&[(String, SqlType)]> {
        self.columns.as_deref()
    }
}
