//! Byte-budget statement packer.
//!
//! Packs statements into batches whose joined UTF-8 size stays within
//! `max_bytes`. A statement larger than the budget on its own is always
//! flushed alone. Statements are never reordered, dropped or duplicated.

use crate::collector::{QueryCollector, QueryMetadata};
use crate::Result;
use std::future::Future;
use tracing::{debug, warn};

/// Default delimiter between packed statements.
pub const DEFAULT_DELIMITER: &str = ";\n";

/// A statement with the number of rows it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub row_count: usize,
}

impl Statement {
    pub fn new(sql: impl Into<String>, row_count: usize) -> Self {
        Self {
            sql: sql.into(),
            row_count,
        }
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self { sql, row_count: 0 }
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::from(sql.to_string())
    }
}

/// Packs statements under a byte budget and hands each batch to an executor.
#[derive(Debug)]
pub struct StatementBatcher {
    max_bytes: usize,
    delimiter: String,
    max_statements: Option<usize>,
    dry_run: bool,
    current_batch: Vec<String>,
    current_size: usize,
    current_rows: usize,
}

impl StatementBatcher {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            delimiter: DEFAULT_DELIMITER.to_string(),
            max_statements: None,
            dry_run: false,
            current_batch: Vec::new(),
            current_size: 0,
            current_rows: 0,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Cap the number of statements per batch, for engines that accept
    /// one statement per request.
    pub fn with_max_statements(mut self, max_statements: Option<usize>) -> Self {
        self.max_statements = max_statements.filter(|n| *n > 0);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Statements waiting in the current batch.
    pub fn pending(&self) -> usize {
        self.current_batch.len()
    }

    /// Current batch size in bytes, delimiters included.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Try to add a statement to the current batch.
    ///
    /// Returns `true` when the batch must be flushed before this statement
    /// can be added; the batch is left untouched in that case.
    pub fn add(&mut self, statement: &Statement) -> bool {
        let delimiter_len = if self.current_batch.is_empty() {
            0
        } else {
            self.delimiter.len()
        };
        let size = statement.sql.len() + delimiter_len;

        if let Some(limit) = self.max_statements {
            if self.current_batch.len() >= limit {
                return true;
            }
        }

        if size > self.max_bytes {
            if !self.current_batch.is_empty() {
                return true;
            }
            warn!(
                size_bytes = size,
                max_bytes = self.max_bytes,
                "Statement exceeds the batch byte budget, sending it alone"
            );
        } else if self.current_size + size > self.max_bytes {
            return true;
        }

        self.current_batch.push(statement.sql.clone());
        self.current_size += size;
        self.current_rows += statement.row_count;
        false
    }

    /// Flush the current batch.
    ///
    /// Executes the joined batch, or records it in `collector` in dry-run
    /// mode without calling `executor`. The batch is reset either way, also
    /// when the executor fails. Returns the number of statements flushed.
    pub async fn flush<F, Fut>(
        &mut self,
        executor: &mut F,
        collector: Option<&mut QueryCollector>,
        metadata: Option<&QueryMetadata>,
    ) -> Result<usize>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.current_batch.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.current_batch);
        let size = std::mem::replace(&mut self.current_size, 0);
        let rows = std::mem::replace(&mut self.current_rows, 0);
        let count = batch.len();
        let joined = batch.join(&self.delimiter);

        if self.dry_run {
            if let Some(collector) = collector {
                match metadata {
                    Some(metadata) => collector.collect(joined, metadata, rows),
                    None => collector.add_dml(joined, rows, ""),
                }
            }
        } else {
            debug!(statements = count, size_bytes = size, "Executing statement batch");
            executor(joined).await?;
        }

        Ok(count)
    }

    /// Pack and flush every statement in input order.
    ///
    /// Returns the number of statements processed, which always equals the
    /// input length on success. An executor failure aborts the remaining
    /// statements of this call.
    pub async fn process<I, S, F, Fut>(
        &mut self,
        statements: I,
        mut executor: F,
        mut collector: Option<&mut QueryCollector>,
        metadata: Option<&QueryMetadata>,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<Statement>,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut processed = 0;

        for statement in statements {
            let statement = statement.into();
            if self.add(&statement) {
                processed += self
                    .flush(&mut executor, collector.as_deref_mut(), metadata)
                    .await?;
                // An empty batch accepts any statement, oversized ones included.
                self.add(&statement);
            }
        }

        processed += self
            .flush(&mut executor, collector.as_deref_mut(), metadata)
            .await?;

        Ok(processed)
    }
}
