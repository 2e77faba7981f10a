//! Convert command implementation.

use crate::ExitCode;
use anyhow::{Context, Result};
use c2i_core::{Config, ConversionOrchestrator, JsonLinesSource, Schema, WriteMode};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Command-line values that replace their config file counterparts.
#[derive(Debug, Default)]
pub struct Overrides {
    pub table: Option<String>,
    pub mode: Option<WriteMode>,
    pub dry_run: bool,
    pub batch_size: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(table) = self.table {
            config.writer.table = table;
        }
        if let Some(mode) = self.mode {
            config.writer.mode = mode;
        }
        if self.dry_run {
            config.writer.dry_run = true;
        }
        if let Some(size) = self.batch_size {
            config.writer.batch_size = size;
        }
    }
}

/// Convert `input` into the configured table and print the result as JSON.
pub async fn run(
    mut config: Config,
    overrides: Overrides,
    input: &Path,
    schema_path: &Path,
) -> Result<ExitCode> {
    overrides.apply(&mut config);
    config.validate()?;

    let schema_json = tokio::fs::read_to_string(schema_path)
        .await
        .with_context(|| format!("reading schema {}", schema_path.display()))?;
    let schema = Schema::from_json(&schema_json)?;
    let mut source = JsonLinesSource::open(input, schema).await?;

    info!(
        table = %config.writer.table,
        mode = %config.writer.mode,
        connection = ?config.writer.connection,
        dry_run = config.writer.dry_run,
        input = %input.display(),
        "Starting conversion"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received SIGINT (Ctrl+C), stopping after the current batch");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let mut orchestrator = ConversionOrchestrator::from_config(&config)?
        .with_cancellation(Arc::clone(&cancel))
        .with_progress(Box::new(|percent| info!(percent, "Conversion progress")));

    let result = orchestrator.run(&mut source).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        return Ok(ExitCode::Success);
    }
    if cancel.load(Ordering::SeqCst) {
        return Ok(ExitCode::SignalInterrupt);
    }
    let message = result.error.unwrap_or_else(|| "conversion failed".to_string());
    Err(anyhow::anyhow!(message))
}
