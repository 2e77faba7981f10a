//! Validate command implementation.

use anyhow::Result;
use c2i_core::config::ConnectionType;
use c2i_core::Config;

/// Check the configuration and print a short summary of what it targets.
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;

    let target = match config.writer.connection {
        ConnectionType::Sql => format!(
            "sql engine {}://{}:{}",
            config.sql.http_scheme, config.sql.host, config.sql.port
        ),
        ConnectionType::ObjectStore => format!("warehouse {}", config.object_store.warehouse_path),
    };
    println!("Configuration is valid");
    println!(
        "  table: {} ({}, mode {}, batch size {})",
        config.writer.table, target, config.writer.mode, config.writer.batch_size
    );
    if config.writer.dry_run {
        println!("  dry run: nothing will be written");
    }
    Ok(())
}
