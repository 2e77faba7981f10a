//! c2i CLI - write row files into Iceberg tables.

use anyhow::Result;
use c2i_core::config::LogFormat;
use c2i_core::Config;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Input rows or schema rejected
    InputError = 2,
    /// Table write failed (SQL engine or object store)
    WriteError = 3,
    /// Metadata commit failed after retries
    CommitError = 4,
    /// Engine or storage unreachable
    ConnectionError = 5,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code, looking through stage annotations.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<c2i_core::Error>() {
            return Self::from_core(core);
        }

        // Failed conversions only carry the rendered error message
        let error_str = error.to_string().to_lowercase();
        if error_str.contains("metadata commit") {
            ExitCode::CommitError
        } else if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("connection error") {
            ExitCode::ConnectionError
        } else if error_str.contains("schema")
            || error_str.contains("validation")
            || error_str.contains("json")
        {
            ExitCode::InputError
        } else if error_str.contains("write error") {
            ExitCode::WriteError
        } else {
            ExitCode::RuntimeError
        }
    }

    fn from_core(error: &c2i_core::Error) -> Self {
        use c2i_core::Error;

        match error {
            Error::Config(_) => ExitCode::ConfigError,
            Error::Schema(_) | Error::Validation(_) | Error::Serialization(_) => {
                ExitCode::InputError
            }
            Error::Write(_) => ExitCode::WriteError,
            Error::MetadataCommit(_) => ExitCode::CommitError,
            Error::Connection(_) => ExitCode::ConnectionError,
            Error::Cancelled => ExitCode::SignalInterrupt,
            Error::Stage { source, .. } => Self::from_core(source),
            Error::Io(_) => ExitCode::RuntimeError,
        }
    }
}

#[derive(Parser)]
#[command(name = "c2i")]
#[command(about = "Write row files into Iceberg tables", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a JSON lines file into a table
    Convert {
        /// Newline-delimited JSON rows
        #[arg(long)]
        input: PathBuf,

        /// Schema document (JSON) describing the rows
        #[arg(long)]
        schema: PathBuf,

        /// Override the target table
        #[arg(long)]
        table: Option<String>,

        /// Override the write mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Record intended operations without executing them
        #[arg(long)]
        dry_run: bool,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Append,
    Overwrite,
}

impl From<ModeArg> for c2i_core::WriteMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Append => c2i_core::WriteMode::Append,
            ModeArg::Overwrite => c2i_core::WriteMode::Overwrite,
        }
    }
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log format comes from the config file when it parses; JSON otherwise
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Json);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so stdout carries only the result document
    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Convert {
            input,
            schema,
            table,
            mode,
            dry_run,
            batch_size,
        } => {
            let config = load_config(&cli.config)?;
            let overrides = commands::convert::Overrides {
                table,
                mode: mode.map(Into::into),
                dry_run,
                batch_size,
            };
            commands::convert::run(config, overrides, &input, &schema).await
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            commands::validate::run(&config)?;
            Ok(ExitCode::Success)
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use c2i_core::{CommitError, WriteError};

    #[test]
    fn test_exit_code_for_core_errors() {
        let err = anyhow::Error::new(c2i_core::Error::Config("no table".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::Error::new(c2i_core::Error::MetadataCommit(
            CommitError::VersionConflict {
                expected: 1,
                actual: 2,
            },
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::CommitError);
    }

    #[test]
    fn test_exit_code_looks_through_stage() {
        let err =
            c2i_core::Error::Write(WriteError::Statement("boom".into())).at_stage("write", Some(3));
        assert_eq!(
            ExitCode::from_error(&anyhow::Error::new(err)),
            ExitCode::WriteError
        );

        let err = c2i_core::Error::Cancelled.at_stage("write", Some(1));
        assert_eq!(
            ExitCode::from_error(&anyhow::Error::new(err)),
            ExitCode::SignalInterrupt
        );
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("TOML parse error at line 1");
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);
        let err = anyhow::anyhow!("write failed at batch 2: Write error: Statement failed: x");
        assert_eq!(ExitCode::from_error(&err), ExitCode::WriteError);
        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_cli_parses_convert() {
        let cli = Cli::try_parse_from([
            "c2i", "-c", "c.toml", "convert", "--input", "rows.jsonl", "--schema", "s.json",
            "--mode", "overwrite", "--dry-run", "--batch-size", "50",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        match cli.command {
            Commands::Convert {
                mode,
                dry_run,
                batch_size,
                ..
            } => {
                assert!(matches!(mode, Some(ModeArg::Overwrite)));
                assert!(dry_run);
                assert_eq!(batch_size, Some(50));
            }
            Commands::Validate => panic!("expected convert"),
        }
    }
}
