//! Conversion engine: batching, progress and metrics around a table write backend.

mod metrics;
mod orchestrator;
mod progress;

pub use metrics::ConversionMetrics;
pub use orchestrator::{build_backend, ConversionOrchestrator, ConversionResult, ConversionState};
pub use progress::{ProgressCallback, ProgressTracker};
