//! Conversion timing and throughput.

use serde::Serialize;
use std::time::Duration;

/// Per-conversion throughput metrics. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionMetrics {
    pub total_rows: usize,
    pub total_processing_time: f64,
    /// Rows per second over the whole conversion
    pub processing_rate: f64,
    pub total_batches: usize,
    pub avg_batch_size: f64,
    pub avg_batch_time: f64,
    pub batch_times: Vec<f64>,
    pub batch_sizes: Vec<usize>,
}

impl ConversionMetrics {
    pub fn record_batch(&mut self, rows: usize, elapsed: Duration) {
        self.total_rows += rows;
        self.total_batches += 1;
        self.batch_sizes.push(rows);
        self.batch_times.push(elapsed.as_secs_f64());

        let n = self.total_batches as f64;
        self.avg_batch_size = self.total_rows as f64 / n;
        self.avg_batch_time = self.batch_times.iter().sum::<f64>() / n;
    }

    /// Close the metrics with the conversion's wall-clock time.
    pub fn finish(&mut self, elapsed: Duration) {
        self.total_processing_time = elapsed.as_secs_f64();
        self.processing_rate = if self.total_processing_time > 0.0 {
            self.total_rows as f64 / self.total_processing_time
        } else {
            0.0
        };
    }
}
