//! Per-task progress and smoothed global throughput, one aggregator per
//! direction (download side, upload side).

pub mod aggregator;
pub mod progress_line;

pub use aggregator::{TelemetryAggregator, TelemetryConfig};
pub use progress_line::{ProgressLine, is_completion_line, parse_progress_line, parse_size};
