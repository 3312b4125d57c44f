//! Load test for the get-timeline read path.
//!
//! This module provides:
//! - Request runner that times one timeline resolution
//! - Load driver with a bounded worker pool, one task per simulated user
//! - Per-iteration statistics (mean, HdrHistogram percentiles, error groups)
//! - Console report and CSV export with per-parameter run index

pub mod config;
pub mod export;
pub mod metrics;
pub mod report;
pub mod runner;

pub use config::LoadTestConfig;
pub use export::{export_to_csv, next_run_index, SummaryRow, CSV_HEADER};
pub use metrics::{ErrorCount, IterationStats, LatencySummary};
pub use runner::{
    execute_timeline_request, run_user_requests, IterationOutcome, IterationRun, LoadDriver,
    RequestResult,
};
