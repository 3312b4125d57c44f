//! Per-iteration statistics, with HdrHistogram latency percentiles.

use hdrhistogram::Histogram;
use std::time::Duration;

use super::runner::RequestResult;

/// Number of occurrences of one distinct error message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCount {
    pub message: String,
    pub count: usize,
}

/// Latency distribution of successful requests, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Aggregated view of one iteration's results
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Wall-clock duration of the whole iteration
    pub test_duration: Duration,
    /// Mean latency of successful requests in seconds, `None` without successes
    pub mean_secs: Option<f64>,
    /// Mean latency in whole milliseconds (truncated); 0 without successes
    pub avg_time_ms: u64,
    pub latency: Option<LatencySummary>,
    /// Mean timeline length over successful requests
    pub avg_posts: Option<f64>,
    /// Failures grouped by message, in first-seen order
    pub errors: Vec<ErrorCount>,
}

impl IterationStats {
    pub fn from_results(results: &[RequestResult], test_duration: Duration) -> Self {
        let successful: Vec<&RequestResult> = results.iter().filter(|r| r.success).collect();
        let failed = results.len() - successful.len();

        let mean_secs = if successful.is_empty() {
            None
        } else {
            let total: f64 = successful.iter().map(|r| r.duration.as_secs_f64()).sum();
            Some(total / successful.len() as f64)
        };

        let avg_time_ms = mean_secs.map(|s| (s * 1000.0) as u64).unwrap_or(0);

        let avg_posts = if successful.is_empty() {
            None
        } else {
            let total: usize = successful.iter().map(|r| r.post_count).sum();
            Some(total as f64 / successful.len() as f64)
        };

        Self {
            total: results.len(),
            successful: successful.len(),
            failed,
            test_duration,
            mean_secs,
            avg_time_ms,
            latency: latency_summary(&successful),
            avg_posts,
            errors: group_errors(results),
        }
    }

    /// `1` when at least one request failed in this iteration
    pub fn failed_flag(&self) -> u8 {
        u8::from(self.failed > 0)
    }

    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.successful == 0
    }
}

fn latency_summary(successful: &[&RequestResult]) -> Option<LatencySummary> {
    if successful.is_empty() {
        return None;
    }

    // Latencies up to 10 minutes with 3 significant figures, in microseconds
    let mut hist = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).ok()?;
    for result in successful {
        let us = result.duration.as_micros() as u64;
        hist.saturating_record(us.max(1));
    }

    let ms = |us: u64| us as f64 / 1000.0;
    Some(LatencySummary {
        min: ms(hist.min()),
        max: ms(hist.max()),
        p50: ms(hist.value_at_percentile(50.0)),
        p95: ms(hist.value_at_percentile(95.0)),
        p99: ms(hist.value_at_percentile(99.0)),
    })
}

fn group_errors(results: &[RequestResult]) -> Vec<ErrorCount> {
    let mut errors: Vec<ErrorCount> = Vec::new();
    for result in results.iter().filter(|r| !r.success) {
        let message = result.error.clone().unwrap_or_default();
        match errors.iter_mut().find(|e| e.message == message) {
            Some(entry) => entry.count += 1,
            None => errors.push(ErrorCount { message, count: 1 }),
        }
    }
    errors
}
