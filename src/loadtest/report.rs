//! Console report for load-test iterations.

use std::path::Path;
use std::time::Duration;

use super::config::LoadTestConfig;
use super::export::SummaryRow;
use super::metrics::IterationStats;
use super::runner::RequestResult;

const RULE_WIDTH: usize = 70;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Print the run parameters
pub fn print_banner(config: &LoadTestConfig) {
    println!("\n{}", rule());
    println!("LOAD TEST - Timeline");
    println!("{}", rule());
    println!("Concurrent users           : {}", config.concurrent_users);
    println!("Requests per user          : {}", config.requests_per_user);
    println!("Total requests per run     : {}", config.requests_per_iteration());
    println!("Posts per timeline (limit) : {}", config.limit);
    println!("Iterations                 : {}", config.iterations);
    println!("Output file                : {}", config.output.display());
    println!("{}\n", rule());
}

/// Print the statistics of one iteration and return them.
/// Returns `None` when there is nothing to analyze.
pub fn print_results(
    results: &[RequestResult],
    total_duration: Duration,
    iteration: usize,
) -> Option<IterationStats> {
    if results.is_empty() {
        println!("No results to analyze.");
        return None;
    }

    let stats = IterationStats::from_results(results, total_duration);

    if stats.all_failed() {
        println!("\nAll requests failed!");
        for r in results {
            println!("   {}: {}", r.user, r.error.as_deref().unwrap_or(""));
        }
        return Some(stats);
    }

    println!("\n{}", rule());
    println!("RESULTS - Iteration {}", iteration);
    println!("{}", rule());
    println!(
        "Total test duration        : {:.2}s",
        stats.test_duration.as_secs_f64()
    );
    println!(
        "Successful requests        : {}/{}",
        stats.successful, stats.total
    );
    println!("Failed requests            : {}", stats.failed);

    println!("\nRESPONSE TIME:");
    if let Some(mean) = stats.mean_secs {
        println!("  Mean                     : {:.3}s", mean);
    }
    if let Some(latency) = &stats.latency {
        println!(
            "  p50 / p95 / p99          : {:.1}ms / {:.1}ms / {:.1}ms",
            latency.p50, latency.p95, latency.p99
        );
        println!(
            "  Min / Max                : {:.1}ms / {:.1}ms",
            latency.min, latency.max
        );
    }
    if let Some(avg_posts) = stats.avg_posts {
        println!("  Posts per timeline (avg) : {:.1}", avg_posts);
    }

    print_error_summary(&stats);

    tracing::info!(
        iteration,
        successful = stats.successful,
        failed = stats.failed,
        avg_time_ms = stats.avg_time_ms,
        "Iteration complete"
    );

    Some(stats)
}

/// Failures grouped by message
pub fn print_error_summary(stats: &IterationStats) {
    if stats.errors.is_empty() {
        return;
    }

    println!("\nERRORS ({}):", stats.failed);
    for error in &stats.errors {
        println!("  [{}x] {}", error.count, error.message);
    }
}

/// Print the row that was just appended to the CSV file
pub fn print_export(row: &SummaryRow, stats: &IterationStats, output: &Path) {
    println!("\nResults exported to {}", output.display());
    println!("  PARAM              : {}", row.param);
    println!("  AVG_TIME           : {}ms", row.avg_time_ms);
    println!("  RUN                : {}", row.run);
    println!("  FAILED             : {}", row.failed);
    println!(
        "  Successful requests: {}/{}",
        stats.successful, stats.total
    );
}
