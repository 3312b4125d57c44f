//! Load driver with a bounded worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::config::LoadTestConfig;
use super::export::{self, SummaryRow};
use super::metrics::IterationStats;
use super::report;
use crate::error::LoadTestError;
use crate::timeline::TimelineSource;

/// Outcome of one timed timeline request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub user: String,
    pub duration: Duration,
    pub success: bool,
    pub post_count: usize,
    pub error: Option<String>,
}

/// Resolve one timeline and time it. Failures are captured in the result;
/// this never returns an error.
pub async fn execute_timeline_request(
    source: &dyn TimelineSource,
    user: &str,
    limit: usize,
) -> RequestResult {
    let start = Instant::now();
    let result = source.get_timeline(user, limit).await;
    let duration = start.elapsed();

    match result {
        Ok(posts) => RequestResult {
            user: user.to_string(),
            duration,
            success: true,
            post_count: posts.len(),
            error: None,
        },
        Err(e) => {
            tracing::debug!(user = user, error = %e, "Timeline request failed");
            RequestResult {
                user: user.to_string(),
                duration,
                success: false,
                post_count: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Issue `num_requests` requests for `user`, strictly one after another
pub async fn run_user_requests(
    source: &dyn TimelineSource,
    user: &str,
    num_requests: usize,
    limit: usize,
) -> Vec<RequestResult> {
    let mut results = Vec::new();
    for _ in 0..num_requests {
        results.push(execute_timeline_request(source, user, limit).await);
    }
    results
}

/// Results of one iteration, before aggregation
#[derive(Debug, Clone)]
pub struct IterationRun {
    pub results: Vec<RequestResult>,
    pub duration: Duration,
    /// Users whose task failed; their results are not in `results`
    pub dropped_users: Vec<String>,
}

/// What one iteration produced
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub iteration: usize,
    /// `None` when no result was collected at all
    pub stats: Option<IterationStats>,
    /// Row appended to the CSV file, `None` when nothing was exported
    pub exported: Option<SummaryRow>,
    pub dropped_users: Vec<String>,
}

/// Load driver that runs iterations of concurrent per-user request loops
pub struct LoadDriver {
    config: LoadTestConfig,
    source: Arc<dyn TimelineSource>,
}

impl LoadDriver {
    pub fn new(config: LoadTestConfig, source: Arc<dyn TimelineSource>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Run one iteration: one task per user, at most `concurrent_users` in
    /// flight, joined before returning.
    pub async fn run_single_test(&self) -> IterationRun {
        let semaphore = Arc::new(Semaphore::new(
            self.config.concurrent_users.min(Semaphore::MAX_PERMITS),
        ));
        let start = Instant::now();

        let mut handles = Vec::new();
        for user in self.config.user_names() {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let requests = self.config.requests_per_user;
            let limit = self.config.limit;
            let task_user = user.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                Ok::<_, tokio::sync::AcquireError>(
                    run_user_requests(source.as_ref(), &task_user, requests, limit).await,
                )
            });
            handles.push((user, handle));
        }

        let mut results = Vec::new();
        let mut dropped_users = Vec::new();

        // Wait for every task, even after failures
        for (user, handle) in handles {
            let error = match handle.await {
                Ok(Ok(user_results)) => {
                    results.extend(user_results);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            println!("Error for {}: {}", user, error);
            tracing::warn!(user = %user, error = %error, "User task failed, dropping its results");
            dropped_users.push(user);
        }

        IterationRun {
            results,
            duration: start.elapsed(),
            dropped_users,
        }
    }

    /// Run all iterations: report to the console and append one CSV row each.
    ///
    /// Only invalid input is fatal; export failures are reported and the run
    /// continues.
    pub async fn run(&self) -> Result<Vec<IterationOutcome>, LoadTestError> {
        self.config.validate()?;
        report::print_banner(&self.config);

        let iterations = self.config.iterations;
        let mut outcomes = Vec::with_capacity(iterations);

        for iteration in 1..=iterations {
            println!("\nRun {}/{}...", iteration, iterations);
            tracing::info!(iteration, iterations, "Starting load-test iteration");

            let run = self.run_single_test().await;

            let stats = report::print_results(&run.results, run.duration, iteration);
            let exported = match &stats {
                Some(stats) => self.export(stats),
                None => {
                    println!("\nNo results to export.");
                    None
                }
            };

            outcomes.push(IterationOutcome {
                iteration,
                stats,
                exported,
                dropped_users: run.dropped_users,
            });

            if iteration < iterations && !self.config.iteration_pause.is_zero() {
                tokio::time::sleep(self.config.iteration_pause).await;
            }
        }

        Ok(outcomes)
    }

    fn export(&self, stats: &IterationStats) -> Option<SummaryRow> {
        match export::export_to_csv(&self.config.output, self.config.concurrent_users, stats) {
            Ok(row) => {
                report::print_export(&row, stats, &self.config.output);
                Some(row)
            }
            Err(e) => {
                println!("\nError during CSV export: {}", e);
                tracing::error!(
                    output = %self.config.output.display(),
                    error = %e,
                    "CSV export failed"
                );
                None
            }
        }
    }
}
