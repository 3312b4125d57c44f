//! Configuration for a load-test run.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::LoadTestError;

/// Configuration for a load-test run
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    /// Number of distinct simulated users, also the worker pool size
    pub concurrent_users: usize,
    /// Sequential requests issued by each user per iteration
    pub requests_per_user: usize,
    /// Users are named `{user_prefix}1 ..= {user_prefix}{concurrent_users}`
    pub user_prefix: String,
    /// Maximum posts per timeline
    pub limit: usize,
    /// CSV file receiving one summary row per iteration
    pub output: PathBuf,
    /// Number of sequential iterations
    pub iterations: usize,
    /// Pause between iterations (not after the last one)
    pub iteration_pause: Duration,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            concurrent_users: 50,
            requests_per_user: 1,
            user_prefix: "user".to_string(),
            limit: 20,
            output: PathBuf::from("conc.csv"),
            iterations: 3,
            iteration_pause: Duration::from_secs(1),
        }
    }
}

impl LoadTestConfig {
    /// Reject configurations that cannot produce any request
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.concurrent_users == 0 || self.requests_per_user == 0 {
            return Err(LoadTestError::InvalidInput(
                "concurrent-users and requests-per-user must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Simulated user names, 1-based
    pub fn user_names(&self) -> Vec<String> {
        (1..=self.concurrent_users)
            .map(|i| format!("{}{}", self.user_prefix, i))
            .collect()
    }

    /// Requests issued per iteration
    pub fn requests_per_iteration(&self) -> usize {
        self.concurrent_users.saturating_mul(self.requests_per_user)
    }
}
